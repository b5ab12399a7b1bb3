//! Scripted HTTP fixture for crawl tests: each (method, path) route serves
//! its replies in sequence, repeating the last one, and counts hits. Unlike
//! a plain mock this allows a URL to answer 429 first and 200 second.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self::status(200)
            .header("content-type", "text/html; charset=utf-8")
            .body(body)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }
}

#[derive(Debug)]
struct Route {
    replies: Vec<Reply>,
    served: usize,
}

impl Route {
    fn next(&mut self) -> Reply {
        let idx = self.served.min(self.replies.len() - 1);
        self.served += 1;
        self.replies[idx].clone()
    }
}

pub struct ScriptedServer {
    base: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    _accept: JoinHandle<()>,
}

impl ScriptedServer {
    pub async fn start(script: Vec<(&str, &str, Vec<Reply>)>) -> Self {
        let mut routes = HashMap::new();
        for (method, path, replies) in script {
            assert!(!replies.is_empty(), "route {method} {path} needs a reply");
            routes.insert(format!("{method} {path}"), Route { replies, served: 0 });
        }
        let routes = Arc::new(Mutex::new(routes));
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));

        let accept_routes = Arc::clone(&routes);
        let accept_hits = Arc::clone(&hits);
        let accept = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let routes = Arc::clone(&accept_routes);
                let hits = Arc::clone(&accept_hits);
                tokio::spawn(async move {
                    handle(stream, routes, hits).await;
                });
            }
        });

        Self {
            base,
            hits,
            _accept: accept,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn hits(&self, method: &str, path: &str) -> usize {
        self.hits
            .lock()
            .unwrap()
            .get(&format!("{method} {path}"))
            .copied()
            .unwrap_or(0)
    }
}

async fn handle(
    mut stream: TcpStream,
    routes: Arc<Mutex<HashMap<String, Route>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let Ok(n) = stream.read(&mut chunk).await else {
            return;
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut request_line = text.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("").to_string();
    let path = request_line.next().unwrap_or("").to_string();
    let key = format!("{method} {path}");

    *hits.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

    let reply = {
        let mut routes = routes.lock().unwrap();
        match routes.get_mut(&key) {
            Some(route) => Some(route.next()),
            // HEAD falls back to the GET script, the way static servers
            // answer HEAD from their GET handler.
            None if method == "HEAD" => routes.get_mut(&format!("GET {path}")).map(Route::next),
            None => None,
        }
    };
    let reply = reply.unwrap_or_else(|| Reply::status(404));

    let mut head = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
    head.push_str(&format!("content-length: {}\r\n", reply.body.len()));
    for (name, value) in &reply.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("connection: close\r\n\r\n");

    let mut bytes = head.into_bytes();
    if method != "HEAD" {
        bytes.extend_from_slice(reply.body.as_bytes());
    }
    let _ = stream.write_all(&bytes).await;
    let _ = stream.shutdown().await;
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        _ => "Status",
    }
}
