use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode, Uri},
    response::Response,
    routing::get,
    Router,
};
use rand::Rng;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::debug;
use url::Url;

use crate::error::CheckError;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Directory the server is rooted at.
    pub root: PathBuf,
    /// Fixed port; a random one in [5000, 6000) is picked when unset.
    pub port: Option<u16>,
    /// Convert `.md` files to HTML on the fly.
    pub markdown: bool,
    /// Render directory listings for directories without an `index.html`.
    pub directory_listing: bool,
}

#[derive(Debug)]
struct ServeState {
    root: PathBuf,
    markdown: bool,
    directory_listing: bool,
}

/// A running static server for local-mode runs. Torn down once the crawl
/// queue reaches idle.
#[derive(Debug)]
pub struct LocalServer {
    base_url: Url,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl LocalServer {
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Gracefully stop the server and wait for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Start a static file server bound to `127.0.0.1`, serving `opts.root`.
pub async fn start(opts: ServerOptions) -> Result<LocalServer, CheckError> {
    let listener = bind(opts.port).await?;
    let addr = listener.local_addr()?;
    let base_url =
        Url::parse(&format!("http://localhost:{}/", addr.port())).expect("valid base url");

    let state = Arc::new(ServeState {
        root: opts.root,
        markdown: opts.markdown,
        directory_listing: opts.directory_listing,
    });
    let app = Router::new().fallback(get(serve_path)).with_state(state);

    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await
    });

    Ok(LocalServer {
        base_url,
        shutdown: Some(tx),
        task,
    })
}

async fn bind(port: Option<u16>) -> Result<TcpListener, CheckError> {
    if let Some(port) = port {
        return Ok(TcpListener::bind(("127.0.0.1", port)).await?);
    }
    let mut last_err = None;
    for _ in 0..16 {
        let port: u16 = rand::rng().random_range(5000..6000);
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok(listener),
            Err(err) => last_err = Some(err),
        }
    }
    Err(CheckError::Server(last_err.expect("bind was attempted")))
}

/// Root directory served when none was configured: a single input naming an
/// existing directory serves that directory, anything else serves the
/// working directory.
pub fn derive_root(paths: &[String], configured: Option<&Path>) -> PathBuf {
    if let Some(root) = configured {
        return root.to_path_buf();
    }
    if let [only] = paths {
        let path = Path::new(only);
        if path.is_dir() {
            return path.to_path_buf();
        }
    }
    PathBuf::from(".")
}

/// Expand the user-supplied paths against the server root, returning
/// root-relative URL paths (percent-encoded, `/`-separated, directories with
/// a trailing slash). Patterns that match nothing are configuration errors.
pub fn resolve_local_paths(paths: &[String], root: &Path) -> Result<Vec<String>, CheckError> {
    let mut out = Vec::new();
    for input in paths {
        let direct = Path::new(input);
        if direct == root {
            out.push(String::new());
            continue;
        }

        let pattern_path = if direct.is_absolute() {
            direct.to_path_buf()
        } else {
            root.join(input)
        };

        let mut matches: Vec<PathBuf> = Vec::new();
        if pattern_path.exists() {
            matches.push(pattern_path);
        } else {
            let pattern = pattern_path.to_string_lossy().into_owned();
            let walker = glob::glob(&pattern).map_err(|source| CheckError::InvalidGlob {
                pattern: input.clone(),
                source,
            })?;
            matches.extend(walker.flatten());
            if matches.is_empty() {
                return Err(CheckError::EmptyGlob(input.clone()));
            }
        }

        for matched in matches {
            let rel = matched
                .strip_prefix(root)
                .map_err(|_| CheckError::OutsideServerRoot(matched.clone()))?;
            let mut encoded = rel
                .components()
                .map(|c| urlencoding::encode(&c.as_os_str().to_string_lossy()).into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if matched.is_dir() && !encoded.is_empty() {
                encoded.push('/');
            }
            out.push(encoded);
        }
    }
    Ok(out)
}

async fn serve_path(State(state): State<Arc<ServeState>>, uri: Uri) -> Response {
    let decoded = match urlencoding::decode(uri.path()) {
        Ok(d) => d.into_owned(),
        Err(_) => return status_response(StatusCode::BAD_REQUEST),
    };

    let Some(rel) = sanitize_request_path(&decoded) else {
        return status_response(StatusCode::NOT_FOUND);
    };
    let full = state.root.join(&rel);
    debug!(path = %decoded, file = %full.display(), "serving");

    match tokio::fs::metadata(&full).await {
        Ok(meta) if meta.is_dir() => serve_directory(&state, &full, &decoded).await,
        Ok(_) => serve_file(&state, &full).await,
        Err(_) => status_response(StatusCode::NOT_FOUND),
    }
}

/// Rebuild the request path from components, refusing anything that would
/// escape the server root.
fn sanitize_request_path(path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => out.push(s),
        }
    }
    Some(out)
}

async fn serve_directory(state: &ServeState, dir: &Path, request_path: &str) -> Response {
    let index = dir.join("index.html");
    if tokio::fs::metadata(&index).await.is_ok() {
        return serve_file(state, &index).await;
    }
    if !state.directory_listing {
        return status_response(StatusCode::NOT_FOUND);
    }

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return status_response(StatusCode::NOT_FOUND),
    };
    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();

    let base = if request_path.ends_with('/') {
        request_path.to_string()
    } else {
        format!("{request_path}/")
    };
    let mut body = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>Index of {base}</title></head><body><h1>Index of {base}</h1><ul>"
    );
    for name in names {
        let (stem, suffix) = match name.strip_suffix('/') {
            Some(stem) => (stem, "/"),
            None => (name.as_str(), ""),
        };
        let href = format!("{base}{}{suffix}", urlencoding::encode(stem));
        body.push_str(&format!("<li><a href=\"{href}\">{name}</a></li>"));
    }
    body.push_str("</ul></body></html>");
    html_response(body)
}

async fn serve_file(state: &ServeState, path: &Path) -> Response {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(_) => return status_response(StatusCode::NOT_FOUND),
    };
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    if ext == "md" && state.markdown {
        let text = String::from_utf8_lossy(&bytes);
        return html_response(render_markdown(&text));
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(&ext))
        .body(Body::from(bytes))
        .expect("static response")
}

fn render_markdown(text: &str) -> String {
    let mut options = pulldown_cmark::Options::empty();
    options.insert(pulldown_cmark::Options::ENABLE_TABLES);
    options.insert(pulldown_cmark::Options::ENABLE_STRIKETHROUGH);
    let parser = pulldown_cmark::Parser::new_ext(text, options);
    let mut html = String::with_capacity(text.len() * 2);
    pulldown_cmark::html::push_html(&mut html, parser);
    format!("<!doctype html><html><head><meta charset=\"utf-8\"></head><body>{html}</body></html>")
}

fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "html" | "htm" => "text/html; charset=utf-8",
        "xhtml" => "application/xhtml+xml",
        "md" | "markdown" | "txt" => "text/plain; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn html_response(body: String) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .expect("static response")
}

fn status_response(status: StatusCode) -> Response {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .expect("static response")
}
