use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{header, redirect, Client, Method};
use tracing::debug;
use url::Url;

use crate::crawl::FailureDetail;

/// Sent on every attempt; some servers answer bot-looking agents with 403s.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const MAX_REDIRECTS: usize = 10;

/// A response observed by the probe ladder. `body` is only populated when
/// the caller asked for one; otherwise the stream was drained and discarded.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: header::HeaderMap,
    pub final_url: Url,
    pub body: String,
}

/// Outcome of probing one URL: the last response the ladder produced (plus
/// any transport errors hit along the way), or transport errors only.
#[derive(Debug)]
pub enum ProbeOutcome {
    Response {
        response: ProbeResponse,
        errors: Vec<FailureDetail>,
    },
    Failure {
        errors: Vec<FailureDetail>,
    },
}

enum BodyMode {
    Discard,
    Text,
}

pub fn build_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect::Policy::limited(MAX_REDIRECTS))
        .brotli(true)
        .gzip(true)
        .deflate(true)
        .build()
}

/// Issue a probe with the method/response-type fallback ladder:
///
/// 1. `HEAD` when no body is wanted, else `GET` with the body read as text.
/// 2. On 405, retry as `GET`.
/// 3. On a transport error or non-2xx status with no body wanted, one final
///    `GET` reading the body as text; some servers mishandle `HEAD` and
///    streamed reads.
///
/// HTTP error statuses are data here, never errors; only transport failures
/// (DNS, connect, TLS, timeout, redirect loops) land in the error list.
pub async fn probe(
    client: &Client,
    url: &Url,
    want_body: bool,
    timeout: Option<Duration>,
) -> ProbeOutcome {
    let mut errors = Vec::new();
    let mut last: Option<ProbeResponse> = None;

    let method = if want_body { Method::GET } else { Method::HEAD };
    let mode = if want_body {
        BodyMode::Text
    } else {
        BodyMode::Discard
    };
    match attempt(client, url, method, mode, timeout).await {
        Ok(response) => last = Some(response),
        Err(err) => errors.push(err),
    }

    if matches!(&last, Some(r) if r.status == 405) {
        debug!(url = %url, "server rejected probe method, retrying as GET");
        let mode = if want_body {
            BodyMode::Text
        } else {
            BodyMode::Discard
        };
        match attempt(client, url, Method::GET, mode, timeout).await {
            Ok(response) => last = Some(response),
            Err(err) => errors.push(err),
        }
    }

    let unhappy = match &last {
        None => true,
        Some(r) => !(200..300).contains(&r.status),
    };
    if unhappy && !want_body {
        debug!(url = %url, "probe unhappy, retrying as GET with text body");
        match attempt(client, url, Method::GET, BodyMode::Text, timeout).await {
            Ok(response) => last = Some(response),
            Err(err) => errors.push(err),
        }
    }

    match last {
        Some(response) => ProbeOutcome::Response { response, errors },
        None => ProbeOutcome::Failure { errors },
    }
}

async fn attempt(
    client: &Client,
    url: &Url,
    method: Method,
    mode: BodyMode,
    timeout: Option<Duration>,
) -> Result<ProbeResponse, FailureDetail> {
    let mut request = client.request(method, url.clone());
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.map_err(transport)?;

    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let final_url = response.url().clone();

    let body = match mode {
        BodyMode::Text => response.text().await.map_err(transport)?,
        BodyMode::Discard => {
            drain(response).await?;
            String::new()
        }
    };

    Ok(ProbeResponse {
        status,
        headers,
        final_url,
        body,
    })
}

async fn drain(response: reqwest::Response) -> Result<(), FailureDetail> {
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        chunk.map_err(transport)?;
    }
    Ok(())
}

fn transport(err: reqwest::Error) -> FailureDetail {
    // reqwest's top-level Display omits the cause; keep the chain.
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    FailureDetail::Transport { message }
}

/// Whether a response declared an HTML payload.
pub fn is_html(response: &ProbeResponse) -> bool {
    let Some(content_type) = response
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
}
