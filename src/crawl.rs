use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    cache::{retry_after_deadline, DelayCache, VisitCache},
    error::CheckError,
    events::{self, CrawlEvent},
    extract,
    probe::{self, ProbeOutcome, ProbeResponse},
    queue::WorkQueue,
    server::{self, ServerOptions},
    skip::{SkipPolicy, SkipPredicate},
    util::{is_url_like, now_unix_millis, strip_fragment},
};

pub const DEFAULT_CONCURRENCY: usize = 100;

/// Effective configuration for one run.
#[derive(Clone)]
pub struct CheckOptions {
    /// Starting URLs, or local paths / globs when none of them are URLs.
    pub paths: Vec<String>,
    /// Maximum number of link checks in flight at once.
    pub concurrency: usize,
    /// Follow links into same-origin pages under the starting path.
    pub recurse: bool,
    /// Per-request deadline. `None` disables the client-side timeout.
    pub timeout: Option<Duration>,
    /// Regex patterns; matching URLs are reported as skipped, never probed.
    pub links_to_skip: Vec<String>,
    /// Async skip check, consulted alongside the regex list.
    pub skip_predicate: Option<SkipPredicate>,
    /// Serve `.md` files as HTML in local mode. `None` means enabled when
    /// any input path ends in `.md`.
    pub markdown: Option<bool>,
    /// Directory served in local mode; derived from the inputs when unset.
    pub server_root: Option<PathBuf>,
    /// Let the local server render directory listings.
    pub directory_listing: bool,
    /// Fixed local server port; random in [5000, 6000) when unset.
    pub port: Option<u16>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            recurse: false,
            timeout: None,
            links_to_skip: Vec::new(),
            skip_predicate: None,
            markdown: None,
            server_root: None,
            directory_listing: false,
            port: None,
        }
    }
}

impl fmt::Debug for CheckOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckOptions")
            .field("paths", &self.paths)
            .field("concurrency", &self.concurrency)
            .field("recurse", &self.recurse)
            .field("timeout", &self.timeout)
            .field("links_to_skip", &self.links_to_skip)
            .field("skip_predicate", &self.skip_predicate.as_ref().map(|_| "<fn>"))
            .field("markdown", &self.markdown)
            .field("server_root", &self.server_root)
            .field("directory_listing", &self.directory_listing)
            .field("port", &self.port)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LinkState {
    Ok,
    Broken,
    Skipped,
}

/// One structured record of why a link failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum FailureDetail {
    /// DNS, connect, TLS, timeout, or mid-body I/O failure.
    Transport { message: String },
    /// A response arrived with a non-success status.
    Status { status: u16 },
    /// The href did not resolve into a URL; nothing was probed.
    InvalidUrl { href: String },
}

/// The outcome of checking one URL. `url` is a string so links whose href
/// never parsed into a URL can still be reported.
#[derive(Debug, Clone, Serialize)]
pub struct LinkResult {
    pub url: String,
    pub status: u16,
    pub state: LinkState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_details: Vec<FailureDetail>,
}

/// A unit of crawl work, passed by value through the queue. `crawl` selects
/// between a full fetch-and-recurse and a reachability-only probe.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub url: Url,
    pub crawl: bool,
    pub parent: Option<Url>,
    /// The original entry URL; recursion is gated on staying under it.
    pub root_path: Url,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub passed: bool,
    pub links: Vec<LinkResult>,
}

struct CrawlState {
    client: reqwest::Client,
    queue: WorkQueue,
    skip: SkipPolicy,
    visited: VisitCache,
    delays: DelayCache,
    results: Mutex<Vec<LinkResult>>,
    events: broadcast::Sender<CrawlEvent>,
    recurse: bool,
    timeout: Option<Duration>,
}

impl CrawlState {
    fn record(&self, result: LinkResult) {
        self.results.lock().expect("results lock").push(result.clone());
        let _ = self.events.send(CrawlEvent::Link(result));
    }
}

/// Crawl driver. Create one, optionally [`subscribe`](Self::subscribe) for
/// streaming events, then [`check`](Self::check).
pub struct LinkChecker {
    events: broadcast::Sender<CrawlEvent>,
}

impl LinkChecker {
    pub fn new() -> Self {
        Self {
            events: events::channel(),
        }
    }

    /// Events for every finished link and every page about to be crawled.
    pub fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.events.subscribe()
    }

    /// Check every starting path, recursing into same-origin pages when
    /// configured, and return the collected results once the queue is idle.
    pub async fn check(&self, options: CheckOptions) -> Result<CheckResult, CheckError> {
        if options.paths.is_empty() {
            return Err(CheckError::EmptyPaths);
        }

        let remote = options.paths.iter().filter(|p| is_url_like(p)).count();
        if remote > 0 && remote < options.paths.len() {
            return Err(CheckError::MixedInputs);
        }
        let local_mode = remote == 0;
        if !local_mode && options.server_root.is_some() {
            return Err(CheckError::ServerRootWithRemote);
        }

        let mut local_server = None;
        let roots: Vec<Url> = if local_mode {
            let root = server::derive_root(&options.paths, options.server_root.as_deref());
            let relative = server::resolve_local_paths(&options.paths, &root)?;
            let markdown = options
                .markdown
                .unwrap_or_else(|| options.paths.iter().any(|p| p.ends_with(".md")));
            let srv = server::start(ServerOptions {
                root: root.clone(),
                port: options.port,
                markdown,
                directory_listing: options.directory_listing,
            })
            .await?;
            info!(root = %root.display(), base = %srv.base_url(), "serving local files");
            let urls = relative
                .iter()
                .map(|rel| srv.base_url().join(rel).expect("relative path url"))
                .collect();
            local_server = Some(srv);
            urls
        } else {
            let mut urls = Vec::with_capacity(options.paths.len());
            for path in &options.paths {
                let url =
                    Url::parse(path.trim()).map_err(|_| CheckError::InvalidUrl(path.clone()))?;
                urls.push(strip_fragment(url));
            }
            urls
        };

        let state = Arc::new(CrawlState {
            client: probe::build_client()?,
            queue: WorkQueue::new(options.concurrency),
            skip: SkipPolicy::new(&options.links_to_skip, options.skip_predicate.clone())?,
            visited: VisitCache::new(),
            delays: DelayCache::new(),
            results: Mutex::new(Vec::new()),
            events: self.events.clone(),
            recurse: options.recurse,
            timeout: options.timeout,
        });

        info!(targets = roots.len(), recurse = state.recurse, "starting crawl");
        for root in roots {
            if state.visited.insert(&root) {
                let task = CrawlTask {
                    url: root.clone(),
                    crawl: true,
                    parent: None,
                    root_path: root,
                };
                enqueue(Arc::clone(&state), task, None);
            }
        }

        state.queue.on_idle().await;

        if let Some(srv) = local_server {
            srv.stop().await;
        }

        let links = {
            let mut guard = state.results.lock().expect("results lock");
            std::mem::take(&mut *guard)
        };
        let passed = !links.iter().any(|l| l.state == LinkState::Broken);
        info!(checked = links.len(), passed, "crawl finished");
        Ok(CheckResult { passed, links })
    }
}

impl Default for LinkChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience over [`LinkChecker::check`].
pub async fn check(options: CheckOptions) -> Result<CheckResult, CheckError> {
    LinkChecker::new().check(options).await
}

fn enqueue(state: Arc<CrawlState>, task: CrawlTask, delay: Option<Duration>) {
    let queue = state.queue.clone();
    queue.add(async move { run_task(state, task).await }.boxed(), delay);
}

async fn run_task(state: Arc<CrawlState>, task: CrawlTask) {
    let url_str = task.url.as_str().to_string();

    if !matches!(task.url.scheme(), "http" | "https") {
        debug!(url = %url_str, "skipping non-http scheme");
        state.record(skipped_result(&task));
        return;
    }

    if state.skip.should_skip(&url_str).await {
        debug!(url = %url_str, "skipping by configured policy");
        state.record(skipped_result(&task));
        return;
    }

    // Host under back-off: put the task back with the remaining delay.
    if let Some(host) = task.url.host_str() {
        if let Some(not_before) = state.delays.check(host) {
            let now = now_unix_millis();
            if not_before > now {
                debug!(url = %url_str, wait_ms = not_before - now, "host backing off, deferring");
                enqueue(
                    Arc::clone(&state),
                    task.clone(),
                    Some(Duration::from_millis(not_before - now)),
                );
                return;
            }
            state.delays.evict(host);
        }
    }

    let outcome = probe::probe(&state.client, &task.url, task.crawl, state.timeout).await;

    let (response, errors) = match outcome {
        ProbeOutcome::Response { response, errors } => (Some(response), errors),
        ProbeOutcome::Failure { errors } => (None, errors),
    };

    if let Some(resp) = &response {
        if resp.status == 429 {
            if let Some(deadline) = rate_limit_deadline(resp) {
                if let Some(host) = task.url.host_str() {
                    let now = now_unix_millis();
                    state.delays.set(host, deadline);
                    warn!(
                        url = %url_str,
                        wait_ms = deadline.saturating_sub(now),
                        "rate limited, retrying after delay"
                    );
                    enqueue(
                        Arc::clone(&state),
                        task.clone(),
                        Some(Duration::from_millis(deadline.saturating_sub(now))),
                    );
                    return;
                }
            }
        }
    }

    match response {
        None => {
            state.record(LinkResult {
                url: url_str,
                status: 0,
                state: LinkState::Broken,
                parent: parent_string(&task),
                failure_details: errors,
            });
        }
        Some(resp) => {
            let ok = (200..300).contains(&resp.status);
            let mut failure_details = Vec::new();
            if !ok {
                failure_details = errors;
                failure_details.push(FailureDetail::Status {
                    status: resp.status,
                });
            }
            debug!(url = %url_str, status = resp.status, ok, "checked");
            state.record(LinkResult {
                url: url_str,
                status: resp.status,
                state: if ok { LinkState::Ok } else { LinkState::Broken },
                parent: parent_string(&task),
                failure_details,
            });

            if task.crawl && state.recurse && probe::is_html(&resp) {
                crawl_page(&state, &task, &resp);
            }
        }
    }
}

/// Deadline from a 429's `Retry-After` header, if it carries a usable one.
fn rate_limit_deadline(response: &ProbeResponse) -> Option<u64> {
    let value = response
        .headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?;
    retry_after_deadline(value, now_unix_millis())
}

fn crawl_page(state: &Arc<CrawlState>, task: &CrawlTask, resp: &ProbeResponse) {
    let _ = state.events.send(CrawlEvent::PageStart(task.url.clone()));

    // Relative links resolve against the final URL so redirected pages work.
    let base = &resp.final_url;
    let links = extract::extract_links(&resp.body, base);
    debug!(url = %task.url, links = links.len(), "extracted links");

    for link in links {
        match link.url {
            None => {
                state.record(LinkResult {
                    url: link.href.clone(),
                    status: 0,
                    state: LinkState::Broken,
                    parent: Some(task.url.as_str().to_string()),
                    failure_details: vec![FailureDetail::InvalidUrl { href: link.href }],
                });
            }
            Some(child) => {
                // Same-origin recursion wants both the string prefix and the
                // host to match; the prefix check is deliberately sensitive
                // to trailing slashes.
                let child_crawl = state.recurse
                    && child.as_str().starts_with(task.root_path.as_str())
                    && child.host_str() == task.root_path.host_str();
                if state.visited.insert(&child) {
                    enqueue(
                        Arc::clone(state),
                        CrawlTask {
                            url: child,
                            crawl: child_crawl,
                            parent: Some(task.url.clone()),
                            root_path: task.root_path.clone(),
                        },
                        None,
                    );
                }
            }
        }
    }
}

fn skipped_result(task: &CrawlTask) -> LinkResult {
    LinkResult {
        url: task.url.as_str().to_string(),
        status: 0,
        state: LinkState::Skipped,
        parent: parent_string(task),
        failure_details: Vec::new(),
    }
}

fn parent_string(task: &CrawlTask) -> Option<String> {
    task.parent.as_ref().map(|p| p.as_str().to_string())
}
