use chrono::DateTime;
use dashmap::{DashMap, DashSet};
use url::Url;

/// Set of URLs already enqueued in the current run. Insertion is the atomic
/// check-and-add that gates every enqueue, so a URL can never be queued twice
/// even when pages referencing it are crawled concurrently.
#[derive(Debug, Default)]
pub struct VisitCache {
    inner: DashSet<String>,
}

impl VisitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the URL was not yet present.
    pub fn insert(&self, url: &Url) -> bool {
        self.inner.insert(url.as_str().to_string())
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.inner.contains(url.as_str())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Per-host "do not probe before" deadlines, fed by 429 `Retry-After`
/// responses and consulted before every probe.
#[derive(Debug, Default)]
pub struct DelayCache {
    inner: DashMap<String, u64>,
}

impl DelayCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline in epoch milliseconds, if one is recorded for the host.
    pub fn check(&self, host: &str) -> Option<u64> {
        self.inner.get(host).map(|v| *v)
    }

    /// Record a deadline. An existing later deadline wins; deadlines only
    /// ever move forward.
    pub fn set(&self, host: &str, not_before_ms: u64) {
        self.inner
            .entry(host.to_string())
            .and_modify(|v| *v = (*v).max(not_before_ms))
            .or_insert(not_before_ms);
    }

    pub fn evict(&self, host: &str) {
        self.inner.remove(host);
    }
}

/// Resolve a `Retry-After` header value into an absolute epoch-milliseconds
/// deadline: either a non-negative integer number of seconds, or an
/// HTTP-date. Returns `None` when the value parses as neither, in which case
/// the 429 is treated as a terminal status.
pub fn retry_after_deadline(value: &str, now_ms: u64) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(now_ms + secs * 1000);
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    u64::try_from(date.timestamp_millis()).ok()
}
