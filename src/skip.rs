use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use regex::Regex;

use crate::error::CheckError;

/// Caller-supplied asynchronous skip check, applied to the normalized URL
/// string before any probe is issued.
pub type SkipPredicate = Arc<dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync>;

/// Decides whether a URL is reported as skipped instead of probed. The
/// non-http(s) scheme gate lives in the coordinator; this covers the
/// caller-configured regex list and predicate.
pub struct SkipPolicy {
    patterns: Vec<Regex>,
    predicate: Option<SkipPredicate>,
}

impl SkipPolicy {
    pub fn new(patterns: &[String], predicate: Option<SkipPredicate>) -> Result<Self, CheckError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let re = Regex::new(pattern).map_err(|source| CheckError::InvalidSkipPattern {
                pattern: pattern.clone(),
                source,
            })?;
            compiled.push(re);
        }
        Ok(Self {
            patterns: compiled,
            predicate,
        })
    }

    pub async fn should_skip(&self, url: &str) -> bool {
        if let Some(predicate) = &self.predicate {
            if predicate(url.to_string()).await {
                return true;
            }
        }
        self.patterns.iter().any(|re| re.is_match(url))
    }
}

impl fmt::Debug for SkipPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipPolicy")
            .field("patterns", &self.patterns)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
