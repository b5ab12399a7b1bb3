use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;

pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn is_url_like(s: &str) -> bool {
    let s = s.trim();
    s.starts_with("https://") || s.starts_with("http://")
}

pub fn strip_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}
