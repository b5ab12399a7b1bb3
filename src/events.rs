use tokio::sync::broadcast;
use url::Url;

use crate::crawl::LinkResult;

const EVENT_CAPACITY: usize = 1024;

/// Events emitted while a run is in flight. Delivery is synchronous with
/// result production; a subscriber that falls behind loses the oldest events
/// rather than stalling the crawl.
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    /// A link finished checking and its result was recorded.
    Link(LinkResult),
    /// An HTML body was fetched and link extraction is about to begin.
    PageStart(Url),
}

pub(crate) fn channel() -> broadcast::Sender<CrawlEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}
