//! linkscout: concurrent broken-link checker for websites and local trees.

pub mod app;
pub mod cache;
pub mod crawl;
pub mod error;
pub mod events;
pub mod extract;
pub mod probe;
pub mod queue;
pub mod server;
pub mod skip;
pub mod util;

pub use crawl::{
    check, CheckOptions, CheckResult, CrawlTask, FailureDetail, LinkChecker, LinkResult, LinkState,
};
pub use error::CheckError;
pub use events::CrawlEvent;
