use std::path::PathBuf;

use thiserror::Error;

/// Configuration and startup failures. These abort a run before any link is
/// checked; failures of individual links are data, not errors.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("no paths were provided to check")]
    EmptyPaths,
    #[error("cannot mix remote URLs and local paths in a single run")]
    MixedInputs,
    #[error("server-root only applies to local paths, not remote URLs")]
    ServerRootWithRemote,
    #[error("invalid starting URL: {0}")]
    InvalidUrl(String),
    #[error("invalid skip pattern {pattern:?}: {source}")]
    InvalidSkipPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("glob {0:?} matched no files")]
    EmptyGlob(String),
    #[error("path {} is outside the server root", .0.display())]
    OutsideServerRoot(PathBuf),
    #[error("failed to start local server: {0}")]
    Server(#[from] std::io::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
