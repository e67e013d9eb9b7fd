use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    #[error("HTTP 429: rate limited by {0}")]
    RateLimited(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unparseable content: {0}")]
    Parse(String),
    #[error("source timed out after {0:?}")]
    Timeout(Duration),
    #[error("unsupported source format {0:?}")]
    UnsupportedFormat(String),
    #[error("failed to load source list {path}: {reason}")]
    Config { path: String, reason: String },
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
