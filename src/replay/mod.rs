//! The replay engine: override application, request reconstruction, single
//! attempt execution and the retrying job runner.

pub mod backoff;
pub mod clock;
pub mod executor;
pub mod overrides;
pub mod reconstruct;
pub mod runner;

use url::Url;

/// Accepts absolute `http` and `https` URLs only.
pub fn is_http_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}
