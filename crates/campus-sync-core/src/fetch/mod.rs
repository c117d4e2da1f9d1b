//! The "get bytes for resource R" contract consumed by the orchestrator.
//!
//! The core only cares whether a fetch succeeded. Timeouts and retries are
//! the fetcher's business; `HttpFetcher` bounds every request and retries
//! rate-limited responses before giving up.

pub mod http;

use async_trait::async_trait;

use crate::error::FetchError;

pub use http::HttpFetcher;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the raw payload for `resource`.
    async fn fetch(&self, resource: &str) -> Result<Vec<u8>, FetchError>;
}
