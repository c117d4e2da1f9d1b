use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::error::{DecodeError, FetchError};
use crate::fetch::Fetcher;

type FetchFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<u8>, FetchError>> + Send + Sync>;
type DecodeFn<T> = Arc<dyn Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync>;

/// How to fetch, decode and cache one named resource.
///
/// The name doubles as the cache key, so it must be stable across runs.
pub struct RefreshTask<T> {
    name: String,
    ttl: Duration,
    fetch: FetchFn,
    decode: DecodeFn<T>,
}

impl<T> RefreshTask<T> {
    pub fn new<F, Fut, D>(name: impl Into<String>, ttl: Duration, fetch: F, decode: D) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, FetchError>> + Send + 'static,
        D: Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            ttl,
            fetch: Arc::new(move || Box::pin(fetch())),
            decode: Arc::new(decode),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub(crate) async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        (self.fetch)().await
    }

    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        (self.decode)(bytes)
    }
}

impl<T: DeserializeOwned> RefreshTask<T> {
    /// Fetch `resource` through `fetcher` and decode the body as JSON.
    pub fn json(
        name: impl Into<String>,
        ttl: Duration,
        fetcher: Arc<dyn Fetcher>,
        resource: impl Into<String>,
    ) -> Self {
        let resource: Arc<str> = Arc::from(resource.into());
        Self::new(
            name,
            ttl,
            move || {
                let fetcher = Arc::clone(&fetcher);
                let resource = Arc::clone(&resource);
                async move { fetcher.fetch(&resource).await }
            },
            |bytes| serde_json::from_slice(bytes).map_err(DecodeError::from),
        )
    }
}

impl<T> fmt::Debug for RefreshTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshTask")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
