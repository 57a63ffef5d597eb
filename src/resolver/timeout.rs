use crate::resolver::*;
use async_trait::async_trait;
use hickory_proto::op::Query;
use hickory_proto::rr::Record;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolver that gives up on a question after a fixed deadline
pub struct Timeout<R> {
    inner: R,
    timeout: Duration,
}

impl<R> Timeout<R> {
    pub fn new(resolver: R, timeout: Duration) -> Self {
        Self {
            inner: resolver,
            timeout,
        }
    }
}

#[async_trait]
impl<R: Resolver + Send + Sync> Resolver for Timeout<R> {
    async fn query(&self, query: &Query) -> Result<Vec<Record>, ResolveError> {
        tokio::time::timeout(self.timeout, self.inner.query(query))
            .await
            .map_err(|_| ResolveError::Timeout)?
    }
}
