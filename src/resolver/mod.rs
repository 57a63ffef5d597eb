pub mod bootstrap;
pub mod doh;
pub mod response_cache;
pub mod timeout;

use crate::protocol::ParseError;
use async_trait::async_trait;
use hickory_proto::op::Query;
use hickory_proto::rr::Record;
use std::sync::Arc;
use thiserror::Error;

/// A resolver takes a single question and answers it with resource records.
/// This can take many forms, from calling a remote JSON API to wrapping
/// another resolver with a deadline. From the caller's perspective what the
/// resolver does is not relevant, only the returned answer matters.
///
/// The proxy forwards questions with a look-aside cache:
///
/// ```text
///               Local                        |  Remote
///                                            |
///  +--------+           +----------+         |  +--------+
///  |        | questions |          |  HTTPS  |  |        |
///  | Client |---------->|  Proxy   |---------|->|  DoH   |
///  |        |           | Handler  |         |  |  API   |
///  |        |<----------|          |<--------|--|        |
///  |        |  replies  |          |  JSON   |  |        |
///  +--------+           +----------+         |  +--------+
///                         |     A            |
///         cache additions |     | references |
///                         V     |            |
///                       +----------+         |
///                       |  cache   |         |
///                       +----------+         |
/// ```
#[async_trait]
pub trait Resolver {
    async fn query(&self, query: &Query) -> Result<Vec<Record>, ResolveError>;
}

#[async_trait]
impl<R: Resolver + Send + Sync + ?Sized> Resolver for Arc<R> {
    #[inline]
    async fn query(&self, query: &Query) -> Result<Vec<Record>, ResolveError> {
        self.as_ref().query(query).await
    }
}

/// Failure to answer one question. None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no mnemonic for record type {0}")]
    UnsupportedType(u16),
    #[error("https request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed json answer: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed record {text:?}: {source}")]
    RecordText { text: String, source: ParseError },
    #[error("query timed out")]
    Timeout,
}
