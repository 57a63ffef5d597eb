//! Client for the JSON flavor of DNS-over-HTTPS, as served by
//! `https://dns.google.com/resolve`:
//!
//! ```text
//! GET /resolve?name=example.com.&type=1
//!
//! {"Status":0,"TC":false,"RD":true,"RA":true,"AD":false,"CD":false,
//!  "Question":[{"name":"example.com.","type":1}],
//!  "Answer":[{"name":"example.com.","type":1,"TTL":300,"data":"93.184.216.34"}]}
//! ```
//!
//! Connections to the API host are addressed by a [`BootstrapResolver`], so
//! the proxy never depends on the system resolver to find its own upstream.

use crate::protocol::{parse_record, render_record, type_mnemonic};
use crate::resolver::bootstrap::BootstrapResolver;
use crate::resolver::{ResolveError, Resolver};
use async_trait::async_trait;
use hickory_proto::op::Query;
use hickory_proto::rr::Record;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_API_URL: &str = "https://dns.google.com/resolve";

/// Idle connection reuse towards the API host
#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            max_idle_per_host: 10,
        }
    }
}

pub struct DohClient {
    client: reqwest::Client,
    url: String,
}

impl DohClient {
    pub fn new(
        url: impl Into<String>,
        bootstrap: BootstrapResolver,
        pool: PoolSettings,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .no_proxy()
            .dns_resolver(Arc::new(bootstrap))
            .pool_idle_timeout(pool.idle_timeout)
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn fetch(&self, query: &Query) -> Result<DohResponse, ResolveError> {
        let name = query.name().to_ascii();
        let qtype = u16::from(query.query_type());

        let body = self
            .client
            .get(&self.url)
            .query(&[("name", name), ("type", qtype.to_string())])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        trace!(?query, body_len = body.len(), "DoH response received");

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl Resolver for DohClient {
    async fn query(&self, query: &Query) -> Result<Vec<Record>, ResolveError> {
        let response = self.fetch(query).await?;

        if response.status != 0 {
            debug!(
                name = %query.name(),
                qtype = %query.query_type(),
                status = response.status,
                "DoH API returned non-zero status"
            );
        }

        response.into_records()
    }
}

/// JSON answer envelope. Every field is optional in the body.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DohResponse {
    #[serde(rename = "Status")]
    pub status: u32,
    #[serde(rename = "TC")]
    pub truncated: bool,
    #[serde(rename = "RD")]
    pub recursion_desired: bool,
    #[serde(rename = "RA")]
    pub recursion_available: bool,
    #[serde(rename = "AD")]
    pub authentic_data: bool,
    #[serde(rename = "CD")]
    pub checking_disabled: bool,
    #[serde(rename = "Question")]
    pub question: Vec<DohQuestion>,
    #[serde(rename = "Answer")]
    pub answer: Vec<DohAnswer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DohQuestion {
    #[serde(rename = "name", alias = "Name")]
    pub name: String,
    #[serde(rename = "type", alias = "Type")]
    pub qtype: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DohAnswer {
    #[serde(rename = "name", alias = "Name")]
    pub name: String,
    #[serde(rename = "type", alias = "Type")]
    pub rtype: u16,
    #[serde(rename = "TTL", alias = "ttl")]
    pub ttl: u32,
    #[serde(rename = "data", alias = "Data")]
    pub data: String,
}

impl DohResponse {
    /// Converts every answer, stopping at the first one that cannot be converted
    pub fn into_records(self) -> Result<Vec<Record>, ResolveError> {
        self.answer.iter().map(DohAnswer::to_record).collect()
    }
}

impl DohAnswer {
    pub fn to_record(&self) -> Result<Record, ResolveError> {
        let mnemonic = type_mnemonic(self.rtype).ok_or(ResolveError::UnsupportedType(self.rtype))?;
        let text = render_record(&self.name, self.ttl, mnemonic, &self.data);
        parse_record(&text).map_err(|source| ResolveError::RecordText { text, source })
    }
}
