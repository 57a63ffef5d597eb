use crate::resolver::bootstrap::DEFAULT_EXCHANGE_TIMEOUT;
use crate::resolver::doh::{PoolSettings, DEFAULT_API_URL};
use crate::resolver::response_cache::{DEFAULT_MIN_TTL, DEFAULT_PURGE_INTERVAL};
use crate::resolver::timeout::DEFAULT_QUERY_TIMEOUT;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "doh-proxy")]
#[command(about = "DNS proxy answering UDP queries through a DNS-over-HTTPS JSON API")]
pub struct Config {
    /// Address to listen on for DNS queries
    #[arg(short, long, value_name = "ADDR", default_value = "0.0.0.0:53")]
    pub listen: String,

    /// DoH JSON API endpoint
    #[arg(long, value_name = "URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Nameserver used to resolve the API host, tried in order
    #[arg(
        long = "bootstrap",
        value_name = "ADDR",
        default_values = ["8.8.8.8:53", "8.8.4.4:53"]
    )]
    pub bootstrap: Vec<SocketAddr>,

    /// Lower bound for cached answer TTLs, in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_MIN_TTL)]
    pub min_ttl: u32,

    /// Seconds between sweeps of expired cache entries
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_PURGE_INTERVAL.as_secs())]
    pub purge_interval: u64,

    /// Seconds to wait for a bootstrap nameserver
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_EXCHANGE_TIMEOUT.as_secs())]
    pub bootstrap_timeout: u64,

    /// Seconds allowed to answer one question upstream
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_QUERY_TIMEOUT.as_secs())]
    pub query_timeout: u64,

    /// Seconds an idle API connection is kept open
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub idle_timeout: u64,

    /// Maximum idle API connections kept open
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub max_idle: usize,
}

impl Config {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            idle_timeout: Duration::from_secs(self.idle_timeout),
            max_idle_per_host: self.max_idle,
        }
    }
}
