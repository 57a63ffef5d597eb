use clap::Parser;
use doh_proxy::config::Config;
use doh_proxy::handler::ProxyHandler;
use doh_proxy::resolver::bootstrap::BootstrapResolver;
use doh_proxy::resolver::doh::DohClient;
use doh_proxy::resolver::response_cache::ResponseCache;
use doh_proxy::resolver::timeout::Timeout;
use doh_proxy::server::Server;
use reqwest::Url;
use std::error::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::parse();

    // install global collector configured based on RUST_LOG env var, info by default
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let socket = UdpSocket::bind(&config.listen).await?;
    let api_url = Url::parse(&config.api_url)?;

    let bootstrap = BootstrapResolver::new(config.bootstrap.clone(), config.bootstrap_timeout());
    warm_up(&bootstrap, &api_url).await;

    let client = DohClient::new(config.api_url.clone(), bootstrap, config.pool_settings())?;
    let cache = ResponseCache::new(config.min_ttl);
    let shutdown = CancellationToken::new();
    let purge = cache.spawn_purge(config.purge_interval(), shutdown.clone());

    let handler = ProxyHandler::new(Timeout::new(client, config.query_timeout()), cache);
    let server = Server::new(socket, handler);
    info!(listen = %server.local_addr()?, api = %config.api_url, "Serving");

    let result = tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    shutdown.cancel();
    purge.await?;
    result?;

    Ok(())
}

/// Resolves and connects to the API host once, so the first query does not pay
/// for the bootstrap lookup. Failure is not fatal, queries retry the lookup.
async fn warm_up(bootstrap: &BootstrapResolver, api_url: &Url) {
    let (Some(host), Some(port)) = (api_url.host_str(), api_url.port_or_known_default()) else {
        warn!(%api_url, "API URL has no host");
        return;
    };

    match bootstrap.dial(&format!("{}:{}", host, port)).await {
        Ok(stream) => info!(peer = ?stream.peer_addr().ok(), host, "API host reachable"),
        Err(err) => warn!(%err, host, "API host unreachable, will retry on first query"),
    }
}
