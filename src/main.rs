//! Relay DNS
//!
//! Answers DNS queries over UDP, either with a fixed stub record or by
//! forwarding them to an upstream resolver and caching the answers.

use std::sync::Arc;

use log::{error, info};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{signal, task};

use relay_dns::{
    cache::{DnsCache, CACHE_STATS_INTERVAL},
    config::ServerConfig,
    errors::DnsError,
    handlers::run_udp_server,
    resolver::{Resolver, UdpForwarder},
};

#[tokio::main]
async fn main() -> Result<(), DnsError> {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    // Load configuration from environment variables
    let config = ServerConfig::from_env()?;

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| DnsError::Metrics(e.to_string()))?;
        info!("Prometheus metrics available on {}", addr);
    }

    let cache = DnsCache::new(config.cache_capacity);
    let upstream = config
        .resolver
        .map(|addr| UdpForwarder::new(addr, config.forward_timeout));
    let resolver = Arc::new(Resolver::new(cache.clone(), upstream, config.max_forwards));

    // Periodically publish cache statistics
    let cache_stats = task::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_STATS_INTERVAL);
        loop {
            interval.tick().await;
            cache.stats().publish();
        }
    });

    let shutdown_signal = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let result = run_udp_server(&config, resolver, shutdown_signal).await;
    cache_stats.abort();
    info!("Server stopped");
    result
}
