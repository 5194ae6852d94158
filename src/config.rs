//! Configuration for the DNS relay.
//!
//! This module defines the configuration structure and methods to load
//! configuration from environment variables.

use std::{env, net::SocketAddr, num::NonZeroUsize, str::FromStr, time::Duration};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::errors::DnsError;
use crate::resolver::DEFAULT_FORWARD_TIMEOUT;

/// Default listen address.
pub const DEFAULT_BIND: &str = "127.0.0.1:2053";

/// Maximum size of DNS packets in bytes.
pub const MAX_PACKET_SIZE: usize = 512;

/// Default bound on concurrently outstanding upstream queries.
pub const DEFAULT_MAX_FORWARDS: usize = 64;

/// Default time in-flight queries get to finish on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the DNS server to.
    pub bind_addr: SocketAddr,

    /// Upstream resolver; `None` answers every question with a stub record.
    pub resolver: Option<SocketAddr>,

    /// Number of answers the cache holds.
    pub cache_capacity: NonZeroUsize,

    /// How long to wait for an upstream reply.
    pub forward_timeout: Duration,

    /// Bound on concurrently outstanding upstream queries.
    pub max_forwards: usize,

    /// Maximum size of DNS packets.
    pub max_packet_size: usize,

    /// Time in-flight queries get to finish on shutdown.
    pub shutdown_grace: Duration,

    /// Prometheus scrape address, if metrics are exported.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 2053)),
            resolver: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            max_forwards: DEFAULT_MAX_FORWARDS,
            max_packet_size: MAX_PACKET_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            metrics_addr: None,
        }
    }
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    ///
    /// # Returns
    /// A `Result` containing either the loaded `ServerConfig` or a `DnsError`.
    pub fn from_env() -> Result<Self, DnsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value. Unset and empty variables take their defaults.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, DnsError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let cache_capacity = parse_or(&var, "DNS_CACHE_CAPACITY", defaults.cache_capacity.get())?;
        let cache_capacity = NonZeroUsize::new(cache_capacity)
            .ok_or_else(|| DnsError::Config("DNS_CACHE_CAPACITY must be greater than 0".into()))?;

        let max_forwards = parse_or(&var, "DNS_MAX_FORWARDS", defaults.max_forwards)?;
        if max_forwards == 0 {
            return Err(DnsError::Config("DNS_MAX_FORWARDS must be greater than 0".into()));
        }

        let max_packet_size = parse_or(&var, "DNS_MAX_PACKET_SIZE", defaults.max_packet_size)?;
        if max_packet_size < crate::dns::HEADER_LEN {
            return Err(DnsError::Config("DNS_MAX_PACKET_SIZE is smaller than a DNS header".into()));
        }

        Ok(Self {
            bind_addr: parse_or(&var, "DNS_BIND", defaults.bind_addr)?,
            resolver: parse_opt(&var, "DNS_RESOLVER")?,
            cache_capacity,
            forward_timeout: Duration::from_millis(parse_or(
                &var,
                "DNS_FORWARD_TIMEOUT_MS",
                defaults.forward_timeout.as_millis() as u64,
            )?),
            max_forwards,
            max_packet_size,
            shutdown_grace: Duration::from_secs(parse_or(
                &var,
                "DNS_SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )?),
            metrics_addr: parse_opt(&var, "DNS_METRICS_ADDR")?,
        })
    }
}

fn parse_opt<T, V>(var: &V, key: &str) -> Result<Option<T>, DnsError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| DnsError::Config(format!("Invalid {key}: {value:?}")))
        })
        .transpose()
}

fn parse_or<T, V>(var: &V, key: &str, default: T) -> Result<T, DnsError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(var, key)?.unwrap_or(default))
}
