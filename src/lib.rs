//! Relay DNS Library
//!
//! A minimal DNS message codec and forwarding resolver. Queries arrive over
//! UDP, are answered from a stub record or forwarded to a single upstream
//! resolver, and upstream answers are kept in a bounded LRU cache.

pub mod cache;
pub mod config;
pub mod dns;
pub mod errors;
pub mod handlers;
pub mod resolver;
pub mod utils;

pub use cache::{CacheKey, CacheStats, DnsCache};
pub use config::ServerConfig;
pub use dns::{Answer, Header, Message, Question};
pub use errors::{DecodeError, DnsError, EncodeError, ForwardError};
pub use resolver::{Forwarder, Resolver, UdpForwarder};
