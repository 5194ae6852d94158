//! Request handlers for the DNS relay.
//!
//! This module runs the UDP service loop. Every datagram is handled in its
//! own task; a datagram that cannot be decoded or answered is logged and
//! dropped without affecting the others.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use metrics::increment_counter;
use tokio::{net::UdpSocket, task::JoinSet, time};

use crate::config::ServerConfig;
use crate::errors::DnsError;
use crate::resolver::{Forwarder, Resolver};

/// Bind the configured address and serve until `shutdown` completes.
pub async fn run_udp_server<F, S>(
    config: &ServerConfig,
    resolver: Arc<Resolver<F>>,
    shutdown: S,
) -> Result<(), DnsError>
where
    F: Forwarder,
    S: Future<Output = ()>,
{
    let socket = UdpSocket::bind(config.bind_addr).await?;
    info!("UDP DNS server listening on {}", config.bind_addr);
    match config.resolver {
        Some(upstream) => info!("Forwarding to upstream resolver {}", upstream),
        None => info!("No upstream resolver configured, answering with stub records"),
    }

    serve(
        socket,
        resolver,
        config.max_packet_size,
        config.shutdown_grace,
        shutdown,
    )
    .await
}

/// Serve queries on an already bound socket.
///
/// Once `shutdown` completes no new datagrams are read; in-flight handlers
/// get `grace` to finish and are aborted after that.
pub async fn serve<F, S>(
    socket: UdpSocket,
    resolver: Arc<Resolver<F>>,
    max_packet_size: usize,
    grace: Duration,
    shutdown: S,
) -> Result<(), DnsError>
where
    F: Forwarder,
    S: Future<Output = ()>,
{
    let socket = Arc::new(socket);
    let mut buf = vec![0u8; max_packet_size];
    let mut handlers = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                if let Err(e) = joined {
                    error!("Query handler panicked: {}", e);
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((amt, src)) => {
                    let query = buf[..amt].to_vec();
                    let socket = socket.clone();
                    let resolver = resolver.clone();
                    handlers.spawn(async move {
                        if let Err(e) = handle_udp_query(query, src, socket, resolver).await {
                            increment_counter!("dns_dropped_total");
                            warn!("Dropped query from {}: {}", src, e);
                        }
                    });
                }
                Err(e) => error!("UDP receive error: {}", e),
            },
        }
    }

    info!("Shutting down, {} query handler(s) in flight", handlers.len());
    let drain = async { while handlers.join_next().await.is_some() {} };
    if time::timeout(grace, drain).await.is_err() {
        warn!("Abandoning {} query handler(s) after {:?}", handlers.len(), grace);
        handlers.abort_all();
    }
    Ok(())
}

/// Handle a UDP DNS query.
///
/// # Arguments
/// * `query` - The raw datagram.
/// * `src` - The source address of the query.
/// * `socket` - The UDP socket to send the response on.
/// * `resolver` - The shared resolver.
pub async fn handle_udp_query<F: Forwarder>(
    query: Vec<u8>,
    src: SocketAddr,
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver<F>>,
) -> Result<(), DnsError> {
    increment_counter!("dns_queries_total");
    debug!("UDP query of {} bytes from {}", query.len(), src);

    let response = resolver.handle(&query).await?;
    socket.send_to(&response, src).await?;
    Ok(())
}
