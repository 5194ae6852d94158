//! Query resolution.
//!
//! `Resolver` turns one inbound datagram into one reply: it answers every
//! question either with a fixed stub record or, when an upstream is
//! configured, from the answer cache backed by single-hop forwarding.

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use metrics::increment_counter;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::time;

use crate::cache::{CacheKey, DnsCache};
use crate::dns::{Answer, Header, Message, Question};
use crate::errors::{DnsError, ForwardError};

/// Largest datagram read from the upstream resolver.
pub const MAX_UDP_SIZE: usize = 512;

/// TTL of synthesized stub answers.
pub const STUB_TTL: u32 = 100;

/// RDATA of synthesized stub answers.
pub const STUB_ADDRESS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

/// Default bound on a single upstream exchange.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(2);

/// One request/response exchange with an upstream resolver.
pub trait Forwarder: Send + Sync + 'static {
    /// Send `query` upstream and return the decoded reply.
    fn forward(&self, query: &Message) -> impl Future<Output = Result<Message, ForwardError>> + Send;
}

/// Forwards over UDP from a fresh ephemeral socket per query.
#[derive(Debug, Clone)]
pub struct UdpForwarder {
    upstream: SocketAddr,
    timeout: Duration,
}

impl UdpForwarder {
    pub const fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    pub const fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    async fn exchange(&self, query: &[u8]) -> Result<Vec<u8>, ForwardError> {
        let local: SocketAddr = if self.upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.upstream).await?;
        socket.send(query).await?;

        let mut buf = vec![0u8; MAX_UDP_SIZE];
        let len = socket.recv(&mut buf).await?;
        buf.truncate(len);
        Ok(buf)
    }
}

impl Forwarder for UdpForwarder {
    async fn forward(&self, query: &Message) -> Result<Message, ForwardError> {
        let bytes = query.to_bytes()?;
        let reply = time::timeout(self.timeout, self.exchange(&bytes))
            .await
            .map_err(|_| ForwardError::Timeout(self.timeout))??;

        let reply = Message::from_bytes(&reply)?;
        check_reply(query, &reply)?;
        Ok(reply)
    }
}

/// Accept only a response to `query`: same id, `qr` set and the same
/// first question.
pub fn check_reply(query: &Message, reply: &Message) -> Result<(), ForwardError> {
    if reply.header.id != query.header.id {
        return Err(ForwardError::IdMismatch {
            expected: query.header.id,
            actual: reply.header.id,
        });
    }
    if !reply.header.qr {
        return Err(ForwardError::NotAResponse);
    }
    if reply.questions.first() != query.questions.first() {
        return Err(ForwardError::QuestionMismatch {
            expected: query.questions.first().map(|q| q.name.clone()).unwrap_or_default(),
            actual: reply.questions.first().map(|q| q.name.clone()).unwrap_or_default(),
        });
    }
    Ok(())
}

/// Starting point for forwarded query ids, taken from the clock so ids are
/// not the same on every start.
fn initial_query_id() -> u16 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| (elapsed.subsec_nanos() ^ elapsed.as_secs() as u32) as u16)
        .unwrap_or(1)
}

/// Per-datagram resolution pipeline, shared by all handler tasks.
#[derive(Debug)]
pub struct Resolver<F> {
    upstream: Option<F>,
    cache: DnsCache,
    forward_slots: Semaphore,
    next_id: AtomicU16,
}

impl<F: Forwarder> Resolver<F> {
    /// Create a resolver. Without an upstream every question gets a stub
    /// answer and the cache is never consulted.
    ///
    /// At most `max_forwards` upstream exchanges are outstanding at once.
    pub fn new(cache: DnsCache, upstream: Option<F>, max_forwards: usize) -> Self {
        Self {
            upstream,
            cache,
            forward_slots: Semaphore::new(max_forwards.max(1)),
            next_id: AtomicU16::new(initial_query_id()),
        }
    }

    pub fn cache(&self) -> &DnsCache {
        &self.cache
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    /// Decode a datagram, resolve it and encode the reply.
    pub async fn handle(&self, datagram: &[u8]) -> Result<Vec<u8>, DnsError> {
        let request = Message::from_bytes(datagram)?;
        debug!(
            "Query {:#06x} with {} question(s)",
            request.header.id,
            request.questions.len()
        );
        let response = self.resolve(&request).await;
        Ok(response.to_bytes()?)
    }

    /// Build the reply to a decoded request.
    ///
    /// Questions without an answer are still echoed, so the reply may carry
    /// fewer answers than questions.
    pub async fn resolve(&self, request: &Message) -> Message {
        let mut answers = Vec::with_capacity(request.questions.len());
        for question in &request.questions {
            if let Some(answer) = self.answer(question).await {
                answers.push(answer);
            }
        }

        let header = Header::response_to(&request.header, self.has_upstream());
        Message::new(header, request.questions.clone(), answers)
    }

    async fn answer(&self, question: &Question) -> Option<Answer> {
        let Some(upstream) = &self.upstream else {
            return Some(stub_answer(question));
        };

        let key = CacheKey::from(question);
        if let Some(cached) = self.cache.get(&key) {
            return Some(cached.renamed(&question.name));
        }

        match self.forward(upstream, question).await {
            Ok(Some(answer)) => {
                let answer = answer.renamed(&question.name);
                self.cache.put(key, answer.clone());
                Some(answer)
            }
            Ok(None) => {
                debug!("Upstream has no answer for {}", question.name);
                None
            }
            Err(e) => {
                increment_counter!("dns_forward_failures_total");
                warn!("Forwarding {} failed: {}", question.name, e);
                None
            }
        }
    }

    async fn forward(&self, upstream: &F, question: &Question) -> Result<Option<Answer>, ForwardError> {
        // The semaphore is owned by the resolver and never closed.
        let Ok(_permit) = self.forward_slots.acquire().await else {
            return Ok(None);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let query = Message::new(Header::query(id), vec![question.clone()], Vec::new());
        increment_counter!("dns_forwards_total");

        let reply = upstream.forward(&query).await?;
        Ok(reply.answers.into_iter().next())
    }
}

/// Fixed answer mirroring the question's type and class.
pub fn stub_answer(question: &Question) -> Answer {
    Answer {
        name: question.name.clone(),
        type_: question.type_,
        class_: question.class_,
        ttl: STUB_TTL,
        data: STUB_ADDRESS.octets().to_vec(),
    }
}
