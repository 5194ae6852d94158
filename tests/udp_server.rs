use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_dns::dns::{CLASS_IN, RCODE_NO_ERROR, TYPE_A};
use relay_dns::handlers::serve;
use relay_dns::resolver::STUB_TTL;
use relay_dns::{Answer, CacheKey, DnsCache, Header, Message, Question, Resolver, UdpForwarder};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const REPLY_WAIT: Duration = Duration::from_secs(2);

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<(), relay_dns::DnsError>>,
}

impl TestServer {
    async fn start(resolver: Resolver<UdpForwarder>) -> Self {
        Self::start_with_grace(resolver, Duration::from_secs(1)).await
    }

    async fn start_with_grace(resolver: Resolver<UdpForwarder>, grace: Duration) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(
            socket,
            Arc::new(resolver),
            512,
            grace,
            async move {
                let _ = stopped.await;
            },
        ));
        Self {
            addr,
            stop: Some(stop),
            handle,
        }
    }

    /// Complete the shutdown future without waiting for `serve` to return.
    fn signal_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.send(()).unwrap();
        }
    }

    async fn stop(mut self) {
        self.signal_stop();
        self.join().await;
    }

    async fn join(self) {
        timeout(REPLY_WAIT, self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

fn create_query(id: u16, name: &str) -> Vec<u8> {
    let header = Header {
        id,
        rd: true,
        ..Header::default()
    };
    Message::new(header, vec![Question::new(name, TYPE_A, CLASS_IN)], Vec::new())
        .to_bytes()
        .unwrap()
}

async fn exchange(server: SocketAddr, datagram: &[u8]) -> Option<Message> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(datagram, server).await.unwrap();
    let mut buf = [0u8; 512];
    let (len, _) = timeout(Duration::from_millis(300), client.recv_from(&mut buf))
        .await
        .ok()?
        .unwrap();
    Some(Message::from_bytes(&buf[..len]).unwrap())
}

/// Upstream that answers every question with 192.0.2.7, using a
/// compression pointer for the answer name.
async fn start_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let (len, src) = socket.recv_from(&mut buf).await.unwrap();
            seen.fetch_add(1, Ordering::SeqCst);
            let query = Message::from_bytes(&buf[..len]).unwrap();

            let header = Header::response_to(&query.header, true);
            let mut reply = Message::new(header, query.questions.clone(), Vec::new())
                .to_bytes()
                .unwrap();
            reply[7] = 1;
            reply.extend_from_slice(&[0xC0, 12, 0, 1, 0, 1, 0, 0, 1, 0x2C, 0, 4, 192, 0, 2, 7]);
            socket.send_to(&reply, src).await.unwrap();
        }
    });
    (addr, count)
}

#[tokio::test]
async fn should_answer_stub_queries_over_udp() {
    let server = TestServer::start(Resolver::new(DnsCache::default(), None, 4)).await;

    let reply = exchange(server.addr, &create_query(0x1234, "example.com"))
        .await
        .expect("no reply");
    assert_eq!(reply.header.id, 0x1234);
    assert!(reply.header.qr);
    assert_eq!(reply.header.rcode, RCODE_NO_ERROR);
    assert_eq!(reply.header.num_questions, 1);
    assert_eq!(reply.header.num_answers, 1);
    assert_eq!(reply.questions[0].name, "example.com");
    assert_eq!(reply.answers[0].ttl, STUB_TTL);
    assert_eq!(reply.answers[0].data, vec![8, 8, 8, 8]);

    server.stop().await;
}

#[tokio::test]
async fn should_keep_serving_after_malformed_datagram() {
    let server = TestServer::start(Resolver::new(DnsCache::default(), None, 4)).await;

    assert!(exchange(server.addr, &[0x12, 0x34, 0x01, 0x00, 0x00]).await.is_none());

    let reply = exchange(server.addr, &create_query(7, "still.alive"))
        .await
        .expect("server stopped answering");
    assert_eq!(reply.header.id, 7);
    assert_eq!(reply.answers.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn should_forward_miss_and_answer_hit_from_cache() {
    let (upstream, forwarded) = start_upstream().await;
    let cache = DnsCache::default();
    let forwarder = UdpForwarder::new(upstream, REPLY_WAIT);
    let server = TestServer::start(Resolver::new(cache.clone(), Some(forwarder), 4)).await;

    for id in [10, 11] {
        let reply = exchange(server.addr, &create_query(id, "a.test."))
            .await
            .expect("no reply");
        assert_eq!(reply.header.id, id);
        assert!(reply.header.ra);
        assert_eq!(reply.answers.len(), 1);
        assert_eq!(reply.answers[0].name, "a.test");
        assert_eq!(reply.answers[0].ttl, 300);
        assert_eq!(reply.answers[0].data, vec![192, 0, 2, 7]);
    }

    assert_eq!(forwarded.load(Ordering::SeqCst), 1);
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.size, 1);

    server.stop().await;
}

#[tokio::test]
async fn should_reply_without_answer_when_upstream_is_silent() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let forwarder = UdpForwarder::new(silent.local_addr().unwrap(), Duration::from_millis(50));
    let server = TestServer::start(Resolver::new(DnsCache::default(), Some(forwarder), 4)).await;

    let reply = exchange(server.addr, &create_query(3, "slow.test"))
        .await
        .expect("no reply");
    assert_eq!(reply.header.num_questions, 1);
    assert_eq!(reply.header.num_answers, 0);

    server.stop().await;
}

#[tokio::test]
async fn should_abandon_handlers_after_grace_period() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let forwarder = UdpForwarder::new(silent.local_addr().unwrap(), Duration::from_secs(10));
    let grace = Duration::from_millis(200);
    let mut server =
        TestServer::start_with_grace(Resolver::new(DnsCache::default(), Some(forwarder), 4), grace)
            .await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&create_query(1, "stuck.test"), server.addr)
        .await
        .unwrap();
    // let the handler reach the upstream exchange
    let mut buf = [0u8; 512];
    timeout(REPLY_WAIT, silent.recv_from(&mut buf))
        .await
        .expect("query was not forwarded")
        .unwrap();

    let started = Instant::now();
    server.signal_stop();
    server.join().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= grace, "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "stopped after {elapsed:?}");
}

#[tokio::test]
async fn should_stop_reading_datagrams_once_shutdown_begins() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let forwarder = UdpForwarder::new(silent.local_addr().unwrap(), Duration::from_millis(500));
    let cache = DnsCache::default();
    let cached = Question::new("fast.test", TYPE_A, CLASS_IN);
    cache.put(
        CacheKey::from(&cached),
        Answer {
            name: "fast.test".into(),
            type_: TYPE_A,
            class_: CLASS_IN,
            ttl: 60,
            data: vec![192, 0, 2, 9],
        },
    );
    let mut server = TestServer::start_with_grace(
        Resolver::new(cache, Some(forwarder), 4),
        Duration::from_secs(2),
    )
    .await;

    // cached names are answered while serving
    assert!(exchange(server.addr, &create_query(1, "fast.test")).await.is_some());

    // keep one handler in flight so the socket stays open while draining
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&create_query(2, "slow.test"), server.addr)
        .await
        .unwrap();
    let mut buf = [0u8; 512];
    timeout(REPLY_WAIT, silent.recv_from(&mut buf))
        .await
        .expect("query was not forwarded")
        .unwrap();

    server.signal_stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(exchange(server.addr, &create_query(3, "fast.test")).await.is_none());

    // the in-flight handler finishes within the grace period
    server.join().await;
}
