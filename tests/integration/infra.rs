//! Harness: loopback nodes, a seeded content source, a stub content
//! server and client-side helpers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use mcast_core::control::{peek_flags, CatalogEntry, ControlPacket};
use mcast_core::wire::{Flags, Packet};
use mcast_services::{
    transport, ControlListener, Node, NodeSettings, NodeState, OverlayNode, Relay, RendezvousPoint,
};

pub const CONTENT: &str = "movie.mp4";
pub const IO_TIMEOUT: Duration = Duration::from_secs(2);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

// Below the Linux ephemeral range so listeners on :0 never collide.
static NEXT_BLOCK: AtomicU16 = AtomicU16::new(26000);

/// A block of relay ports no other node in this process hands out.
pub fn port_block() -> u16 {
    NEXT_BLOCK.fetch_add(50, Ordering::Relaxed)
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// A running node. Dropping it stops its listener.
pub struct TestNode {
    pub addr: SocketAddr,
    pub node: Arc<Node>,
    _shutdown: broadcast::Sender<()>,
}

impl TestNode {
    pub fn state(&self) -> &NodeState {
        self.node.state()
    }

    pub fn relay(&self) -> Arc<Relay> {
        self.state()
            .relays
            .get(CONTENT)
            .unwrap_or_else(|| panic!("{} is not relaying {CONTENT}", self.addr))
    }
}

/// A bound control listener whose node is not built yet, so a topology
/// can learn every address before wiring neighbours.
pub struct Reserved {
    listener: ControlListener,
    pub addr: SocketAddr,
}

pub async fn reserve() -> Reserved {
    let listener = ControlListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    Reserved { listener, addr }
}

impl Reserved {
    fn settings(&self, neighbours: &[SocketAddr]) -> NodeSettings {
        NodeSettings {
            self_addr: self.addr,
            neighbours: neighbours.to_vec(),
            first_port: port_block(),
            bind_host: "127.0.0.1".parse().unwrap(),
            io_timeout: IO_TIMEOUT,
        }
    }

    pub fn overlay(self, neighbours: &[SocketAddr]) -> TestNode {
        let node = Node::Overlay(OverlayNode::new(self.settings(neighbours)));
        let (shutdown, _) = broadcast::channel(1);
        self.serve(node, shutdown)
    }

    pub async fn rendezvous(self, servers: &[SocketAddr]) -> TestNode {
        let rp = RendezvousPoint::new(self.settings(servers));
        let (shutdown, _) = broadcast::channel(1);
        rp.start(Duration::from_secs(60), &shutdown).await;
        self.serve(Node::Rendezvous(rp), shutdown)
    }

    fn serve(self, node: Node, shutdown: broadcast::Sender<()>) -> TestNode {
        let node = Arc::new(node);
        tokio::spawn(self.listener.serve(node.clone(), shutdown.subscribe()));
        TestNode {
            addr: self.addr,
            node,
            _shutdown: shutdown,
        }
    }
}

/// An address nothing listens on.
pub fn dead_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

/// Line topology A–B–C where C already streams [`CONTENT`].
pub struct Line {
    pub a: TestNode,
    pub b: TestNode,
    pub c: TestNode,
    pub source: Source,
}

pub async fn line() -> Line {
    let (a, b, c) = (reserve().await, reserve().await, reserve().await);
    let (a_addr, b_addr, c_addr) = (a.addr, b.addr, c.addr);
    let a = a.overlay(&[b_addr]);
    let b = b.overlay(&[a_addr, c_addr]);
    let c = c.overlay(&[b_addr]);
    let source = Source::seed(&c).await;
    Line { a, b, c, source }
}

// ── Data plane ────────────────────────────────────────────────────────────────

/// Sends test datagrams at one address.
pub struct Feeder {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Feeder {
    pub async fn new(target: SocketAddr) -> Self {
        Self {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            target,
        }
    }

    pub async fn send(&self, data: &[u8]) {
        self.socket.send_to(data, self.target).await.unwrap();
    }
}

/// Turns a node into the holder of [`CONTENT`]: a running relay with one
/// local sink as consumer, fed by a [`Feeder`].
pub struct Source {
    pub feeder: Feeder,
    pub sink: UdpSocket,
    pub sink_addr: SocketAddr,
}

impl Source {
    pub async fn seed(node: &TestNode) -> Self {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink_addr = sink.local_addr().unwrap();

        let relay = Arc::new(Relay::bind(CONTENT, "127.0.0.1:0".parse().unwrap(), port_block()).unwrap());
        relay.add(sink_addr).await.unwrap();
        relay.start().unwrap();
        let origin = relay.origin();
        node.state().relays.insert(relay).unwrap();

        Self {
            feeder: Feeder::new(origin).await,
            sink,
            sink_addr,
        }
    }
}

/// Keep feeding `payload` until `receiver` sees it.
pub async fn expect_delivery(feeder: &Feeder, receiver: &UdpSocket, payload: &[u8]) {
    let mut buf = [0u8; 2048];
    for _ in 0..50 {
        feeder.send(payload).await;
        let got = tokio::time::timeout(Duration::from_millis(100), receiver.recv_from(&mut buf)).await;
        if let Ok(Ok((n, _))) = got {
            if &buf[..n] == payload {
                return;
            }
        }
    }
    panic!(
        "{:?} never reached {}",
        String::from_utf8_lossy(payload),
        receiver.local_addr().unwrap()
    );
}

/// Bind the address a PORT answer hands to the client.
pub async fn consumer_socket(answer: &Packet) -> UdpSocket {
    UdpSocket::bind(consumer_addr(answer)).await.unwrap()
}

pub fn consumer_addr(answer: &Packet) -> SocketAddr {
    assert!(answer.is(Flags::PORT), "expected PORT, got {}", answer.header.flags);
    answer.payload.port.parse().unwrap()
}

// ── Client side of the control channel ────────────────────────────────────────

pub async fn discover(node: SocketAddr, id: Uuid) -> Packet {
    transport::exchange(node, &Packet::discovery(id, CONTENT), CLIENT_TIMEOUT)
        .await
        .unwrap()
}

pub async fn stream(node: SocketAddr, id: Uuid) -> Packet {
    transport::exchange(node, &Packet::stream(id, CONTENT), CLIENT_TIMEOUT)
        .await
        .unwrap()
}

pub async fn teardown(node: SocketAddr, id: Uuid, consumer: SocketAddr) {
    let packet = Packet::teardown(id, CONTENT, "", &consumer.to_string());
    transport::notify(node, &packet, CLIENT_TIMEOUT).await.unwrap();
}

/// Poll `check` until it holds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..150 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── Stub content server ───────────────────────────────────────────────────────

/// Content server stand-in: answers WAKE with a one-item catalog, PING
/// with PONG and REQUEST with `stream_addr`. Reports every other packet.
pub struct StubServer {
    pub addr: SocketAddr,
    /// Where the server "streams" from the relay's point of view.
    pub stream_addr: SocketAddr,
    seen: mpsc::UnboundedReceiver<Flags>,
}

impl StubServer {
    pub async fn spawn(content: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream_addr = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let catalog = vec![CatalogEntry {
            name: content.to_string(),
            width: 1280,
            height: 720,
            fps: 30,
        }];

        let (seen_tx, seen) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut s, _)) = listener.accept().await else { return };
                let catalog = catalog.clone();
                let seen_tx = seen_tx.clone();
                tokio::spawn(async move {
                    while let Ok(Some(body)) = transport::read_frame(&mut s).await {
                        let flags = peek_flags(&body).unwrap();
                        let reply = if flags.is(Flags::WAKE) {
                            ControlPacket::catalog(catalog.clone()).encode().unwrap()
                        } else if flags.is(Flags::PING) {
                            ControlPacket::pong().encode().unwrap()
                        } else if flags.is(Flags::REQUEST) {
                            let _ = seen_tx.send(flags);
                            ControlPacket::content_port(&stream_addr.to_string()).encode().unwrap()
                        } else {
                            let _ = seen_tx.send(flags);
                            continue;
                        };
                        transport::write_frame(&mut s, &reply).await.unwrap();
                    }
                });
            }
        });

        Self {
            addr,
            stream_addr,
            seen,
        }
    }

    /// Next REQUEST, OK or STOP the server received.
    pub async fn next_seen(&mut self) -> Flags {
        tokio::time::timeout(CLIENT_TIMEOUT, self.seen.recv())
            .await
            .expect("stub server saw nothing")
            .expect("stub server gone")
    }
}
