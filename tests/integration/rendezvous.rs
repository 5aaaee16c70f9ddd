use crate::*;

use mcast_core::wire::Flags;
use uuid::Uuid;

#[tokio::test]
async fn rendezvous_relays_a_server_stream() {
    let mut server = StubServer::spawn(CONTENT).await;
    let rp = reserve().await.rendezvous(&[server.addr]).await;
    let registry = rp.node.servers().unwrap();
    let id = Uuid::new_v4();

    let found = discover(rp.addr, id).await;
    assert!(found.is(Flags::FOUND));
    assert_eq!(found.header.source, rp.addr.to_string());

    let answer = stream(rp.addr, id).await;
    let client = consumer_socket(&answer).await;
    assert!(server.next_seen().await.is(Flags::REQUEST));
    assert!(server.next_seen().await.is(Flags::OK));

    assert_eq!(rp.relay().origin(), server.stream_addr);
    assert_eq!(
        registry.who_is_streaming(CONTENT).unwrap().address(),
        server.addr
    );

    let feeder = Feeder::new(server.stream_addr).await;
    expect_delivery(&feeder, &client, b"from-server").await;

    teardown(rp.addr, id, consumer_addr(&answer)).await;
    assert!(server.next_seen().await.is(Flags::STOP));

    let node = &rp;
    eventually("streaming flag to clear", move || async move {
        node.state().relays.is_empty()
            && node.node.servers().unwrap().who_is_streaming(CONTENT).is_none()
    })
    .await;
}

#[tokio::test]
async fn rendezvous_misses_content_no_server_offers() {
    let mut server = StubServer::spawn("news.ts").await;
    let rp = reserve().await.rendezvous(&[server.addr, dead_addr()]).await;
    let id = Uuid::new_v4();

    assert!(discover(rp.addr, id).await.is(Flags::MISS));
    assert!(stream(rp.addr, id).await.is(Flags::MISS));
    assert!(rp.state().relays.is_empty());

    // the server was never asked for anything
    let nothing = tokio::time::timeout(std::time::Duration::from_millis(200), server.next_seen()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn overlay_reaches_content_through_a_rendezvous_point() {
    let mut server = StubServer::spawn(CONTENT).await;
    let rp = reserve().await.rendezvous(&[server.addr]).await;
    let a = reserve().await.overlay(&[rp.addr]);
    let id = Uuid::new_v4();

    assert!(discover(a.addr, id).await.is(Flags::FOUND));
    assert_eq!(a.state().positives.get(&id), Some(rp.addr));

    let answer = stream(a.addr, id).await;
    let client = consumer_socket(&answer).await;
    assert!(server.next_seen().await.is(Flags::REQUEST));

    // the rendezvous relay feeds A's relay
    assert_eq!(rp.relay().downstream().await, vec![a.relay().origin()]);

    let feeder = Feeder::new(server.stream_addr).await;
    expect_delivery(&feeder, &client, b"two-hops").await;
}
