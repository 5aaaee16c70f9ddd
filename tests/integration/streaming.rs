use crate::*;

use mcast_core::wire::Flags;
use uuid::Uuid;

#[tokio::test]
async fn stream_builds_a_relay_per_hop() {
    let line = line().await;
    let r1 = Uuid::new_v4();
    assert!(discover(line.a.addr, r1).await.is(Flags::FOUND));

    let answer = stream(line.a.addr, r1).await;
    let client = consumer_socket(&answer).await;

    // C feeds B's relay, B feeds A's relay
    let (a, b, c) = (line.a.relay(), line.b.relay(), line.c.relay());
    assert_eq!(b.origin().port(), c.port());
    assert_eq!(a.origin().port(), b.port());
    assert!(c.contains(b.origin()).await);
    assert!(b.contains(a.origin()).await);
    assert_eq!(a.downstream().await, vec![consumer_addr(&answer)]);

    expect_delivery(&line.source.feeder, &client, b"ts-0001").await;
    expect_delivery(&line.source.feeder, &client, b"ts-0002").await;
}

#[tokio::test]
async fn stream_without_discovery_is_a_miss() {
    let line = line().await;
    let answer = stream(line.a.addr, Uuid::new_v4()).await;
    assert!(answer.is(Flags::MISS));
    assert!(line.a.state().relays.is_empty());
    assert!(line.b.state().relays.is_empty());
}

#[tokio::test]
async fn stream_at_the_holder_attaches_directly() {
    let line = line().await;
    let id = Uuid::new_v4();
    assert!(discover(line.c.addr, id).await.is(Flags::FOUND));

    let answer = stream(line.c.addr, id).await;
    let client = consumer_socket(&answer).await;
    assert_eq!(line.c.relay().downstream_len().await, 2);
    expect_delivery(&line.source.feeder, &client, b"direct").await;
}

#[tokio::test]
async fn concurrent_streams_share_one_relay() {
    let line = line().await;
    let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());
    assert!(discover(line.a.addr, r1).await.is(Flags::FOUND));
    assert!(discover(line.a.addr, r2).await.is(Flags::FOUND));

    let (first, second) = tokio::join!(stream(line.a.addr, r1), stream(line.a.addr, r2));
    let (first, second) = (consumer_addr(&first), consumer_addr(&second));
    assert_ne!(first, second);

    for node in [&line.a, &line.b, &line.c] {
        assert_eq!(node.state().relays.len(), 1);
    }
    assert_eq!(line.a.relay().downstream_len().await, 2);
    // B was asked once; its relay serves A alone
    assert_eq!(line.b.relay().downstream_len().await, 1);
}
