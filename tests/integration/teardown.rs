use crate::*;

use std::time::Duration;

use mcast_core::wire::Flags;
use uuid::Uuid;

#[tokio::test]
async fn last_consumer_collapses_the_branch() {
    let line = line().await;
    let r1 = Uuid::new_v4();
    assert!(discover(line.a.addr, r1).await.is(Flags::FOUND));
    let answer = stream(line.a.addr, r1).await;
    let b_origin = line.b.relay().origin();

    teardown(line.a.addr, r1, consumer_addr(&answer)).await;

    let (a, b) = (&line.a, &line.b);
    eventually("A and B to collapse", move || async move {
        a.state().relays.is_empty() && b.state().relays.is_empty()
    })
    .await;

    // C prunes B and keeps serving its own sink
    let c = line.c.relay();
    let c2 = c.clone();
    eventually("C to prune B", move || {
        let c = c2.clone();
        async move { c.downstream_len().await == 1 }
    })
    .await;
    assert!(!c.contains(b_origin).await);
    assert_eq!(c.downstream().await, vec![line.source.sink_addr]);

    // B's origin port was released with its relay
    assert!(tokio::net::UdpSocket::bind(b_origin).await.is_ok());
}

#[tokio::test]
async fn teardown_for_a_stranger_is_ignored() {
    let line = line().await;
    let r1 = Uuid::new_v4();
    assert!(discover(line.a.addr, r1).await.is(Flags::FOUND));
    let answer = stream(line.a.addr, r1).await;

    teardown(line.a.addr, r1, "127.0.0.9:1".parse().unwrap()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let relay = line.a.relay();
    assert_eq!(relay.downstream().await, vec![consumer_addr(&answer)]);
    assert!(line.b.state().relays.is_streaming(CONTENT));
}

#[tokio::test]
async fn teardown_where_nothing_streams_is_harmless() {
    let line = line().await;
    teardown(line.b.addr, Uuid::new_v4(), "127.0.0.1:9".parse().unwrap()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(line.b.state().relays.is_empty());
    // B still answers
    assert!(discover(line.b.addr, Uuid::new_v4()).await.is(Flags::FOUND));
}

/// The client that joined second leaves last. Its request id never reached
/// B or C, yet the whole branch still collapses.
#[tokio::test]
async fn later_joiner_leaving_last_collapses_the_branch() {
    let line = line().await;
    let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());
    assert!(discover(line.a.addr, r1).await.is(Flags::FOUND));
    let first = stream(line.a.addr, r1).await;
    assert!(discover(line.a.addr, r2).await.is(Flags::FOUND));
    let second = stream(line.a.addr, r2).await;
    let b_origin = line.b.relay().origin();

    teardown(line.a.addr, r1, consumer_addr(&first)).await;
    let relay = line.a.relay();
    let r = relay.clone();
    eventually("A to prune the first client", move || {
        let r = r.clone();
        async move { r.downstream_len().await == 1 }
    })
    .await;

    teardown(line.a.addr, r2, consumer_addr(&second)).await;

    let (a, b) = (&line.a, &line.b);
    eventually("A and B to collapse", move || async move {
        a.state().relays.is_empty() && b.state().relays.is_empty()
    })
    .await;

    let c = line.c.relay();
    let c2 = c.clone();
    eventually("C to prune B", move || {
        let c = c2.clone();
        async move { c.downstream_len().await == 1 }
    })
    .await;
    assert!(!c.contains(b_origin).await);
    assert_eq!(c.downstream().await, vec![line.source.sink_addr]);
}
