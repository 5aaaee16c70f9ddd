use crate::*;

use mcast_core::wire::Flags;
use uuid::Uuid;

/// A second client joins at B. Pruning the first client's branch leaves
/// B's relay running for the second.
#[tokio::test]
async fn second_consumer_survives_first_teardown() {
    let line = line().await;

    let r1 = Uuid::new_v4();
    assert!(discover(line.a.addr, r1).await.is(Flags::FOUND));
    let first = stream(line.a.addr, r1).await;
    let first_client = consumer_socket(&first).await;

    let r2 = Uuid::new_v4();
    // B already relays, so it answers for itself
    let found = discover(line.b.addr, r2).await;
    assert!(found.is(Flags::FOUND));
    assert_eq!(found.header.source, line.b.addr.to_string());
    let second = stream(line.b.addr, r2).await;
    let second_client = consumer_socket(&second).await;

    let b_relay = line.b.relay();
    assert_eq!(b_relay.downstream_len().await, 2);
    // same host as A's relay, so the second consumer got its own port
    assert_ne!(consumer_addr(&second), line.a.relay().origin());

    expect_delivery(&line.source.feeder, &first_client, b"both-1").await;
    expect_delivery(&line.source.feeder, &second_client, b"both-2").await;

    teardown(line.a.addr, r1, consumer_addr(&first)).await;

    let a = &line.a;
    eventually("A to collapse", move || async move { a.state().relays.is_empty() }).await;
    let b = b_relay.clone();
    eventually("B to prune A", move || {
        let b = b.clone();
        async move { b.downstream_len().await == 1 }
    })
    .await;

    assert!(line.b.state().relays.is_streaming(CONTENT));
    assert_eq!(b_relay.downstream().await, vec![consumer_addr(&second)]);
    expect_delivery(&line.source.feeder, &second_client, b"only-2").await;
}

#[tokio::test]
async fn two_clients_on_one_host_get_distinct_ports() {
    let line = line().await;
    let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());
    assert!(discover(line.a.addr, r1).await.is(Flags::FOUND));
    let first = stream(line.a.addr, r1).await;
    assert!(discover(line.a.addr, r2).await.is(Flags::FOUND));
    let second = stream(line.a.addr, r2).await;

    let (c1, c2) = (consumer_socket(&first).await, consumer_socket(&second).await);
    assert_ne!(consumer_addr(&first), consumer_addr(&second));

    expect_delivery(&line.source.feeder, &c1, b"to-1").await;
    expect_delivery(&line.source.feeder, &c2, b"to-2").await;

    // releasing one leaves the other attached
    teardown(line.a.addr, r2, consumer_addr(&second)).await;
    let relay = line.a.relay();
    let r = relay.clone();
    eventually("A to prune", move || {
        let r = r.clone();
        async move { r.downstream_len().await == 1 }
    })
    .await;
    assert_eq!(relay.downstream().await, vec![consumer_addr(&first)]);
    assert!(line.b.state().relays.is_streaming(CONTENT));
}
