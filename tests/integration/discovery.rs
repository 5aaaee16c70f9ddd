use crate::*;

use mcast_core::wire::Flags;
use uuid::Uuid;

#[tokio::test]
async fn discovery_resolves_hop_by_hop() {
    let line = line().await;
    let r1 = Uuid::new_v4();

    let answer = discover(line.a.addr, r1).await;
    assert!(answer.is(Flags::FOUND), "got {}", answer.header.flags);
    assert_eq!(answer.request_id(), r1);
    // each hop rewrites the source to itself
    assert_eq!(answer.header.source, line.a.addr.to_string());
    assert_eq!(line.a.state().positives.get(&r1), Some(line.b.addr));
    assert_eq!(line.b.state().positives.get(&r1), Some(line.c.addr));
    // the holder answers from its relay and records nothing upstream
    assert_eq!(line.c.state().positives.get(&r1), None);

    for node in [&line.a, &line.b, &line.c] {
        assert!(node.state().requests.is_handled(&r1));
    }
}

#[tokio::test]
async fn repeated_discovery_is_a_miss() {
    let line = line().await;
    let r1 = Uuid::new_v4();

    assert!(discover(line.a.addr, r1).await.is(Flags::FOUND));
    assert!(discover(line.a.addr, r1).await.is(Flags::MISS));
    // the positive answer from the first round survives
    assert_eq!(line.a.state().positives.get(&r1), Some(line.b.addr));

    // a fresh id resolves again
    assert!(discover(line.a.addr, Uuid::new_v4()).await.is(Flags::FOUND));
}

#[tokio::test]
async fn unreachable_neighbours_mean_miss() {
    let a = reserve().await.overlay(&[dead_addr(), dead_addr()]);
    let r2 = Uuid::new_v4();

    let answer = discover(a.addr, r2).await;
    assert!(answer.is(Flags::MISS));
    assert_eq!(a.state().positives.get(&r2), None);
    assert!(a.state().positives.is_empty());
    assert!(a.state().requests.is_handled(&r2));
}

#[tokio::test]
async fn content_nobody_holds_is_a_miss() {
    let (a, b) = (reserve().await, reserve().await);
    let (a_addr, b_addr) = (a.addr, b.addr);
    let a = a.overlay(&[b_addr]);
    let b = b.overlay(&[a_addr]);
    let id = Uuid::new_v4();

    assert!(discover(a.addr, id).await.is(Flags::MISS));
    // B was asked and saw nothing beyond the sender
    assert!(b.state().requests.is_handled(&id));
    assert!(b.state().positives.is_empty());
}

#[tokio::test]
async fn first_found_wins_over_misses_and_failures() {
    let (hub, empty, holder) = (reserve().await, reserve().await, reserve().await);
    let hub_addr = hub.addr;
    let (empty_addr, holder_addr) = (empty.addr, holder.addr);

    let hub = hub.overlay(&[dead_addr(), empty_addr, holder_addr]);
    let _empty = empty.overlay(&[hub_addr]);
    let holder = holder.overlay(&[hub_addr]);
    let _source = Source::seed(&holder).await;

    let id = Uuid::new_v4();
    let answer = discover(hub.addr, id).await;
    assert!(answer.is(Flags::FOUND));
    assert_eq!(hub.state().positives.get(&id), Some(holder_addr));
}
