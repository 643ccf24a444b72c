// tests/property/subscription_test.rs

//! Property-based tests for subscription bookkeeping
//! Local lists and the shared registry must agree after every operation.

use crate::test_helpers::{LineEngine, ManualClock, RecordingOwner, new_connection};
use bytes::Bytes;
use proptest::prelude::*;
use respconn::connection::ConnectionEvent;
use std::collections::BTreeSet;

const NAMES: [&str; 4] = ["foo", "bar", "news.*", "b?z"];

#[derive(Debug, Clone)]
enum Op {
    Subscribe(usize),
    Unsubscribe(usize),
    PSubscribe(usize),
    PUnsubscribe(usize),
    UnsubscribeAll,
    PUnsubscribeAll,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let name = 0..NAMES.len();
    prop_oneof![
        name.clone().prop_map(Op::Subscribe),
        name.clone().prop_map(Op::Unsubscribe),
        name.clone().prop_map(Op::PSubscribe),
        name.prop_map(Op::PUnsubscribe),
        Just(Op::UnsubscribeAll),
        Just(Op::PUnsubscribeAll),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_local_lists_mirror_registry(ops in prop::collection::vec(op_strategy(), 0..64)) {
        let owner = RecordingOwner::new();
        let clock = ManualClock::starting_at(0);
        let (mut conn, _rx) = new_connection(42, &owner, &clock);
        let mut channels = BTreeSet::new();
        let mut patterns = BTreeSet::new();

        for op in &ops {
            match *op {
                Op::Subscribe(i) => {
                    let added = conn.subscribe_channel(Bytes::from(NAMES[i]));
                    prop_assert_eq!(added, channels.insert(i));
                }
                Op::Unsubscribe(i) => {
                    let removed = conn.unsubscribe_channel(NAMES[i].as_bytes());
                    prop_assert_eq!(removed, channels.remove(&i));
                }
                Op::PSubscribe(i) => {
                    let added = conn.psubscribe_channel(Bytes::from(NAMES[i]));
                    prop_assert_eq!(added, patterns.insert(i));
                }
                Op::PUnsubscribe(i) => {
                    let removed = conn.punsubscribe_channel(NAMES[i].as_bytes());
                    prop_assert_eq!(removed, patterns.remove(&i));
                }
                Op::UnsubscribeAll => {
                    prop_assert_eq!(conn.unsubscribe_all().len(), channels.len());
                    channels.clear();
                }
                Op::PUnsubscribeAll => {
                    prop_assert_eq!(conn.punsubscribe_all().len(), patterns.len());
                    patterns.clear();
                }
            }

            prop_assert_eq!(conn.subscriptions_count(), channels.len());
            prop_assert_eq!(conn.psubscriptions_count(), patterns.len());
            for (i, name) in NAMES.iter().enumerate() {
                prop_assert_eq!(
                    owner.registry.is_channel_subscriber(name.as_bytes(), 42),
                    channels.contains(&i)
                );
                prop_assert_eq!(
                    owner.registry.is_pattern_subscriber(name.as_bytes(), 42),
                    patterns.contains(&i)
                );
            }
            prop_assert_eq!(owner.registry.channel_count(), channels.len());
            prop_assert_eq!(owner.registry.numpat(), patterns.len());
        }

        drop(conn);
        prop_assert_eq!(owner.registry.channel_count(), 0);
        prop_assert_eq!(owner.registry.numpat(), 0);
        prop_assert_eq!(owner.removals(), vec![42]);
    }

    #[test]
    fn test_idle_never_exceeds_age(
        steps in prop::collection::vec((-50i64..100, any::<bool>()), 1..32),
    ) {
        let owner = RecordingOwner::new();
        let clock = ManualClock::starting_at(10_000);
        let (mut conn, _rx) = new_connection(1, &owner, &clock);
        let mut last_age = conn.age();

        for (step, read) in steps {
            clock.advance(step);
            if read {
                conn.input_mut().extend_from_slice(b"PING\r\n");
                conn.handle(ConnectionEvent::Readable, &mut LineEngine::default());
                prop_assert_eq!(conn.idle_time(), 0);
            }
            let age = conn.age();
            prop_assert!(conn.idle_time() <= age);
            if step >= 0 {
                prop_assert!(age >= last_age);
            }
            last_age = age;
        }
    }
}
