// tests/property/registry_test.rs

//! Registry invariants under arbitrary event sequences.

use crate::test_helpers::{TestClient, addr, test_policy};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tokenrelay::core::Relay;
use tokenrelay::core::auth::ClientRole;

#[derive(Debug, Clone)]
enum Op {
    Connect(usize),
    Disconnect(usize),
    Message(usize, Vec<u8>),
}

fn op_strategy(clients: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..clients).prop_map(Op::Connect),
        (0..clients).prop_map(Op::Disconnect),
        (0..clients, prop::collection::vec(any::<u8>(), 1..32))
            .prop_map(|(i, payload)| Op::Message(i, payload)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    /// Without strikes in play, the registry holds exactly the clients that
    /// connected and have not disconnected since, each once.
    #[test]
    fn test_registry_tracks_connected_set(ops in prop::collection::vec(op_strategy(6), 1..80)) {
        let t0 = Instant::now();
        let mut policy = test_policy();
        policy.message_rate = Duration::ZERO;
        policy.ban_limit = u32::MAX;
        let mut relay = Relay::new(policy);
        let mut clients: Vec<TestClient> = (0..6)
            .map(|i| TestClient::new(i as u64 + 1, addr([10, 0, 0, i as u8 + 1], 4000)))
            .collect();
        let mut expected = BTreeSet::new();

        for (step, op) in ops.into_iter().enumerate() {
            let now = t0 + Duration::from_millis(step as u64);
            match op {
                Op::Connect(i) => {
                    relay.handle(clients[i].connected(ClientRole::Member), now);
                    expected.insert(i as u64 + 1);
                }
                Op::Disconnect(i) => {
                    relay.handle(clients[i].disconnected(), now);
                    expected.remove(&(i as u64 + 1));
                }
                Op::Message(i, payload) => {
                    relay.handle(clients[i].message(&payload), now);
                }
            }
            for client in &mut clients {
                client.received();
            }

            let registered: BTreeSet<u64> = relay
                .clients()
                .iter()
                .map(|c| c.identity().session_id())
                .collect();
            prop_assert_eq!(relay.clients().len(), registered.len());
            prop_assert_eq!(&registered, &expected);
        }
    }

    /// A sender never receives its own message, and every other registered
    /// client receives exactly one copy.
    #[test]
    fn test_fanout_excludes_sender(
        count in 2usize..8,
        sender in 0usize..8,
        payload in "[a-z ]{1,40}",
    ) {
        let sender = sender % count;
        let t0 = Instant::now();
        let mut relay = Relay::new(test_policy());
        let mut clients: Vec<TestClient> = (0..count)
            .map(|i| TestClient::new(i as u64 + 1, addr([10, 0, 0, i as u8 + 1], 4000)))
            .collect();
        for client in &mut clients {
            relay.handle(client.connected(ClientRole::Member), t0);
            client.received();
        }

        relay.handle(clients[sender].message(payload.as_bytes()), t0 + Duration::from_secs(2));

        for (i, client) in clients.iter_mut().enumerate() {
            let received = client.received();
            if i == sender {
                prop_assert!(received.is_empty());
            } else {
                prop_assert_eq!(received.len(), 1);
                prop_assert_eq!(&received[0][..], payload.as_bytes());
            }
        }
    }

    /// Repeated disconnects leave the registry exactly as a single one does.
    #[test]
    fn test_disconnect_idempotent(repeats in 1usize..5) {
        let t0 = Instant::now();
        let mut relay = Relay::new(test_policy());
        let a = TestClient::new(1, addr([10, 0, 0, 1], 4000));
        let b = TestClient::new(2, addr([10, 0, 0, 2], 4000));
        relay.handle(a.connected(ClientRole::Member), t0);
        relay.handle(b.connected(ClientRole::Member), t0);

        for _ in 0..repeats {
            relay.handle(a.disconnected(), t0);
        }

        prop_assert_eq!(relay.clients().len(), 1);
        prop_assert!(relay.clients().contains(2));
    }
}
