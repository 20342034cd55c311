//! MESHTRACE Test Utilities
//!
//! Shared test infrastructure for the MESHTRACE workspace:
//! - Recording transport and fixed-distance geodesics
//! - Proptest generators for hop columns and probe results
//! - Fixtures for common mesh layouts

// Re-export the in-memory store from its source crate
pub use meshtrace_storage::{InMemoryStore, TracerouteStore};

// Re-export core types for convenience
pub use meshtrace_core::{
    Node, NodeNum, Position, ProbeResult, ProbeTransport, Timestamp, TracerouteConfig,
    TransportError,
};

use async_trait::async_trait;
use meshtrace_segments::Geodesic;
use std::collections::HashSet;
use std::sync::Mutex;

// ============================================================================
// MOCK TRANSPORT AND GEODESIC
// ============================================================================

/// Transport that records every send and fails for chosen targets.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(NodeNum, NodeNum)>>,
    failing: HashSet<NodeNum>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends to any of `targets` fail with `TransportError::Timeout`.
    pub fn failing_for(targets: impl IntoIterator<Item = NodeNum>) -> Self {
        Self {
            sent: Mutex::default(),
            failing: targets.into_iter().collect(),
        }
    }

    /// Every `(from, to)` passed to `send_probe`, failed sends included.
    pub fn sent(&self) -> Vec<(NodeNum, NodeNum)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn sent_targets(&self) -> Vec<NodeNum> {
        self.sent().into_iter().map(|(_, to)| to).collect()
    }
}

#[async_trait]
impl ProbeTransport for RecordingTransport {
    async fn send_probe(&self, from: NodeNum, to: NodeNum) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((from, to));
        if self.failing.contains(&to) {
            return Err(TransportError::Timeout { target: to });
        }
        Ok(())
    }
}

/// Geodesic that reports the same distance for every pair.
#[derive(Debug, Clone, Copy)]
pub struct FixedGeodesic(pub f64);

impl Geodesic for FixedGeodesic {
    fn distance_km(&self, _from: &Position, _to: &Position) -> f64 {
        self.0
    }
}

/// Geodesic where one degree of latitude difference is one kilometre.
///
/// Makes segment lengths easy to pick in tests: place nodes at
/// `(km, 0.0)` and the distance is the difference of their latitudes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatitudeGeodesic;

impl Geodesic for LatitudeGeodesic {
    fn distance_km(&self, from: &Position, to: &Position) -> f64 {
        (from.latitude - to.latitude).abs()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for MESHTRACE types.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    /// Node numbers drawn from a small pool, so generated paths share nodes.
    pub fn arb_small_node_num() -> impl Strategy<Value = NodeNum> {
        (1u32..32).prop_map(NodeNum)
    }

    /// A hop sequence: `None` for no response, possibly empty otherwise.
    pub fn arb_hops() -> impl Strategy<Value = Option<Vec<NodeNum>>> {
        prop::option::of(prop::collection::vec(arb_small_node_num(), 0..8))
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// A well-formed probe result between two pool nodes.
    pub fn arb_probe_result() -> impl Strategy<Value = ProbeResult> {
        (
            arb_small_node_num(),
            arb_small_node_num(),
            arb_hops(),
            arb_hops(),
            arb_timestamp(),
        )
            .prop_map(|(from, to, forward, back, at)| {
                ProbeResult::from_hops(from, to, forward.as_deref(), back.as_deref(), at)
            })
    }

    /// Raw text for a hop column, well-formed or not.
    pub fn arb_hop_column_text() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            Just(Some("null".to_string())),
            Just(Some(String::new())),
            prop::collection::vec(arb_small_node_num(), 0..6).prop_map(|hops| {
                let nums: Vec<String> = hops.iter().map(|n| n.0.to_string()).collect();
                Some(format!("[{}]", nums.join(",")))
            }),
            "[^\\[\\]]{0,12}".prop_map(Some),
            "\\[[0-9,]{0,8}".prop_map(Some),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built nodes, probes and stores.

    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    /// A node with no position and no probe history.
    pub fn node(num: u32) -> Node {
        Node::new(NodeNum(num))
    }

    /// A node with a long name.
    pub fn named_node(num: u32, long_name: &str) -> Node {
        let mut node = node(num);
        node.long_name = Some(long_name.to_string());
        node
    }

    /// A node at the given coordinates.
    pub fn node_at(num: u32, latitude: f64, longitude: f64) -> Node {
        let mut node = node(num);
        node.position = Some(Position::new(latitude, longitude));
        node
    }

    /// A probe result with raw node numbers for the hop sequences.
    pub fn probe(
        from: u32,
        to: u32,
        forward: Option<&[u32]>,
        back: Option<&[u32]>,
        at: Timestamp,
    ) -> ProbeResult {
        let convert = |hops: &[u32]| hops.iter().copied().map(NodeNum).collect::<Vec<_>>();
        let forward = forward.map(convert);
        let back = back.map(convert);
        ProbeResult::from_hops(
            NodeNum(from),
            NodeNum(to),
            forward.as_deref(),
            back.as_deref(),
            at,
        )
    }

    /// A store holding `nodes`.
    pub fn store_with(nodes: &[Node]) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for node in nodes {
            store
                .node_upsert(node)
                .unwrap_or_else(|e| panic!("fixture upsert failed: {e}"));
        }
        store
    }

    /// Deterministic RNG for selection tests.
    pub fn seeded_rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }
}
