//! MESHTRACE Core - Entity Types
//!
//! Pure data structures shared by the scheduler, the path decoder and the
//! segment tracker, plus the JSON column encoding of hop and SNR
//! sequences. No business logic lives here.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod transport;

pub use config::{cutoff_before, TracerouteConfig};
pub use error::{
    ConfigError, MeshtraceError, MeshtraceResult, StorageError, TransportError, ValidationError,
};
pub use transport::ProbeTransport;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Stable numeric identifier of a mesh participant.
///
/// Displays in the canonical mesh node id form, `!` followed by eight
/// lowercase hex digits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeNum(pub u32);

impl NodeNum {
    /// Destination address used for broadcasts. Never a probe target.
    pub const BROADCAST: NodeNum = NodeNum(u32::MAX);

    /// Wrap a raw node number.
    pub const fn new(num: u32) -> Self {
        NodeNum(num)
    }

    /// The raw node number.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Whether this is the broadcast address.
    pub const fn is_broadcast(self) -> bool {
        self.0 == u32::MAX
    }
}

impl From<u32> for NodeNum {
    fn from(num: u32) -> Self {
        NodeNum(num)
    }
}

impl fmt::Display for NodeNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

/// Error when parsing an invalid node number string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeNumParseError(pub String);

impl fmt::Display for NodeNumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid node number: {}", self.0)
    }
}

impl std::error::Error for NodeNumParseError {}

impl FromStr for NodeNum {
    type Err = NodeNumParseError;

    /// Accepts `!abcd1234`, `0xabcd1234` or a plain decimal number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = if let Some(hex) = s.strip_prefix('!') {
            u32::from_str_radix(hex, 16).ok()
        } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16).ok()
        } else {
            s.parse::<u32>().ok()
        };
        parsed
            .map(NodeNum)
            .ok_or_else(|| NodeNumParseError(s.to_string()))
    }
}

/// Entity type discriminator used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Node,
    Segment,
}

// ============================================================================
// NODE
// ============================================================================

/// Last reported geographic position of a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Degrees, WGS84
    pub latitude: f64,
    /// Degrees, WGS84
    pub longitude: f64,
    /// Meters above sea level
    pub altitude: Option<i32>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }
}

/// A mesh participant.
///
/// Packet-derived fields are written by the ingestion pipeline; only
/// `last_probe_requested_at` is written by the probe scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_num: NodeNum,
    /// Short stable display identifier, usually `!xxxxxxxx`.
    pub node_id: String,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub position: Option<Position>,
    /// Last time any packet was observed from this node.
    pub last_heard: Option<Timestamp>,
    /// Last time the scheduler asked to probe this node.
    pub last_probe_requested_at: Option<Timestamp>,
}

impl Node {
    /// Create a node with only its identity populated.
    pub fn new(node_num: NodeNum) -> Self {
        Self {
            node_num,
            node_id: node_num.to_string(),
            long_name: None,
            short_name: None,
            position: None,
            last_heard: None,
            last_probe_requested_at: None,
        }
    }

    /// Best available human-readable name.
    pub fn display_name(&self) -> &str {
        self.long_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.short_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.node_id)
    }
}

// ============================================================================
// PROBE RESULT
// ============================================================================

/// One traceroute attempt between an ordered pair of nodes.
///
/// The four sequences are kept exactly as the radio ingestion path stored
/// them: optional JSON array text. Absent, `null` and unparseable text all
/// mean "no data" for that direction; `[]` is a direct link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe_id: EntityId,
    /// Initiator of the probe.
    pub from_node: NodeNum,
    /// Target of the probe.
    pub to_node: NodeNum,
    /// Intermediate nodes seen going from -> to.
    pub forward_hops: Option<String>,
    /// Intermediate nodes seen on the reply path to -> from.
    pub return_hops: Option<String>,
    /// Raw SNR readings parallel to `forward_hops`.
    pub forward_snr: Option<String>,
    /// Raw SNR readings parallel to `return_hops`.
    pub return_snr: Option<String>,
    pub timestamp: Timestamp,
}

impl ProbeResult {
    /// Build a result from decoded sequences.
    ///
    /// `None` for a hop sequence records that direction as "no response".
    pub fn from_hops(
        from_node: NodeNum,
        to_node: NodeNum,
        forward_hops: Option<&[NodeNum]>,
        return_hops: Option<&[NodeNum]>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            probe_id: new_entity_id(),
            from_node,
            to_node,
            forward_hops: forward_hops.and_then(encode_sequence),
            return_hops: return_hops.and_then(encode_sequence),
            forward_snr: None,
            return_snr: None,
            timestamp,
        }
    }

    /// Attach raw SNR readings (transport units, not dB).
    pub fn with_snr(mut self, forward: Option<&[i32]>, back: Option<&[i32]>) -> Self {
        self.forward_snr = forward.and_then(encode_sequence);
        self.return_snr = back.and_then(encode_sequence);
        self
    }

    /// A probe that timed out or was rejected by the transport.
    pub fn failed(from_node: NodeNum, to_node: NodeNum, timestamp: Timestamp) -> Self {
        Self::from_hops(from_node, to_node, None, None, timestamp)
    }

    /// Intermediate hops going from -> to, `None` when there is no data.
    pub fn forward_hop_list(&self) -> Option<Vec<NodeNum>> {
        decode_sequence(self.forward_hops.as_deref())
    }

    /// Intermediate hops on the reply path to -> from, `None` when there is no data.
    pub fn return_hop_list(&self) -> Option<Vec<NodeNum>> {
        decode_sequence(self.return_hops.as_deref())
    }

    /// Neither direction carries usable hop data.
    pub fn is_failed(&self) -> bool {
        self.forward_hop_list().is_none() && self.return_hop_list().is_none()
    }

    /// Whether this result is for the unordered pair `{a, b}`.
    pub fn involves_pair(&self, a: NodeNum, b: NodeNum) -> bool {
        (self.from_node == a && self.to_node == b) || (self.from_node == b && self.to_node == a)
    }
}

/// Serialize a sequence into the JSON text stored in probe result columns.
pub fn encode_sequence<T: Serialize>(seq: &[T]) -> Option<String> {
    serde_json::to_string(seq).ok()
}

/// Parse one stored sequence column, keeping malformed text distinct.
///
/// `Ok(None)` when the column is absent, blank or `null`; `Err` when it
/// holds anything that is not a JSON array of `T`.
pub fn parse_sequence<T: DeserializeOwned>(
    raw: Option<&str>,
) -> Result<Option<Vec<T>>, serde_json::Error> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => serde_json::from_str::<Option<Vec<T>>>(raw),
    }
}

/// Parse one stored sequence column.
///
/// Returns `None` when the column is absent, holds `null`, or does not
/// parse as an array of `T`. An empty array parses to `Some(vec![])`.
pub fn decode_sequence<T: DeserializeOwned>(raw: Option<&str>) -> Option<Vec<T>> {
    parse_sequence(raw).ok().flatten()
}

// ============================================================================
// SEGMENT
// ============================================================================

/// Unordered pair of node numbers, normalized so that `a <= b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePair {
    pub a: NodeNum,
    pub b: NodeNum,
}

impl NodePair {
    pub fn new(x: NodeNum, y: NodeNum) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    /// Whether `{x, y}` is this pair, in either order.
    pub fn matches(&self, x: NodeNum, y: NodeNum) -> bool {
        *self == NodePair::new(x, y)
    }

    pub fn is_self_loop(&self) -> bool {
        self.a == self.b
    }
}

impl fmt::Display for NodePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.a, self.b)
    }
}

/// One observation of two nodes being adjacent in a decoded path, with
/// the physical distance between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: EntityId,
    pub pair: NodePair,
    pub distance_km: f64,
    pub observed_at: Timestamp,
    /// At most one row in the whole log carries this flag.
    pub is_record_holder: bool,
    /// `(from, to)` of the probe the observation came from, if any.
    pub source_probe: Option<(NodeNum, NodeNum)>,
}

impl Segment {
    /// A fresh, unflagged observation.
    pub fn observation(pair: NodePair, distance_km: f64, observed_at: Timestamp) -> Self {
        Self {
            segment_id: new_entity_id(),
            pair,
            distance_km,
            observed_at,
            is_record_holder: false,
            source_probe: None,
        }
    }

    pub fn with_source(mut self, from: NodeNum, to: NodeNum) -> Self {
        self.source_probe = Some((from, to));
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
