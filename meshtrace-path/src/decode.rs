//! Reconstruction of full ordered paths from stored hop and SNR columns.
//!
//! A forward path is `[from, hops.., to]`, a return path is
//! `[to, hops.., from]`. Both are derived from the probe's own stored
//! endpoints, never from the caller's argument order.

use meshtrace_core::{decode_sequence, parse_sequence, NodeNum, ProbeResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Divisor turning raw transport SNR readings into dB.
pub const SNR_SCALE: f32 = 4.0;

/// Which leg of a probe a path describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// from -> to
    Forward,
    /// to -> from
    Return,
}

/// Parsed state of one stored hop column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopColumn {
    /// Absent, empty or `null`: the direction got no response.
    Missing,
    /// Present but not a JSON array of node numbers.
    Malformed,
    /// Intermediate hops; empty for a direct link.
    Hops(Vec<NodeNum>),
}

impl HopColumn {
    pub fn parse(raw: Option<&str>) -> Self {
        match parse_sequence::<NodeNum>(raw) {
            Ok(Some(hops)) => HopColumn::Hops(hops),
            Ok(None) => HopColumn::Missing,
            Err(_) => HopColumn::Malformed,
        }
    }

    pub fn hops(&self) -> Option<&[NodeNum]> {
        match self {
            HopColumn::Hops(hops) => Some(hops),
            _ => None,
        }
    }
}

/// Decode a raw SNR column into dB values.
///
/// Returns `None` for absent or unparseable columns; a bad SNR column never
/// invalidates the hop data it annotates.
pub fn decode_snr(raw: Option<&str>) -> Option<Vec<f32>> {
    let values = decode_sequence::<f32>(raw)?;
    Some(values.into_iter().map(|v| v / SNR_SCALE).collect())
}

/// One node on a decoded path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    pub node: NodeNum,
    /// Reception SNR at this node, in dB.
    pub snr_db: Option<f32>,
}

/// A full ordered path, endpoints included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPath {
    pub direction: Direction,
    pub entries: Vec<PathEntry>,
}

impl DecodedPath {
    /// Build `[start, hops.., end]`.
    ///
    /// The i-th hop takes `snr_db[i]`; the terminal endpoint takes
    /// `snr_db[hops.len()]` when the sequence carries that extra reading.
    /// The originating endpoint never has an SNR.
    pub fn build(
        direction: Direction,
        start: NodeNum,
        hops: &[NodeNum],
        end: NodeNum,
        snr_db: Option<&[f32]>,
    ) -> Self {
        let snr_at = |i: usize| snr_db.and_then(|s| s.get(i).copied());

        let mut entries = Vec::with_capacity(hops.len() + 2);
        entries.push(PathEntry {
            node: start,
            snr_db: None,
        });
        entries.extend(hops.iter().enumerate().map(|(i, node)| PathEntry {
            node: *node,
            snr_db: snr_at(i),
        }));
        entries.push(PathEntry {
            node: end,
            snr_db: snr_at(hops.len()),
        });

        Self { direction, entries }
    }

    /// Node numbers in path order.
    pub fn nodes(&self) -> Vec<NodeNum> {
        self.entries.iter().map(|e| e.node).collect()
    }

    /// Number of intermediate hops; 0 for a direct link.
    pub fn hop_count(&self) -> usize {
        self.entries.len().saturating_sub(2)
    }

    /// Consecutive node pairs in path order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeNum, NodeNum)> + '_ {
        self.entries.windows(2).map(|w| (w[0].node, w[1].node))
    }

    /// Every index range `i..i+2` where `{a, b}` appear adjacent, in either
    /// order.
    pub fn find_segment(&self, a: NodeNum, b: NodeNum) -> Vec<Range<usize>> {
        self.edges()
            .enumerate()
            .filter(|(_, (x, y))| (*x == a && *y == b) || (*x == b && *y == a))
            .map(|(i, _)| i..i + 2)
            .collect()
    }

    pub fn contains_segment(&self, a: NodeNum, b: NodeNum) -> bool {
        self.edges()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

/// Hop column of the requested leg.
pub fn hop_column(result: &ProbeResult, direction: Direction) -> HopColumn {
    match direction {
        Direction::Forward => HopColumn::parse(result.forward_hops.as_deref()),
        Direction::Return => HopColumn::parse(result.return_hops.as_deref()),
    }
}

/// Reconstruct one leg of a probe. `None` means no data for that leg.
pub fn decode_path(result: &ProbeResult, direction: Direction) -> Option<DecodedPath> {
    let column = hop_column(result, direction);
    let hops = column.hops()?;

    let (start, end, snr_raw) = match direction {
        Direction::Forward => (result.from_node, result.to_node, &result.forward_snr),
        Direction::Return => (result.to_node, result.from_node, &result.return_snr),
    };
    let snr = decode_snr(snr_raw.as_deref());

    Some(DecodedPath::build(
        direction,
        start,
        hops,
        end,
        snr.as_deref(),
    ))
}
