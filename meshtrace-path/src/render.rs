//! Human-readable route strings.
//!
//! Markup is left to the caller: a highlighted pair is reported as index
//! ranges into both the path and the rendered text.

use crate::decode::{decode_path, DecodedPath, Direction};
use meshtrace_core::{EntityId, Node, NodeNum, NodePair, ProbeResult, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;

/// Separator between path entries.
pub const ARROW: &str = " → ";

/// Resolves node numbers to display names.
pub trait NodeNames {
    fn display_name(&self, node: NodeNum) -> String;
}

/// Name lookup built from node rows. Unknown nodes render as `!xxxxxxxx`.
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    names: HashMap<NodeNum, String>,
}

impl NodeDirectory {
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        Self {
            names: nodes
                .into_iter()
                .map(|n| (n.node_num, n.display_name().to_string()))
                .collect(),
        }
    }
}

impl NodeNames for NodeDirectory {
    fn display_name(&self, node: NodeNum) -> String {
        self.names
            .get(&node)
            .cloned()
            .unwrap_or_else(|| node.to_string())
    }
}

/// One highlighted occurrence of a node pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightSpan {
    /// Range of path entries, always two long.
    pub entries: Range<usize>,
    /// Byte range in `RenderedRoute::text`.
    pub text: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedRoute {
    pub text: String,
    pub hop_count: usize,
    pub highlights: Vec<HighlightSpan>,
}

/// Render a path, optionally reporting where `highlight` occurs.
pub fn render_path(
    path: &DecodedPath,
    names: &impl NodeNames,
    highlight: Option<NodePair>,
) -> RenderedRoute {
    let mut text = String::new();
    let mut spans: Vec<Range<usize>> = Vec::with_capacity(path.entries.len());

    for (i, entry) in path.entries.iter().enumerate() {
        if i > 0 {
            text.push_str(ARROW);
        }
        let start = text.len();
        text.push_str(&names.display_name(entry.node));
        if let Some(snr) = entry.snr_db {
            text.push_str(&format!(" ({:.2} dB)", snr));
        }
        spans.push(start..text.len());
    }

    let highlights: Vec<HighlightSpan> = highlight
        .map(|pair| {
            path.find_segment(pair.a, pair.b)
                .into_iter()
                .map(|entries| HighlightSpan {
                    text: spans[entries.start].start..spans[entries.end - 1].end,
                    entries,
                })
                .collect()
        })
        .unwrap_or_default();

    RenderedRoute {
        text,
        hop_count: path.hop_count(),
        highlights,
    }
}

/// Rendered state of one leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouteView {
    NoData,
    Route(RenderedRoute),
}

impl RouteView {
    pub fn has_data(&self) -> bool {
        matches!(self, RouteView::Route(_))
    }

    pub fn route(&self) -> Option<&RenderedRoute> {
        match self {
            RouteView::Route(route) => Some(route),
            RouteView::NoData => None,
        }
    }
}

/// Display-ready view of one probe result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSummary {
    pub probe_id: EntityId,
    pub from_node: NodeNum,
    pub to_node: NodeNum,
    pub timestamp: Timestamp,
    /// `from -> to`
    pub forward: RouteView,
    /// `to -> from`
    pub back: RouteView,
}

impl ProbeSummary {
    /// At least one leg carries data.
    pub fn has_data(&self) -> bool {
        self.forward.has_data() || self.back.has_data()
    }
}

fn view(
    result: &ProbeResult,
    direction: Direction,
    names: &impl NodeNames,
    highlight: Option<NodePair>,
) -> RouteView {
    match decode_path(result, direction) {
        Some(path) => RouteView::Route(render_path(&path, names, highlight)),
        None => RouteView::NoData,
    }
}

/// Summarize a probe, oriented by its stored `from`/`to`.
pub fn summarize_probe(
    result: &ProbeResult,
    names: &impl NodeNames,
    highlight: Option<NodePair>,
) -> ProbeSummary {
    ProbeSummary {
        probe_id: result.probe_id,
        from_node: result.from_node,
        to_node: result.to_node,
        timestamp: result.timestamp,
        forward: view(result, Direction::Forward, names, highlight),
        back: view(result, Direction::Return, names, highlight),
    }
}
