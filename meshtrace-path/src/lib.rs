//! MESHTRACE Path - Traceroute Path Decoding
//!
//! Turns stored probe results into ordered node paths, renders them as
//! route strings and answers whether two nodes were adjacent in a probe.
//!
//! Every function here is read-only over the rows it is given; malformed
//! stored data degrades to "no data" for the affected row instead of an
//! error.

pub mod decode;
pub mod membership;
pub mod render;

pub use decode::{
    decode_path, decode_snr, hop_column, DecodedPath, Direction, HopColumn, PathEntry, SNR_SCALE,
};
pub use membership::{
    find_probe_between, history_between, matching_probes, probe_contains_segment,
    probes_containing_segment, segment_membership, Membership,
};
pub use render::{
    render_path, summarize_probe, HighlightSpan, NodeDirectory, NodeNames, ProbeSummary,
    RenderedRoute, RouteView, ARROW,
};
