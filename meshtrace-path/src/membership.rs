//! Segment membership over sets of probe results.
//!
//! A probe contains the segment `{a, b}` when the two nodes are adjacent in
//! its reconstructed forward path or its reconstructed return path. Rows
//! with a malformed hop column never match and never fail the query.

use crate::decode::{decode_path, hop_column, Direction, HopColumn};
use crate::render::{summarize_probe, NodeNames, ProbeSummary};
use meshtrace_core::{NodeNum, NodePair, ProbeResult};
use tracing::debug;

/// Outcome of testing one probe for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Contains,
    Absent,
    /// A stored hop column did not parse; the row is treated as absent.
    Unreadable,
}

/// Test one probe for the unordered segment `{a, b}`.
pub fn segment_membership(result: &ProbeResult, a: NodeNum, b: NodeNum) -> Membership {
    let directions = [Direction::Forward, Direction::Return];
    if directions
        .iter()
        .any(|d| hop_column(result, *d) == HopColumn::Malformed)
    {
        return Membership::Unreadable;
    }

    let found = directions
        .iter()
        .filter_map(|d| decode_path(result, *d))
        .any(|path| path.contains_segment(a, b));

    if found {
        Membership::Contains
    } else {
        Membership::Absent
    }
}

pub fn probe_contains_segment(result: &ProbeResult, a: NodeNum, b: NodeNum) -> bool {
    segment_membership(result, a, b) == Membership::Contains
}

/// Every probe in `results` whose paths contain `{a, b}`, in input order.
pub fn matching_probes<'a>(
    results: &'a [ProbeResult],
    a: NodeNum,
    b: NodeNum,
) -> Vec<&'a ProbeResult> {
    results
        .iter()
        .filter(|result| match segment_membership(result, a, b) {
            Membership::Contains => true,
            Membership::Absent => false,
            Membership::Unreadable => {
                debug!(
                    probe_id = %result.probe_id,
                    from = %result.from_node,
                    to = %result.to_node,
                    "Skipping probe with unreadable hop data"
                );
                false
            }
        })
        .collect()
}

/// Summaries of every probe containing `{a, b}`, newest first, with the
/// segment highlighted in each leg where it occurs.
pub fn probes_containing_segment(
    results: &[ProbeResult],
    names: &impl NodeNames,
    a: NodeNum,
    b: NodeNum,
) -> Vec<ProbeSummary> {
    let pair = NodePair::new(a, b);
    let mut hits = matching_probes(results, a, b);
    hits.sort_by(|x, y| y.timestamp.cmp(&x.timestamp));
    hits.into_iter()
        .map(|result| summarize_probe(result, names, Some(pair)))
        .collect()
}

/// The newest probe between `a` and `b`, in either stored direction.
///
/// Display orientation of the returned row is its own `from`/`to`, not
/// the argument order.
pub fn find_probe_between(
    results: &[ProbeResult],
    a: NodeNum,
    b: NodeNum,
) -> Option<&ProbeResult> {
    results
        .iter()
        .filter(|result| result.involves_pair(a, b))
        .max_by_key(|result| result.timestamp)
}

/// Summaries of the probes between `a` and `b`, newest first.
///
/// With `exclude_empty`, probes carrying no data in either direction are
/// dropped.
pub fn history_between(
    results: &[ProbeResult],
    names: &impl NodeNames,
    a: NodeNum,
    b: NodeNum,
    exclude_empty: bool,
) -> Vec<ProbeSummary> {
    let mut rows: Vec<&ProbeResult> = results
        .iter()
        .filter(|result| result.involves_pair(a, b))
        .collect();
    rows.sort_by(|x, y| y.timestamp.cmp(&x.timestamp));

    rows.into_iter()
        .map(|result| summarize_probe(result, names, None))
        .filter(|summary| !exclude_empty || summary.has_data())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::NodeDirectory;
    use chrono::{Duration, Utc};

    fn via_150() -> ProbeResult {
        ProbeResult::from_hops(
            NodeNum(100),
            NodeNum(200),
            Some(&[NodeNum(150)]),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_adjacent_pairs_in_either_order() {
        let result = via_150();
        assert!(probe_contains_segment(&result, NodeNum(100), NodeNum(150)));
        assert!(probe_contains_segment(&result, NodeNum(150), NodeNum(100)));
        assert!(probe_contains_segment(&result, NodeNum(150), NodeNum(200)));
        assert!(probe_contains_segment(&result, NodeNum(200), NodeNum(150)));
    }

    #[test]
    fn test_non_adjacent_endpoints_absent() {
        let result = via_150();
        assert_eq!(
            segment_membership(&result, NodeNum(100), NodeNum(200)),
            Membership::Absent
        );
    }

    #[test]
    fn test_direct_link_contains_endpoints() {
        let result =
            ProbeResult::from_hops(NodeNum(100), NodeNum(200), Some(&[]), None, Utc::now());
        assert!(probe_contains_segment(&result, NodeNum(200), NodeNum(100)));
    }

    #[test]
    fn test_return_leg_checked() {
        let result = ProbeResult::from_hops(
            NodeNum(100),
            NodeNum(200),
            None,
            Some(&[NodeNum(175)]),
            Utc::now(),
        );
        // return path is [200, 175, 100]
        assert!(probe_contains_segment(&result, NodeNum(200), NodeNum(175)));
        assert!(probe_contains_segment(&result, NodeNum(175), NodeNum(100)));
        assert!(!probe_contains_segment(&result, NodeNum(100), NodeNum(200)));
    }

    #[test]
    fn test_failed_probe_contains_nothing() {
        let result = ProbeResult::failed(NodeNum(100), NodeNum(200), Utc::now());
        assert_eq!(
            segment_membership(&result, NodeNum(100), NodeNum(200)),
            Membership::Absent
        );
    }

    #[test]
    fn test_malformed_row_excluded_not_poisoning() {
        let good = via_150();
        let mut bad = via_150();
        bad.forward_hops = Some("[150,".to_string());

        assert_eq!(
            segment_membership(&bad, NodeNum(100), NodeNum(150)),
            Membership::Unreadable
        );

        let rows = vec![bad, good.clone()];
        let hits = matching_probes(&rows, NodeNum(150), NodeNum(100));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].probe_id, good.probe_id);
    }

    #[test]
    fn test_probes_containing_segment_newest_first_with_highlights() {
        let now = Utc::now();
        let mut older = via_150();
        older.timestamp = now - Duration::hours(2);
        let newer = ProbeResult::from_hops(
            NodeNum(300),
            NodeNum(100),
            None,
            Some(&[NodeNum(150)]),
            now,
        );
        let unrelated =
            ProbeResult::from_hops(NodeNum(400), NodeNum(500), Some(&[]), None, now);

        let rows = vec![older.clone(), unrelated, newer.clone()];
        let names = NodeDirectory::default();
        let summaries = probes_containing_segment(&rows, &names, NodeNum(150), NodeNum(100));

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].probe_id, newer.probe_id);
        assert_eq!(summaries[1].probe_id, older.probe_id);

        // newer only matches on its return leg [100, 150, 300]
        assert!(!summaries[0].forward.has_data());
        let back = summaries[0].back.route().unwrap();
        assert_eq!(back.highlights.len(), 1);
        assert_eq!(back.highlights[0].entries, 0..2);

        let forward = summaries[1].forward.route().unwrap();
        assert_eq!(forward.highlights[0].entries, 0..2);
    }

    #[test]
    fn test_find_probe_between_keeps_stored_direction() {
        let now = Utc::now();
        let mut ab = via_150();
        ab.timestamp = now - Duration::minutes(10);
        let ba = ProbeResult::from_hops(NodeNum(200), NodeNum(100), Some(&[]), None, now);
        let rows = vec![ab, ba.clone()];

        let found = find_probe_between(&rows, NodeNum(100), NodeNum(200)).unwrap();
        assert_eq!(found.probe_id, ba.probe_id);
        assert_eq!(found.from_node, NodeNum(200));

        let same = find_probe_between(&rows, NodeNum(200), NodeNum(100)).unwrap();
        assert_eq!(same.probe_id, ba.probe_id);
    }

    #[test]
    fn test_history_between_excludes_empty() {
        let now = Utc::now();
        let mut ok = via_150();
        ok.timestamp = now - Duration::minutes(5);
        let failed = ProbeResult::failed(NodeNum(200), NodeNum(100), now);
        let rows = vec![ok.clone(), failed.clone()];
        let names = NodeDirectory::default();

        let all = history_between(&rows, &names, NodeNum(100), NodeNum(200), false);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].probe_id, failed.probe_id);

        let with_data = history_between(&rows, &names, NodeNum(200), NodeNum(100), true);
        assert_eq!(with_data.len(), 1);
        assert_eq!(with_data[0].probe_id, ok.probe_id);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::render::NodeDirectory;
    use chrono::Utc;
    use meshtrace_test_utils::generators::{arb_hop_column_text, arb_small_node_num};
    use proptest::prelude::*;

    fn hops_strategy() -> impl Strategy<Value = Option<Vec<u32>>> {
        prop::option::of(prop::collection::vec(1u32..50, 0..6))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Membership is symmetric in its arguments.
        #[test]
        fn prop_membership_symmetric(
            forward in hops_strategy(),
            back in hops_strategy(),
            x in 1u32..52,
            y in 1u32..52,
        ) {
            let forward: Option<Vec<NodeNum>> = forward.map(|h| h.into_iter().map(NodeNum).collect());
            let back: Option<Vec<NodeNum>> = back.map(|h| h.into_iter().map(NodeNum).collect());
            let result = ProbeResult::from_hops(
                NodeNum(50),
                NodeNum(51),
                forward.as_deref(),
                back.as_deref(),
                Utc::now(),
            );
            prop_assert_eq!(
                segment_membership(&result, NodeNum(x), NodeNum(y)),
                segment_membership(&result, NodeNum(y), NodeNum(x))
            );
        }

        /// Every adjacent pair of a forward path is reported as contained.
        #[test]
        fn prop_forward_edges_contained(hops in prop::collection::vec(1u32..50, 0..6)) {
            let hops: Vec<NodeNum> = hops.into_iter().map(NodeNum).collect();
            let result = ProbeResult::from_hops(
                NodeNum(50),
                NodeNum(51),
                Some(hops.as_slice()),
                None,
                Utc::now(),
            );
            let path = decode_path(&result, Direction::Forward).unwrap();
            for (x, y) in path.edges() {
                prop_assert!(probe_contains_segment(&result, x, y));
            }
        }

        /// Arbitrary stored column text never fails a query, and no row with
        /// an unparseable hop column is ever returned.
        #[test]
        fn prop_matching_skips_unreadable_rows(
            columns in prop::collection::vec((arb_hop_column_text(), arb_hop_column_text()), 1..8),
            x in arb_small_node_num(),
            y in arb_small_node_num(),
        ) {
            let results: Vec<ProbeResult> = columns
                .into_iter()
                .map(|(forward, back)| {
                    let mut result = ProbeResult::failed(NodeNum(1), NodeNum(2), Utc::now());
                    result.forward_hops = forward;
                    result.return_hops = back;
                    result
                })
                .collect();

            let hits = matching_probes(&results, x, y);
            for hit in &hits {
                prop_assert_ne!(hop_column(hit, Direction::Forward), HopColumn::Malformed);
                prop_assert_ne!(hop_column(hit, Direction::Return), HopColumn::Malformed);
            }

            let summaries = probes_containing_segment(&results, &NodeDirectory::default(), x, y);
            prop_assert_eq!(summaries.len(), hits.len());
        }
    }
}
