//! MESHTRACE Storage - Storage Trait and In-Memory Implementation
//!
//! Defines the persistence surface of the traceroute subsystem. Probe
//! results and segments follow different strategies and get separate
//! operations: probe results are upserted by their ordered `(from, to)`
//! key, segments are an append-only log with a single flagged row.

use meshtrace_core::{
    EntityType, MeshtraceResult, Node, NodeNum, NodePair, ProbeResult, Segment, StorageError,
    Timestamp,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

// ============================================================================
// OUTCOME TYPES
// ============================================================================

/// Result of appending one segment observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentAppendOutcome {
    /// Id of the row that was inserted.
    pub segment_id: Uuid,
    /// Whether the new row now holds the record flag.
    pub is_record_holder: bool,
    /// The holder that lost its flag to the new row, if any.
    pub displaced: Option<Segment>,
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait for traceroute entities.
///
/// Every mutation is a self-contained transaction: concurrent callers never
/// observe a half-applied change.
pub trait TracerouteStore: Send + Sync {
    // === Node Operations ===

    /// Insert or replace a node row.
    fn node_upsert(&self, node: &Node) -> MeshtraceResult<()>;

    /// Get a node by number.
    fn node_get(&self, node: NodeNum) -> MeshtraceResult<Option<Node>>;

    /// List all known nodes, ordered by node number.
    fn node_list(&self) -> MeshtraceResult<Vec<Node>>;

    /// Set `last_probe_requested_at` on a node.
    ///
    /// Fails with `StorageError::NotFound` when the node is unknown.
    fn node_mark_probe_requested(&self, node: NodeNum, at: Timestamp) -> MeshtraceResult<()>;

    // === Probe Result Operations (upsert by ordered pair) ===

    /// Store a result, replacing the current one for the same `(from, to)`.
    /// Returns the superseded row.
    fn probe_result_upsert(&self, result: &ProbeResult) -> MeshtraceResult<Option<ProbeResult>>;

    /// Get the current result for an ordered pair.
    fn probe_result_get(&self, from: NodeNum, to: NodeNum)
        -> MeshtraceResult<Option<ProbeResult>>;

    /// Whether a current result exists for an ordered pair.
    fn probe_result_exists(&self, from: NodeNum, to: NodeNum) -> MeshtraceResult<bool> {
        Ok(self.probe_result_get(from, to)?.is_some())
    }

    /// Current results for `a -> b` and `b -> a`, newest first.
    fn probe_result_list_between(
        &self,
        a: NodeNum,
        b: NodeNum,
    ) -> MeshtraceResult<Vec<ProbeResult>>;

    /// All current results, newest first.
    fn probe_result_list(&self) -> MeshtraceResult<Vec<ProbeResult>>;

    // === Segment Operations (append-only) ===

    /// Append an observation.
    ///
    /// In the same transaction, if the row's distance is strictly greater
    /// than the current record holder's (or there is no holder), the old
    /// flag is cleared and the new row is flagged. The incoming
    /// `is_record_holder` value is ignored.
    fn segment_append(&self, segment: &Segment) -> MeshtraceResult<SegmentAppendOutcome>;

    /// The row currently flagged as record holder.
    fn segment_record_holder(&self) -> MeshtraceResult<Option<Segment>>;

    /// Longest row observed at or after `cutoff`. Ties go to the earliest
    /// observation.
    fn segment_longest_since(&self, cutoff: Timestamp) -> MeshtraceResult<Option<Segment>>;

    /// Delete rows observed before `cutoff`, except the record holder.
    /// Returns the number of rows deleted.
    fn segment_delete_older_than(&self, cutoff: Timestamp) -> MeshtraceResult<usize>;

    /// All observations for one pair, newest first.
    fn segment_list_for_pair(&self, pair: NodePair) -> MeshtraceResult<Vec<Segment>>;

    /// Number of stored segment rows.
    fn segment_count(&self) -> MeshtraceResult<usize>;
}

impl<T: TracerouteStore + ?Sized> TracerouteStore for Arc<T> {
    fn node_upsert(&self, node: &Node) -> MeshtraceResult<()> {
        (**self).node_upsert(node)
    }

    fn node_get(&self, node: NodeNum) -> MeshtraceResult<Option<Node>> {
        (**self).node_get(node)
    }

    fn node_list(&self) -> MeshtraceResult<Vec<Node>> {
        (**self).node_list()
    }

    fn node_mark_probe_requested(&self, node: NodeNum, at: Timestamp) -> MeshtraceResult<()> {
        (**self).node_mark_probe_requested(node, at)
    }

    fn probe_result_upsert(&self, result: &ProbeResult) -> MeshtraceResult<Option<ProbeResult>> {
        (**self).probe_result_upsert(result)
    }

    fn probe_result_get(
        &self,
        from: NodeNum,
        to: NodeNum,
    ) -> MeshtraceResult<Option<ProbeResult>> {
        (**self).probe_result_get(from, to)
    }

    fn probe_result_list_between(
        &self,
        a: NodeNum,
        b: NodeNum,
    ) -> MeshtraceResult<Vec<ProbeResult>> {
        (**self).probe_result_list_between(a, b)
    }

    fn probe_result_list(&self) -> MeshtraceResult<Vec<ProbeResult>> {
        (**self).probe_result_list()
    }

    fn segment_append(&self, segment: &Segment) -> MeshtraceResult<SegmentAppendOutcome> {
        (**self).segment_append(segment)
    }

    fn segment_record_holder(&self) -> MeshtraceResult<Option<Segment>> {
        (**self).segment_record_holder()
    }

    fn segment_longest_since(&self, cutoff: Timestamp) -> MeshtraceResult<Option<Segment>> {
        (**self).segment_longest_since(cutoff)
    }

    fn segment_delete_older_than(&self, cutoff: Timestamp) -> MeshtraceResult<usize> {
        (**self).segment_delete_older_than(cutoff)
    }

    fn segment_list_for_pair(&self, pair: NodePair) -> MeshtraceResult<Vec<Segment>> {
        (**self).segment_list_for_pair(pair)
    }

    fn segment_count(&self) -> MeshtraceResult<usize> {
        (**self).segment_count()
    }
}

// ============================================================================
// IN-MEMORY STORAGE
// ============================================================================

/// In-memory store.
///
/// Each table sits behind its own `RwLock`; every mutation holds the write
/// guard of its table for the whole operation, which gives the same
/// isolation a single-statement transaction would.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    nodes: Arc<RwLock<HashMap<NodeNum, Node>>>,
    probe_results: Arc<RwLock<HashMap<(NodeNum, NodeNum), ProbeResult>>>,
    // Insertion order is preserved.
    segments: Arc<RwLock<Vec<Segment>>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StorageError> {
    lock.read().map_err(|_| StorageError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StorageError> {
    lock.write().map_err(|_| StorageError::LockPoisoned)
}

/// Ordering used by "longest" queries: greater distance wins, equal
/// distance goes to the earlier observation.
fn beats(candidate: &Segment, best: &Segment) -> bool {
    candidate.distance_km > best.distance_km
        || (candidate.distance_km == best.distance_km && candidate.observed_at < best.observed_at)
}

fn newest_first(results: &mut [ProbeResult]) {
    results.sort_by(|x, y| y.timestamp.cmp(&x.timestamp));
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored data.
    pub fn clear(&self) -> MeshtraceResult<()> {
        write(&self.nodes)?.clear();
        write(&self.probe_results)?.clear();
        write(&self.segments)?.clear();
        Ok(())
    }

    /// Get count of stored nodes.
    pub fn node_count(&self) -> MeshtraceResult<usize> {
        Ok(read(&self.nodes)?.len())
    }

    /// Get count of stored probe results.
    pub fn probe_result_count(&self) -> MeshtraceResult<usize> {
        Ok(read(&self.probe_results)?.len())
    }

    /// Number of rows carrying the record flag. Always 0 or 1.
    pub fn record_flag_count(&self) -> MeshtraceResult<usize> {
        Ok(read(&self.segments)?
            .iter()
            .filter(|s| s.is_record_holder)
            .count())
    }
}

impl TracerouteStore for InMemoryStore {
    // === Node Operations ===

    fn node_upsert(&self, node: &Node) -> MeshtraceResult<()> {
        write(&self.nodes)?.insert(node.node_num, node.clone());
        Ok(())
    }

    fn node_get(&self, node: NodeNum) -> MeshtraceResult<Option<Node>> {
        Ok(read(&self.nodes)?.get(&node).cloned())
    }

    fn node_list(&self) -> MeshtraceResult<Vec<Node>> {
        let mut nodes: Vec<Node> = read(&self.nodes)?.values().cloned().collect();
        nodes.sort_by_key(|n| n.node_num);
        Ok(nodes)
    }

    fn node_mark_probe_requested(&self, node: NodeNum, at: Timestamp) -> MeshtraceResult<()> {
        let mut nodes = write(&self.nodes)?;
        let row = nodes
            .get_mut(&node)
            .ok_or_else(|| StorageError::node_not_found(node))?;
        row.last_probe_requested_at = Some(at);
        Ok(())
    }

    // === Probe Result Operations ===

    fn probe_result_upsert(&self, result: &ProbeResult) -> MeshtraceResult<Option<ProbeResult>> {
        let mut results = write(&self.probe_results)?;
        Ok(results.insert((result.from_node, result.to_node), result.clone()))
    }

    fn probe_result_get(
        &self,
        from: NodeNum,
        to: NodeNum,
    ) -> MeshtraceResult<Option<ProbeResult>> {
        Ok(read(&self.probe_results)?.get(&(from, to)).cloned())
    }

    fn probe_result_list_between(
        &self,
        a: NodeNum,
        b: NodeNum,
    ) -> MeshtraceResult<Vec<ProbeResult>> {
        let results = read(&self.probe_results)?;
        let mut found: Vec<ProbeResult> = results.get(&(a, b)).cloned().into_iter().collect();
        if a != b {
            found.extend(results.get(&(b, a)).cloned());
        }
        newest_first(&mut found);
        Ok(found)
    }

    fn probe_result_list(&self) -> MeshtraceResult<Vec<ProbeResult>> {
        let mut all: Vec<ProbeResult> = read(&self.probe_results)?.values().cloned().collect();
        newest_first(&mut all);
        Ok(all)
    }

    // === Segment Operations ===

    fn segment_append(&self, segment: &Segment) -> MeshtraceResult<SegmentAppendOutcome> {
        let mut segments = write(&self.segments)?;
        if segments.iter().any(|s| s.segment_id == segment.segment_id) {
            return Err(StorageError::InsertFailed {
                entity_type: EntityType::Segment,
                reason: format!("segment {} already exists", segment.segment_id),
            }
            .into());
        }

        let holder = segments.iter_mut().find(|s| s.is_record_holder);
        let takes_record = match &holder {
            Some(current) => segment.distance_km > current.distance_km,
            None => true,
        };

        let mut displaced = None;
        if takes_record {
            if let Some(current) = holder {
                current.is_record_holder = false;
                displaced = Some(current.clone());
            }
        }

        let mut row = segment.clone();
        row.is_record_holder = takes_record;
        segments.push(row);

        Ok(SegmentAppendOutcome {
            segment_id: segment.segment_id,
            is_record_holder: takes_record,
            displaced,
        })
    }

    fn segment_record_holder(&self) -> MeshtraceResult<Option<Segment>> {
        Ok(read(&self.segments)?
            .iter()
            .find(|s| s.is_record_holder)
            .cloned())
    }

    fn segment_longest_since(&self, cutoff: Timestamp) -> MeshtraceResult<Option<Segment>> {
        let segments = read(&self.segments)?;
        let mut best: Option<&Segment> = None;
        for s in segments.iter().filter(|s| s.observed_at >= cutoff) {
            if best.map_or(true, |b| beats(s, b)) {
                best = Some(s);
            }
        }
        Ok(best.cloned())
    }

    fn segment_delete_older_than(&self, cutoff: Timestamp) -> MeshtraceResult<usize> {
        let mut segments = write(&self.segments)?;
        let before = segments.len();
        segments.retain(|s| s.is_record_holder || s.observed_at >= cutoff);
        Ok(before - segments.len())
    }

    fn segment_list_for_pair(&self, pair: NodePair) -> MeshtraceResult<Vec<Segment>> {
        let mut rows: Vec<Segment> = read(&self.segments)?
            .iter()
            .filter(|s| s.pair == pair)
            .cloned()
            .collect();
        rows.sort_by(|x, y| y.observed_at.cmp(&x.observed_at));
        Ok(rows)
    }

    fn segment_count(&self) -> MeshtraceResult<usize> {
        Ok(read(&self.segments)?.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// After every append exactly one row is flagged and it carries the
        /// running maximum, first occurrence winning ties.
        #[test]
        fn prop_record_flag_tracks_running_max(
            distances in prop::collection::vec(0u32..500, 1..40)
        ) {
            let store = InMemoryStore::new();
            let now = Utc::now();
            let mut best: Option<(f64, Uuid)> = None;

            for (i, d) in distances.iter().enumerate() {
                let km = f64::from(*d);
                let row = Segment::observation(
                    NodePair::new(NodeNum(1), NodeNum(2 + i as u32)),
                    km,
                    now,
                );
                store.segment_append(&row).unwrap();
                if best.map_or(true, |(b, _)| km > b) {
                    best = Some((km, row.segment_id));
                }

                prop_assert_eq!(store.record_flag_count().unwrap(), 1);
                let holder = store.segment_record_holder().unwrap().unwrap();
                prop_assert_eq!(Some((holder.distance_km, holder.segment_id)), best);
            }
        }

        /// Cleanup never removes the record holder and never leaves a row
        /// older than the cutoff other than the holder.
        #[test]
        fn prop_cleanup_exempts_holder(
            ages in prop::collection::vec((0i64..120, 0u32..500), 1..40),
            retention_days in 1i64..90
        ) {
            let store = InMemoryStore::new();
            let now = Utc::now();
            for (i, (age, d)) in ages.iter().enumerate() {
                let row = Segment::observation(
                    NodePair::new(NodeNum(1), NodeNum(2 + i as u32)),
                    f64::from(*d),
                    now - Duration::days(*age),
                );
                store.segment_append(&row).unwrap();
            }
            let holder = store.segment_record_holder().unwrap().unwrap();
            let cutoff = now - Duration::days(retention_days);

            store.segment_delete_older_than(cutoff).unwrap();

            let after = store.segment_record_holder().unwrap().unwrap();
            prop_assert_eq!(after.segment_id, holder.segment_id);
            prop_assert!(store
                .segment_longest_since(chrono::DateTime::<Utc>::MIN_UTC)
                .unwrap()
                .is_some());
            let remaining = store.segment_count().unwrap();
            let recent = ages
                .iter()
                .filter(|(age, _)| now - Duration::days(*age) >= cutoff)
                .count();
            let holder_is_old = holder.observed_at < cutoff;
            prop_assert_eq!(remaining, recent + usize::from(holder_is_old));
        }
    }
}
