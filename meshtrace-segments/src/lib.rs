//! MESHTRACE Segments - Record Segment Tracker
//!
//! Every adjacency observed in a decoded path is appended to a log of
//! segments together with its physical length. Exactly one row of the log
//! carries the record flag: the longest segment ever seen. The flag only
//! moves to a strictly longer observation, so an equal-length later
//! observation never displaces the holder. Retention sweeps delete old
//! rows but never the holder, which keeps the record durable while the
//! rest of the log stays bounded.

pub mod geo;

pub use geo::{haversine_km, Geodesic, Haversine, EARTH_RADIUS_KM};

use meshtrace_core::{
    cutoff_before, MeshtraceResult, NodeNum, NodePair, Segment, Timestamp, ValidationError,
};
use meshtrace_storage::{SegmentAppendOutcome, TracerouteStore};
use std::time::Duration;

/// Maintains the segment log and its record holder.
#[derive(Debug, Clone)]
pub struct SegmentTracker<S> {
    store: S,
}

impl<S: TracerouteStore> SegmentTracker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Record one observation of `a` and `b` being adjacent.
    ///
    /// Rejects self-edges and distances that are negative or not finite.
    /// Any other input appends a row; the row takes the record flag iff it
    /// is strictly longer than the current holder.
    pub fn consider_segment(
        &self,
        a: NodeNum,
        b: NodeNum,
        distance_km: f64,
        observed_at: Timestamp,
        source: Option<(NodeNum, NodeNum)>,
    ) -> MeshtraceResult<SegmentAppendOutcome> {
        if a == b {
            return Err(ValidationError::SelfSegment { node: a }.into());
        }
        if !distance_km.is_finite() || distance_km < 0.0 {
            return Err(ValidationError::InvalidDistance { distance_km }.into());
        }

        let mut segment = Segment::observation(NodePair::new(a, b), distance_km, observed_at);
        if let Some((from, to)) = source {
            segment = segment.with_source(from, to);
        }

        let outcome = self.store.segment_append(&segment)?;
        if outcome.is_record_holder {
            tracing::info!(
                pair = %segment.pair,
                distance_km,
                previous_km = ?outcome.displaced.as_ref().map(|s| s.distance_km),
                "New longest segment record"
            );
        } else {
            tracing::trace!(pair = %segment.pair, distance_km, "Segment observed");
        }
        Ok(outcome)
    }

    /// Delete observations older than `retention`, keeping the record
    /// holder regardless of age. Returns the number of rows removed.
    pub fn cleanup_old_segments(
        &self,
        retention: Duration,
        now: Timestamp,
    ) -> MeshtraceResult<usize> {
        let deleted = self
            .store
            .segment_delete_older_than(cutoff_before(now, retention))?;
        if deleted > 0 {
            tracing::info!(
                deleted,
                retention_secs = retention.as_secs(),
                "Old segments removed"
            );
        }
        Ok(deleted)
    }

    /// The longest segment ever observed.
    pub fn record_holder(&self) -> MeshtraceResult<Option<Segment>> {
        self.store.segment_record_holder()
    }

    /// The longest segment observed within `window` of `now`.
    pub fn longest_active(
        &self,
        window: Duration,
        now: Timestamp,
    ) -> MeshtraceResult<Option<Segment>> {
        self.store.segment_longest_since(cutoff_before(now, window))
    }
}
