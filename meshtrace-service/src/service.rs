//! Service facade over the scheduler, the path decoder and the segment
//! tracker.

use meshtrace_core::{
    MeshtraceError, MeshtraceResult, NodeNum, NodePair, Position, ProbeResult, ProbeTransport,
    Segment, Timestamp, TracerouteConfig,
};
use meshtrace_path::{
    decode_path, find_probe_between, history_between, hop_column, probes_containing_segment,
    summarize_probe, Direction, HopColumn, NodeDirectory, ProbeSummary,
};
use meshtrace_scheduler::{ProbeCategory, ProbeScheduler};
use meshtrace_segments::{Geodesic, Haversine, SegmentTracker};
use meshtrace_storage::TracerouteStore;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// What one scheduling tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub target: NodeNum,
    pub category: ProbeCategory,
    /// Whether the transport accepted the request.
    pub sent: bool,
}

/// Entry point for the traceroute subsystem.
///
/// All state lives in the store; the service itself is a stateless request
/// handler and may be shared freely behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TracerouteService<S, G = Haversine> {
    store: S,
    scheduler: ProbeScheduler<S>,
    tracker: SegmentTracker<S>,
    geodesic: G,
    config: TracerouteConfig,
}

impl<S: TracerouteStore + Clone> TracerouteService<S, Haversine> {
    /// Service using haversine distances.
    pub fn new(store: S, config: TracerouteConfig) -> Self {
        Self::with_geodesic(store, Haversine, config)
    }
}

impl<S, G> TracerouteService<S, G>
where
    S: TracerouteStore + Clone,
    G: Geodesic,
{
    pub fn with_geodesic(store: S, geodesic: G, config: TracerouteConfig) -> Self {
        Self {
            scheduler: ProbeScheduler::new(store.clone(), config.clone()),
            tracker: SegmentTracker::new(store.clone()),
            store,
            geodesic,
            config,
        }
    }

    pub fn config(&self) -> &TracerouteConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn scheduler(&self) -> &ProbeScheduler<S> {
        &self.scheduler
    }

    pub fn tracker(&self) -> &SegmentTracker<S> {
        &self.tracker
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Display names for every known node.
    pub fn node_directory(&self) -> MeshtraceResult<NodeDirectory> {
        let nodes = self.store.node_list()?;
        Ok(NodeDirectory::from_nodes(&nodes))
    }

    /// Probes between `a` and `b` in either direction, newest first.
    pub fn probe_history(
        &self,
        a: NodeNum,
        b: NodeNum,
        exclude_empty: bool,
    ) -> MeshtraceResult<Vec<ProbeSummary>> {
        let results = self.store.probe_result_list_between(a, b)?;
        let names = self.node_directory()?;
        Ok(history_between(&results, &names, a, b, exclude_empty))
    }

    /// The newest probe between `a` and `b`, oriented as it was stored.
    pub fn latest_probe_between(
        &self,
        a: NodeNum,
        b: NodeNum,
    ) -> MeshtraceResult<Option<ProbeSummary>> {
        let results = self.store.probe_result_list_between(a, b)?;
        let names = self.node_directory()?;
        Ok(find_probe_between(&results, a, b).map(|r| summarize_probe(r, &names, None)))
    }

    /// Every stored probe whose paths contain the edge `{n1, n2}`, newest
    /// first, with the edge highlighted.
    pub fn probes_with_segment(
        &self,
        n1: NodeNum,
        n2: NodeNum,
    ) -> MeshtraceResult<Vec<ProbeSummary>> {
        let results = self.store.probe_result_list()?;
        let names = self.node_directory()?;
        Ok(probes_containing_segment(&results, &names, n1, n2))
    }

    /// The longest segment ever observed.
    pub fn record_segment(&self) -> MeshtraceResult<Option<Segment>> {
        self.tracker.record_holder()
    }

    /// The longest segment observed in the last `days` days.
    pub fn longest_segment_within(
        &self,
        days: u32,
        now: Timestamp,
    ) -> MeshtraceResult<Option<Segment>> {
        let window = Duration::from_secs(u64::from(days) * 86_400);
        self.tracker.longest_active(window, now)
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Store a probe response and feed its segments to the tracker.
    ///
    /// Every distinct adjacent pair in either decoded path whose two nodes
    /// both have a known position is considered once. Returns the number of
    /// segments considered.
    pub fn ingest_probe_result(&self, result: &ProbeResult) -> MeshtraceResult<usize> {
        if let Some(previous) = self.store.probe_result_upsert(result)? {
            tracing::debug!(
                from = %result.from_node,
                to = %result.to_node,
                superseded = %previous.probe_id,
                "Probe result superseded"
            );
        }

        let mut pairs: Vec<NodePair> = Vec::new();
        for direction in [Direction::Forward, Direction::Return] {
            if hop_column(result, direction) == HopColumn::Malformed {
                tracing::warn!(
                    probe_id = %result.probe_id,
                    ?direction,
                    "Stored hop column does not parse"
                );
                continue;
            }
            let Some(path) = decode_path(result, direction) else {
                continue;
            };
            for (x, y) in path.edges() {
                let pair = NodePair::new(x, y);
                if !pair.is_self_loop() && !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }

        let mut positions: HashMap<NodeNum, Option<Position>> = HashMap::new();
        let mut considered = 0;
        for pair in pairs {
            let (Some(pa), Some(pb)) = (
                self.position_of(pair.a, &mut positions)?,
                self.position_of(pair.b, &mut positions)?,
            ) else {
                continue;
            };

            let distance_km = self.geodesic.distance_km(&pa, &pb);
            let source = Some((result.from_node, result.to_node));
            match self
                .tracker
                .consider_segment(pair.a, pair.b, distance_km, result.timestamp, source)
            {
                Ok(_) => considered += 1,
                Err(MeshtraceError::Validation(e)) => {
                    tracing::warn!(pair = %pair, error = %e, "Segment rejected");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            from = %result.from_node,
            to = %result.to_node,
            segments = considered,
            "Probe result ingested"
        );
        Ok(considered)
    }

    /// Store a probe that timed out or was rejected, so the target counts
    /// as attempted-but-failed rather than never attempted.
    pub fn ingest_probe_failure(
        &self,
        from: NodeNum,
        to: NodeNum,
        at: Timestamp,
    ) -> MeshtraceResult<()> {
        self.store
            .probe_result_upsert(&ProbeResult::failed(from, to, at))?;
        tracing::debug!(from = %from, to = %to, "Probe failure recorded");
        Ok(())
    }

    fn position_of(
        &self,
        node: NodeNum,
        cache: &mut HashMap<NodeNum, Option<Position>>,
    ) -> MeshtraceResult<Option<Position>> {
        if let Some(position) = cache.get(&node) {
            return Ok(*position);
        }
        let position = self.store.node_get(node)?.and_then(|n| n.position);
        cache.insert(node, position);
        Ok(position)
    }

    // ========================================================================
    // SCHEDULING
    // ========================================================================

    /// Run one scheduling tick.
    ///
    /// Picks a target, hands it to `transport` and records the request
    /// whatever the transport answers, so a failing radio cannot make the
    /// scheduler hammer the same node. Transport failures are logged and
    /// reported through `TickOutcome::sent`; storage failures propagate.
    pub async fn run_tick<T, R>(
        &self,
        transport: &T,
        local: NodeNum,
        now: Timestamp,
        rng: &mut R,
    ) -> MeshtraceResult<Option<TickOutcome>>
    where
        T: ProbeTransport + ?Sized,
        R: Rng,
    {
        let Some(candidate) = self.scheduler.select_next_probe_target(local, now, rng)? else {
            tracing::trace!(local = %local, "No probe target eligible");
            return Ok(None);
        };
        let target = candidate.node.node_num;

        let sent = match transport.send_probe(local, target).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Probe send failed");
                false
            }
        };

        self.scheduler.record_probe_requested(target, now)?;

        Ok(Some(TickOutcome {
            target,
            category: candidate.category,
            sent,
        }))
    }

    /// Delete segment observations past the configured retention.
    pub fn cleanup_segments(&self, now: Timestamp) -> MeshtraceResult<usize> {
        self.tracker
            .cleanup_old_segments(self.config.segment_retention, now)
    }
}
