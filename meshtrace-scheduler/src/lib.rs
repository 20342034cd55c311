//! MESHTRACE Scheduler - Probe Target Selection
//!
//! Picks at most one remote node to traceroute per tick. A node is eligible
//! in one of two retry categories:
//!
//! ```text
//! ColdRetry   no successful result for (local -> node)
//!             AND (never requested OR requested <= now - cold cooldown)
//! StaleRetry  a successful result exists
//!             AND (never requested OR requested <= now - stale cooldown)
//! ```
//!
//! Among eligible nodes the target is drawn uniformly at random from a
//! caller-supplied RNG, so no subset of the mesh is favoured.

use meshtrace_core::{cutoff_before, MeshtraceResult, Node, NodeNum, Timestamp, TracerouteConfig};
use meshtrace_storage::TracerouteStore;
use rand::Rng;
use std::fmt;

// ============================================================================
// CATEGORIES
// ============================================================================

/// Why a node is eligible for probing this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeCategory {
    /// Never probed successfully; short cooldown.
    ColdRetry,
    /// Has a successful result that may be stale; long cooldown.
    StaleRetry,
}

impl fmt::Display for ProbeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeCategory::ColdRetry => write!(f, "cold_retry"),
            ProbeCategory::StaleRetry => write!(f, "stale_retry"),
        }
    }
}

/// An eligible node together with its category.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCandidate {
    pub node: Node,
    pub category: ProbeCategory,
}

/// Classify a single node.
///
/// `has_result` must be true only when a non-failed result exists for
/// `(local -> node)`. Returns `None` when the node is still cooling down.
pub fn classify_node(
    node: &Node,
    has_result: bool,
    now: Timestamp,
    config: &TracerouteConfig,
) -> Option<ProbeCategory> {
    let (category, cooldown) = if has_result {
        (ProbeCategory::StaleRetry, config.stale_retry_cooldown)
    } else {
        (ProbeCategory::ColdRetry, config.cold_retry_cooldown)
    };

    match node.last_probe_requested_at {
        None => Some(category),
        Some(requested) if requested <= cutoff_before(now, cooldown) => Some(category),
        Some(_) => None,
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

/// Selects probe targets from the nodes known to a store.
#[derive(Debug, Clone)]
pub struct ProbeScheduler<S> {
    store: S,
    config: TracerouteConfig,
}

impl<S: TracerouteStore> ProbeScheduler<S> {
    pub fn new(store: S, config: TracerouteConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &TracerouteConfig {
        &self.config
    }

    /// Every node eligible for probing from `local` at `now`, in node order.
    pub fn eligible_candidates(
        &self,
        local: NodeNum,
        now: Timestamp,
    ) -> MeshtraceResult<Vec<ProbeCandidate>> {
        let heard_cutoff = self
            .config
            .max_last_heard_age
            .map(|age| cutoff_before(now, age));

        let mut candidates = Vec::new();
        for node in self.store.node_list()? {
            if node.node_num == local || node.node_num.is_broadcast() {
                continue;
            }
            if let Some(cutoff) = heard_cutoff {
                if node.last_heard.map_or(true, |heard| heard < cutoff) {
                    continue;
                }
            }

            let has_result = self
                .store
                .probe_result_get(local, node.node_num)?
                .is_some_and(|r| !r.is_failed());

            if let Some(category) = classify_node(&node, has_result, now, &self.config) {
                candidates.push(ProbeCandidate { node, category });
            }
        }
        Ok(candidates)
    }

    /// Pick the next node to probe, or `None` when nothing is eligible.
    pub fn select_next_probe_target<R: Rng>(
        &self,
        local: NodeNum,
        now: Timestamp,
        rng: &mut R,
    ) -> MeshtraceResult<Option<ProbeCandidate>> {
        let mut candidates = self.eligible_candidates(local, now)?;

        let cold = candidates
            .iter()
            .filter(|c| c.category == ProbeCategory::ColdRetry)
            .count();
        tracing::debug!(
            local = %local,
            cold_retry = cold,
            stale_retry = candidates.len() - cold,
            "Probe candidates classified"
        );

        if candidates.is_empty() {
            return Ok(None);
        }

        let picked = candidates.swap_remove(rng.random_range(0..candidates.len()));
        tracing::info!(
            local = %local,
            target = %picked.node.node_num,
            category = %picked.category,
            "Selected probe target"
        );
        Ok(Some(picked))
    }

    /// Record that a probe to `node` was requested at `now`.
    ///
    /// Called after every send attempt, successful or not.
    pub fn record_probe_requested(&self, node: NodeNum, now: Timestamp) -> MeshtraceResult<()> {
        self.store.node_mark_probe_requested(node, now)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use meshtrace_core::ProbeResult;
    use meshtrace_storage::InMemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::sync::Arc;

    const LOCAL: NodeNum = NodeNum(1);

    fn scheduler() -> (Arc<InMemoryStore>, ProbeScheduler<Arc<InMemoryStore>>) {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = ProbeScheduler::new(Arc::clone(&store), TracerouteConfig::default());
        (store, scheduler)
    }

    fn node_requested_at(num: u32, requested: Option<Timestamp>) -> Node {
        let mut node = Node::new(NodeNum(num));
        node.last_probe_requested_at = requested;
        node
    }

    fn only_target(
        scheduler: &ProbeScheduler<Arc<InMemoryStore>>,
        now: Timestamp,
    ) -> Option<NodeNum> {
        let mut rng = StdRng::seed_from_u64(7);
        scheduler
            .select_next_probe_target(LOCAL, now, &mut rng)
            .unwrap()
            .map(|c| c.node.node_num)
    }

    #[test]
    fn test_local_node_never_selected() {
        let (store, scheduler) = scheduler();
        store.node_upsert(&Node::new(LOCAL)).unwrap();

        assert!(only_target(&scheduler, Utc::now()).is_none());
    }

    #[test]
    fn test_broadcast_never_selected() {
        let (store, scheduler) = scheduler();
        store.node_upsert(&Node::new(NodeNum::BROADCAST)).unwrap();

        assert!(only_target(&scheduler, Utc::now()).is_none());
    }

    #[test]
    fn test_empty_mesh_is_not_an_error() {
        let (_store, scheduler) = scheduler();
        assert!(only_target(&scheduler, Utc::now()).is_none());
    }

    #[test]
    fn test_never_requested_is_cold_retry() {
        let (store, scheduler) = scheduler();
        store.node_upsert(&node_requested_at(2, None)).unwrap();

        let candidates = scheduler.eligible_candidates(LOCAL, Utc::now()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].category, ProbeCategory::ColdRetry);
    }

    #[test]
    fn test_cold_cooldown_boundary() {
        let (store, scheduler) = scheduler();
        let now = Utc::now();
        let three_hours = Duration::hours(3);

        store
            .node_upsert(&node_requested_at(2, Some(now - three_hours - Duration::seconds(1))))
            .unwrap();
        assert_eq!(only_target(&scheduler, now), Some(NodeNum(2)));

        store
            .node_upsert(&node_requested_at(2, Some(now - three_hours + Duration::seconds(1))))
            .unwrap();
        assert_eq!(only_target(&scheduler, now), None);

        store
            .node_upsert(&node_requested_at(2, Some(now - three_hours)))
            .unwrap();
        assert_eq!(only_target(&scheduler, now), Some(NodeNum(2)));
    }

    #[test]
    fn test_stale_cooldown_boundary() {
        let (store, scheduler) = scheduler();
        let now = Utc::now();
        let day = Duration::hours(24);
        store
            .probe_result_upsert(&ProbeResult::from_hops(
                LOCAL,
                NodeNum(2),
                Some(&[]),
                Some(&[]),
                now - Duration::days(2),
            ))
            .unwrap();

        store
            .node_upsert(&node_requested_at(2, Some(now - day - Duration::seconds(1))))
            .unwrap();
        let candidates = scheduler.eligible_candidates(LOCAL, now).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].category, ProbeCategory::StaleRetry);

        store
            .node_upsert(&node_requested_at(2, Some(now - day + Duration::seconds(1))))
            .unwrap();
        assert!(scheduler.eligible_candidates(LOCAL, now).unwrap().is_empty());

        // Past the cold cooldown but inside the stale one
        store
            .node_upsert(&node_requested_at(2, Some(now - Duration::hours(4))))
            .unwrap();
        assert!(scheduler.eligible_candidates(LOCAL, now).unwrap().is_empty());
    }

    #[test]
    fn test_failed_result_uses_cold_cooldown() {
        let (store, scheduler) = scheduler();
        let now = Utc::now();
        store
            .probe_result_upsert(&ProbeResult::failed(LOCAL, NodeNum(2), now))
            .unwrap();
        store
            .node_upsert(&node_requested_at(2, Some(now - Duration::hours(4))))
            .unwrap();

        let candidates = scheduler.eligible_candidates(LOCAL, now).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].category, ProbeCategory::ColdRetry);
    }

    #[test]
    fn test_result_in_other_direction_does_not_count() {
        let (store, scheduler) = scheduler();
        let now = Utc::now();
        store
            .probe_result_upsert(&ProbeResult::from_hops(
                NodeNum(2),
                LOCAL,
                Some(&[]),
                Some(&[]),
                now,
            ))
            .unwrap();
        store
            .node_upsert(&node_requested_at(2, Some(now - Duration::hours(4))))
            .unwrap();

        let candidates = scheduler.eligible_candidates(LOCAL, now).unwrap();
        assert_eq!(candidates[0].category, ProbeCategory::ColdRetry);
    }

    #[test]
    fn test_liveness_filter() {
        let store = Arc::new(InMemoryStore::new());
        let config = TracerouteConfig {
            max_last_heard_age: Some(std::time::Duration::from_secs(3600)),
            ..Default::default()
        };
        let scheduler = ProbeScheduler::new(Arc::clone(&store), config);
        let now = Utc::now();

        let mut silent = Node::new(NodeNum(2));
        silent.last_heard = Some(now - Duration::hours(2));
        let mut fresh = Node::new(NodeNum(3));
        fresh.last_heard = Some(now - Duration::minutes(5));
        let never_heard = Node::new(NodeNum(4));
        for n in [&silent, &fresh, &never_heard] {
            store.node_upsert(n).unwrap();
        }

        let nums: Vec<NodeNum> = scheduler
            .eligible_candidates(LOCAL, now)
            .unwrap()
            .into_iter()
            .map(|c| c.node.node_num)
            .collect();
        assert_eq!(nums, vec![NodeNum(3)]);
    }

    #[test]
    fn test_record_probe_requested_sets_timestamp() {
        let (store, scheduler) = scheduler();
        store.node_upsert(&Node::new(NodeNum(2))).unwrap();
        let now = Utc::now();

        scheduler.record_probe_requested(NodeNum(2), now).unwrap();

        assert_eq!(
            store.node_get(NodeNum(2)).unwrap().unwrap().last_probe_requested_at,
            Some(now)
        );
        assert!(only_target(&scheduler, now + Duration::hours(1)).is_none());
    }

    #[test]
    fn test_record_probe_requested_unknown_node_errors() {
        let (_store, scheduler) = scheduler();
        assert!(scheduler
            .record_probe_requested(NodeNum(99), Utc::now())
            .is_err());
    }

    #[test]
    fn test_selection_is_roughly_uniform() {
        let (store, scheduler) = scheduler();
        for n in 2..=5 {
            store.node_upsert(&Node::new(NodeNum(n))).unwrap();
        }
        let now = Utc::now();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts: HashMap<NodeNum, usize> = HashMap::new();

        for _ in 0..4000 {
            let picked = scheduler
                .select_next_probe_target(LOCAL, now, &mut rng)
                .unwrap()
                .unwrap();
            *counts.entry(picked.node.node_num).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for (node, count) in counts {
            assert!(
                (800..=1200).contains(&count),
                "node {} picked {} times out of 4000",
                node,
                count
            );
        }
    }

    #[test]
    fn test_same_seed_same_choice() {
        let (store, scheduler) = scheduler();
        for n in 2..=20 {
            store.node_upsert(&Node::new(NodeNum(n))).unwrap();
        }
        let now = Utc::now();

        let pick = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            scheduler
                .select_next_probe_target(LOCAL, now, &mut rng)
                .unwrap()
                .map(|c| c.node.node_num)
        };
        assert_eq!(pick(11), pick(11));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, Utc};
    use meshtrace_storage::InMemoryStore;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The local node is never returned, whatever else the mesh holds.
        #[test]
        fn prop_local_node_never_selected(
            local in 0u32..20,
            others in prop::collection::vec((0u32..20, prop::option::of(0i64..48)), 0..15),
            seed in any::<u64>()
        ) {
            let store = Arc::new(InMemoryStore::new());
            let now = Utc::now();
            let mut me = Node::new(NodeNum(local));
            me.last_probe_requested_at = None;
            store.node_upsert(&me).unwrap();
            for (num, hours_ago) in others {
                let mut node = Node::new(NodeNum(num));
                node.last_probe_requested_at = hours_ago.map(|h| now - Duration::hours(h));
                store.node_upsert(&node).unwrap();
            }

            let scheduler = ProbeScheduler::new(Arc::clone(&store), TracerouteConfig::default());
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = scheduler
                .select_next_probe_target(NodeNum(local), now, &mut rng)
                .unwrap();

            if let Some(candidate) = picked {
                prop_assert_ne!(candidate.node.node_num, NodeNum(local));
            }
        }
    }
}
