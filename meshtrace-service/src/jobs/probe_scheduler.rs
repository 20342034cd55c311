//! Probe Scheduler Background Task
//!
//! Drives the traceroute subsystem on two timers:
//!
//! - every `tick_interval`: pick one eligible node, send it a probe and
//!   record the request
//! - every `cleanup_interval`: prune segment observations older than
//!   `segment_retention` (the record holder is never pruned)
//!
//! Probe replies are not handled here. They arrive through the ingestion
//! path and are passed to `TracerouteService::ingest_probe_result`.

use crate::service::TracerouteService;
use chrono::Utc;
use meshtrace_core::{NodeNum, ProbeTransport, TracerouteConfig};
use meshtrace_segments::Geodesic;
use meshtrace_storage::TracerouteStore;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the probe scheduler task.
#[derive(Debug, Default)]
pub struct ProbeJobMetrics {
    /// Scheduling ticks run since startup
    pub ticks: AtomicU64,

    /// Ticks that found no eligible node
    pub idle_ticks: AtomicU64,

    /// Probes accepted by the transport
    pub probes_sent: AtomicU64,

    /// Probes the transport refused or timed out on
    pub send_failures: AtomicU64,

    /// Ticks aborted by a storage error
    pub tick_errors: AtomicU64,

    /// Segment cleanup sweeps completed
    pub cleanup_cycles: AtomicU64,

    /// Segment rows deleted by cleanup
    pub segments_cleaned: AtomicU64,

    /// Cleanup sweeps aborted by a storage error
    pub cleanup_errors: AtomicU64,
}

impl ProbeJobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> ProbeJobSnapshot {
        ProbeJobSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            probes_sent: self.probes_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
            cleanup_cycles: self.cleanup_cycles.load(Ordering::Relaxed),
            segments_cleaned: self.segments_cleaned.load(Ordering::Relaxed),
            cleanup_errors: self.cleanup_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of job metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeJobSnapshot {
    pub ticks: u64,
    pub idle_ticks: u64,
    pub probes_sent: u64,
    pub send_failures: u64,
    pub tick_errors: u64,
    pub cleanup_cycles: u64,
    pub segments_cleaned: u64,
    pub cleanup_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that schedules probes and prunes old segments.
///
/// Runs until `true` is sent on `shutdown_rx` or its sender is dropped.
/// Selection uses an OS-seeded `StdRng`.
///
/// # Example
///
/// ```ignore
/// use tokio::sync::watch;
/// use std::sync::Arc;
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let service = Arc::new(TracerouteService::new(store, config.clone()));
///
/// let handle = tokio::spawn(probe_scheduler_task(
///     service,
///     Arc::new(radio),
///     config,
///     local_node,
///     shutdown_rx,
/// ));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn probe_scheduler_task<S, G, T>(
    service: Arc<TracerouteService<S, G>>,
    transport: Arc<T>,
    config: TracerouteConfig,
    local: NodeNum,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ProbeJobMetrics>
where
    S: TracerouteStore + Clone,
    G: Geodesic,
    T: ProbeTransport + ?Sized,
{
    let metrics = Arc::new(ProbeJobMetrics::new());
    let mut rng = StdRng::from_os_rng();

    let mut tick_interval = interval(config.tick_interval);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut cleanup_interval = interval(config.cleanup_interval);
    cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        local = %local,
        tick_interval_secs = config.tick_interval.as_secs(),
        cleanup_interval_secs = config.cleanup_interval.as_secs(),
        "Probe scheduler task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Probe scheduler task shutting down");
                    break;
                }
            }

            _ = tick_interval.tick() => {
                run_tick(&*service, transport.as_ref(), local, &mut rng, &metrics).await;
            }

            _ = cleanup_interval.tick() => {
                run_cleanup(&*service, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        ticks = snapshot.ticks,
        probes_sent = snapshot.probes_sent,
        send_failures = snapshot.send_failures,
        tick_errors = snapshot.tick_errors,
        segments_cleaned = snapshot.segments_cleaned,
        "Probe scheduler task completed"
    );

    metrics
}

async fn run_tick<S, G, T>(
    service: &TracerouteService<S, G>,
    transport: &T,
    local: NodeNum,
    rng: &mut StdRng,
    metrics: &ProbeJobMetrics,
) where
    S: TracerouteStore + Clone,
    G: Geodesic,
    T: ProbeTransport + ?Sized,
{
    metrics.ticks.fetch_add(1, Ordering::Relaxed);

    match service.run_tick(transport, local, Utc::now(), rng).await {
        Ok(Some(outcome)) if outcome.sent => {
            metrics.probes_sent.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Some(_)) => {
            metrics.send_failures.fetch_add(1, Ordering::Relaxed);
        }
        Ok(None) => {
            metrics.idle_ticks.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::error!(error = %e, retryable = e.is_retryable(), "Probe tick failed");
            metrics.tick_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn run_cleanup<S, G>(service: &TracerouteService<S, G>, metrics: &ProbeJobMetrics)
where
    S: TracerouteStore + Clone,
    G: Geodesic,
{
    metrics.cleanup_cycles.fetch_add(1, Ordering::Relaxed);

    match service.cleanup_segments(Utc::now()) {
        Ok(deleted) => {
            metrics
                .segments_cleaned
                .fetch_add(deleted as u64, Ordering::Relaxed);
            if deleted == 0 {
                tracing::trace!("Segment cleanup found nothing to delete");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Segment cleanup failed");
            metrics.cleanup_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
