//! MESHTRACE Service - Traceroute Intelligence
//!
//! Wires the probe scheduler, the path decoder and the segment tracker
//! behind one facade:
//!
//! - `TracerouteService`: queries (probe history, segment membership,
//!   segment records), ingestion of probe replies and failures, and a
//!   single scheduling tick
//! - `jobs`: the timer-driven background task
//! - `telemetry`: tracing subscriber setup

pub mod jobs;
pub mod service;
pub mod telemetry;

pub use jobs::{probe_scheduler_task, ProbeJobMetrics, ProbeJobSnapshot};
pub use service::{TickOutcome, TracerouteService};
pub use telemetry::{init_tracing, TelemetryConfig};

// Re-export the pieces callers need to build and query a service
pub use meshtrace_core::{
    MeshtraceError, MeshtraceResult, NodeNum, ProbeResult, ProbeTransport, Segment,
    TracerouteConfig, TransportError,
};
pub use meshtrace_path::{ProbeSummary, RenderedRoute, RouteView};
pub use meshtrace_scheduler::ProbeCategory;
pub use meshtrace_segments::{Geodesic, Haversine};
pub use meshtrace_storage::{InMemoryStore, TracerouteStore};
