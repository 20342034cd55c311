//! Background Jobs
//!
//! - `probe_scheduler`: periodic probe scheduling and segment cleanup
//!
//! # Usage
//!
//! ```ignore
//! use meshtrace_service::jobs::probe_scheduler_task;
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(probe_scheduler_task(service, transport, config, local, shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod probe_scheduler;

pub use probe_scheduler::{probe_scheduler_task, ProbeJobMetrics, ProbeJobSnapshot};
