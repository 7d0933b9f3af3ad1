//! Aggregated health check reporting.
//!
//! [`HealthProbe`] inspects each component of the running daemon and
//! produces a unified [`DaemonHealth`] report. The overall daemon status is
//! the worst status among all enabled components.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;

use netsentry_core::pipeline::HealthStatus;
use netsentry_detection::EngineState;
use netsentry_traffic::QueueStats;

use crate::analysis::Analyzer;

/// Queue utilization above which the traffic component is degraded.
const QUEUE_DEGRADED_UTILIZATION: f64 = 0.9;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all components).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Per-component health reports.
    pub components: Vec<ComponentHealth>,
}

/// Health status for a single component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Component name (e.g., "traffic", "signature").
    pub name: String,
    /// Whether the component is enabled in configuration.
    pub enabled: bool,
    /// Current health status of the component.
    pub status: HealthStatus,
}

impl ComponentHealth {
    fn new(name: &str, enabled: bool, status: HealthStatus) -> Self {
        Self {
            name: name.to_owned(),
            enabled,
            status,
        }
    }
}

/// Aggregate multiple component health statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
/// Only considers enabled components.
pub fn aggregate_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for component in components.iter().filter(|c| c.enabled) {
        match &component.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    reasons.push(format!("{}: {}", component.name, reason));
                    worst = HealthStatus::Degraded(String::new());
                }
            }
            HealthStatus::Unhealthy(reason) => {
                reasons.push(format!("{}: {}", component.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}

/// Running-state view shared between the orchestrator and the management API.
#[derive(Debug)]
pub struct HealthProbe {
    started: Instant,
    running: AtomicBool,
    queue: Mutex<Option<Arc<QueueStats>>>,
}

impl HealthProbe {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            running: AtomicBool::new(false),
            queue: Mutex::new(None),
        }
    }

    /// Record that the pipeline started with the given ingestion queue.
    pub fn mark_started(&self, queue: Arc<QueueStats>) {
        *self.queue.lock().unwrap_or_else(PoisonError::into_inner) = Some(queue);
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Ingestion queue statistics of the current (or last) run.
    pub fn queue_stats(&self) -> Option<Arc<QueueStats>> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Inspect every component and aggregate the result.
    pub fn report(&self, analyzer: &Analyzer) -> DaemonHealth {
        let components = vec![
            ComponentHealth::new("traffic", true, self.traffic_status()),
            ComponentHealth::new(
                "signature",
                analyzer.signatures().config().enabled,
                signature_status(analyzer.signatures().state()),
            ),
            ComponentHealth::new(
                "anomaly",
                analyzer.anomaly().config().enabled,
                HealthStatus::Healthy,
            ),
            ComponentHealth::new(
                "alerts",
                analyzer.alerts().config().enabled,
                HealthStatus::Healthy,
            ),
        ];

        DaemonHealth {
            status: aggregate_status(&components),
            uptime_secs: self.uptime_secs(),
            components,
        }
    }

    fn traffic_status(&self) -> HealthStatus {
        if !self.is_running() {
            return HealthStatus::Unhealthy("pipeline not running".to_owned());
        }
        match self.queue_stats() {
            Some(queue) if queue.utilization() > QUEUE_DEGRADED_UTILIZATION => {
                HealthStatus::Degraded(format!(
                    "ingestion queue {:.0}% full ({} dropped)",
                    queue.utilization() * 100.0,
                    queue.dropped_count()
                ))
            }
            _ => HealthStatus::Healthy,
        }
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn signature_status(state: EngineState) -> HealthStatus {
    match state {
        EngineState::Loaded => HealthStatus::Healthy,
        EngineState::Refreshing => HealthStatus::Degraded("rules refreshing".to_owned()),
        EngineState::Unloaded => HealthStatus::Degraded("no rules loaded".to_owned()),
    }
}
