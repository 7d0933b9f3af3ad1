//! Daemon orchestration -- assembly, worker spawning, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `netsentry-daemon`.
//! It opens the durable store, builds the detection engines, restores their
//! persisted state, and runs the background workers until shutdown.
//!
//! # Workers
//!
//! ```text
//! capture (per interface) --> IngestionQueue --> analysis (single consumer)
//! sweep       every session_sweep_interval_secs   (idle sessions, rate gauges)
//! refresh     every rule_update_interval_hours    (only with rule sources)
//! aging       every baseline_update_interval_hours
//! retention   every cleanup_interval_hours        (first run at startup)
//! uptime      every 10 s
//! ```
//!
//! Every worker races its waits against one [`CancellationToken`]; stopping
//! cancels the token and awaits every task.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use netsentry_core::config::StorageConfig;
use netsentry_core::error::{NetsentryError, PipelineError};
use netsentry_core::metrics as m;
use netsentry_core::pipeline::{HealthStatus, Pipeline};
use netsentry_core::store::{FileStore, MemoryStore, SQLITE_FILE_NAME, SqliteStore, Store};
use netsentry_core::{NetsentryConfig, StaticDeviceDirectory, StaticThreatIntel};
use netsentry_detection::{
    AlertConfig, AlertEngine, AnomalyConfig, AnomalyEngine, SignatureConfig, SignatureEngine,
};
use netsentry_traffic::{
    Dequeued, IngestionQueue, QueueConsumer, SyntheticSource, TrafficConfig, run_capture,
};

use crate::analysis::{Analyzer, AnalyzerSettings};
use crate::health::{DaemonHealth, HealthProbe};
use crate::management::ManagementApi;
use crate::metrics_server;

/// Lower bound for every periodic worker.
const MIN_WORKER_PERIOD: Duration = Duration::from_secs(1);
/// Upper bound for every periodic worker (one year).
const MAX_WORKER_PERIOD: Duration = Duration::from_secs(365 * 24 * 3600);
const UPTIME_PERIOD: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: NetsentryConfig,
    traffic: TrafficConfig,
    analyzer: Arc<Analyzer>,
    probe: Arc<HealthProbe>,
    /// Cancels every worker of the current run.
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Orchestrator {
    /// Load configuration and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = NetsentryConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The store cannot be opened or scanned
    /// - The metrics endpoint cannot be installed
    pub async fn build_from_config(config: NetsentryConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before any engine records
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let store = open_store(&config.storage)?;
        let traffic = TrafficConfig::from_core(&config.traffic_analyzer)
            .map_err(|e| anyhow::anyhow!("invalid traffic configuration: {}", e))?;

        let signature_config = SignatureConfig::from_core(&config.signature_detection);
        let anomaly_config = AnomalyConfig::from_core(&config.anomaly_detection);
        let alert_config = AlertConfig::from_core(&config.alert_engine);

        let settings = AnalyzerSettings {
            signature_enabled: signature_config.enabled,
            anomaly_enabled: anomaly_config.enabled,
            threat_intel_enabled: config.threat_intelligence.enabled,
            sample_window: TimeDelta::from_std(anomaly_config.sample_window)
                .unwrap_or_else(|_| TimeDelta::seconds(60)),
        };

        let signatures = SignatureEngine::new(signature_config)
            .map_err(|e| anyhow::anyhow!("failed to build signature engine: {}", e))?;
        if signatures.config().enabled
            && let Err(e) = signatures.load().await
        {
            tracing::error!(error = %e, "failed to load signature rules, starting with none");
        }

        let anomaly = AnomalyEngine::new(anomaly_config, Arc::clone(&store));
        anomaly
            .load_baselines()
            .map_err(|e| anyhow::anyhow!("failed to load baselines: {}", e))?;

        let alerts = AlertEngine::new(alert_config, Arc::clone(&store));
        alerts
            .load_alerts()
            .map_err(|e| anyhow::anyhow!("failed to load alerts: {}", e))?;

        let devices = StaticDeviceDirectory::from_config(
            &config.device_directory,
            &traffic.local_network,
        );
        let threat_intel = StaticThreatIntel::from_config(&config.threat_intelligence);
        tracing::info!(
            devices = devices.len(),
            indicators = threat_intel.len(),
            "collaborators configured"
        );

        let analyzer = Analyzer::new(
            &traffic,
            settings,
            Arc::new(signatures),
            Arc::new(anomaly),
            Arc::new(alerts),
            Arc::new(devices),
            Arc::new(threat_intel),
        );

        Ok(Self {
            config,
            traffic,
            analyzer: Arc::new(analyzer),
            probe: Arc::new(HealthProbe::new()),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    /// Start all workers and block until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd, Docker, or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        let pid_file = self.config.general.pid_file.clone();
        if !pid_file.is_empty() {
            write_pid_file(Path::new(&pid_file))?;
        }

        if let Err(e) = Pipeline::start(self).await {
            tracing::error!(error = %e, "daemon startup failed");
            if !pid_file.is_empty() {
                remove_pid_file(Path::new(&pid_file));
            }
            return Err(e.into());
        }

        tracing::info!("entering main event loop");
        let signal = wait_for_shutdown_signal().await;

        let stopped = Pipeline::stop(self).await;
        if !pid_file.is_empty() {
            remove_pid_file(Path::new(&pid_file));
        }

        let signal = signal?;
        tracing::info!(signal = signal, "daemon stopped");
        stopped.map_err(Into::into)
    }

    /// Get the current aggregated health report.
    pub fn health(&self) -> DaemonHealth {
        self.probe.report(&self.analyzer)
    }

    /// Management interface bound to this daemon's state.
    pub fn management_api(&self) -> ManagementApi {
        ManagementApi::new(Arc::clone(&self.analyzer), Arc::clone(&self.probe))
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    pub fn config(&self) -> &NetsentryConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    fn spawn_workers(&mut self) {
        let cancel = self.cancel.clone();
        let (producer, consumer) = IngestionQueue::bounded(self.traffic.queue_capacity);
        let queue = producer.stats();
        self.probe.mark_started(Arc::clone(&queue));

        if self.config.traffic_analyzer.enabled {
            for interface in &self.traffic.interfaces {
                let source = SyntheticSource::new(interface, self.traffic.synthetic_interval);
                let producer = producer.clone();
                let cancel = cancel.clone();
                self.tasks.push((
                    format!("capture:{interface}"),
                    tokio::spawn(async move {
                        run_capture(source, producer, cancel).await;
                    }),
                ));
            }
        }
        // Only capture workers hold producers; the queue closes when they all stop.
        drop(producer);

        self.tasks.push((
            "analysis".to_owned(),
            tokio::spawn(analysis_worker(
                Arc::clone(&self.analyzer),
                consumer,
                self.traffic.dequeue_poll,
                cancel.clone(),
            )),
        ));

        let analyzer = Arc::clone(&self.analyzer);
        self.tasks.push((
            "sweep".to_owned(),
            spawn_periodic(
                "sweep",
                self.traffic.sweep_interval,
                true,
                cancel.clone(),
                move || {
                    let analyzer = Arc::clone(&analyzer);
                    let queue = Arc::clone(&queue);
                    async move {
                        offload("sweep", move || {
                            analyzer.sweep(Utc::now());
                        })
                        .await;
                        #[allow(clippy::cast_precision_loss)]
                        metrics::gauge!(m::TRAFFIC_QUEUE_DEPTH).set(queue.len() as f64);
                    }
                },
            ),
        ));

        let signatures = Arc::clone(self.analyzer.signatures());
        if signatures.config().enabled && !signatures.config().sources.is_empty() {
            let period = signatures.config().update_interval;
            self.tasks.push((
                "rule-refresh".to_owned(),
                spawn_periodic("rule-refresh", period, false, cancel.clone(), move || {
                    let signatures = Arc::clone(&signatures);
                    async move {
                        // failures are logged by the engine; current rules stay active
                        let _ = signatures.refresh().await;
                    }
                }),
            ));
        }

        let anomaly = Arc::clone(self.analyzer.anomaly());
        if anomaly.config().enabled {
            let period = anomaly.config().aging_interval;
            self.tasks.push((
                "baseline-aging".to_owned(),
                spawn_periodic("baseline-aging", period, false, cancel.clone(), move || {
                    let anomaly = Arc::clone(&anomaly);
                    async move {
                        offload("baseline-aging", move || anomaly.age_baselines(Utc::now())).await;
                    }
                }),
            ));
        }

        let alerts = Arc::clone(self.analyzer.alerts());
        if alerts.config().enabled {
            let period = alerts.config().cleanup_interval;
            self.tasks.push((
                "retention".to_owned(),
                spawn_periodic("retention", period, true, cancel.clone(), move || {
                    let alerts = Arc::clone(&alerts);
                    async move {
                        offload("retention", move || alerts.purge_expired(Utc::now())).await;
                    }
                }),
            ));
        }

        let probe = Arc::clone(&self.probe);
        self.tasks.push((
            "uptime".to_owned(),
            spawn_periodic("uptime", UPTIME_PERIOD, true, cancel, move || {
                let probe = Arc::clone(&probe);
                async move {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(probe.uptime_secs() as f64);
                }
            }),
        ));
    }
}

impl Pipeline for Orchestrator {
    async fn start(&mut self) -> Result<(), NetsentryError> {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning.into());
        }
        self.cancel = CancellationToken::new();
        self.spawn_workers();
        tracing::info!(
            workers = self.tasks.len(),
            interfaces = ?self.traffic.interfaces,
            "daemon started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), NetsentryError> {
        if !self.is_running() {
            return Err(PipelineError::NotRunning.into());
        }
        tracing::info!("cancelling all workers");
        self.cancel.cancel();
        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(worker = %name, error = %e, "worker task failed");
            }
        }
        self.probe.mark_stopped();
        tracing::info!("all workers stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        self.health().status
    }
}

/// Open the configured durable store.
fn open_store(config: &StorageConfig) -> Result<Arc<dyn Store>> {
    match config.backend.as_str() {
        "memory" => {
            tracing::warn!("using in-memory store, alerts and baselines will not persist");
            Ok(Arc::new(MemoryStore::new()))
        }
        "sqlite" => {
            let path = Path::new(&config.path).join(SQLITE_FILE_NAME);
            let store = SqliteStore::open(&path)
                .map_err(|e| anyhow::anyhow!("failed to open store: {}", e))?;
            tracing::info!(path = %path.display(), "sqlite store opened");
            Ok(Arc::new(store))
        }
        "file" => {
            let store = FileStore::open(&config.path)
                .map_err(|e| anyhow::anyhow!("failed to open store: {}", e))?;
            tracing::info!(path = %config.path, "file store opened");
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!("unsupported storage backend '{}'", other)),
    }
}

/// Single consumer of the ingestion queue.
///
/// Packets are analyzed in arrival order. The behavior sample window is
/// checked after every dequeue, so it closes even when no traffic arrives.
/// Analysis touches the durable store, so each step runs on the blocking
/// pool. The partial window is scored once more on shutdown.
async fn analysis_worker(
    analyzer: Arc<Analyzer>,
    mut consumer: QueueConsumer,
    poll: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("analysis worker started");
    let mut processed: u64 = 0;

    loop {
        let packet = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = consumer.dequeue(poll) => match next {
                Dequeued::Packet(packet) => Some(packet),
                Dequeued::Empty => None,
                Dequeued::Closed => {
                    tracing::info!("ingestion queue closed");
                    break;
                }
            },
        };
        if packet.is_some() {
            processed += 1;
        }

        let analyzer = Arc::clone(&analyzer);
        offload("analysis", move || {
            if let Some(packet) = packet {
                analyzer.process(&packet);
            }
            analyzer.flush_samples_if_due(Utc::now());
        })
        .await;
    }

    let flushed = {
        let analyzer = Arc::clone(&analyzer);
        offload("analysis", move || analyzer.flush_samples(Utc::now()).len()).await
    };
    tracing::info!(
        processed = processed,
        flushed_devices = flushed.unwrap_or(0),
        "analysis worker stopped"
    );
}

/// Run engine work that reads or writes the store on the blocking pool.
async fn offload<T, F>(worker: &'static str, work: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(worker = worker, error = %e, "blocking task failed");
            None
        }
    }
}

/// Spawn a worker that runs `tick` every `period` until cancelled.
///
/// With `immediate` the first run happens at startup, otherwise after one
/// full period.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    immediate: bool,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.clamp(MIN_WORKER_PERIOD, MAX_WORKER_PERIOD);
    tokio::spawn(async move {
        let start = if immediate {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::debug!(worker = name, period_secs = period.as_secs(), "worker started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        () = tick() => {}
                    }
                }
            }
        }
        tracing::debug!(worker = name, "worker stopped");
    })
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    tracing::info!(signal = signal, "shutdown signal received");
    Ok(signal)
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances.
///
/// # Security
///
/// - Uses `create_new(true)` to atomically create the file
/// - Verifies the created file is a regular file
/// - Creates the parent directory with mode 0o700 and the file with 0o600
///
/// # Errors
///
/// Returns an error if the PID file exists or cannot be written.
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}
