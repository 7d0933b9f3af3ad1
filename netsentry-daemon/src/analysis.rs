//! Packet analysis -- the single consumer of the ingestion queue.
//!
//! [`Analyzer`] owns the flow table and traffic statistics and feeds every
//! packet through signature matching, threat-intel lookups, and per-device
//! behavior sampling. Detections become alerts through the [`AlertEngine`].
//!
//! # Lock Order
//!
//! flow table -> statistics -> rule set -> device samples / baselines -> alerts.
//! Each lock is released before the next one is taken.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;

use netsentry_core::directory::{DeviceDirectory, DeviceRef, ThreatIntel};
use netsentry_core::types::{PacketRecord, Severity};
use netsentry_detection::{
    AlertEngine, AnomalyEngine, AnomalyResult, BehaviorSample, MatchResult, SignatureEngine,
};
use netsentry_traffic::{
    FlowSession, FlowSessionTable, HostVolume, StatisticsAggregator, TrafficConfig,
    TrafficSnapshot,
};

/// Alert types raised by the analysis path.
pub const ALERT_TYPE_SIGNATURE: &str = "signature";
pub const ALERT_TYPE_ANOMALY: &str = "anomaly";
pub const ALERT_TYPE_THREAT_INTEL: &str = "threat_intel";

/// Anomaly scores at or above this raise a high-severity alert.
const HIGH_ANOMALY_SCORE: f64 = 0.9;

/// Per-packet analysis result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketVerdict {
    /// Signature rules that matched.
    pub signature_matches: usize,
    /// Threat-intel indicators that matched.
    pub threat_matches: usize,
    /// Alerts actually created (after suppression).
    pub alerts_created: usize,
}

/// Detection switches and windows taken from configuration.
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub signature_enabled: bool,
    pub anomaly_enabled: bool,
    pub threat_intel_enabled: bool,
    /// Length of one behavior sample window.
    pub sample_window: TimeDelta,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            signature_enabled: true,
            anomaly_enabled: true,
            threat_intel_enabled: true,
            sample_window: TimeDelta::seconds(60),
        }
    }
}

struct SampleWindow {
    started: DateTime<Utc>,
    devices: HashMap<String, (DeviceRef, BehaviorSample)>,
}

/// Shared analysis state.
///
/// The analysis worker calls [`process`](Self::process); the sweep worker and
/// the management API read and maintain the same state concurrently.
pub struct Analyzer {
    settings: AnalyzerSettings,
    sessions: Mutex<FlowSessionTable>,
    statistics: Mutex<StatisticsAggregator>,
    signatures: Arc<SignatureEngine>,
    anomaly: Arc<AnomalyEngine>,
    alerts: Arc<AlertEngine>,
    devices: Arc<dyn DeviceDirectory>,
    threat_intel: Arc<dyn ThreatIntel>,
    samples: Mutex<SampleWindow>,
}

impl Analyzer {
    pub fn new(
        traffic: &TrafficConfig,
        settings: AnalyzerSettings,
        signatures: Arc<SignatureEngine>,
        anomaly: Arc<AnomalyEngine>,
        alerts: Arc<AlertEngine>,
        devices: Arc<dyn DeviceDirectory>,
        threat_intel: Arc<dyn ThreatIntel>,
    ) -> Self {
        Self {
            settings,
            sessions: Mutex::new(FlowSessionTable::new(
                traffic.session_timeout,
                traffic.max_sessions,
            )),
            statistics: Mutex::new(StatisticsAggregator::new(
                traffic.local_network.clone(),
                traffic.rate_window,
                traffic.max_tracked_hosts,
            )),
            signatures,
            anomaly,
            alerts,
            devices,
            threat_intel,
            samples: Mutex::new(SampleWindow {
                started: Utc::now(),
                devices: HashMap::new(),
            }),
        }
    }

    pub fn signatures(&self) -> &Arc<SignatureEngine> {
        &self.signatures
    }

    pub fn anomaly(&self) -> &Arc<AnomalyEngine> {
        &self.anomaly
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    /// Run one packet through the whole analysis path.
    pub fn process(&self, packet: &PacketRecord) -> PacketVerdict {
        let mut verdict = PacketVerdict::default();

        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(packet);
        self.statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(packet);

        if self.settings.signature_enabled {
            let matches = self.signatures.match_packet(packet);
            verdict.signature_matches = matches.len();
            for matched in &matches {
                if self.raise_signature_alert(packet, matched) {
                    verdict.alerts_created += 1;
                }
            }
        }

        if self.settings.threat_intel_enabled {
            for ip in [packet.src_ip, packet.dst_ip].into_iter().flatten() {
                let indicator = ip.to_string();
                if self.threat_intel.is_known_malicious(&indicator) {
                    verdict.threat_matches += 1;
                    if self.raise_threat_alert(packet, &indicator) {
                        verdict.alerts_created += 1;
                    }
                }
            }
        }

        if self.settings.anomaly_enabled {
            self.sample(packet);
        }
        verdict
    }

    fn raise_signature_alert(&self, packet: &PacketRecord, matched: &MatchResult) -> bool {
        let details = json!({
            "rule_id": matched.rule_id,
            "protocol": packet.protocol.as_str(),
            "src_ip": packet.src_ip.map(|ip| ip.to_string()),
            "src_port": packet.src_port,
            "dst_ip": packet.dst_ip.map(|ip| ip.to_string()),
            "dst_port": packet.dst_port,
            "size": packet.size,
        });
        !self
            .alerts
            .create_alert(
                ALERT_TYPE_SIGNATURE,
                matched.severity,
                &packet_source(packet),
                &matched.description,
                details,
            )
            .is_suppressed()
    }

    fn raise_threat_alert(&self, packet: &PacketRecord, indicator: &str) -> bool {
        let details = json!({
            "indicator": indicator,
            "protocol": packet.protocol.as_str(),
            "src_ip": packet.src_ip.map(|ip| ip.to_string()),
            "dst_ip": packet.dst_ip.map(|ip| ip.to_string()),
            "dst_port": packet.dst_port,
        });
        !self
            .alerts
            .create_alert(
                ALERT_TYPE_THREAT_INTEL,
                Severity::High,
                indicator,
                "traffic with known malicious host",
                details,
            )
            .is_suppressed()
    }

    /// Attribute the packet to the sending and receiving devices.
    fn sample(&self, packet: &PacketRecord) {
        let src = self.lookup(&packet.src_mac, packet.src_ip.map(|ip| ip.to_string()));
        let dst = self.lookup(&packet.dst_mac, packet.dst_ip.map(|ip| ip.to_string()));
        if src.is_none() && dst.is_none() {
            return;
        }

        let mut window = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let started = window.started;
        if let Some(device) = src {
            window
                .devices
                .entry(device.key.clone())
                .or_insert_with(|| (device, BehaviorSample::new(started)))
                .1
                .add_outbound(packet);
        }
        if let Some(device) = dst {
            window
                .devices
                .entry(device.key.clone())
                .or_insert_with(|| (device, BehaviorSample::new(started)))
                .1
                .add_inbound(packet);
        }
    }

    fn lookup(&self, mac: &str, ip: Option<String>) -> Option<DeviceRef> {
        if !mac.is_empty()
            && let Some(device) = self.devices.lookup_device(mac)
        {
            return Some(device);
        }
        self.devices.lookup_device(&ip?)
    }

    /// Score the finished sample window if it has elapsed.
    ///
    /// Returns one result per device seen in the window.
    pub fn flush_samples_if_due(&self, now: DateTime<Utc>) -> Vec<AnomalyResult> {
        let due = {
            let window = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
            now - window.started >= self.settings.sample_window
        };
        if due { self.flush_samples(now) } else { Vec::new() }
    }

    /// Score the current sample window unconditionally and start a new one.
    pub fn flush_samples(&self, now: DateTime<Utc>) -> Vec<AnomalyResult> {
        let finished = {
            let mut window = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
            window.started = now;
            std::mem::take(&mut window.devices)
        };

        let mut results = Vec::with_capacity(finished.len());
        for (key, (device, sample)) in finished {
            if sample.is_empty() {
                continue;
            }
            let result = self.anomaly.observe(&key, &sample);
            if result.is_anomaly {
                self.raise_anomaly_alert(&device, &result);
            }
            results.push(result);
        }
        results
    }

    fn raise_anomaly_alert(&self, device: &DeviceRef, result: &AnomalyResult) {
        let severity = if result.score >= HIGH_ANOMALY_SCORE {
            Severity::High
        } else {
            Severity::Medium
        };
        let details = json!({
            "device": device.name,
            "score": result.score,
            "reason": result.reason,
        });
        self.alerts.create_alert(
            ALERT_TYPE_ANOMALY,
            severity,
            &device.key,
            &format!("anomalous behavior: {}", result.reason),
            details,
        );
    }

    /// Evict idle sessions and refresh the rate gauges.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<FlowSession> {
        let evicted = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sweep(now);
        self.statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_rates(now);
        evicted
    }

    pub fn traffic_snapshot(&self) -> TrafficSnapshot {
        self.statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn protocol_distribution(&self) -> BTreeMap<String, u64> {
        self.statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .protocol_distribution()
    }

    pub fn top_talkers(&self, n: usize) -> Vec<HostVolume> {
        self.statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .top_talkers(n)
    }

    pub fn top_destinations(&self, n: usize) -> Vec<HostVolume> {
        self.statistics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .top_destinations(n)
    }

    /// Active sessions, most recently active first.
    pub fn active_sessions(&self) -> Vec<FlowSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active_sessions()
    }
}

/// Best identifier for where a packet came from.
fn packet_source(packet: &PacketRecord) -> String {
    match packet.src_ip {
        Some(ip) => ip.to_string(),
        None if !packet.src_mac.is_empty() => packet.src_mac.clone(),
        None => "unknown".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsentry_core::directory::{StaticDeviceDirectory, StaticThreatIntel};
    use netsentry_core::network::LocalNetwork;
    use netsentry_core::store::MemoryStore;
    use netsentry_core::types::Protocol;
    use netsentry_detection::{AlertConfig, AnomalyConfig, SignatureConfig};

    fn analyzer(dir: &std::path::Path, indicators: &[&str]) -> Analyzer {
        let store = Arc::new(MemoryStore::new());
        let signatures = SignatureEngine::new(SignatureConfig {
            rules_path: dir.join("netsentry.rules"),
            ..Default::default()
        })
        .unwrap();
        let mut devices = StaticDeviceDirectory::from_config(
            &Default::default(),
            &LocalNetwork::default(),
        );
        devices.register("00:00:00:00:00:02", "laptop");
        Analyzer::new(
            &TrafficConfig::default(),
            AnalyzerSettings::default(),
            Arc::new(signatures),
            Arc::new(AnomalyEngine::new(AnomalyConfig::default(), store.clone())),
            Arc::new(AlertEngine::new(AlertConfig::default(), store)),
            Arc::new(devices),
            Arc::new(StaticThreatIntel::new(indicators)),
        )
    }

    fn outbound(dst: &str, port: u16) -> PacketRecord {
        PacketRecord::new(Protocol::Tcp, 200)
            .with_endpoints("192.168.0.2".parse().unwrap(), 40000, dst.parse().unwrap(), port)
            .with_macs("00:00:00:00:00:02", "ff:ff:ff:ff:ff:01")
    }

    #[tokio::test]
    async fn test_signature_match_raises_alert() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("netsentry.rules"),
            "alert tcp any any -> any 4444 (msg:\"backdoor port\"; sid:10; severity:critical;)\n",
        )
        .unwrap();
        let analyzer = analyzer(dir.path(), &[]);
        analyzer.signatures().load().await.unwrap();

        let verdict = analyzer.process(&outbound("8.8.8.8", 4444));
        assert_eq!(verdict.signature_matches, 1);
        assert_eq!(verdict.alerts_created, 1);

        let stats = analyzer.alerts().stats();
        assert_eq!(stats.by_type["signature"], 1);
        assert_eq!(stats.by_severity["critical"], 1);
        assert_eq!(analyzer.active_sessions().len(), 1);
        assert_eq!(analyzer.traffic_snapshot().total_bytes, 200);
    }

    #[test]
    fn test_threat_intel_match_raises_high_alert() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), &["6.6.6.0/24"]);

        let verdict = analyzer.process(&outbound("6.6.6.6", 443));
        assert_eq!(verdict.threat_matches, 1);
        assert_eq!(verdict.alerts_created, 1);
        assert_eq!(analyzer.alerts().stats().by_type["threat_intel"], 1);
    }

    #[test]
    fn test_samples_are_attributed_by_mac_then_ip() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), &[]);
        analyzer.process(&outbound("8.8.8.8", 443));
        // 192.168.0.3 is local and auto-registered by IP
        analyzer.process(
            &PacketRecord::new(Protocol::Udp, 80).with_endpoints(
                "192.168.0.3".parse().unwrap(),
                5353,
                "1.1.1.1".parse().unwrap(),
                53,
            ),
        );

        let now = Utc::now() + TimeDelta::seconds(61);
        let results = analyzer.flush_samples_if_due(now);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_anomaly));
        assert!(analyzer.anomaly().baseline("00:00:00:00:00:02").is_some());
        assert!(analyzer.anomaly().baseline("192.168.0.3").is_some());
    }

    #[test]
    fn test_flush_waits_for_window() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), &[]);
        analyzer.process(&outbound("8.8.8.8", 443));
        assert!(analyzer.flush_samples_if_due(Utc::now()).is_empty());
    }

    #[test]
    fn test_anomalous_window_raises_alert() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), &[]);
        let t0 = Utc::now();

        analyzer.process(&outbound("8.8.8.8", 443));
        analyzer.flush_samples(t0);

        // 10x the traffic to a new host on a new port
        for _ in 0..10 {
            analyzer.process(&outbound("6.6.6.6", 4444));
        }
        let results = analyzer.flush_samples(t0 + TimeDelta::seconds(60));
        let result = results
            .iter()
            .find(|r| r.device_key == "00:00:00:00:00:02")
            .unwrap();
        assert!(result.is_anomaly);

        let stats = analyzer.alerts().stats();
        assert_eq!(stats.by_type["anomaly"], 1);
        assert_eq!(stats.by_severity["high"], 1);
    }

    #[test]
    fn test_sweep_evicts_idle_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = analyzer(dir.path(), &[]);
        analyzer.process(&outbound("8.8.8.8", 443));
        let evicted = analyzer.sweep(Utc::now() + TimeDelta::seconds(301));
        assert_eq!(evicted.len(), 1);
        assert!(analyzer.active_sessions().is_empty());
    }
}
