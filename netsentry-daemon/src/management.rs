//! Management API.
//!
//! A transport-agnostic command interface over the running daemon. Requests
//! and responses are serde types so any outer surface (socket, HTTP, CLI)
//! can speak JSON to [`ManagementApi::handle_json`].
//!
//! # Example
//!
//! ```text
//! {"command": "list_alerts", "filter": {"severity": "high"}, "limit": 20}
//! {"command": "acknowledge_alert", "id": "alert_1700000000_1230001", "actor": "alice"}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use netsentry_core::types::Alert;
use netsentry_detection::{
    AlertFilter, AlertPage, AlertStats, BehaviorBaseline, RefreshOutcome, RuleStats,
};
use netsentry_traffic::{FlowSession, HostVolume, QueueSnapshot, TrafficSnapshot};

use crate::analysis::Analyzer;
use crate::health::{DaemonHealth, HealthProbe};

const DEFAULT_LIMIT: usize = 10;
const DEFAULT_PAGE_SIZE: usize = 50;

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// A management command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ManagementRequest {
    /// Cumulative traffic statistics and rates.
    TrafficStats,
    /// Packet count per protocol.
    ProtocolDistribution,
    /// Hosts by bytes sent.
    TopTalkers {
        #[serde(default = "default_limit")]
        limit: usize,
    },
    /// Hosts by bytes received.
    TopDestinations {
        #[serde(default = "default_limit")]
        limit: usize,
    },
    /// Active flow sessions, most recently active first.
    ActiveSessions {
        #[serde(default = "default_page_size")]
        limit: usize,
    },
    /// Filtered, paginated alerts, newest first.
    ListAlerts {
        #[serde(default)]
        filter: AlertFilter,
        #[serde(default = "default_page_size")]
        limit: usize,
        #[serde(default)]
        offset: usize,
    },
    GetAlert {
        id: String,
    },
    AlertStats,
    AcknowledgeAlert {
        id: String,
        actor: String,
    },
    ResolveAlert {
        id: String,
        actor: String,
    },
    CloseAlert {
        id: String,
        actor: String,
    },
    /// Learned behavior baseline of one device.
    DeviceBaseline {
        device_key: String,
    },
    /// Fetch rules from the configured sources now.
    RefreshRules,
    RuleStats,
    EnableRule {
        id: String,
    },
    DisableRule {
        id: String,
    },
    Health,
}

/// Traffic statistics plus the ingestion queue state.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficReport {
    #[serde(flatten)]
    pub traffic: TrafficSnapshot,
    pub queue: Option<QueueSnapshot>,
    pub active_sessions: usize,
}

/// Reply to a [`ManagementRequest`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ManagementResponse {
    Traffic(TrafficReport),
    ProtocolDistribution(BTreeMap<String, u64>),
    Hosts(Vec<HostVolume>),
    Sessions(Vec<FlowSession>),
    AlertPage(AlertPage),
    Alert(Box<Alert>),
    AlertStats(AlertStats),
    Baseline(Box<BehaviorBaseline>),
    RefreshOutcome(RefreshOutcome),
    RuleStats(RuleStats),
    Health(DaemonHealth),
    /// Command applied, nothing to return.
    Ok,
    /// Unknown alert id, rule id or device key.
    NotFound(String),
    Error(String),
}

/// Command handler over the shared daemon state.
#[derive(Clone)]
pub struct ManagementApi {
    analyzer: Arc<Analyzer>,
    probe: Arc<HealthProbe>,
}

impl ManagementApi {
    pub fn new(analyzer: Arc<Analyzer>, probe: Arc<HealthProbe>) -> Self {
        Self { analyzer, probe }
    }

    /// Execute one command.
    pub async fn handle(&self, request: ManagementRequest) -> ManagementResponse {
        let analyzer = &self.analyzer;
        match request {
            ManagementRequest::TrafficStats => ManagementResponse::Traffic(TrafficReport {
                traffic: analyzer.traffic_snapshot(),
                queue: self.probe.queue_stats().map(|q| q.snapshot()),
                active_sessions: analyzer.active_sessions().len(),
            }),
            ManagementRequest::ProtocolDistribution => {
                ManagementResponse::ProtocolDistribution(analyzer.protocol_distribution())
            }
            ManagementRequest::TopTalkers { limit } => {
                ManagementResponse::Hosts(analyzer.top_talkers(limit))
            }
            ManagementRequest::TopDestinations { limit } => {
                ManagementResponse::Hosts(analyzer.top_destinations(limit))
            }
            ManagementRequest::ActiveSessions { limit } => {
                let mut sessions = analyzer.active_sessions();
                sessions.truncate(limit);
                ManagementResponse::Sessions(sessions)
            }
            ManagementRequest::ListAlerts {
                filter,
                limit,
                offset,
            } => ManagementResponse::AlertPage(analyzer.alerts().list(&filter, limit, offset)),
            ManagementRequest::GetAlert { id } => match analyzer.alerts().alert(&id) {
                Some(alert) => ManagementResponse::Alert(Box::new(alert)),
                None => not_found("alert", &id),
            },
            ManagementRequest::AlertStats => {
                ManagementResponse::AlertStats(analyzer.alerts().stats())
            }
            ManagementRequest::AcknowledgeAlert { id, actor } => {
                transitioned(analyzer.alerts().acknowledge(&id, &actor), &id)
            }
            ManagementRequest::ResolveAlert { id, actor } => {
                transitioned(analyzer.alerts().resolve(&id, &actor), &id)
            }
            ManagementRequest::CloseAlert { id, actor } => {
                transitioned(analyzer.alerts().close(&id, &actor), &id)
            }
            ManagementRequest::DeviceBaseline { device_key } => {
                match analyzer.anomaly().baseline(&device_key) {
                    Some(baseline) => ManagementResponse::Baseline(Box::new(baseline)),
                    None => not_found("device", &device_key),
                }
            }
            ManagementRequest::RefreshRules => match analyzer.signatures().refresh().await {
                Ok(outcome) => {
                    info!(
                        rules = outcome.rules_loaded,
                        "rule refresh requested via management API"
                    );
                    ManagementResponse::RefreshOutcome(outcome)
                }
                Err(e) => {
                    warn!(error = %e, "requested rule refresh failed");
                    ManagementResponse::Error(e.to_string())
                }
            },
            ManagementRequest::RuleStats => {
                ManagementResponse::RuleStats(analyzer.signatures().stats())
            }
            ManagementRequest::EnableRule { id } => {
                toggled(analyzer.signatures().enable_rule(&id), &id)
            }
            ManagementRequest::DisableRule { id } => {
                toggled(analyzer.signatures().disable_rule(&id), &id)
            }
            ManagementRequest::Health => ManagementResponse::Health(self.probe.report(analyzer)),
        }
    }

    /// Decode a JSON command, execute it, and encode the reply.
    ///
    /// Malformed requests produce an `error` response rather than failing.
    pub async fn handle_json(&self, request: &str) -> String {
        let response = match serde_json::from_str::<ManagementRequest>(request) {
            Ok(request) => self.handle(request).await,
            Err(e) => ManagementResponse::Error(format!("invalid request: {e}")),
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","data":"failed to encode response: {e}"}}"#)
        })
    }
}

fn not_found(kind: &str, id: &str) -> ManagementResponse {
    ManagementResponse::NotFound(format!("{kind} '{id}'"))
}

fn transitioned(alert: Option<Alert>, id: &str) -> ManagementResponse {
    match alert {
        Some(alert) => ManagementResponse::Alert(Box::new(alert)),
        None => not_found("alert", id),
    }
}

fn toggled(found: bool, id: &str) -> ManagementResponse {
    if found {
        ManagementResponse::Ok
    } else {
        not_found("rule", id)
    }
}
