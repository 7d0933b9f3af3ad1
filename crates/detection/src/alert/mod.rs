//! 알림 엔진 — 탐지 결과를 저장되는 알림 레코드로 변환
//!
//! # 생성 흐름
//! ```text
//! create_alert
//!   ├─ 엔진 비활성?            → Suppressed(Disabled)
//!   ├─ 허용되지 않은 심각도?    → Suppressed(Severity)
//!   ├─ 현재 시간 버킷 한도 도달? → Suppressed(RateLimited)
//!   ├─ 중복 구간 내 동일 알림?  → Suppressed(Duplicate)
//!   └─ ID 부여 → 저장 → 싱크 전달 → Created(alert)
//! ```
//!
//! 시간 버킷은 첫 알림 시각부터 한 시간 동안 유지되고, 지나면 통째로 초기화됩니다.
//! 상태 전이(`acknowledge`/`resolve`/`close`)는 순서를 검사하지 않고 덮어씁니다.

pub mod notify;

pub use notify::{BroadcastSink, LogSink, NotificationSink};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use netsentry_core::event::AlertEvent;
use netsentry_core::metrics as m;
use netsentry_core::store::{self, Store, TABLE_ALERTS};
use netsentry_core::types::{Alert, AlertStatus, Severity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AlertConfig;
use crate::error::DetectionError;

/// 생성 주체
pub const SYSTEM_ACTOR: &str = "system";

/// 브로드캐스트 싱크 버퍼 크기
const BROADCAST_CAPACITY: usize = 256;

/// 중복 추적 맵을 정리하기 시작하는 크기
const DEDUP_PRUNE_THRESHOLD: usize = 4096;

/// 억제 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    Disabled,
    Severity,
    RateLimited,
    Duplicate,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Severity => "severity",
            Self::RateLimited => "rate_limited",
            Self::Duplicate => "duplicate",
        }
    }
}

/// `create_alert` 결과
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Created(Alert),
    Suppressed(SuppressReason),
}

impl AlertOutcome {
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            Self::Created(alert) => Some(alert),
            Self::Suppressed(_) => None,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed(_))
    }
}

/// 목록 필터 (모든 조건은 AND)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    pub alert_type: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<AlertStatus>,
    pub source: Option<String>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.alert_type.as_ref().is_none_or(|t| *t == alert.alert_type)
            && self.severity.is_none_or(|s| s == alert.severity)
            && self.status.is_none_or(|s| s == alert.status)
            && self.source.as_ref().is_none_or(|s| *s == alert.source)
    }
}

/// 페이지 조회 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPage {
    /// 필터에 맞는 전체 수
    pub total: usize,
    pub alerts: Vec<Alert>,
}

/// 억제 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SuppressionCounts {
    pub disabled: u64,
    pub severity: u64,
    pub rate_limited: u64,
    pub duplicate: u64,
}

impl SuppressionCounts {
    fn record(&mut self, reason: SuppressReason) {
        match reason {
            SuppressReason::Disabled => self.disabled += 1,
            SuppressReason::Severity => self.severity += 1,
            SuppressReason::RateLimited => self.rate_limited += 1,
            SuppressReason::Duplicate => self.duplicate += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.disabled + self.severity + self.rate_limited + self.duplicate
    }
}

/// 알림 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub suppressed: SuppressionCounts,
    /// 현재 시간 버킷에서 생성된 수
    pub created_this_hour: u32,
}

struct AlertState {
    alerts: HashMap<String, Alert>,
    hour_start: Option<DateTime<Utc>>,
    hour_count: u32,
    /// (유형, 출처, 설명) → 마지막 생성 시각
    recent: HashMap<String, DateTime<Utc>>,
    suppressed: SuppressionCounts,
}

/// 알림 엔진
pub struct AlertEngine {
    config: AlertConfig,
    store: Arc<dyn Store>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    broadcast: Option<Arc<BroadcastSink>>,
    state: Mutex<AlertState>,
    sequence: AtomicU32,
}

impl AlertEngine {
    /// 설정된 알림 방식에 맞춰 싱크를 구성합니다.
    pub fn new(config: AlertConfig, store: Arc<dyn Store>) -> Self {
        let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
        if config.log_notifications {
            sinks.push(Arc::new(LogSink));
        }
        let broadcast = config.web_notifications.then(|| {
            let sink = Arc::new(BroadcastSink::new(BROADCAST_CAPACITY));
            sinks.push(sink.clone());
            sink
        });

        Self {
            config,
            store,
            sinks,
            broadcast,
            state: Mutex::new(AlertState {
                alerts: HashMap::new(),
                hour_start: None,
                hour_count: 0,
                recent: HashMap::new(),
                suppressed: SuppressionCounts::default(),
            }),
            sequence: AtomicU32::new(0),
        }
    }

    /// 싱크를 추가합니다.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// 새 알림 구독. 웹 알림이 꺼져 있으면 `None`.
    pub fn subscribe(&self) -> Option<tokio::sync::broadcast::Receiver<AlertEvent>> {
        self.broadcast.as_ref().map(|b| b.subscribe())
    }

    /// 시작 시 저장소의 알림을 최신순으로 `load_limit`개까지 불러옵니다.
    pub fn load_alerts(&self) -> Result<usize, DetectionError> {
        let mut alerts: HashMap<String, Alert> = HashMap::new();
        for (key, record) in self.store.scan_latest(TABLE_ALERTS, self.config.load_limit)? {
            let parsed =
                record.and_then(|value| serde_json::from_value::<Alert>(value).map_err(Into::into));
            match parsed {
                Ok(alert) => {
                    alerts.insert(alert.id.clone(), alert);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt alert record"),
            }
        }

        let count = alerts.len();
        self.lock().alerts = alerts;
        info!(alerts = count, "alerts loaded");
        Ok(count)
    }

    /// 알림을 생성합니다.
    pub fn create_alert(
        &self,
        alert_type: &str,
        severity: Severity,
        source: &str,
        description: &str,
        details: serde_json::Value,
    ) -> AlertOutcome {
        self.create_alert_at(Utc::now(), alert_type, severity, source, description, details)
    }

    /// 지정한 시각 기준으로 알림을 생성합니다.
    pub fn create_alert_at(
        &self,
        now: DateTime<Utc>,
        alert_type: &str,
        severity: Severity,
        source: &str,
        description: &str,
        details: serde_json::Value,
    ) -> AlertOutcome {
        let alert = {
            let mut state = self.lock();
            let suppression =
                self.check_suppression(&mut state, now, alert_type, source, description, severity);
            if let Some(reason) = suppression {
                state.suppressed.record(reason);
                drop(state);
                metrics::counter!(m::ALERT_SUPPRESSED_TOTAL, m::LABEL_REASON => reason.as_str())
                    .increment(1);
                debug!(
                    alert_type,
                    source,
                    reason = reason.as_str(),
                    "alert suppressed"
                );
                return AlertOutcome::Suppressed(reason);
            }

            let mut alert = Alert {
                id: self.next_id(now),
                timestamp: now,
                alert_type: alert_type.to_owned(),
                severity,
                source: source.to_owned(),
                description: description.to_owned(),
                details,
                status: AlertStatus::New,
                acknowledged_by: None,
                acknowledged_at: None,
                resolved_by: None,
                resolved_at: None,
                closed_by: None,
                closed_at: None,
                history: Vec::new(),
            };
            alert.transition(AlertStatus::New, SYSTEM_ACTOR, now);

            state.hour_count += 1;
            if !self.config.dedup_window.is_zero() {
                state.recent.insert(dedup_key(alert_type, source, description), now);
            }
            self.persist(&alert);
            state.alerts.insert(alert.id.clone(), alert.clone());
            alert
        };

        metrics::counter!(m::ALERT_CREATED_TOTAL, m::LABEL_SEVERITY => severity.as_str())
            .increment(1);
        self.dispatch(&alert);
        AlertOutcome::Created(alert)
    }

    fn check_suppression(
        &self,
        state: &mut AlertState,
        now: DateTime<Utc>,
        alert_type: &str,
        source: &str,
        description: &str,
        severity: Severity,
    ) -> Option<SuppressReason> {
        if !self.config.enabled {
            return Some(SuppressReason::Disabled);
        }
        if !self.config.accepted_severities.contains(&severity) {
            return Some(SuppressReason::Severity);
        }

        let bucket_elapsed = state
            .hour_start
            .is_none_or(|start| now - start >= TimeDelta::hours(1));
        if bucket_elapsed {
            state.hour_start = Some(now);
            state.hour_count = 0;
        }
        if state.hour_count >= self.config.max_alerts_per_hour {
            return Some(SuppressReason::RateLimited);
        }

        if !self.config.dedup_window.is_zero() {
            let window = TimeDelta::from_std(self.config.dedup_window).unwrap_or(TimeDelta::MAX);
            if state.recent.len() > DEDUP_PRUNE_THRESHOLD {
                state.recent.retain(|_, seen| now - *seen < window);
            }
            if let Some(seen) = state.recent.get(&dedup_key(alert_type, source, description))
                && now - *seen < window
            {
                return Some(SuppressReason::Duplicate);
            }
        }
        None
    }

    /// `alert_<초>_<밀리초 3자리><순번 4자리>`
    fn next_id(&self, now: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 10_000;
        format!(
            "alert_{}_{:03}{:04}",
            now.timestamp(),
            now.timestamp_subsec_millis(),
            seq
        )
    }

    fn dispatch(&self, alert: &Alert) {
        if self.sinks.is_empty() {
            return;
        }
        let event = AlertEvent::new(alert.clone());
        for sink in &self.sinks {
            if let Err(e) = sink.notify(&event) {
                metrics::counter!(m::ALERT_NOTIFY_FAILURES_TOTAL).increment(1);
                warn!(
                    sink = sink.name(),
                    alert_id = %alert.id,
                    error = %e,
                    "alert notification failed"
                );
            }
        }
    }

    /// 저장 실패는 로그만 남깁니다.
    fn persist(&self, alert: &Alert) {
        if let Err(e) = store::put_json(self.store.as_ref(), TABLE_ALERTS, &alert.id, alert) {
            warn!(alert_id = %alert.id, error = %e, "failed to persist alert");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AlertState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, id: &str, status: AlertStatus, actor: &str) -> Option<Alert> {
        let mut state = self.lock();
        let alert = state.alerts.get_mut(id)?;
        alert.transition(status, actor, Utc::now());
        let updated = alert.clone();
        self.persist(&updated);
        drop(state);

        info!(alert_id = id, status = %status, actor, "alert status changed");
        Some(updated)
    }

    pub fn acknowledge(&self, id: &str, actor: &str) -> Option<Alert> {
        self.transition(id, AlertStatus::Acknowledged, actor)
    }

    pub fn resolve(&self, id: &str, actor: &str) -> Option<Alert> {
        self.transition(id, AlertStatus::Resolved, actor)
    }

    pub fn close(&self, id: &str, actor: &str) -> Option<Alert> {
        self.transition(id, AlertStatus::Closed, actor)
    }

    pub fn alert(&self, id: &str) -> Option<Alert> {
        self.lock().alerts.get(id).cloned()
    }

    /// 필터에 맞는 알림을 최신순으로 페이지 단위로 반환합니다.
    pub fn list(&self, filter: &AlertFilter, limit: usize, offset: usize) -> AlertPage {
        let mut matched: Vec<Alert> = self
            .lock()
            .alerts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

        let total = matched.len();
        let alerts = matched.into_iter().skip(offset).take(limit).collect();
        AlertPage { total, alerts }
    }

    /// 메모리와 저장소에서 알림을 지웁니다.
    pub fn delete(&self, id: &str) -> bool {
        let mut state = self.lock();
        let in_memory = state.alerts.remove(id).is_some();
        let in_store = match self.store.delete(TABLE_ALERTS, id) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(alert_id = id, error = %e, "failed to delete alert record");
                false
            }
        };
        in_memory || in_store
    }

    /// 보존 기간이 지난 알림을 메모리와 저장소에서 삭제합니다.
    ///
    /// 메모리에 올라오지 않은 오래된 레코드도 저장소에서 함께 지웁니다.
    /// 저장소 작업은 알림 잠금 밖에서 수행합니다.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = TimeDelta::try_days(i64::from(self.config.retention_days))
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut purged: HashSet<String> = HashSet::new();
        self.lock().alerts.retain(|id, alert| {
            if alert.timestamp < cutoff {
                purged.insert(id.clone());
                false
            } else {
                true
            }
        });

        let mut stored: HashSet<String> = HashSet::new();
        match self.store.purge_before(TABLE_ALERTS, cutoff) {
            Ok(keys) => stored.extend(keys),
            Err(e) => warn!(error = %e, "failed to purge expired alert records"),
        }
        for id in purged.difference(&stored) {
            if let Err(e) = self.store.delete(TABLE_ALERTS, id) {
                warn!(alert_id = %id, error = %e, "failed to purge alert record");
            }
        }
        purged.extend(stored);

        let count = purged.len();
        metrics::counter!(m::ALERT_PURGED_TOTAL).increment(count as u64);
        if count > 0 {
            info!(
                purged = count,
                retention_days = self.config.retention_days,
                "expired alerts purged"
            );
        }
        count
    }

    pub fn suppression_counts(&self) -> SuppressionCounts {
        self.lock().suppressed
    }

    pub fn stats(&self) -> AlertStats {
        let state = self.lock();
        let mut by_status: BTreeMap<String, usize> = AlertStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_owned(), 0))
            .collect();
        let mut by_severity: BTreeMap<String, usize> = Severity::ALL
            .iter()
            .map(|s| (s.as_str().to_owned(), 0))
            .collect();
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();

        for alert in state.alerts.values() {
            *by_status.entry(alert.status.as_str().to_owned()).or_default() += 1;
            *by_severity.entry(alert.severity.as_str().to_owned()).or_default() += 1;
            *by_type.entry(alert.alert_type.clone()).or_default() += 1;
        }

        AlertStats {
            total: state.alerts.len(),
            by_status,
            by_severity,
            by_type,
            suppressed: state.suppressed,
            created_this_hour: state.hour_count,
        }
    }
}

fn dedup_key(alert_type: &str, source: &str, description: &str) -> String {
    format!("{alert_type}\u{1f}{source}\u{1f}{description}")
}
