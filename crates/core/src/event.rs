//! 이벤트 — 모듈 간 전달되는 알림 메시지
//!
//! 알림 엔진은 알림을 만들 때마다 [`AlertEvent`]를 발행하고,
//! 관리 API 구독자 등은 이를 broadcast 채널로 받습니다.
//! [`EventMetadata`]는 발생 시각, 생성 모듈, 추적 ID를 담습니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Alert, Severity};

// --- 모듈명 상수 ---

/// 트래픽 분석 모듈명
pub const MODULE_TRAFFIC: &str = "traffic-analyzer";
/// 시그니처 탐지 모듈명
pub const MODULE_SIGNATURE: &str = "signature-detection";
/// 이상 탐지 모듈명
pub const MODULE_ANOMALY: &str = "anomaly-detection";
/// 알림 엔진 모듈명
pub const MODULE_ALERT_ENGINE: &str = "alert-engine";

/// 알림 이벤트 타입
pub const EVENT_TYPE_ALERT: &str = "alert";

/// 이벤트 메타데이터
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: DateTime<Utc>,
    /// 이벤트를 생성한 모듈명
    pub source_module: String,
    /// 추적 ID, 같은 흐름의 이벤트를 연결합니다
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 이어받아 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id로 메타데이터를 생성합니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self::new(source_module, uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] source={} trace={}",
            self.timestamp.to_rfc3339(),
            self.source_module,
            self.trace_id,
        )
    }
}

/// 모든 이벤트가 구현하는 기본 trait
///
/// `Send + Sync + 'static` 바운드로 tokio 채널을 통해 전송할 수 있습니다.
pub trait Event: Send + Sync + 'static {
    /// 이벤트 고유 ID (UUID v4)
    fn event_id(&self) -> &str;

    /// 이벤트 메타데이터
    fn metadata(&self) -> &EventMetadata;

    /// 이벤트 타입명
    fn event_type(&self) -> &str;
}

/// 알림이 생성되었음을 알리는 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 생성된 알림
    pub alert: Alert,
}

impl AlertEvent {
    /// 알림 엔진에서 발행하는 이벤트를 생성합니다.
    pub fn new(alert: Alert) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_ALERT_ENGINE),
            alert,
        }
    }

    /// 알림 심각도
    pub fn severity(&self) -> Severity {
        self.alert.severity
    }
}

impl Event for AlertEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_ALERT
    }
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.metadata, self.alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertStatus;

    fn alert() -> Alert {
        Alert {
            id: "alert_1700000000_0010001".to_owned(),
            timestamp: Utc::now(),
            alert_type: "anomaly".to_owned(),
            severity: Severity::Medium,
            source: "device-1".to_owned(),
            description: "traffic volume deviation".to_owned(),
            details: serde_json::Value::Null,
            status: AlertStatus::New,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            closed_by: None,
            closed_at: None,
            history: Vec::new(),
        }
    }

    #[test]
    fn alert_event_has_unique_ids() {
        let a = AlertEvent::new(alert());
        let b = AlertEvent::new(alert());
        assert_ne!(a.event_id(), b.event_id());
        assert_ne!(a.metadata.trace_id, b.metadata.trace_id);
        assert_eq!(a.event_type(), EVENT_TYPE_ALERT);
        assert_eq!(a.metadata.source_module, MODULE_ALERT_ENGINE);
    }

    #[test]
    fn metadata_keeps_given_trace() {
        let meta = EventMetadata::new(MODULE_SIGNATURE, "trace-1");
        assert_eq!(meta.trace_id, "trace-1");
        assert!(meta.to_string().contains("source=signature-detection"));
    }

    #[test]
    fn alert_event_display_includes_alert() {
        let event = AlertEvent::new(alert());
        assert_eq!(event.severity(), Severity::Medium);
        assert!(event.to_string().contains("alert_1700000000_0010001"));
    }
}
