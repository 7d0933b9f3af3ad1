//! 알림 전달 싱크
//!
//! 알림 엔진은 저장을 마친 뒤 등록된 모든 싱크에 [`AlertEvent`]를 전달합니다.
//! 싱크 실패는 로그와 카운터로만 남고 알림 생성을 되돌리지 않습니다.

use netsentry_core::event::AlertEvent;
use netsentry_core::types::Severity;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::DetectionError;

/// 알림 전달 대상
pub trait NotificationSink: Send + Sync {
    /// 싱크 이름 (로그/메트릭 라벨용)
    fn name(&self) -> &str;

    /// 알림을 전달합니다. 블로킹하지 않아야 합니다.
    fn notify(&self, event: &AlertEvent) -> Result<(), DetectionError>;
}

/// tracing 로그 싱크
///
/// 심각도에 따라 로그 레벨을 고릅니다.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, event: &AlertEvent) -> Result<(), DetectionError> {
        let alert = &event.alert;
        match alert.severity {
            Severity::Critical | Severity::High => error!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                source = %alert.source,
                "{}", alert.description
            ),
            Severity::Medium => warn!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                source = %alert.source,
                "{}", alert.description
            ),
            Severity::Low => info!(
                alert_id = %alert.id,
                alert_type = %alert.alert_type,
                severity = %alert.severity,
                source = %alert.source,
                "{}", alert.description
            ),
        }
        Ok(())
    }
}

/// API 구독자용 브로드캐스트 싱크
///
/// 구독자가 없으면 이벤트는 버려지며 실패로 보지 않습니다.
pub struct BroadcastSink {
    tx: broadcast::Sender<AlertEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl NotificationSink for BroadcastSink {
    fn name(&self) -> &str {
        "web"
    }

    fn notify(&self, event: &AlertEvent) -> Result<(), DetectionError> {
        match self.tx.send(event.clone()) {
            Ok(receivers) => debug!(alert_id = %event.alert.id, receivers, "alert broadcast"),
            Err(_) => debug!(alert_id = %event.alert.id, "no alert subscribers"),
        }
        Ok(())
    }
}
