//! 트래픽 크레이트 에러 타입
//!
//! `From<TrafficError> for NetsentryError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use netsentry_core::error::{ConfigError, NetsentryError};

/// 트래픽 수집/분석 에러
#[derive(Debug, thiserror::Error)]
pub enum TrafficError {
    /// 설정 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 패킷 소스 에러
    #[error("packet source '{source_name}' failed: {reason}")]
    Source { source_name: String, reason: String },

    /// 수집 큐가 닫힘
    #[error("ingestion queue closed")]
    QueueClosed,
}

impl From<TrafficError> for NetsentryError {
    fn from(err: TrafficError) -> Self {
        match err {
            TrafficError::Config(e) => NetsentryError::Config(e),
            other => NetsentryError::Traffic(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_display() {
        let err = TrafficError::Source {
            source_name: "synthetic:eth0".to_owned(),
            reason: "exhausted".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "packet source 'synthetic:eth0' failed: exhausted"
        );
    }

    #[test]
    fn converts_to_netsentry_error() {
        let err: NetsentryError = TrafficError::QueueClosed.into();
        assert!(matches!(err, NetsentryError::Traffic(_)));

        let cfg: NetsentryError = TrafficError::Config(ConfigError::ParseFailed {
            reason: "x".to_owned(),
        })
        .into();
        assert!(matches!(cfg, NetsentryError::Config(_)));
    }
}
