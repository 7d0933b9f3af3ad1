//! 탐지 크레이트 에러 타입
//!
//! [`DetectionError`]는 시그니처 규칙 로딩/갱신, 베이스라인 및 알림 저장 중
//! 발생하는 에러를 표현합니다.
//! `From<DetectionError> for NetsentryError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use netsentry_core::error::{ConfigError, NetsentryError, StorageError};

/// 탐지 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// 설정 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 규칙 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 규칙 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 규칙 한 줄 파싱 실패
    #[error("rule parse error: {reason}")]
    RuleParse {
        /// 실패 사유
        reason: String,
    },

    /// 규칙 소스 다운로드 실패
    #[error("rule fetch error: {url}: {reason}")]
    RuleFetch {
        /// 규칙 소스 URL
        url: String,
        /// 실패 사유
        reason: String,
    },

    /// 받아온 규칙 번들이 유효하지 않음
    #[error("invalid rule bundle: {0}")]
    InvalidBundle(String),

    /// 규칙 갱신이 이미 진행 중
    #[error("rule refresh already in progress")]
    RefreshInProgress,

    /// 규칙 파일 교체 실패
    #[error("rule install error: {path}: {reason}")]
    RuleInstall {
        /// 대상 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 알림 전달 실패
    #[error("notification error: {sink}: {reason}")]
    Notify {
        /// 싱크 이름
        sink: String,
        /// 실패 사유
        reason: String,
    },

    /// 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<DetectionError> for NetsentryError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::Config(e) => NetsentryError::Config(e),
            DetectionError::Storage(e) => NetsentryError::Storage(e),
            other => NetsentryError::Detection(other.to_string()),
        }
    }
}
