//! 에러 타입 — 도메인별 에러 정의

/// netsentry 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum NetsentryError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 트래픽 수집/분석 에러
    #[error("traffic error: {0}")]
    Traffic(String),

    /// 탐지 엔진 에러
    #[error("detection error: {0}")]
    Detection(String),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// 잘못된 오버라이드 식 (`section.field=value`)
    #[error("invalid override '{expr}': {reason}")]
    InvalidOverride { expr: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 채널 수신 실패
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 저장소를 열 수 없음
    #[error("failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },

    /// 읽기/쓰기 실패
    #[error("query failed on {table}/{key}: {reason}")]
    Query {
        table: String,
        key: String,
        reason: String,
    },

    /// 저장된 레코드 손상
    #[error("corrupt record {table}/{key}: {reason}")]
    Corrupt {
        table: String,
        key: String,
        reason: String,
    },

    /// 직렬화 실패
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
