//! 탐지 엔진 런타임 설정
//!
//! core의 설정 섹션을 엔진이 바로 쓰는 타입(`Duration`, `PathBuf`, [`Severity`])으로
//! 변환합니다. 값 검증은 [`NetsentryConfig::validate`](netsentry_core::NetsentryConfig::validate)에서
//! 이미 끝났다고 가정합니다.

use std::path::PathBuf;
use std::time::Duration;

use netsentry_core::config::{AlertEngineConfig, AnomalyDetectionConfig, SignatureDetectionConfig};
use netsentry_core::types::Severity;

/// 시그니처 엔진 설정
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    pub enabled: bool,
    /// 활성 규칙 파일
    pub rules_path: PathBuf,
    /// 규칙 다운로드 URL 목록
    pub sources: Vec<String>,
    /// 갱신 주기
    pub update_interval: Duration,
    /// 보관할 백업 파일 수
    pub max_backups: usize,
    /// 다운로드 타임아웃
    pub fetch_timeout: Duration,
}

impl SignatureConfig {
    pub fn from_core(config: &SignatureDetectionConfig) -> Self {
        Self {
            enabled: config.enabled,
            rules_path: PathBuf::from(&config.rules_path),
            sources: config.rule_sources.clone(),
            update_interval: Duration::from_secs(config.rule_update_interval_hours.saturating_mul(3600)),
            max_backups: config.max_backups,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self::from_core(&SignatureDetectionConfig::default())
    }
}

/// 이상 탐지 엔진 설정
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub enabled: bool,
    /// 점수가 이 값을 초과하면 이상
    pub threshold: f64,
    pub deviation_factor: f64,
    pub traffic_weight: f64,
    pub new_destination_weight: f64,
    pub unusual_port_weight: f64,
    /// 베이스라인 노화 주기
    pub aging_interval: Duration,
    /// 장치별 샘플 집계 구간
    pub sample_window: Duration,
}

impl AnomalyConfig {
    pub fn from_core(config: &AnomalyDetectionConfig) -> Self {
        Self {
            enabled: config.enabled,
            threshold: config.detection_threshold.clamp(0.0, 1.0),
            deviation_factor: config.traffic_deviation_factor,
            traffic_weight: config.traffic_weight,
            new_destination_weight: config.new_domain_weight,
            unusual_port_weight: config.unusual_port_weight,
            aging_interval: Duration::from_secs(config.baseline_update_interval_hours.saturating_mul(3600)),
            sample_window: Duration::from_secs(config.sample_window_secs),
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self::from_core(&AnomalyDetectionConfig::default())
    }
}

/// 알림 엔진 설정
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    /// 수용할 심각도
    pub accepted_severities: Vec<Severity>,
    /// 로그 싱크 사용 여부
    pub log_notifications: bool,
    /// 구독자 브로드캐스트 사용 여부
    pub web_notifications: bool,
    /// 시간 버킷당 최대 알림 수
    pub max_alerts_per_hour: u32,
    pub retention_days: u32,
    pub cleanup_interval: Duration,
    /// 중복 억제 구간 (0이면 비활성)
    pub dedup_window: Duration,
    /// 시작 시 불러올 최대 알림 수
    pub load_limit: usize,
}

impl AlertConfig {
    pub fn from_core(config: &AlertEngineConfig) -> Self {
        let has = |method: &str| {
            config
                .notification_methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
        };
        Self {
            enabled: config.enabled,
            accepted_severities: config.accepted_severities(),
            log_notifications: has("log"),
            web_notifications: has("web"),
            max_alerts_per_hour: config.max_alerts_per_hour,
            retention_days: config.retention_days,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_hours.saturating_mul(3600)),
            dedup_window: Duration::from_secs(config.dedup_window_secs),
            load_limit: config.load_limit,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self::from_core(&AlertEngineConfig::default())
    }
}
