//! 설정 관리 — netsentry.toml 파싱 및 런타임 설정
//!
//! [`NetsentryConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI `--set section.field=value` (최고 우선)
//! 2. 환경변수 (`NETSENTRY__ALERT_ENGINE__MAX_ALERTS_PER_HOUR=50` 형식)
//! 3. 설정 파일 (`netsentry.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! 오버라이드는 모두 점(`.`)으로 구분된 경로이며, 타입 변환 전에 TOML 트리에 적용됩니다.
//! 값은 TOML 리터럴로 해석하고, 실패하면 문자열로 취급합니다.
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), netsentry_core::error::NetsentryError> {
//! use netsentry_core::config::NetsentryConfig;
//!
//! // 파일 + 환경변수 + CLI 오버라이드
//! let overrides = vec!["alert_engine.max_alerts_per_hour=50".to_owned()];
//! let config = NetsentryConfig::load_with_overrides("netsentry.toml", &overrides).await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = NetsentryConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, NetsentryError};
use crate::network::LocalNetwork;
use crate::types::Severity;

/// 환경변수 오버라이드 접두어
pub const ENV_PREFIX: &str = "NETSENTRY__";

/// 보존 기간 상한 (100년)
pub const MAX_RETENTION_DAYS: u64 = 36_500;
/// 통계 슬라이딩 윈도우 상한
pub const MAX_RATE_WINDOW_SECS: u64 = 3_600;
/// 세션/샘플/중복 제거 윈도우 상한 (30일)
pub const MAX_WINDOW_SECS: u64 = 30 * 86_400;
/// 주기 작업 간격 상한 (1년)
pub const MAX_INTERVAL_HOURS: u64 = 8_760;
const MAX_POLL_MS: u64 = 60_000;
const MAX_FETCH_TIMEOUT_SECS: u64 = 3_600;

/// netsentry 통합 설정
///
/// `netsentry.toml` 파일의 최상위 구조입니다. 각 모듈은 자기 섹션만 읽습니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetsentryConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub traffic_analyzer: TrafficAnalyzerConfig,
    #[serde(default)]
    pub signature_detection: SignatureDetectionConfig,
    #[serde(default)]
    pub anomaly_detection: AnomalyDetectionConfig,
    #[serde(default)]
    pub alert_engine: AlertEngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub threat_intelligence: ThreatIntelConfig,
    #[serde(default)]
    pub device_directory: DeviceDirectoryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl NetsentryConfig {
    /// TOML 파일을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, NetsentryError> {
        Self::load_with_overrides(path, &[]).await
    }

    /// TOML 파일을 로드하고 환경변수와 CLI 오버라이드를 차례로 적용합니다.
    ///
    /// 적용 후 [`normalize`](Self::normalize)와 [`validate`](Self::validate)를 한 번 수행합니다.
    pub async fn load_with_overrides(
        path: impl AsRef<Path>,
        cli_overrides: &[String],
    ) -> Result<Self, NetsentryError> {
        let content = read_config_file(path.as_ref()).await?;
        let env: Vec<(String, String)> = std::env::vars().collect();
        let mut config = Self::parse_with_overrides(&content, env, cli_overrides)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, NetsentryError> {
        let content = read_config_file(path.as_ref()).await?;
        let mut config = Self::parse(&content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, NetsentryError> {
        toml::from_str(toml_str).map_err(|e| {
            NetsentryError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// TOML 문자열에 환경변수/CLI 오버라이드를 적용한 뒤 파싱합니다.
    ///
    /// `env`에서는 [`ENV_PREFIX`]로 시작하는 항목만 사용합니다.
    pub fn parse_with_overrides<I>(
        toml_str: &str,
        env: I,
        cli_overrides: &[String],
    ) -> Result<Self, NetsentryError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut table: toml::Table = toml::from_str(toml_str).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;

        let mut env_overrides: Vec<(String, String)> = env
            .into_iter()
            .filter_map(|(key, value)| env_key_to_path(&key).map(|path| (path, value)))
            .collect();
        env_overrides.sort();
        for (path, value) in env_overrides {
            apply_override(&mut table, &path, &value)?;
        }

        for expr in cli_overrides {
            let (path, value) = split_override(expr)?;
            apply_override(&mut table, path, value)?;
        }

        let rendered = toml::to_string(&table).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;
        Self::parse(&rendered)
    }

    /// 범위를 벗어난 값을 보정합니다.
    ///
    /// `anomaly_detection.detection_threshold`는 [0, 1]로 잘립니다.
    pub fn normalize(&mut self) {
        let threshold = self.anomaly_detection.detection_threshold;
        if threshold.is_finite() && !(0.0..=1.0).contains(&threshold) {
            let clamped = threshold.clamp(0.0, 1.0);
            warn!(
                original = threshold,
                clamped, "anomaly_detection.detection_threshold out of range, clamping"
            );
            self.anomaly_detection.detection_threshold = clamped;
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), NetsentryError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        check_one_of("general.log_level", &self.general.log_level, &valid_levels)?;

        let valid_formats = ["json", "pretty"];
        check_one_of("general.log_format", &self.general.log_format, &valid_formats)?;

        let traffic = &self.traffic_analyzer;
        if traffic.enabled {
            check_one_of("traffic_analyzer.capture_mode", &traffic.capture_mode, &["synthetic"])?;
            if traffic.interfaces.is_empty() || traffic.interfaces.iter().any(|i| i.is_empty()) {
                return Err(invalid(
                    "traffic_analyzer.interfaces",
                    "at least one non-empty interface is required when enabled",
                ));
            }
        }
        check_positive("traffic_analyzer.synthetic_packets_per_second", traffic.synthetic_packets_per_second)?;
        check_positive("traffic_analyzer.queue_capacity", traffic.queue_capacity as u64)?;
        check_range("traffic_analyzer.dequeue_poll_ms", traffic.dequeue_poll_ms, MAX_POLL_MS)?;
        check_range("traffic_analyzer.rate_window_secs", traffic.rate_window_secs, MAX_RATE_WINDOW_SECS)?;
        check_positive("traffic_analyzer.max_tracked_hosts", traffic.max_tracked_hosts as u64)?;
        check_range(
            "traffic_analyzer.session_timeout_secs",
            traffic.session_timeout_secs,
            MAX_WINDOW_SECS,
        )?;
        check_range(
            "traffic_analyzer.session_sweep_interval_secs",
            traffic.session_sweep_interval_secs,
            MAX_WINDOW_SECS,
        )?;
        check_positive("traffic_analyzer.max_sessions", traffic.max_sessions as u64)?;
        traffic.local_network()?;

        let signature = &self.signature_detection;
        if signature.enabled && signature.rules_path.is_empty() {
            return Err(invalid(
                "signature_detection.rules_path",
                "must not be empty when signature detection is enabled",
            ));
        }
        check_range(
            "signature_detection.rule_update_interval_hours",
            signature.rule_update_interval_hours,
            MAX_INTERVAL_HOURS,
        )?;
        check_positive("signature_detection.max_backups", signature.max_backups as u64)?;
        check_range(
            "signature_detection.fetch_timeout_secs",
            signature.fetch_timeout_secs,
            MAX_FETCH_TIMEOUT_SECS,
        )?;

        let anomaly = &self.anomaly_detection;
        if !anomaly.detection_threshold.is_finite() {
            return Err(invalid(
                "anomaly_detection.detection_threshold",
                "must be a finite number",
            ));
        }
        check_range(
            "anomaly_detection.baseline_update_interval_hours",
            anomaly.baseline_update_interval_hours,
            MAX_INTERVAL_HOURS,
        )?;
        check_range(
            "anomaly_detection.sample_window_secs",
            anomaly.sample_window_secs,
            MAX_WINDOW_SECS,
        )?;
        if !(anomaly.traffic_deviation_factor.is_finite() && anomaly.traffic_deviation_factor > 0.0) {
            return Err(invalid(
                "anomaly_detection.traffic_deviation_factor",
                "must be greater than 0",
            ));
        }
        for (field, weight) in [
            ("anomaly_detection.traffic_weight", anomaly.traffic_weight),
            ("anomaly_detection.new_domain_weight", anomaly.new_domain_weight),
            ("anomaly_detection.unusual_port_weight", anomaly.unusual_port_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(invalid(field, "must be between 0.0 and 1.0"));
            }
        }

        let alert = &self.alert_engine;
        for level in &alert.alert_levels {
            if Severity::from_str_loose(level).is_none() {
                return Err(invalid(
                    "alert_engine.alert_levels",
                    &format!("unknown severity '{level}', must be one of: low, medium, high, critical"),
                ));
            }
        }
        let valid_methods = ["log", "web"];
        for method in &alert.notification_methods {
            check_one_of("alert_engine.notification_methods", method, &valid_methods)?;
        }
        check_positive("alert_engine.max_alerts_per_hour", alert.max_alerts_per_hour as u64)?;
        check_range(
            "alert_engine.retention_days",
            u64::from(alert.retention_days),
            MAX_RETENTION_DAYS,
        )?;
        check_range(
            "alert_engine.cleanup_interval_hours",
            alert.cleanup_interval_hours,
            MAX_INTERVAL_HOURS,
        )?;
        if alert.dedup_window_secs > MAX_WINDOW_SECS {
            return Err(invalid(
                "alert_engine.dedup_window_secs",
                &format!("must be at most {MAX_WINDOW_SECS}"),
            ));
        }
        check_positive("alert_engine.load_limit", alert.load_limit as u64)?;

        check_one_of("storage.backend", &self.storage.backend, &["sqlite", "file", "memory"])?;
        if self.storage.backend != "memory" && self.storage.path.is_empty() {
            return Err(invalid(
                "storage.path",
                "must not be empty for the sqlite and file backends",
            ));
        }

        for device in &self.device_directory.devices {
            if device.key.is_empty() {
                return Err(invalid("device_directory.devices", "device key must not be empty"));
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(invalid("metrics.port", "must be greater than 0"));
            }
            if !self.metrics.endpoint.starts_with('/') {
                return Err(invalid("metrics.endpoint", "must start with '/'"));
            }
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
    /// PID 파일 경로
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/netsentry".to_owned(),
            pid_file: "/var/run/netsentry.pid".to_owned(),
        }
    }
}

/// 트래픽 분석 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficAnalyzerConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수집 대상 인터페이스 (인터페이스마다 수집 워커 1개)
    pub interfaces: Vec<String>,
    /// 수집 방식 (synthetic)
    pub capture_mode: String,
    /// 합성 패킷 생성 속도 (패킷/초)
    pub synthetic_packets_per_second: u64,
    /// 수집 큐 용량
    pub queue_capacity: usize,
    /// 큐 대기 최대 시간 (밀리초)
    pub dequeue_poll_ms: u64,
    /// 로컬 네트워크 CIDR 목록
    pub local_networks: Vec<String>,
    /// 전송률 계산 윈도우 (초)
    pub rate_window_secs: u64,
    /// top talker 추적 최대 호스트 수
    pub max_tracked_hosts: usize,
    /// 세션 유휴 타임아웃 (초)
    pub session_timeout_secs: u64,
    /// 세션 정리 주기 (초)
    pub session_sweep_interval_secs: u64,
    /// 최대 세션 수
    pub max_sessions: usize,
}

impl TrafficAnalyzerConfig {
    /// 로컬 네트워크 판별기를 생성합니다.
    pub fn local_network(&self) -> Result<LocalNetwork, ConfigError> {
        LocalNetwork::parse(&self.local_networks)
    }
}

impl Default for TrafficAnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interfaces: vec!["eth0".to_owned(), "wlan0".to_owned()],
            capture_mode: "synthetic".to_owned(),
            synthetic_packets_per_second: 10,
            queue_capacity: 10_000,
            dequeue_poll_ms: 1_000,
            local_networks: vec!["192.168.0.0/24".to_owned()],
            rate_window_secs: 5,
            max_tracked_hosts: 10_000,
            session_timeout_secs: 300,
            session_sweep_interval_secs: 60,
            max_sessions: 100_000,
        }
    }
}

/// 시그니처 탐지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureDetectionConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 규칙 파일 경로
    pub rules_path: String,
    /// 규칙 갱신 주기 (시간)
    pub rule_update_interval_hours: u64,
    /// 규칙 다운로드 URL 목록
    pub rule_sources: Vec<String>,
    /// 보관할 백업 파일 수
    pub max_backups: usize,
    /// 규칙 다운로드 타임아웃 (초)
    pub fetch_timeout_secs: u64,
}

impl Default for SignatureDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules_path: "/var/lib/netsentry/signatures/netsentry.rules".to_owned(),
            rule_update_interval_hours: 24,
            rule_sources: Vec::new(),
            max_backups: 5,
            fetch_timeout_secs: 30,
        }
    }
}

/// 이상 탐지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyDetectionConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 이상 판정 임계값 (점수가 이 값을 초과하면 이상)
    pub detection_threshold: f64,
    /// 베이스라인 노화 주기 (시간)
    pub baseline_update_interval_hours: u64,
    /// 장치별 행동 샘플 집계 구간 (초)
    pub sample_window_secs: u64,
    /// 트래픽 편차 배수 (평균 대비)
    pub traffic_deviation_factor: f64,
    /// 트래픽 편차 가중치
    pub traffic_weight: f64,
    /// 새 목적지 가중치
    pub new_domain_weight: f64,
    /// 비정상 포트 가중치
    pub unusual_port_weight: f64,
}

impl Default for AnomalyDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detection_threshold: 0.95,
            baseline_update_interval_hours: 24,
            sample_window_secs: 60,
            traffic_deviation_factor: 2.0,
            traffic_weight: 0.5,
            new_domain_weight: 0.3,
            unusual_port_weight: 0.2,
        }
    }
}

/// 알림 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertEngineConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수용할 심각도 목록
    pub alert_levels: Vec<String>,
    /// 알림 전송 방식 (log, web)
    pub notification_methods: Vec<String>,
    /// 시간당 최대 알림 수
    pub max_alerts_per_hour: u32,
    /// 알림 보존 기간 (일)
    pub retention_days: u32,
    /// 보존 기간 정리 주기 (시간)
    pub cleanup_interval_hours: u64,
    /// 중복 억제 구간 (초, 0이면 비활성)
    pub dedup_window_secs: u64,
    /// 시작 시 불러올 최대 알림 수
    pub load_limit: usize,
}

impl AlertEngineConfig {
    /// 수용할 심각도 목록 (알 수 없는 이름은 무시)
    pub fn accepted_severities(&self) -> Vec<Severity> {
        self.alert_levels
            .iter()
            .filter_map(|s| Severity::from_str_loose(s))
            .collect()
    }
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alert_levels: Severity::ALL.iter().map(|s| s.as_str().to_owned()).collect(),
            notification_methods: vec!["log".to_owned(), "web".to_owned()],
            max_alerts_per_hour: 100,
            retention_days: 30,
            cleanup_interval_hours: 24,
            dedup_window_secs: 0,
            load_limit: 1_000,
        }
    }
}

/// 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 백엔드 (sqlite, file, memory)
    pub backend: String,
    /// 저장소 디렉토리. sqlite는 이 아래 `netsentry.db`를 사용합니다.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_owned(),
            path: "/var/lib/netsentry/store".to_owned(),
        }
    }
}

/// 위협 인텔리전스 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatIntelConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 알려진 악성 지표 (IP 또는 CIDR)
    pub indicators: Vec<String>,
}

impl Default for ThreatIntelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            indicators: Vec::new(),
        }
    }
}

/// 장치 디렉토리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDirectoryConfig {
    /// 로컬 네트워크 주소를 장치로 자동 등록할지 여부
    pub auto_register_local: bool,
    /// 명시적으로 등록된 장치
    pub devices: Vec<DeviceEntry>,
}

impl Default for DeviceDirectoryConfig {
    fn default() -> Self {
        Self {
            auto_register_local: true,
            devices: Vec::new(),
        }
    }
}

/// 장치 한 대 (키는 MAC 또는 IP)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub key: String,
    #[serde(default)]
    pub name: String,
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 노출 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 로딩/오버라이드 헬퍼 ---

async fn read_config_file(path: &Path) -> Result<String, NetsentryError> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            NetsentryError::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            })
        } else {
            NetsentryError::Io(e)
        }
    })
}

/// `NETSENTRY__ALERT_ENGINE__MAX_ALERTS_PER_HOUR` → `alert_engine.max_alerts_per_hour`
fn env_key_to_path(key: &str) -> Option<String> {
    let rest = key.strip_prefix(ENV_PREFIX)?;
    if rest.is_empty() {
        return None;
    }
    Some(
        rest.split("__")
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("."),
    )
}

/// `section.field=value` 식을 경로와 값으로 나눕니다.
fn split_override(expr: &str) -> Result<(&str, &str), ConfigError> {
    match expr.split_once('=') {
        Some((path, value)) if !path.trim().is_empty() => Ok((path.trim(), value.trim())),
        _ => Err(ConfigError::InvalidOverride {
            expr: expr.to_owned(),
            reason: "expected section.field=value".to_owned(),
        }),
    }
}

/// 원시 값을 TOML 리터럴로 해석합니다.
///
/// 리터럴이 아니면 쉼표 목록은 문자열 배열, 그 밖에는 문자열이 됩니다.
fn parse_override_value(raw: &str) -> toml::Value {
    let wrapped = format!("v = {raw}");
    if let Some(value) = toml::from_str::<toml::Table>(&wrapped)
        .ok()
        .and_then(|mut table| table.remove("v"))
    {
        return value;
    }
    if raw.contains(',') {
        return toml::Value::Array(
            raw.split(',')
                .map(|s| toml::Value::String(s.trim().to_owned()))
                .collect(),
        );
    }
    toml::Value::String(raw.to_owned())
}

fn apply_override(table: &mut toml::Table, path: &str, raw: &str) -> Result<(), ConfigError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::InvalidOverride {
            expr: format!("{path}={raw}"),
            reason: "empty path segment".to_owned(),
        });
    }

    let (leaf, parents) = match segments.split_last() {
        Some(split) => split,
        None => {
            return Err(ConfigError::InvalidOverride {
                expr: format!("{path}={raw}"),
                reason: "empty path".to_owned(),
            });
        }
    };

    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        current = match entry {
            toml::Value::Table(inner) => inner,
            _ => {
                return Err(ConfigError::InvalidOverride {
                    expr: format!("{path}={raw}"),
                    reason: format!("'{segment}' is not a section"),
                });
            }
        };
    }
    current.insert(leaf.to_string(), parse_override_value(raw));
    Ok(())
}

fn invalid(field: &str, reason: &str) -> NetsentryError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.to_owned(),
    }
    .into()
}

fn check_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), NetsentryError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, &format!("must be one of: {}", allowed.join(", "))))
    }
}

fn check_positive(field: &str, value: u64) -> Result<(), NetsentryError> {
    if value == 0 {
        Err(invalid(field, "must be greater than 0"))
    } else {
        Ok(())
    }
}

/// `1..=max` 범위 검사. 시간 값은 날짜 연산이 넘치지 않도록 상한을 둡니다.
fn check_range(field: &str, value: u64, max: u64) -> Result<(), NetsentryError> {
    check_positive(field, value)?;
    if value > max {
        Err(invalid(field, &format!("must be at most {max}")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    #[test]
    fn default_config_has_sane_values() {
        let config = NetsentryConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.traffic_analyzer.interfaces, vec!["eth0", "wlan0"]);
        assert_eq!(config.traffic_analyzer.queue_capacity, 10_000);
        assert_eq!(config.traffic_analyzer.session_timeout_secs, 300);
        assert_eq!(config.signature_detection.max_backups, 5);
        assert!((config.anomaly_detection.detection_threshold - 0.95).abs() < f64::EPSILON);
        assert_eq!(config.alert_engine.max_alerts_per_hour, 100);
        assert_eq!(config.alert_engine.retention_days, 30);
        assert_eq!(config.alert_engine.dedup_window_secs, 0);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        NetsentryConfig::default().validate().unwrap();
    }

    #[test]
    fn default_accepts_all_severities() {
        let config = AlertEngineConfig::default();
        assert_eq!(config.accepted_severities(), Severity::ALL.to_vec());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config = NetsentryConfig::parse("").unwrap();
        assert_eq!(config.storage.backend, "sqlite");
        assert_eq!(config.traffic_analyzer.local_networks, vec!["192.168.0.0/24"]);
    }

    #[test]
    fn partial_toml_merges_with_defaults() {
        let toml = r#"
[alert_engine]
max_alerts_per_hour = 5

[traffic_analyzer]
interfaces = ["ens3"]
"#;
        let config = NetsentryConfig::parse(toml).unwrap();
        assert_eq!(config.alert_engine.max_alerts_per_hour, 5);
        assert_eq!(config.alert_engine.retention_days, 30);
        assert_eq!(config.traffic_analyzer.interfaces, vec!["ens3"]);
        assert_eq!(config.traffic_analyzer.queue_capacity, 10_000);
    }

    #[test]
    fn invalid_toml_returns_parse_error() {
        let err = NetsentryConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            NetsentryError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn cli_override_sets_nested_value() {
        let overrides = vec![
            "alert_engine.max_alerts_per_hour=7".to_owned(),
            "general.log_level=debug".to_owned(),
            "anomaly_detection.detection_threshold=0.5".to_owned(),
        ];
        let config = NetsentryConfig::parse_with_overrides("", no_env(), &overrides).unwrap();
        assert_eq!(config.alert_engine.max_alerts_per_hour, 7);
        assert_eq!(config.general.log_level, "debug");
        assert!((config.anomaly_detection.detection_threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cli_override_beats_env_and_file() {
        let toml = "[alert_engine]\nretention_days = 10\n";
        let env = vec![(
            "NETSENTRY__ALERT_ENGINE__RETENTION_DAYS".to_owned(),
            "20".to_owned(),
        )];
        let only_env = NetsentryConfig::parse_with_overrides(toml, env.clone(), &[]).unwrap();
        assert_eq!(only_env.alert_engine.retention_days, 20);

        let cli = vec!["alert_engine.retention_days=40".to_owned()];
        let both = NetsentryConfig::parse_with_overrides(toml, env, &cli).unwrap();
        assert_eq!(both.alert_engine.retention_days, 40);
    }

    #[test]
    fn env_override_ignores_other_variables() {
        let env = vec![
            ("PATH".to_owned(), "/usr/bin".to_owned()),
            ("NETSENTRY_".to_owned(), "x".to_owned()),
        ];
        let config = NetsentryConfig::parse_with_overrides("", env, &[]).unwrap();
        assert_eq!(config.general.log_level, "info");
    }

    #[test]
    fn override_value_parsing() {
        assert_eq!(parse_override_value("42"), toml::Value::Integer(42));
        assert_eq!(parse_override_value("true"), toml::Value::Boolean(true));
        assert_eq!(
            parse_override_value("eth1"),
            toml::Value::String("eth1".to_owned())
        );
        assert_eq!(
            parse_override_value("127.0.0.1"),
            toml::Value::String("127.0.0.1".to_owned())
        );
        assert_eq!(
            parse_override_value("eth0, eth1"),
            toml::Value::Array(vec![
                toml::Value::String("eth0".to_owned()),
                toml::Value::String("eth1".to_owned()),
            ])
        );
    }

    #[test]
    fn csv_override_fills_list_field() {
        let cli = vec!["traffic_analyzer.interfaces=eth1,eth2".to_owned()];
        let config = NetsentryConfig::parse_with_overrides("", no_env(), &cli).unwrap();
        assert_eq!(config.traffic_analyzer.interfaces, vec!["eth1", "eth2"]);
    }

    #[test]
    fn malformed_override_is_rejected() {
        for expr in ["no_equals_sign", "=value", "general..log_level=debug"] {
            let err = NetsentryConfig::parse_with_overrides("", no_env(), &[expr.to_owned()])
                .unwrap_err();
            assert!(
                matches!(err, NetsentryError::Config(ConfigError::InvalidOverride { .. })),
                "expected InvalidOverride for {expr}"
            );
        }
    }

    #[test]
    fn override_through_scalar_is_rejected() {
        let cli = vec!["general.log_level.inner=1".to_owned()];
        let err = NetsentryConfig::parse_with_overrides("", no_env(), &cli).unwrap_err();
        assert!(err.to_string().contains("not a section"));
    }

    #[test]
    fn override_with_wrong_type_fails_to_parse() {
        let cli = vec!["alert_engine.max_alerts_per_hour=lots".to_owned()];
        let err = NetsentryConfig::parse_with_overrides("", no_env(), &cli).unwrap_err();
        assert!(matches!(
            err,
            NetsentryError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn normalize_clamps_threshold() {
        let mut config = NetsentryConfig::default();
        config.anomaly_detection.detection_threshold = 1.7;
        config.normalize();
        assert!((config.anomaly_detection.detection_threshold - 1.0).abs() < f64::EPSILON);

        config.anomaly_detection.detection_threshold = -0.2;
        config.normalize();
        assert!(config.anomaly_detection.detection_threshold.abs() < f64::EPSILON);
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = NetsentryConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("general.log_level"));
    }

    #[test]
    fn validate_rejects_zero_queue_capacity() {
        let mut config = NetsentryConfig::default();
        config.traffic_analyzer.queue_capacity = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn validate_rejects_bad_cidr() {
        let mut config = NetsentryConfig::default();
        config.traffic_analyzer.local_networks = vec!["not-a-cidr".to_owned()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("local_networks"));
    }

    #[test]
    fn validate_rejects_unknown_alert_level() {
        let mut config = NetsentryConfig::default();
        config.alert_engine.alert_levels = vec!["info".to_owned()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("alert_levels"));
    }

    #[test]
    fn validate_rejects_unknown_notification_method() {
        let mut config = NetsentryConfig::default();
        config.alert_engine.notification_methods = vec!["pager".to_owned()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("notification_methods"));
    }

    #[test]
    fn validate_rejects_nan_threshold() {
        let mut config = NetsentryConfig::default();
        config.anomaly_detection.detection_threshold = f64::NAN;
        config.normalize();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_storage_backend() {
        let mut config = NetsentryConfig::default();
        config.storage.backend = "postgres".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("storage.backend"));
    }

    #[test]
    fn validate_rejects_unbounded_retention() {
        let config = NetsentryConfig::parse_with_overrides(
            "",
            no_env(),
            &["alert_engine.retention_days=4294967295".to_owned()],
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("alert_engine.retention_days"));

        let mut config = NetsentryConfig::default();
        config.alert_engine.retention_days = 36_500;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_oversized_time_windows() {
        let cases: [(&str, fn(&mut NetsentryConfig)); 5] = [
            ("rate_window_secs", |c| c.traffic_analyzer.rate_window_secs = 10_000_000_000_000),
            ("session_timeout_secs", |c| c.traffic_analyzer.session_timeout_secs = u64::MAX),
            ("rule_update_interval_hours", |c| {
                c.signature_detection.rule_update_interval_hours = u64::MAX;
            }),
            ("baseline_update_interval_hours", |c| {
                c.anomaly_detection.baseline_update_interval_hours = 8_761;
            }),
            ("dedup_window_secs", |c| c.alert_engine.dedup_window_secs = u64::MAX),
        ];
        for (field, apply) in cases {
            let mut config = NetsentryConfig::default();
            apply(&mut config);
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn validate_checks_metrics_only_when_enabled() {
        let mut config = NetsentryConfig::default();
        config.metrics.endpoint = "metrics".to_owned();
        config.validate().unwrap();
        config.metrics.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = NetsentryConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = NetsentryConfig::parse(&toml_str).unwrap();
        assert_eq!(config.general.data_dir, parsed.general.data_dir);
        assert_eq!(
            config.signature_detection.rules_path,
            parsed.signature_detection.rules_path
        );
        assert_eq!(config.alert_engine.alert_levels, parsed.alert_engine.alert_levels);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = NetsentryConfig::from_file("/nonexistent/path/netsentry.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetsentryError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
