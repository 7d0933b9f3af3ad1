//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `netsentry_`
//! - 모듈명: `traffic_`, `flow_`, `signature_`, `anomaly_`, `alert_`, `daemon_`
//! - 접미어: `_total` (counter), 없음 (gauge)

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 프로토콜 레이블 키 (TCP, UDP, ICMP, ARP ...)
pub const LABEL_PROTOCOL: &str = "protocol";

/// 심각도 레이블 키 (low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// 억제 사유 레이블 키 (disabled, severity, rate_limit, duplicate)
pub const LABEL_REASON: &str = "reason";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Traffic 메트릭 ────────────────────────────────────────────────

/// Traffic: 분석된 전체 패킷 수 (counter)
pub const TRAFFIC_PACKETS_TOTAL: &str = "netsentry_traffic_packets_total";

/// Traffic: 분석된 전체 바이트 수 (counter)
pub const TRAFFIC_BYTES_TOTAL: &str = "netsentry_traffic_bytes_total";

/// Traffic: 프로토콜별 패킷 수 (counter, label: protocol)
pub const TRAFFIC_PROTOCOL_PACKETS_TOTAL: &str = "netsentry_traffic_protocol_packets_total";

/// Traffic: 큐가 가득 차 드롭된 패킷 수 (counter)
pub const TRAFFIC_PACKETS_DROPPED_TOTAL: &str = "netsentry_traffic_packets_dropped_total";

/// Traffic: 초당 바이트 (gauge)
pub const TRAFFIC_BYTES_PER_SECOND: &str = "netsentry_traffic_bytes_per_second";

/// Traffic: 초당 패킷 (gauge)
pub const TRAFFIC_PACKETS_PER_SECOND: &str = "netsentry_traffic_packets_per_second";

/// Traffic: 수집 큐 깊이 (gauge)
pub const TRAFFIC_QUEUE_DEPTH: &str = "netsentry_traffic_queue_depth";

// ─── Flow 메트릭 ───────────────────────────────────────────────────

/// Flow: 활성 세션 수 (gauge)
pub const FLOW_ACTIVE_SESSIONS: &str = "netsentry_flow_active_sessions";

/// Flow: 유휴 시간 초과로 제거된 세션 수 (counter)
pub const FLOW_SESSIONS_EVICTED_TOTAL: &str = "netsentry_flow_sessions_evicted_total";

// ─── Signature 메트릭 ──────────────────────────────────────────────

/// Signature: 로드된 규칙 수 (gauge)
pub const SIGNATURE_RULES_LOADED: &str = "netsentry_signature_rules_loaded";

/// Signature: 규칙 매칭 수 (counter, label: severity)
pub const SIGNATURE_MATCHES_TOTAL: &str = "netsentry_signature_matches_total";

/// Signature: 규칙 갱신 시도 수 (counter, label: result)
pub const SIGNATURE_REFRESH_TOTAL: &str = "netsentry_signature_refresh_total";

// ─── Anomaly 메트릭 ────────────────────────────────────────────────

/// Anomaly: 평가한 행동 샘플 수 (counter)
pub const ANOMALY_SAMPLES_TOTAL: &str = "netsentry_anomaly_samples_total";

/// Anomaly: 이상으로 판정된 샘플 수 (counter)
pub const ANOMALY_DETECTED_TOTAL: &str = "netsentry_anomaly_detected_total";

/// Anomaly: 보유한 베이스라인 수 (gauge)
pub const ANOMALY_BASELINES: &str = "netsentry_anomaly_baselines";

// ─── Alert 메트릭 ──────────────────────────────────────────────────

/// Alert: 생성된 알림 수 (counter, label: severity)
pub const ALERT_CREATED_TOTAL: &str = "netsentry_alert_created_total";

/// Alert: 억제된 알림 수 (counter, label: reason)
pub const ALERT_SUPPRESSED_TOTAL: &str = "netsentry_alert_suppressed_total";

/// Alert: 보존 기간 초과로 삭제된 알림 수 (counter)
pub const ALERT_PURGED_TOTAL: &str = "netsentry_alert_purged_total";

/// Alert: 알림 전송 실패 수 (counter)
pub const ALERT_NOTIFY_FAILURES_TOTAL: &str = "netsentry_alert_notify_failures_total";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "netsentry_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "netsentry_daemon_build_info";

/// 정의된 모든 메트릭 이름
pub const ALL_METRIC_NAMES: [&str; 20] = [
    TRAFFIC_PACKETS_TOTAL,
    TRAFFIC_BYTES_TOTAL,
    TRAFFIC_PROTOCOL_PACKETS_TOTAL,
    TRAFFIC_PACKETS_DROPPED_TOTAL,
    TRAFFIC_BYTES_PER_SECOND,
    TRAFFIC_PACKETS_PER_SECOND,
    TRAFFIC_QUEUE_DEPTH,
    FLOW_ACTIVE_SESSIONS,
    FLOW_SESSIONS_EVICTED_TOTAL,
    SIGNATURE_RULES_LOADED,
    SIGNATURE_MATCHES_TOTAL,
    SIGNATURE_REFRESH_TOTAL,
    ANOMALY_SAMPLES_TOTAL,
    ANOMALY_DETECTED_TOTAL,
    ANOMALY_BASELINES,
    ALERT_CREATED_TOTAL,
    ALERT_SUPPRESSED_TOTAL,
    ALERT_PURGED_TOTAL,
    ALERT_NOTIFY_FAILURES_TOTAL,
    DAEMON_UPTIME_SECONDS,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Traffic
    describe_counter!(TRAFFIC_PACKETS_TOTAL, "Total number of packets analyzed");
    describe_counter!(TRAFFIC_BYTES_TOTAL, "Total bytes analyzed");
    describe_counter!(
        TRAFFIC_PROTOCOL_PACKETS_TOTAL,
        "Packets analyzed per protocol"
    );
    describe_counter!(
        TRAFFIC_PACKETS_DROPPED_TOTAL,
        "Packets dropped because the ingestion queue was full"
    );
    describe_gauge!(
        TRAFFIC_BYTES_PER_SECOND,
        "Throughput over the sliding rate window (bytes/sec)"
    );
    describe_gauge!(
        TRAFFIC_PACKETS_PER_SECOND,
        "Packet rate over the sliding rate window (packets/sec)"
    );
    describe_gauge!(TRAFFIC_QUEUE_DEPTH, "Packets waiting in the ingestion queue");

    // Flow
    describe_gauge!(FLOW_ACTIVE_SESSIONS, "Currently tracked flow sessions");
    describe_counter!(
        FLOW_SESSIONS_EVICTED_TOTAL,
        "Flow sessions evicted after the idle timeout"
    );

    // Signature
    describe_gauge!(SIGNATURE_RULES_LOADED, "Signature rules in the active rule set");
    describe_counter!(SIGNATURE_MATCHES_TOTAL, "Signature rule matches");
    describe_counter!(SIGNATURE_REFRESH_TOTAL, "Rule set refresh attempts");

    // Anomaly
    describe_counter!(ANOMALY_SAMPLES_TOTAL, "Behavior samples scored");
    describe_counter!(ANOMALY_DETECTED_TOTAL, "Behavior samples flagged as anomalous");
    describe_gauge!(ANOMALY_BASELINES, "Device behavior baselines held in memory");

    // Alert
    describe_counter!(ALERT_CREATED_TOTAL, "Alerts created");
    describe_counter!(ALERT_SUPPRESSED_TOTAL, "Alerts suppressed before creation");
    describe_counter!(ALERT_PURGED_TOTAL, "Alerts purged after the retention window");
    describe_counter!(
        ALERT_NOTIFY_FAILURES_TOTAL,
        "Notification sink delivery failures"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
    describe_gauge!(DAEMON_BUILD_INFO, "Build information (always 1)");
}
