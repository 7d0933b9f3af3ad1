//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 모든 크레이트가 공유하는 데이터 구조를 정의합니다.
//! 패킷 레코드는 수집 단계에서 한 번 생성된 뒤 파이프라인을 따라 값으로 이동하고,
//! 알림 레코드는 `netsentry-detection`의 알림 엔진만 변경합니다.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Protocol ────────────────────────────────────────────────────────

/// 패킷 프로토콜 태그
///
/// 직렬화 시 대문자 문자열(`"TCP"`, `"UDP"` ...)로 표현됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Arp,
    /// 그 밖의 프로토콜 (대문자로 정규화된 이름)
    Other(String),
}

impl Protocol {
    /// 문자열에서 프로토콜을 파싱합니다 (대소문자 무시).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Self::Tcp,
            "UDP" => Self::Udp,
            "ICMP" => Self::Icmp,
            "ARP" => Self::Arp,
            other => Self::Other(other.to_owned()),
        }
    }

    /// 정규화된 프로토콜 이름
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Icmp => "ICMP",
            Self::Arp => "ARP",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_owned()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── TcpFlags ────────────────────────────────────────────────────────

/// TCP 플래그 비트마스크
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;

    const NAMES: [(u8, &'static str); 8] = [
        (Self::FIN, "FIN"),
        (Self::SYN, "SYN"),
        (Self::RST, "RST"),
        (Self::PSH, "PSH"),
        (Self::ACK, "ACK"),
        (Self::URG, "URG"),
        (Self::ECE, "ECE"),
        (Self::CWR, "CWR"),
    ];

    /// 지정한 플래그가 모두 설정되어 있는지 확인합니다.
    pub fn contains(self, mask: u8) -> bool {
        self.0 & mask == mask
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(", "))
    }
}

// ─── PacketRecord ────────────────────────────────────────────────────

/// 전송 계층별 부가 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportDetail {
    /// 부가 정보 없음
    #[default]
    None,
    Tcp {
        flags: TcpFlags,
        seq: u32,
        ack: u32,
    },
    Udp {
        length: u16,
    },
    Icmp {
        icmp_type: u8,
        code: u8,
    },
}

/// 관측된 패킷 한 개의 불변 스냅샷
///
/// 수집 시 한 번 생성되며 이후 읽기 전용입니다.
/// IP 계층이 없는 프레임(예: 순수 L2)은 `src_ip`/`dst_ip`가 `None`입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// 캡처 시각
    pub timestamp: DateTime<Utc>,
    /// 출발지 MAC (없으면 빈 문자열)
    pub src_mac: String,
    /// 목적지 MAC (없으면 빈 문자열)
    pub dst_mac: String,
    /// 출발지 IP
    pub src_ip: Option<IpAddr>,
    /// 목적지 IP
    pub dst_ip: Option<IpAddr>,
    /// 출발지 포트
    pub src_port: u16,
    /// 목적지 포트
    pub dst_port: u16,
    /// 프로토콜
    pub protocol: Protocol,
    /// 전체 패킷 크기 (바이트)
    pub size: u64,
    /// 페이로드 크기 (바이트)
    pub payload_size: u64,
    /// 전송 계층 부가 정보
    pub transport: TransportDetail,
}

impl PacketRecord {
    /// 현재 시각으로 최소 레코드를 생성합니다.
    pub fn new(protocol: Protocol, size: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            src_mac: String::new(),
            dst_mac: String::new(),
            src_ip: None,
            dst_ip: None,
            src_port: 0,
            dst_port: 0,
            protocol,
            size,
            payload_size: 0,
            transport: TransportDetail::None,
        }
    }

    /// IP/포트 엔드포인트를 설정합니다.
    pub fn with_endpoints(mut self, src: IpAddr, src_port: u16, dst: IpAddr, dst_port: u16) -> Self {
        self.src_ip = Some(src);
        self.src_port = src_port;
        self.dst_ip = Some(dst);
        self.dst_port = dst_port;
        self
    }

    /// MAC 주소를 설정합니다.
    pub fn with_macs(mut self, src: impl Into<String>, dst: impl Into<String>) -> Self {
        self.src_mac = src.into();
        self.dst_mac = dst.into();
        self
    }

    /// 캡처 시각을 설정합니다.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 전송 계층 부가 정보를 설정합니다.
    pub fn with_transport(mut self, transport: TransportDetail) -> Self {
        self.transport = transport;
        self
    }
}

impl fmt::Display for PacketRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let src = self.src_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_owned());
        let dst = self.dst_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_owned());
        write!(
            f,
            "{}:{} -> {}:{} proto={} size={}",
            src, self.src_port, dst, self.dst_port, self.protocol, self.size,
        )
    }
}

// ─── Severity ────────────────────────────────────────────────────────

/// 심각도 레벨
///
/// `Ord` 구현으로 비교가 가능합니다 (`Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 낮은 심각도
    Low,
    /// 중간 심각도 (규칙에 명시가 없을 때의 기본값)
    #[default]
    Medium,
    /// 높은 심각도
    High,
    /// 치명적 — 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 모든 심각도 (오름차순)
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 소문자 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Alert ───────────────────────────────────────────────────────────

/// 알림 생명주기 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    #[default]
    New,
    Acknowledged,
    Resolved,
    Closed,
}

impl AlertStatus {
    pub const ALL: [AlertStatus; 4] = [Self::New, Self::Acknowledged, Self::Resolved, Self::Closed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 상태 전이 기록 한 건
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertTransition {
    /// 전이 후 상태
    pub status: AlertStatus,
    /// 전이를 수행한 주체
    pub actor: String,
    /// 전이 시각
    pub at: DateTime<Utc>,
}

/// 보안 알림
///
/// 탐지 이벤트 한 건의 기록입니다. 상태 전이마다 주체와 시각을 남기며,
/// 변경될 때마다 즉시 저장소에 기록됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// 알림 ID (`alert_<초>_<밀리초><순번>`)
    pub id: String,
    /// 생성 시각
    pub timestamp: DateTime<Utc>,
    /// 알림 유형 (`signature`, `anomaly`, `threat_intel` ...)
    pub alert_type: String,
    /// 심각도
    pub severity: Severity,
    /// 발생 출처 (주소, 장치 키 등)
    pub source: String,
    /// 사람이 읽을 설명
    pub description: String,
    /// 구조화된 상세 정보
    #[serde(default)]
    pub details: serde_json::Value,
    /// 현재 상태
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_by: Option<String>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// 상태 전이 이력 (생성 포함, 시간순)
    #[serde(default)]
    pub history: Vec<AlertTransition>,
}

impl Alert {
    /// 상태를 덮어쓰고 주체/시각을 기록합니다.
    ///
    /// 전이 순서는 검사하지 않습니다.
    pub fn transition(&mut self, status: AlertStatus, actor: &str, at: DateTime<Utc>) {
        match status {
            AlertStatus::New => {}
            AlertStatus::Acknowledged => {
                self.acknowledged_by = Some(actor.to_owned());
                self.acknowledged_at = Some(at);
            }
            AlertStatus::Resolved => {
                self.resolved_by = Some(actor.to_owned());
                self.resolved_at = Some(at);
            }
            AlertStatus::Closed => {
                self.closed_by = Some(actor.to_owned());
                self.closed_at = Some(at);
            }
        }
        self.status = status;
        self.history.push(AlertTransition {
            status,
            actor: actor.to_owned(),
            at,
        });
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} ({}, {})",
            self.severity, self.id, self.description, self.alert_type, self.status,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert() -> Alert {
        Alert {
            id: "alert_1_0010000".to_owned(),
            timestamp: Utc::now(),
            alert_type: "signature".to_owned(),
            severity: Severity::High,
            source: "192.168.0.2".to_owned(),
            description: "test".to_owned(),
            details: serde_json::json!({"rule_id": "1000001"}),
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
    fn severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_default_is_medium() {
        assert_eq!(Severity::default(), Severity::Medium);
    }

    #[test]
    fn severity_from_str_loose() {
        assert_eq!(Severity::from_str_loose("HIGH"), Some(Severity::High));
        assert_eq!(Severity::from_str_loose(" crit "), Some(Severity::Critical));
        assert_eq!(Severity::from_str_loose("info"), None);
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_string(&Severity::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn protocol_parse_is_case_insensitive() {
        assert_eq!(Protocol::parse("tcp"), Protocol::Tcp);
        assert_eq!(Protocol::parse("Udp"), Protocol::Udp);
        assert_eq!(Protocol::parse("gre"), Protocol::Other("GRE".to_owned()));
    }

    #[test]
    fn protocol_serde_uses_plain_string() {
        let json = serde_json::to_string(&Protocol::Icmp).unwrap();
        assert_eq!(json, "\"ICMP\"");
        let back: Protocol = serde_json::from_str("\"sctp\"").unwrap();
        assert_eq!(back, Protocol::Other("SCTP".to_owned()));
    }

    #[test]
    fn tcp_flags_display() {
        let flags = TcpFlags(TcpFlags::SYN | TcpFlags::ACK);
        assert_eq!(flags.to_string(), "SYN, ACK");
        assert!(flags.contains(TcpFlags::SYN));
        assert!(!flags.contains(TcpFlags::FIN));
        assert_eq!(TcpFlags::default().to_string(), "");
    }

    #[test]
    fn packet_display_without_ip() {
        let packet = PacketRecord::new(Protocol::Arp, 60);
        assert_eq!(packet.to_string(), "-:0 -> -:0 proto=ARP size=60");
    }

    #[test]
    fn alert_transition_records_actor_and_history() {
        let mut alert = sample_alert();
        let now = Utc::now();
        alert.transition(AlertStatus::Acknowledged, "alice", now);
        alert.transition(AlertStatus::Closed, "bob", now);

        assert_eq!(alert.status, AlertStatus::Closed);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("alice"));
        assert_eq!(alert.closed_by.as_deref(), Some("bob"));
        assert!(alert.resolved_by.is_none());
        assert_eq!(alert.history.len(), 2);
    }

    #[test]
    fn alert_transition_does_not_enforce_order() {
        let mut alert = sample_alert();
        let now = Utc::now();
        alert.transition(AlertStatus::Closed, "bob", now);
        alert.transition(AlertStatus::Resolved, "carol", now);
        assert_eq!(alert.status, AlertStatus::Resolved);
    }

    #[test]
    fn alert_json_roundtrip_keeps_details() {
        let alert = sample_alert();
        let json = serde_json::to_string(&alert).unwrap();
        let back: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alert);
        assert_eq!(back.details["rule_id"], "1000001");
    }
}
