//! 플로우 세션 테이블 — 양방향 플로우 상태 추적
//!
//! 세션 키는 방향과 무관한 (작은 엔드포인트, 큰 엔드포인트, 프로토콜) 튜플입니다.
//! 첫 패킷을 보낸 쪽이 initiator이며, initiator가 보낸 패킷은 outbound,
//! responder가 보낸 패킷은 inbound 카운터를 올립니다.
//!
//! 세션은 프로토콜 종료(TCP FIN 등)로 닫히지 않고 유휴 타임아웃으로만 제거됩니다.
//! 정리는 [`FlowSessionTable::sweep`]을 주기적으로 호출해 수행합니다.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use netsentry_core::metrics as m;
use netsentry_core::types::{PacketRecord, Protocol};
use serde::Serialize;
use tracing::debug;

/// IP + 포트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

/// 방향과 무관한 세션 키
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FlowKey {
    pub lower: Endpoint,
    pub upper: Endpoint,
    pub protocol: Protocol,
}

impl FlowKey {
    /// 두 엔드포인트를 정렬해 키를 만듭니다.
    pub fn new(a: Endpoint, b: Endpoint, protocol: Protocol) -> Self {
        let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
        Self {
            lower,
            upper,
            protocol,
        }
    }

    /// 패킷에서 키를 만듭니다. IP가 없으면 `None`.
    pub fn from_packet(packet: &PacketRecord) -> Option<Self> {
        let src = Endpoint {
            ip: packet.src_ip?,
            port: packet.src_port,
        };
        let dst = Endpoint {
            ip: packet.dst_ip?,
            port: packet.dst_port,
        };
        Some(Self::new(src, dst, packet.protocol.clone()))
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.lower, self.upper, self.protocol)
    }
}

/// 세션 생명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closed,
    Timeout,
}

/// 패킷 방향 (세션 initiator 기준)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    /// responder → initiator
    Inbound,
    /// initiator → responder
    Outbound,
}

/// 진행 중인 양방향 플로우
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSession {
    pub key: FlowKey,
    /// 첫 패킷의 출발지
    pub initiator: Endpoint,
    /// 첫 패킷의 목적지
    pub responder: Endpoint,
    pub src_mac: String,
    pub dst_mac: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub packets_in: u64,
    pub packets_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub state: SessionState,
}

impl FlowSession {
    fn open(key: FlowKey, initiator: Endpoint, responder: Endpoint, packet: &PacketRecord) -> Self {
        Self {
            key,
            initiator,
            responder,
            src_mac: packet.src_mac.clone(),
            dst_mac: packet.dst_mac.clone(),
            created_at: packet.timestamp,
            last_activity: packet.timestamp,
            packets_in: 0,
            packets_out: 0,
            bytes_in: 0,
            bytes_out: 0,
            state: SessionState::Active,
        }
    }

    fn record(&mut self, direction: FlowDirection, packet: &PacketRecord) {
        match direction {
            FlowDirection::Inbound => {
                self.packets_in += 1;
                self.bytes_in += packet.size;
            }
            FlowDirection::Outbound => {
                self.packets_out += 1;
                self.bytes_out += packet.size;
            }
        }
        // 순서가 뒤섞인 패킷이 last_activity를 되돌리지 않도록
        if packet.timestamp > self.last_activity {
            self.last_activity = packet.timestamp;
        }
    }

    /// 생성부터 마지막 활동까지의 시간
    pub fn duration(&self) -> chrono::TimeDelta {
        self.last_activity - self.created_at
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_in + self.bytes_out
    }

    pub fn total_packets(&self) -> u64 {
        self.packets_in + self.packets_out
    }
}

/// `observe` 결과
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// IP가 없거나 세션 한도를 넘어 추적하지 않음
    Untracked,
    /// 새 세션 생성 (첫 패킷은 outbound)
    Created { key: FlowKey },
    /// 기존 세션 갱신
    Updated { key: FlowKey, direction: FlowDirection },
}

/// 세션 테이블
pub struct FlowSessionTable {
    sessions: HashMap<FlowKey, FlowSession>,
    idle_timeout: chrono::TimeDelta,
    max_sessions: usize,
    overflow: u64,
    evicted: u64,
}

impl FlowSessionTable {
    pub fn new(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            idle_timeout: chrono::TimeDelta::from_std(idle_timeout)
                .unwrap_or(chrono::TimeDelta::MAX),
            max_sessions,
            overflow: 0,
            evicted: 0,
        }
    }

    /// 패킷을 세션에 반영합니다.
    pub fn observe(&mut self, packet: &PacketRecord) -> SessionUpdate {
        let Some(key) = FlowKey::from_packet(packet) else {
            return SessionUpdate::Untracked;
        };

        if let Some(session) = self.sessions.get_mut(&key) {
            let from = Endpoint {
                ip: packet.src_ip.unwrap_or(session.initiator.ip),
                port: packet.src_port,
            };
            let direction = if from == session.initiator {
                FlowDirection::Outbound
            } else {
                FlowDirection::Inbound
            };
            session.record(direction, packet);
            return SessionUpdate::Updated { key, direction };
        }

        if self.sessions.len() >= self.max_sessions {
            self.overflow += 1;
            if self.overflow.is_power_of_two() {
                tracing::warn!(
                    max_sessions = self.max_sessions,
                    untracked = self.overflow,
                    "session table full, new flows are not tracked"
                );
            }
            return SessionUpdate::Untracked;
        }

        let initiator = Endpoint {
            ip: packet.src_ip.unwrap_or(key.lower.ip),
            port: packet.src_port,
        };
        let responder = Endpoint {
            ip: packet.dst_ip.unwrap_or(key.upper.ip),
            port: packet.dst_port,
        };
        let mut session = FlowSession::open(key.clone(), initiator, responder, packet);
        session.record(FlowDirection::Outbound, packet);
        self.sessions.insert(key.clone(), session);
        metrics::gauge!(m::FLOW_ACTIVE_SESSIONS).set(self.sessions.len() as f64);

        SessionUpdate::Created { key }
    }

    /// 마지막 활동 후 유휴 타임아웃이 지난 세션을 제거하고 반환합니다.
    ///
    /// 반환된 세션의 상태는 `Timeout`입니다.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<FlowSession> {
        let timeout = self.idle_timeout;
        let expired: Vec<FlowKey> = self
            .sessions
            .iter()
            .filter(|(_, s)| now.signed_duration_since(s.last_activity) > timeout)
            .map(|(k, _)| k.clone())
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some(mut session) = self.sessions.remove(&key) {
                session.state = SessionState::Timeout;
                evicted.push(session);
            }
        }

        if !evicted.is_empty() {
            self.evicted += evicted.len() as u64;
            metrics::counter!(m::FLOW_SESSIONS_EVICTED_TOTAL).increment(evicted.len() as u64);
            debug!(
                evicted = evicted.len(),
                remaining = self.sessions.len(),
                "idle sessions evicted"
            );
        }
        metrics::gauge!(m::FLOW_ACTIVE_SESSIONS).set(self.sessions.len() as f64);
        evicted
    }

    /// 세션을 명시적으로 닫고 제거합니다.
    pub fn close(&mut self, key: &FlowKey) -> Option<FlowSession> {
        let mut session = self.sessions.remove(key)?;
        session.state = SessionState::Closed;
        metrics::gauge!(m::FLOW_ACTIVE_SESSIONS).set(self.sessions.len() as f64);
        Some(session)
    }

    /// 활성 세션 목록 (최근 활동 순)
    pub fn active_sessions(&self) -> Vec<FlowSession> {
        let mut sessions: Vec<FlowSession> = self
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Active)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        sessions
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowSession> {
        self.sessions.get(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 세션 한도 때문에 추적하지 못한 패킷 수
    pub fn overflow_count(&self) -> u64 {
        self.overflow
    }

    /// 지금까지 유휴 타임아웃으로 제거된 세션 수
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }
}

impl Default for FlowSessionTable {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 100_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn tcp(src: &str, sport: u16, dst: &str, dport: u16, size: u64) -> PacketRecord {
        PacketRecord::new(Protocol::Tcp, size).with_endpoints(ip(src), sport, ip(dst), dport)
    }

    #[test]
    fn key_is_direction_agnostic() {
        let a = FlowKey::from_packet(&tcp("10.0.0.1", 1234, "10.0.0.2", 80, 1)).unwrap();
        let b = FlowKey::from_packet(&tcp("10.0.0.2", 80, "10.0.0.1", 1234, 1)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "10.0.0.1:1234-10.0.0.2:80-TCP");
    }

    #[test]
    fn forward_and_reverse_share_one_session() {
        let mut table = FlowSessionTable::default();
        let created = table.observe(&tcp("192.168.0.2", 40000, "8.8.8.8", 443, 100));
        let SessionUpdate::Created { key } = created else {
            panic!("expected Created, got {created:?}");
        };

        let reply = table.observe(&tcp("8.8.8.8", 443, "192.168.0.2", 40000, 300));
        assert_eq!(
            reply,
            SessionUpdate::Updated {
                key: key.clone(),
                direction: FlowDirection::Inbound
            }
        );

        assert_eq!(table.len(), 1);
        let session = table.get(&key).unwrap();
        assert_eq!(session.packets_out, 1);
        assert_eq!(session.bytes_out, 100);
        assert_eq!(session.packets_in, 1);
        assert_eq!(session.bytes_in, 300);
        assert_eq!(session.initiator.ip, ip("192.168.0.2"));
        assert_eq!(session.total_bytes(), 400);
    }

    #[test]
    fn initiator_keeps_outbound_even_when_it_sorts_higher() {
        let mut table = FlowSessionTable::default();
        table.observe(&tcp("200.0.0.1", 5000, "10.0.0.1", 22, 10));
        let update = table.observe(&tcp("200.0.0.1", 5000, "10.0.0.1", 22, 10));
        assert!(matches!(
            update,
            SessionUpdate::Updated {
                direction: FlowDirection::Outbound,
                ..
            }
        ));
    }

    #[test]
    fn different_protocol_is_a_different_session() {
        let mut table = FlowSessionTable::default();
        table.observe(&tcp("10.0.0.1", 53, "10.0.0.2", 53, 10));
        let udp = PacketRecord::new(Protocol::Udp, 10).with_endpoints(
            ip("10.0.0.1"),
            53,
            ip("10.0.0.2"),
            53,
        );
        table.observe(&udp);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn packets_without_ip_are_untracked() {
        let mut table = FlowSessionTable::default();
        assert_eq!(
            table.observe(&PacketRecord::new(Protocol::Arp, 60)),
            SessionUpdate::Untracked
        );
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_evicts_idle_sessions() {
        let mut table = FlowSessionTable::new(Duration::from_secs(300), 10);
        let t0 = Utc::now();
        table.observe(&tcp("10.0.0.1", 1, "10.0.0.2", 2, 1).with_timestamp(t0));
        table.observe(
            &tcp("10.0.0.3", 1, "10.0.0.4", 2, 1).with_timestamp(t0 + TimeDelta::seconds(200)),
        );

        assert!(table.sweep(t0 + TimeDelta::seconds(300)).is_empty());

        let evicted = table.sweep(t0 + TimeDelta::seconds(301));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].state, SessionState::Timeout);
        assert_eq!(evicted[0].initiator.ip, ip("10.0.0.1"));
        assert_eq!(table.active_sessions().len(), 1);
        assert_eq!(table.evicted_count(), 1);
    }

    #[test]
    fn close_marks_closed_and_removes() {
        let mut table = FlowSessionTable::default();
        let SessionUpdate::Created { key } = table.observe(&tcp("10.0.0.1", 1, "10.0.0.2", 2, 1))
        else {
            panic!("expected Created");
        };
        let closed = table.close(&key).unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        assert!(table.get(&key).is_none());
        assert!(table.close(&key).is_none());
    }

    #[test]
    fn max_sessions_caps_new_flows() {
        let mut table = FlowSessionTable::new(Duration::from_secs(300), 1);
        table.observe(&tcp("10.0.0.1", 1, "10.0.0.2", 2, 1));
        assert_eq!(
            table.observe(&tcp("10.0.0.5", 1, "10.0.0.6", 2, 1)),
            SessionUpdate::Untracked
        );
        // 기존 플로우는 계속 갱신됨
        assert!(matches!(
            table.observe(&tcp("10.0.0.2", 2, "10.0.0.1", 1, 1)),
            SessionUpdate::Updated { .. }
        ));
        assert_eq!(table.overflow_count(), 1);
    }

    #[test]
    fn out_of_order_packet_does_not_rewind_activity() {
        let mut table = FlowSessionTable::default();
        let t0 = Utc::now();
        let SessionUpdate::Created { key } =
            table.observe(&tcp("10.0.0.1", 1, "10.0.0.2", 2, 1).with_timestamp(t0))
        else {
            panic!("expected Created");
        };
        table.observe(&tcp("10.0.0.2", 2, "10.0.0.1", 1, 1).with_timestamp(t0 - TimeDelta::seconds(5)));
        assert_eq!(table.get(&key).unwrap().last_activity, t0);
        assert_eq!(table.get(&key).unwrap().duration(), TimeDelta::zero());
    }
}
