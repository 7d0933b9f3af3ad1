//! 시그니처 규칙 데이터 구조
//!
//! 규칙은 파싱 후 불변이며, 매칭 카운터만 원자적으로 증가합니다.
//! 카운터는 `Arc`로 공유되므로 활성화 상태를 바꾼 복사본도 같은 카운터를 씁니다.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use netsentry_core::types::{PacketRecord, Protocol, Severity};
use serde::Serialize;

/// 주소 선택자 (`any`, IP, CIDR, `!` 부정)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSelector {
    Any,
    Network { network: IpNetwork, negated: bool },
}

impl AddressSelector {
    pub fn matches(&self, ip: Option<IpAddr>) -> bool {
        match self {
            Self::Any => true,
            Self::Network { network, negated } => {
                ip.is_some_and(|ip| network.contains(ip) != *negated)
            }
        }
    }
}

impl fmt::Display for AddressSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Network { network, negated } => {
                if *negated {
                    f.write_str("!")?;
                }
                write!(f, "{network}")
            }
        }
    }
}

/// 포트 선택자 (`any`, `N`, `N:M`, `!` 부정)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelector {
    Any,
    Range { low: u16, high: u16, negated: bool },
}

impl PortSelector {
    pub fn matches(&self, port: u16) -> bool {
        match self {
            Self::Any => true,
            Self::Range { low, high, negated } => (*low..=*high).contains(&port) != *negated,
        }
    }
}

impl fmt::Display for PortSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Range { low, high, negated } => {
                if *negated {
                    f.write_str("!")?;
                }
                if low == high {
                    write!(f, "{low}")
                } else {
                    write!(f, "{low}:{high}")
                }
            }
        }
    }
}

/// 규칙 헤더 (주소/포트/방향)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHeader {
    pub src: AddressSelector,
    pub src_port: PortSelector,
    pub dst: AddressSelector,
    pub dst_port: PortSelector,
    /// `<>` 규칙이면 역방향도 매칭
    pub bidirectional: bool,
}

impl RuleHeader {
    /// 모든 패킷에 매칭되는 헤더
    pub fn any() -> Self {
        Self {
            src: AddressSelector::Any,
            src_port: PortSelector::Any,
            dst: AddressSelector::Any,
            dst_port: PortSelector::Any,
            bidirectional: false,
        }
    }

    pub fn matches(&self, packet: &PacketRecord) -> bool {
        let forward = self.src.matches(packet.src_ip)
            && self.src_port.matches(packet.src_port)
            && self.dst.matches(packet.dst_ip)
            && self.dst_port.matches(packet.dst_port);
        if forward || !self.bidirectional {
            return forward;
        }
        self.src.matches(packet.dst_ip)
            && self.src_port.matches(packet.dst_port)
            && self.dst.matches(packet.src_ip)
            && self.dst_port.matches(packet.src_port)
    }
}

/// 시그니처 규칙
#[derive(Debug, Clone)]
pub struct SignatureRule {
    /// 규칙 ID (`sid`)
    pub id: String,
    /// 설명 (`msg`)
    pub description: String,
    pub severity: Severity,
    /// 대상 프로토콜 (비어 있으면 모든 프로토콜)
    pub protocols: Vec<Protocol>,
    pub header: RuleHeader,
    pub enabled: bool,
    /// 규칙 집합이 로드/교체된 시각
    pub last_updated: DateTime<Utc>,
    /// 원본 규칙 텍스트
    pub raw: String,
    matches: Arc<AtomicU64>,
}

impl SignatureRule {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        protocols: Vec<Protocol>,
        header: RuleHeader,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            severity,
            protocols,
            header,
            enabled: true,
            last_updated: Utc::now(),
            raw: raw.into(),
            matches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 프로토콜만 검사합니다.
    pub fn applies_to(&self, protocol: &Protocol) -> bool {
        self.protocols.is_empty() || self.protocols.contains(protocol)
    }

    /// 패킷이 규칙에 매칭되는지 검사합니다. 카운터는 바꾸지 않습니다.
    pub fn matches(&self, packet: &PacketRecord) -> bool {
        self.enabled && self.applies_to(&packet.protocol) && self.header.matches(packet)
    }

    pub fn match_count(&self) -> u64 {
        self.matches.load(Ordering::Relaxed)
    }

    pub(crate) fn record_match(&self) {
        self.matches.fetch_add(1, Ordering::Relaxed);
    }

    /// 활성화 상태만 바꾼 복사본 (카운터 공유)
    pub(crate) fn with_enabled(&self, enabled: bool) -> Self {
        let mut rule = self.clone();
        rule.enabled = enabled;
        rule
    }

    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            id: self.id.clone(),
            description: self.description.clone(),
            severity: self.severity,
            protocols: self.protocols.iter().map(|p| p.as_str().to_owned()).collect(),
            enabled: self.enabled,
            match_count: self.match_count(),
            last_updated: self.last_updated,
        }
    }
}

/// 직렬화 가능한 규칙 요약
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub description: String,
    pub severity: Severity,
    pub protocols: Vec<String>,
    pub enabled: bool,
    pub match_count: u64,
    pub last_updated: DateTime<Utc>,
}

/// 매칭 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub rule_id: String,
    pub description: String,
    pub severity: Severity,
}

/// 규칙 집합 (ID 유일, 로드 순서 유지)
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<SignatureRule>,
    index: HashMap<String, usize>,
    loaded_at: Option<DateTime<Utc>>,
}

impl RuleSet {
    /// 규칙 목록에서 집합을 만듭니다. 중복 ID는 먼저 나온 규칙이 남습니다.
    pub fn from_rules(rules: Vec<SignatureRule>) -> Self {
        let mut set = Self {
            rules: Vec::with_capacity(rules.len()),
            index: HashMap::with_capacity(rules.len()),
            loaded_at: Some(Utc::now()),
        };
        for rule in rules {
            set.insert(rule);
        }
        set
    }

    /// 규칙을 추가합니다. 이미 있는 ID면 `false`.
    pub fn insert(&mut self, rule: SignatureRule) -> bool {
        if self.index.contains_key(&rule.id) {
            return false;
        }
        self.index.insert(rule.id.clone(), self.rules.len());
        self.rules.push(rule);
        true
    }

    pub fn get(&self, id: &str) -> Option<&SignatureRule> {
        self.index.get(id).map(|&i| &self.rules[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignatureRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// 규칙 하나의 활성화 상태를 바꾼 새 집합을 반환합니다.
    ///
    /// ID가 없으면 `None`.
    pub(crate) fn with_rule_enabled(&self, id: &str, enabled: bool) -> Option<Self> {
        let &position = self.index.get(id)?;
        let mut next = self.clone();
        next.rules[position] = self.rules[position].with_enabled(enabled);
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn net(s: &str, negated: bool) -> AddressSelector {
        AddressSelector::Network {
            network: s.parse().unwrap(),
            negated,
        }
    }

    #[test]
    fn address_selector_cidr_and_negation() {
        let inside = net("10.0.0.0/8", false);
        assert!(inside.matches(Some(ip("10.1.2.3"))));
        assert!(!inside.matches(Some(ip("11.0.0.1"))));
        assert!(!inside.matches(None));

        let outside = net("10.0.0.0/8", true);
        assert!(outside.matches(Some(ip("11.0.0.1"))));
        assert!(!outside.matches(Some(ip("10.0.0.1"))));
        assert!(AddressSelector::Any.matches(None));
    }

    #[test]
    fn port_selector_range() {
        let web = PortSelector::Range {
            low: 80,
            high: 90,
            negated: false,
        };
        assert!(web.matches(80));
        assert!(web.matches(90));
        assert!(!web.matches(91));
        assert_eq!(web.to_string(), "80:90");

        let not_ssh = PortSelector::Range {
            low: 22,
            high: 22,
            negated: true,
        };
        assert!(!not_ssh.matches(22));
        assert!(not_ssh.matches(23));
        assert_eq!(not_ssh.to_string(), "!22");
    }

    #[test]
    fn bidirectional_header_matches_reverse() {
        let header = RuleHeader {
            src: net("192.168.0.0/24", false),
            src_port: PortSelector::Any,
            dst: AddressSelector::Any,
            dst_port: PortSelector::Range {
                low: 23,
                high: 23,
                negated: false,
            },
            bidirectional: true,
        };
        let forward = PacketRecord::new(Protocol::Tcp, 60).with_endpoints(
            ip("192.168.0.2"),
            40000,
            ip("5.5.5.5"),
            23,
        );
        let reverse = PacketRecord::new(Protocol::Tcp, 60).with_endpoints(
            ip("5.5.5.5"),
            23,
            ip("192.168.0.2"),
            40000,
        );
        assert!(header.matches(&forward));
        assert!(header.matches(&reverse));

        let one_way = RuleHeader {
            bidirectional: false,
            ..header
        };
        assert!(!one_way.matches(&reverse));
    }

    #[test]
    fn toggled_copy_shares_counter() {
        let rule = SignatureRule::new(
            "1",
            "test",
            Severity::Low,
            vec![Protocol::Tcp],
            RuleHeader::any(),
            "tcp any any -> any any (sid:1;)",
        );
        let disabled = rule.with_enabled(false);
        disabled.record_match();
        assert_eq!(rule.match_count(), 1);
        assert!(rule.enabled);
        assert!(!disabled.enabled);
    }

    #[test]
    fn rule_set_keeps_first_duplicate() {
        let a = SignatureRule::new("7", "first", Severity::Low, vec![], RuleHeader::any(), "");
        let b = SignatureRule::new("7", "second", Severity::High, vec![], RuleHeader::any(), "");
        let set = RuleSet::from_rules(vec![a, b]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("7").unwrap().description, "first");
    }
}
