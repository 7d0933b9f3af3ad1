//! 로컬 네트워크 판별
//!
//! 트래픽 방향(inbound/outbound) 분류와 장치 자동 등록에 사용됩니다.

use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;

use crate::error::ConfigError;

/// 모니터링 대상 로컬 네트워크 (CIDR 목록)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNetwork {
    networks: Vec<IpNetwork>,
}

impl LocalNetwork {
    /// CIDR 문자열 목록으로 생성합니다.
    pub fn parse<S: AsRef<str>>(cidrs: &[S]) -> Result<Self, ConfigError> {
        let networks = cidrs
            .iter()
            .map(|cidr| {
                IpNetwork::from_str(cidr.as_ref().trim()).map_err(|e| ConfigError::InvalidValue {
                    field: "traffic_analyzer.local_networks".to_owned(),
                    reason: format!("invalid CIDR '{}': {e}", cidr.as_ref()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    /// 주소가 로컬 네트워크에 속하는지 확인합니다.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(ip))
    }

    /// 등록된 네트워크 목록
    pub fn networks(&self) -> &[IpNetwork] {
        &self.networks
    }
}

impl Default for LocalNetwork {
    /// `192.168.0.0/24`
    fn default() -> Self {
        let networks = ipnetwork::Ipv4Network::new(std::net::Ipv4Addr::new(192, 168, 0, 0), 24)
            .map(IpNetwork::V4)
            .into_iter()
            .collect();
        Self { networks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn default_covers_192_168_0() {
        let net = LocalNetwork::default();
        assert!(net.contains(ip("192.168.0.1")));
        assert!(net.contains(ip("192.168.0.254")));
        assert!(!net.contains(ip("192.168.1.1")));
        assert!(!net.contains(ip("8.8.8.8")));
    }

    #[test]
    fn multiple_networks_and_ipv6() {
        let net = LocalNetwork::parse(&["10.0.0.0/8", "fd00::/8"]).unwrap();
        assert!(net.contains(ip("10.20.30.40")));
        assert!(net.contains(ip("fd12::1")));
        assert!(!net.contains(ip("192.168.0.1")));
        assert_eq!(net.networks().len(), 2);
    }

    #[test]
    fn invalid_cidr_is_rejected() {
        let err = LocalNetwork::parse(&["192.168.0.0/40"]).unwrap_err();
        assert!(err.to_string().contains("local_networks"));
    }
}
