//! 외부 협력자 경계 — 장치 디렉토리와 위협 인텔리전스
//!
//! 장치 탐색/핑거프린팅과 위협 피드 수집은 이 시스템 밖에서 이루어집니다.
//! 파이프라인은 아래 trait을 통해서만 그 결과를 조회합니다.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{DeviceDirectoryConfig, ThreatIntelConfig};
use crate::network::LocalNetwork;

/// 장치 참조
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    /// 베이스라인 키로 쓰이는 장치 식별자 (MAC 또는 IP)
    pub key: String,
    /// 표시 이름
    pub name: String,
}

/// 주소 키로 장치를 조회합니다.
pub trait DeviceDirectory: Send + Sync {
    /// `address_key`는 MAC 주소 또는 IP 주소 문자열입니다.
    fn lookup_device(&self, address_key: &str) -> Option<DeviceRef>;
}

/// 알려진 악성 지표를 조회합니다.
pub trait ThreatIntel: Send + Sync {
    fn is_known_malicious(&self, indicator: &str) -> bool;
}

// ─── StaticDeviceDirectory ───────────────────────────────────────────

/// 설정 기반 장치 디렉토리
///
/// 명시적으로 등록된 장치를 먼저 찾고, 없으면 `auto_register_local`일 때
/// 로컬 네트워크 안의 IP를 그 IP 자체를 키로 하는 장치로 취급합니다.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceDirectory {
    devices: HashMap<String, DeviceRef>,
    auto_register: Option<LocalNetwork>,
}

impl StaticDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 설정과 로컬 네트워크로 디렉토리를 구성합니다.
    pub fn from_config(config: &DeviceDirectoryConfig, local: &LocalNetwork) -> Self {
        let mut directory = Self::new();
        for entry in &config.devices {
            let name = if entry.name.is_empty() {
                entry.key.clone()
            } else {
                entry.name.clone()
            };
            directory.register(&entry.key, name);
        }
        if config.auto_register_local {
            directory.auto_register = Some(local.clone());
        }
        directory
    }

    /// 장치를 등록합니다. 키는 소문자로 정규화됩니다.
    pub fn register(&mut self, key: &str, name: impl Into<String>) {
        let key = key.trim().to_lowercase();
        self.devices.insert(
            key.clone(),
            DeviceRef {
                key,
                name: name.into(),
            },
        );
    }

    /// 등록된 장치 수 (자동 등록 제외)
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceDirectory for StaticDeviceDirectory {
    fn lookup_device(&self, address_key: &str) -> Option<DeviceRef> {
        let key = address_key.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }
        if let Some(device) = self.devices.get(&key) {
            return Some(device.clone());
        }
        let local = self.auto_register.as_ref()?;
        let ip = IpAddr::from_str(&key).ok()?;
        local.contains(ip).then(|| DeviceRef {
            key: key.clone(),
            name: key,
        })
    }
}

// ─── StaticThreatIntel ───────────────────────────────────────────────

/// 설정 기반 위협 인텔리전스
///
/// 지표는 정확히 일치하는 문자열 또는 CIDR 범위입니다.
#[derive(Debug, Clone, Default)]
pub struct StaticThreatIntel {
    exact: HashSet<String>,
    networks: Vec<IpNetwork>,
}

impl StaticThreatIntel {
    pub fn new<S: AsRef<str>>(indicators: &[S]) -> Self {
        let mut intel = Self::default();
        for raw in indicators {
            let indicator = raw.as_ref().trim();
            if indicator.is_empty() {
                continue;
            }
            if indicator.contains('/') {
                match IpNetwork::from_str(indicator) {
                    Ok(net) => intel.networks.push(net),
                    Err(e) => warn!(indicator, error = %e, "ignoring malformed CIDR indicator"),
                }
            } else {
                intel.exact.insert(indicator.to_lowercase());
            }
        }
        intel
    }

    /// 비활성화되어 있으면 빈 목록으로 생성합니다.
    pub fn from_config(config: &ThreatIntelConfig) -> Self {
        if config.enabled {
            Self::new(&config.indicators)
        } else {
            Self::default()
        }
    }

    /// 지표 수
    pub fn len(&self) -> usize {
        self.exact.len() + self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ThreatIntel for StaticThreatIntel {
    fn is_known_malicious(&self, indicator: &str) -> bool {
        let indicator = indicator.trim().to_lowercase();
        if self.exact.contains(&indicator) {
            return true;
        }
        match IpAddr::from_str(&indicator) {
            Ok(ip) => self.networks.iter().any(|net| net.contains(ip)),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceEntry;

    #[test]
    fn explicit_device_is_found_case_insensitively() {
        let config = DeviceDirectoryConfig {
            auto_register_local: false,
            devices: vec![DeviceEntry {
                key: "AA:BB:CC:DD:EE:FF".to_owned(),
                name: "laptop".to_owned(),
            }],
        };
        let dir = StaticDeviceDirectory::from_config(&config, &LocalNetwork::default());
        let device = dir.lookup_device("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(device.name, "laptop");
        assert_eq!(device.key, "aa:bb:cc:dd:ee:ff");
        assert!(dir.lookup_device("192.168.0.2").is_none());
    }

    #[test]
    fn auto_registration_covers_local_ips_only() {
        let dir = StaticDeviceDirectory::from_config(
            &DeviceDirectoryConfig::default(),
            &LocalNetwork::default(),
        );
        assert_eq!(
            dir.lookup_device("192.168.0.3").map(|d| d.key),
            Some("192.168.0.3".to_owned())
        );
        assert!(dir.lookup_device("8.8.8.8").is_none());
        assert!(dir.lookup_device("").is_none());
        assert!(dir.lookup_device("not-an-address").is_none());
    }

    #[test]
    fn unnamed_device_uses_key_as_name() {
        let config = DeviceDirectoryConfig {
            auto_register_local: false,
            devices: vec![DeviceEntry {
                key: "10.1.1.1".to_owned(),
                name: String::new(),
            }],
        };
        let dir = StaticDeviceDirectory::from_config(&config, &LocalNetwork::default());
        assert_eq!(dir.lookup_device("10.1.1.1").unwrap().name, "10.1.1.1");
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn threat_intel_matches_exact_and_cidr() {
        let intel = StaticThreatIntel::new(&["203.0.113.7", "198.51.100.0/24", "bad/cidr/x", ""]);
        assert_eq!(intel.len(), 2);
        assert!(intel.is_known_malicious("203.0.113.7"));
        assert!(intel.is_known_malicious("198.51.100.42"));
        assert!(!intel.is_known_malicious("8.8.8.8"));
        assert!(!intel.is_known_malicious("example.com"));
    }

    #[test]
    fn disabled_threat_intel_is_empty() {
        let config = ThreatIntelConfig {
            enabled: false,
            indicators: vec!["1.2.3.4".to_owned()],
        };
        let intel = StaticThreatIntel::from_config(&config);
        assert!(intel.is_empty());
        assert!(!intel.is_known_malicious("1.2.3.4"));
    }
}
