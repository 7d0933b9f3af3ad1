//! 행동 샘플과 장치별 베이스라인

use std::collections::BTreeMap;

use chrono::{DateTime, Timelike, Utc};
use netsentry_core::types::PacketRecord;
use serde::{Deserialize, Serialize};

/// 한 시간대의 누적 트래픽
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyTraffic {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
}

impl HourlyTraffic {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_in + self.bytes_out
    }

    fn halve(&mut self) {
        self.bytes_in /= 2;
        self.bytes_out /= 2;
        self.packets_in /= 2;
        self.packets_out /= 2;
    }
}

/// 장치 하나의 집계 구간 동안의 행동
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorSample {
    /// 구간 시작 시각
    pub timestamp: DateTime<Utc>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
    /// 상대 엔드포인트(`ip:port`) → 패킷 수
    pub peers: BTreeMap<String, u64>,
    /// 목적지 → 패킷 수
    pub destinations: BTreeMap<String, u64>,
    /// 서비스 포트 → 패킷 수
    pub ports: BTreeMap<u16, u64>,
    /// 프로토콜 → 패킷 수
    pub protocols: BTreeMap<String, u64>,
}

impl BehaviorSample {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bytes_in: 0,
            bytes_out: 0,
            packets_in: 0,
            packets_out: 0,
            peers: BTreeMap::new(),
            destinations: BTreeMap::new(),
            ports: BTreeMap::new(),
            protocols: BTreeMap::new(),
        }
    }

    /// 장치가 보낸 패킷을 반영합니다.
    pub fn add_outbound(&mut self, packet: &PacketRecord) {
        self.bytes_out += packet.size;
        self.packets_out += 1;
        if let Some(dst) = packet.dst_ip {
            *self.destinations.entry(dst.to_string()).or_default() += 1;
            *self
                .peers
                .entry(format!("{dst}:{}", packet.dst_port))
                .or_default() += 1;
        }
        self.add_port(packet.dst_port);
        *self
            .protocols
            .entry(packet.protocol.as_str().to_owned())
            .or_default() += 1;
    }

    /// 장치가 받은 패킷을 반영합니다.
    ///
    /// 응답 패킷의 서비스 포트는 출발지 포트입니다.
    pub fn add_inbound(&mut self, packet: &PacketRecord) {
        self.bytes_in += packet.size;
        self.packets_in += 1;
        if let Some(src) = packet.src_ip {
            *self
                .peers
                .entry(format!("{src}:{}", packet.src_port))
                .or_default() += 1;
        }
        self.add_port(packet.src_port);
        *self
            .protocols
            .entry(packet.protocol.as_str().to_owned())
            .or_default() += 1;
    }

    fn add_port(&mut self, port: u16) {
        if port != 0 {
            *self.ports.entry(port).or_default() += 1;
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_in + self.bytes_out
    }

    pub fn is_empty(&self) -> bool {
        self.packets_in == 0 && self.packets_out == 0
    }
}

/// 장치별 정상 행동 프로파일
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorBaseline {
    pub device_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 반영된 샘플 수
    pub sample_count: u64,
    /// 0~23시 버킷
    pub traffic_by_hour: Vec<HourlyTraffic>,
    pub connection_patterns: BTreeMap<String, u64>,
    pub domain_visits: BTreeMap<String, u64>,
    pub port_usage: BTreeMap<u16, u64>,
    pub protocol_mix: BTreeMap<String, u64>,
}

impl BehaviorBaseline {
    /// 첫 샘플로 베이스라인을 만듭니다.
    pub fn from_sample(device_key: &str, sample: &BehaviorSample) -> Self {
        let mut baseline = Self {
            device_key: device_key.to_owned(),
            created_at: sample.timestamp,
            updated_at: sample.timestamp,
            sample_count: 0,
            traffic_by_hour: vec![HourlyTraffic::default(); 24],
            connection_patterns: BTreeMap::new(),
            domain_visits: BTreeMap::new(),
            port_usage: BTreeMap::new(),
            protocol_mix: BTreeMap::new(),
        };
        baseline.update(sample);
        baseline
    }

    /// 샘플을 누적합니다.
    pub fn update(&mut self, sample: &BehaviorSample) {
        // 역직렬화된 레코드의 버킷 수가 다를 수 있음
        self.traffic_by_hour.resize(24, HourlyTraffic::default());
        let hour = sample.timestamp.hour() as usize % 24;
        let bucket = &mut self.traffic_by_hour[hour];
        bucket.bytes_in += sample.bytes_in;
        bucket.bytes_out += sample.bytes_out;
        bucket.packets_in += sample.packets_in;
        bucket.packets_out += sample.packets_out;

        merge_counts(&mut self.connection_patterns, &sample.peers);
        merge_counts(&mut self.domain_visits, &sample.destinations);
        merge_counts(&mut self.port_usage, &sample.ports);
        merge_counts(&mut self.protocol_mix, &sample.protocols);

        self.sample_count += 1;
        if sample.timestamp > self.updated_at {
            self.updated_at = sample.timestamp;
        }
    }

    /// 샘플당 평균 바이트
    pub fn mean_bytes_per_sample(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        let total: u64 = self.traffic_by_hour.iter().map(HourlyTraffic::total_bytes).sum();
        total as f64 / self.sample_count as f64
    }

    pub fn has_destination(&self, destination: &str) -> bool {
        self.domain_visits.contains_key(destination)
    }

    pub fn has_port(&self, port: u16) -> bool {
        self.port_usage.contains_key(&port)
    }

    /// 모든 카운터를 절반으로 줄이고 0이 된 항목을 지웁니다.
    ///
    /// 오래된 행동의 비중을 낮춥니다. 샘플 수는 1 아래로 내려가지 않습니다.
    pub fn age(&mut self, now: DateTime<Utc>) {
        for bucket in &mut self.traffic_by_hour {
            bucket.halve();
        }
        halve_counts(&mut self.connection_patterns);
        halve_counts(&mut self.domain_visits);
        halve_counts(&mut self.port_usage);
        halve_counts(&mut self.protocol_mix);
        self.sample_count = (self.sample_count / 2).max(1);
        self.updated_at = now;
    }
}

fn merge_counts<K: Ord + Clone>(target: &mut BTreeMap<K, u64>, source: &BTreeMap<K, u64>) {
    for (key, count) in source {
        *target.entry(key.clone()).or_default() += count;
    }
}

fn halve_counts<K: Ord>(counts: &mut BTreeMap<K, u64>) {
    counts.retain(|_, count| {
        *count /= 2;
        *count > 0
    });
}
