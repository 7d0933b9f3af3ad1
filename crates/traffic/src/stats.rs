//! 트래픽 통계 — 누적 카운터, 프로토콜 분포, top talker, 슬라이딩 윈도우 전송률
//!
//! [`StatisticsAggregator`]는 분석 워커가 패킷마다 [`record`](StatisticsAggregator::record)를
//! 호출해 갱신합니다.
//!
//! # 방향 분류
//! ```text
//! remote ──▶ local   inbound
//! local  ──▶ remote  outbound
//! 그 외              inbound/outbound 각각 0.5
//! ```
//!
//! # 전송률
//! 최근 `rate_window` 동안의 (시각, 크기) 샘플 합을
//! `max(윈도우 폭, 1초)`로 나눈 값입니다.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use netsentry_core::metrics as m;
use netsentry_core::network::LocalNetwork;
use netsentry_core::types::PacketRecord;
use serde::Serialize;

/// 분석 단위 하나의 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    Inbound,
    Outbound,
    /// 양쪽 모두 로컬이거나 모두 원격
    Split,
}

/// 전송률
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrafficRates {
    pub bytes_per_second: f64,
    pub packets_per_second: f64,
}

/// 호스트별 바이트 수
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostVolume {
    pub ip: IpAddr,
    pub bytes: u64,
}

/// 직렬화 가능한 통계 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficSnapshot {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub inbound_packets: f64,
    pub inbound_bytes: f64,
    pub outbound_packets: f64,
    pub outbound_bytes: f64,
    pub bytes_per_second: f64,
    pub packets_per_second: f64,
    pub protocols: BTreeMap<String, u64>,
    pub tracked_hosts: usize,
    pub untracked_hosts: u64,
}

/// 롤링 트래픽 통계
#[derive(Debug)]
pub struct StatisticsAggregator {
    local: LocalNetwork,
    window: TimeDelta,
    max_tracked_hosts: usize,

    total_packets: u64,
    total_bytes: u64,
    inbound_packets: f64,
    inbound_bytes: f64,
    outbound_packets: f64,
    outbound_bytes: f64,

    protocols: BTreeMap<String, u64>,
    talkers: HashMap<IpAddr, u64>,
    destinations: HashMap<IpAddr, u64>,
    untracked_hosts: u64,

    samples: VecDeque<(DateTime<Utc>, u64)>,
    window_bytes: u64,
}

impl StatisticsAggregator {
    pub fn new(local: LocalNetwork, rate_window: Duration, max_tracked_hosts: usize) -> Self {
        Self {
            local,
            window: TimeDelta::from_std(rate_window).unwrap_or(TimeDelta::MAX),
            max_tracked_hosts,
            total_packets: 0,
            total_bytes: 0,
            inbound_packets: 0.0,
            inbound_bytes: 0.0,
            outbound_packets: 0.0,
            outbound_bytes: 0.0,
            protocols: BTreeMap::new(),
            talkers: HashMap::new(),
            destinations: HashMap::new(),
            untracked_hosts: 0,
            samples: VecDeque::new(),
            window_bytes: 0,
        }
    }

    /// 패킷의 방향을 분류합니다.
    pub fn classify(&self, packet: &PacketRecord) -> TrafficDirection {
        let src_local = packet.src_ip.is_some_and(|ip| self.local.contains(ip));
        let dst_local = packet.dst_ip.is_some_and(|ip| self.local.contains(ip));
        match (src_local, dst_local) {
            (false, true) => TrafficDirection::Inbound,
            (true, false) => TrafficDirection::Outbound,
            _ => TrafficDirection::Split,
        }
    }

    /// 패킷 한 개를 반영합니다.
    pub fn record(&mut self, packet: &PacketRecord) {
        let size = packet.size;
        self.total_packets += 1;
        self.total_bytes += size;

        #[allow(clippy::cast_precision_loss)]
        let bytes = size as f64;
        match self.classify(packet) {
            TrafficDirection::Inbound => {
                self.inbound_packets += 1.0;
                self.inbound_bytes += bytes;
            }
            TrafficDirection::Outbound => {
                self.outbound_packets += 1.0;
                self.outbound_bytes += bytes;
            }
            TrafficDirection::Split => {
                self.inbound_packets += 0.5;
                self.outbound_packets += 0.5;
                self.inbound_bytes += bytes / 2.0;
                self.outbound_bytes += bytes / 2.0;
            }
        }

        let protocol = packet.protocol.as_str();
        match self.protocols.get_mut(protocol) {
            Some(count) => *count += 1,
            None => {
                self.protocols.insert(protocol.to_owned(), 1);
            }
        }

        if let Some(src) = packet.src_ip {
            self.bump_talker(src, size);
        }
        if let Some(dst) = packet.dst_ip {
            self.bump_talker(dst, size);
            self.bump_destination(dst, size);
        }

        self.samples.push_back((packet.timestamp, size));
        self.window_bytes += size;
        self.prune(packet.timestamp);

        metrics::counter!(m::TRAFFIC_PACKETS_TOTAL).increment(1);
        metrics::counter!(m::TRAFFIC_BYTES_TOTAL).increment(size);
        metrics::counter!(m::TRAFFIC_PROTOCOL_PACKETS_TOTAL, m::LABEL_PROTOCOL => protocol.to_owned())
            .increment(1);
    }

    fn bump_talker(&mut self, ip: IpAddr, size: u64) {
        if let Some(bytes) = self.talkers.get_mut(&ip) {
            *bytes += size;
        } else if self.talkers.len() < self.max_tracked_hosts {
            self.talkers.insert(ip, size);
        } else {
            self.untracked_hosts += 1;
        }
    }

    fn bump_destination(&mut self, ip: IpAddr, size: u64) {
        if let Some(bytes) = self.destinations.get_mut(&ip) {
            *bytes += size;
        } else if self.destinations.len() < self.max_tracked_hosts {
            self.destinations.insert(ip, size);
        }
    }

    /// `reference - window`보다 오래된 샘플을 제거합니다.
    fn prune(&mut self, reference: DateTime<Utc>) {
        let cutoff = reference
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        while let Some(&(ts, size)) = self.samples.front() {
            if ts >= cutoff {
                break;
            }
            self.samples.pop_front();
            self.window_bytes -= size;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn rates_at(&self, reference: DateTime<Utc>) -> TrafficRates {
        let Some(&(oldest, _)) = self.samples.front() else {
            return TrafficRates::default();
        };
        let span = (reference - oldest).max(TimeDelta::seconds(1));
        let secs = span.num_milliseconds() as f64 / 1000.0;
        TrafficRates {
            bytes_per_second: self.window_bytes as f64 / secs,
            packets_per_second: self.samples.len() as f64 / secs,
        }
    }

    /// 벽시계 기준 현재 전송률
    ///
    /// 트래픽이 멈추면 윈도우가 비워지면서 0으로 수렴합니다.
    pub fn current_rates(&mut self, now: DateTime<Utc>) -> TrafficRates {
        self.prune(now);
        let rates = self.rates_at(now);
        metrics::gauge!(m::TRAFFIC_BYTES_PER_SECOND).set(rates.bytes_per_second);
        metrics::gauge!(m::TRAFFIC_PACKETS_PER_SECOND).set(rates.packets_per_second);
        rates
    }

    /// 마지막 샘플 기준 전송률
    pub fn rates(&self) -> TrafficRates {
        match self.samples.back() {
            Some(&(newest, _)) => self.rates_at(newest),
            None => TrafficRates::default(),
        }
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        let rates = self.rates();
        TrafficSnapshot {
            total_packets: self.total_packets,
            total_bytes: self.total_bytes,
            inbound_packets: self.inbound_packets,
            inbound_bytes: self.inbound_bytes,
            outbound_packets: self.outbound_packets,
            outbound_bytes: self.outbound_bytes,
            bytes_per_second: rates.bytes_per_second,
            packets_per_second: rates.packets_per_second,
            protocols: self.protocols.clone(),
            tracked_hosts: self.talkers.len(),
            untracked_hosts: self.untracked_hosts,
        }
    }

    /// 송수신 바이트가 많은 호스트 상위 `n`개
    pub fn top_talkers(&self, n: usize) -> Vec<HostVolume> {
        top_n(&self.talkers, n)
    }

    /// 수신 바이트가 많은 목적지 상위 `n`개
    pub fn top_destinations(&self, n: usize) -> Vec<HostVolume> {
        top_n(&self.destinations, n)
    }

    /// 프로토콜 → 패킷 수
    pub fn protocol_distribution(&self) -> BTreeMap<String, u64> {
        self.protocols.clone()
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

impl Default for StatisticsAggregator {
    fn default() -> Self {
        Self::new(LocalNetwork::default(), Duration::from_secs(5), 10_000)
    }
}

fn top_n(map: &HashMap<IpAddr, u64>, n: usize) -> Vec<HostVolume> {
    let mut hosts: Vec<HostVolume> = map
        .iter()
        .map(|(ip, bytes)| HostVolume {
            ip: *ip,
            bytes: *bytes,
        })
        .collect();
    hosts.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.ip.cmp(&b.ip)));
    hosts.truncate(n);
    hosts
}
