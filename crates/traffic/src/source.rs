//! 패킷 소스 — 캡처 기술을 감추는 패킷 레코드 공급자
//!
//! [`PacketSource`]는 지연 평가되는 무한(또는 유한) 패킷 시퀀스입니다.
//! 실제 캡처를 쓸 수 없는 환경에서는 [`SyntheticSource`]가 같은 계약으로
//! 통계적으로 그럴듯한 레코드를 일정 속도로 만들어 냅니다.
//!
//! [`run_capture`]는 인터페이스마다 하나씩 실행되는 수집 워커 본체입니다.
//!
//! ```text
//! PacketSource ──next_packet()──▶ QueueProducer::enqueue ──▶ IngestionQueue
//!      ▲                                   │ 가득 차면 드롭
//!      └──────── CancellationToken ────────┘
//! ```

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use chrono::Utc;
use netsentry_core::types::{PacketRecord, Protocol, TcpFlags, TransportDetail};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::queue::{EnqueueOutcome, QueueProducer};

/// 패킷 레코드 공급자
///
/// 재시작할 수 없으며, `None`은 소진을 뜻합니다.
/// 구현체는 대기 중에도 취소 가능해야 합니다 (future가 drop 되면 중단).
pub trait PacketSource: Send {
    /// 소스 이름 (로그/통계용)
    fn name(&self) -> &str;

    /// 다음 패킷을 기다립니다.
    fn next_packet(&mut self) -> impl Future<Output = Option<PacketRecord>> + Send;
}

/// 수집 워커 종료 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    /// 큐에 넣은 패킷 수
    pub queued: u64,
    /// 큐가 가득 차 버린 패킷 수
    pub dropped: u64,
}

/// 소스에서 패킷을 꺼내 큐에 넣습니다.
///
/// 취소 토큰이 발동하거나, 소스가 소진되거나, 소비자가 사라지면 반환합니다.
pub async fn run_capture<S: PacketSource>(
    mut source: S,
    producer: QueueProducer,
    cancel: CancellationToken,
) -> CaptureSummary {
    let mut summary = CaptureSummary::default();
    info!(source = source.name(), "capture worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(source = source.name(), "capture worker cancelled");
                break;
            }
            next = source.next_packet() => {
                let Some(packet) = next else {
                    info!(source = source.name(), "packet source exhausted");
                    break;
                };
                match producer.enqueue(packet) {
                    EnqueueOutcome::Queued => summary.queued += 1,
                    EnqueueOutcome::Dropped => summary.dropped += 1,
                    EnqueueOutcome::Closed => {
                        debug!(source = source.name(), "ingestion queue closed");
                        break;
                    }
                }
            }
        }
    }

    info!(
        source = source.name(),
        queued = summary.queued,
        dropped = summary.dropped,
        "capture worker stopped"
    );
    summary
}

// =============================================================================
// SyntheticSource
// =============================================================================

const INTERNAL_HOSTS: [[u8; 4]; 5] = [
    [192, 168, 0, 1],
    [192, 168, 0, 2],
    [192, 168, 0, 3],
    [192, 168, 0, 4],
    [192, 168, 0, 5],
];

const EXTERNAL_HOSTS: [[u8; 4]; 20] = [
    [8, 8, 8, 8],
    [8, 8, 4, 4],
    [114, 114, 114, 114],
    [223, 5, 5, 5],
    [140, 82, 113, 3],
    [140, 82, 114, 3],
    [140, 82, 114, 4],
    [140, 82, 112, 4],
    [104, 244, 42, 129],
    [157, 240, 1, 35],
    [93, 184, 216, 34],
    [208, 67, 222, 222],
    [1, 1, 1, 1],
    [209, 85, 220, 138],
    [52, 217, 0, 25],
    [51, 103, 5, 138],
    [185, 199, 108, 153],
    [185, 199, 109, 153],
    [185, 199, 110, 153],
    [185, 199, 111, 153],
];

const MACS: [&str; 5] = [
    "00:00:00:00:00:01",
    "00:00:00:00:00:02",
    "00:00:00:00:00:03",
    "00:00:00:00:00:04",
    "00:00:00:00:00:05",
];

const TCP_SERVICE_PORTS: [u16; 5] = [22, 80, 443, 3389, 8080];
const UDP_SERVICE_PORTS: [u16; 4] = [53, 123, 443, 5353];

/// 내부→외부 트래픽 비율
const OUTBOUND_RATIO: f64 = 0.7;

/// 합성 패킷 소스
///
/// 내부 호스트 192.168.0.1~5와 잘 알려진 외부 호스트 사이의 트래픽을 흉내 냅니다.
/// 70%는 내부→외부, 30%는 서로 다른 내부 호스트 사이입니다.
/// 크기는 64~1064 바이트입니다.
pub struct SyntheticSource {
    name: String,
    rng: StdRng,
    period: Duration,
    pacing: Option<Interval>,
    protocols: Vec<Protocol>,
    alternate: bool,
    fixed_size: Option<u64>,
    remaining: Option<u64>,
    sequence: u64,
}

impl SyntheticSource {
    /// `period` 간격으로 패킷을 내보내는 소스를 만듭니다.
    ///
    /// `period`가 0이면 대기 없이 즉시 내보냅니다.
    pub fn new(interface: &str, period: Duration) -> Self {
        Self {
            name: format!("synthetic:{interface}"),
            rng: StdRng::from_os_rng(),
            period,
            pacing: None,
            protocols: vec![Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::Arp],
            alternate: false,
            fixed_size: None,
            remaining: None,
            sequence: 0,
        }
    }

    /// 결정적인 난수 시드를 지정합니다.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// `count`개를 내보낸 뒤 소진됩니다.
    pub fn with_limit(mut self, count: u64) -> Self {
        self.remaining = Some(count);
        self
    }

    /// 프로토콜을 무작위 대신 순서대로 번갈아 사용합니다.
    pub fn with_alternating_protocols(mut self, protocols: Vec<Protocol>) -> Self {
        if !protocols.is_empty() {
            self.protocols = protocols;
            self.alternate = true;
        }
        self
    }

    /// 모든 패킷 크기를 고정합니다.
    pub fn with_fixed_size(mut self, size: u64) -> Self {
        self.fixed_size = Some(size);
        self
    }

    /// 다음 레코드를 즉시 생성합니다.
    pub fn generate(&mut self) -> PacketRecord {
        let src = self.pick_host(&INTERNAL_HOSTS);
        let dst = if self.rng.random_bool(OUTBOUND_RATIO) {
            self.pick_host(&EXTERNAL_HOSTS)
        } else {
            let mut dst = self.pick_host(&INTERNAL_HOSTS);
            while dst == src {
                dst = self.pick_host(&INTERNAL_HOSTS);
            }
            dst
        };

        let protocol = if self.alternate {
            let index = usize::try_from(self.sequence).unwrap_or(0) % self.protocols.len();
            self.protocols[index].clone()
        } else {
            let index = self.rng.random_range(0..self.protocols.len());
            self.protocols[index].clone()
        };
        self.sequence += 1;

        let size = self
            .fixed_size
            .unwrap_or_else(|| 64 + self.rng.random_range(0..=1000u64));

        let src_mac = MACS[self.rng.random_range(0..MACS.len())];
        let dst_mac = MACS[self.rng.random_range(0..MACS.len())];

        let (src_port, dst_port, transport, header) = match protocol {
            Protocol::Tcp => {
                let flags = if self.rng.random_bool(0.1) {
                    TcpFlags(TcpFlags::SYN)
                } else {
                    TcpFlags(TcpFlags::ACK | TcpFlags::PSH)
                };
                (
                    self.rng.random_range(1024..65535),
                    TCP_SERVICE_PORTS[self.rng.random_range(0..TCP_SERVICE_PORTS.len())],
                    TransportDetail::Tcp {
                        flags,
                        seq: self.rng.random(),
                        ack: self.rng.random(),
                    },
                    54,
                )
            }
            Protocol::Udp => (
                self.rng.random_range(1024..65535),
                UDP_SERVICE_PORTS[self.rng.random_range(0..UDP_SERVICE_PORTS.len())],
                TransportDetail::Udp {
                    length: u16::try_from(size.saturating_sub(34)).unwrap_or(u16::MAX),
                },
                42,
            ),
            Protocol::Icmp => (0, 0, TransportDetail::Icmp { icmp_type: 8, code: 0 }, 42),
            _ => (0, 0, TransportDetail::None, 0),
        };

        let mut packet = PacketRecord::new(protocol, size)
            .with_endpoints(src, src_port, dst, dst_port)
            .with_macs(src_mac, dst_mac)
            .with_timestamp(Utc::now())
            .with_transport(transport);
        packet.payload_size = size.saturating_sub(header);
        packet
    }

    fn pick_host(&mut self, hosts: &[[u8; 4]]) -> IpAddr {
        let [a, b, c, d] = hosts[self.rng.random_range(0..hosts.len())];
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }
}

impl PacketSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_packet(&mut self) -> Option<PacketRecord> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        if !self.period.is_zero() {
            let period = self.period;
            let pacing = self.pacing.get_or_insert_with(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            pacing.tick().await;
        }
        Some(self.generate())
    }
}
