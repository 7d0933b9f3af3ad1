//! 통합 테스트 -- 수집 → 큐 → 세션/통계 흐름 검증

use std::net::IpAddr;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use netsentry_core::types::{PacketRecord, Protocol};
use netsentry_traffic::{
    Dequeued, FlowDirection, FlowSessionTable, IngestionQueue, SessionState, SessionUpdate,
    StatisticsAggregator, SyntheticSource, run_capture,
};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// 합성 소스 1000개(TCP/UDP 교대, 100바이트)를 큐를 거쳐 통계에 반영
#[tokio::test(start_paused = true)]
async fn test_synthetic_alternating_packets_through_queue() {
    let source = SyntheticSource::new("eth0", Duration::from_millis(100))
        .with_seed(42)
        .with_limit(1000)
        .with_alternating_protocols(vec![Protocol::Tcp, Protocol::Udp])
        .with_fixed_size(100);

    let (producer, mut consumer) = IngestionQueue::bounded(2000);
    let summary = run_capture(source, producer, CancellationToken::new()).await;
    assert_eq!(summary.queued, 1000);
    assert_eq!(summary.dropped, 0);

    let mut stats = StatisticsAggregator::default();
    let mut sessions = FlowSessionTable::default();
    loop {
        match consumer.dequeue(Duration::from_millis(10)).await {
            Dequeued::Packet(packet) => {
                sessions.observe(&packet);
                stats.record(&packet);
            }
            Dequeued::Empty | Dequeued::Closed => break,
        }
    }

    let dist = stats.protocol_distribution();
    assert_eq!(dist.len(), 2);
    assert_eq!(dist.get("TCP"), Some(&500));
    assert_eq!(dist.get("UDP"), Some(&500));
    assert_eq!(stats.total_bytes(), 100_000);
    assert_eq!(stats.total_packets(), 1000);

    // 모든 합성 패킷은 IP를 가지므로 세션 패킷 합이 전체와 같음
    let tracked: u64 = sessions
        .active_sessions()
        .iter()
        .map(|s| s.total_packets())
        .sum();
    assert_eq!(tracked, 1000);
}

/// A→B, B→A 패킷은 하나의 세션으로 합쳐짐
#[test]
fn test_reply_traffic_joins_initiator_session() {
    let mut table = FlowSessionTable::default();
    let request = PacketRecord::new(Protocol::Udp, 80).with_endpoints(
        ip("192.168.0.2"),
        53000,
        ip("8.8.8.8"),
        53,
    );
    let reply = PacketRecord::new(Protocol::Udp, 200).with_endpoints(
        ip("8.8.8.8"),
        53,
        ip("192.168.0.2"),
        53000,
    );

    let SessionUpdate::Created { key } = table.observe(&request) else {
        panic!("first packet should create a session");
    };
    assert_eq!(
        table.observe(&reply),
        SessionUpdate::Updated {
            key: key.clone(),
            direction: FlowDirection::Inbound,
        }
    );

    let sessions = table.active_sessions();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!((session.packets_out, session.bytes_out), (1, 80));
    assert_eq!((session.packets_in, session.bytes_in), (1, 200));
}

/// 유휴 타임아웃이 지난 세션은 sweep 후 조회되지 않음
#[test]
fn test_idle_session_evicted_after_sweep() {
    let mut table = FlowSessionTable::new(Duration::from_secs(300), 1000);
    let t0 = Utc::now();
    let packet = PacketRecord::new(Protocol::Tcp, 60)
        .with_endpoints(ip("192.168.0.3"), 40000, ip("1.1.1.1"), 443)
        .with_timestamp(t0);
    let SessionUpdate::Created { key } = table.observe(&packet) else {
        panic!("expected a new session");
    };

    let evicted = table.sweep(t0 + TimeDelta::seconds(301));
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].state, SessionState::Timeout);
    assert!(table.get(&key).is_none());
    assert!(table.active_sessions().is_empty());
}

fn arb_packet() -> impl Strategy<Value = PacketRecord> {
    (
        prop::option::of(any::<[u8; 4]>()),
        prop::option::of(any::<[u8; 4]>()),
        0u64..100_000,
        prop::sample::select(vec![Protocol::Tcp, Protocol::Udp, Protocol::Icmp, Protocol::Arp]),
    )
        .prop_map(|(src, dst, size, protocol)| {
            let mut packet = PacketRecord::new(protocol, size);
            packet.src_ip = src.map(IpAddr::from);
            packet.dst_ip = dst.map(IpAddr::from);
            packet
        })
}

proptest! {
    /// 누적 바이트는 항상 기록된 패킷 크기의 합
    #[test]
    fn prop_total_bytes_equals_sum_of_sizes(packets in prop::collection::vec(arb_packet(), 0..200)) {
        let mut stats = StatisticsAggregator::default();
        let mut expected = 0u64;
        for packet in &packets {
            stats.record(packet);
            expected += packet.size;
        }
        let snap = stats.snapshot();
        prop_assert_eq!(snap.total_bytes, expected);
        prop_assert_eq!(snap.total_packets, packets.len() as u64);

        #[allow(clippy::cast_precision_loss)]
        let expected_f = expected as f64;
        prop_assert!((snap.inbound_bytes + snap.outbound_bytes - expected_f).abs() < 1e-6);
        let by_protocol: u64 = snap.protocols.values().sum();
        prop_assert_eq!(by_protocol, packets.len() as u64);
    }
}
