//! 수집 큐 — 패킷 소스와 분석 워커 사이의 고정 용량 버퍼
//!
//! [`IngestionQueue::bounded`]는 생산자/소비자 쌍을 반환합니다.
//!
//! # 오버플로우 정책
//! 큐가 가득 차면 새로 들어온 패킷을 버리고 드롭 카운터를 올립니다.
//! 생산자는 절대 대기하지 않습니다.
//!
//! # 소비
//! [`QueueConsumer::dequeue`]는 최대 `poll` 동안만 대기하므로
//! 분석 워커는 매 주기마다 취소 신호를 확인할 수 있습니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use netsentry_core::metrics as m;
use netsentry_core::types::PacketRecord;
use serde::Serialize;
use tokio::sync::mpsc;

/// 큐 통계 (생산자/소비자 공유)
#[derive(Debug)]
pub struct QueueStats {
    capacity: usize,
    len: AtomicUsize,
    dropped: AtomicU64,
    received: AtomicU64,
}

impl QueueStats {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            len: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    /// 큐에 대기 중인 패킷 수
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 최대 용량
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 큐가 가득 차 버린 패킷 수
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 투입 시도된 전체 패킷 수 (드롭 포함)
    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// 사용률 (0.0~1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        f64::from(u32::try_from(self.len()).unwrap_or(u32::MAX))
            / f64::from(u32::try_from(self.capacity).unwrap_or(u32::MAX))
    }

    /// 직렬화 가능한 스냅샷
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            len: self.len(),
            capacity: self.capacity,
            dropped: self.dropped_count(),
            total_received: self.total_received(),
            utilization: self.utilization(),
        }
    }

    fn decrement_len(&self) {
        // fetch_sub가 0 아래로 내려가지 않도록 보정
        let _ = self
            .len
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }
}

/// 큐 통계 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub len: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub total_received: u64,
    pub utilization: f64,
}

/// 투입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// 큐에 들어감
    Queued,
    /// 큐가 가득 차 버려짐
    Dropped,
    /// 소비자가 사라짐
    Closed,
}

/// 꺼내기 결과
#[derive(Debug)]
pub enum Dequeued {
    /// 패킷 한 개
    Packet(PacketRecord),
    /// 대기 시간 안에 도착한 패킷 없음
    Empty,
    /// 모든 생산자가 사라짐
    Closed,
}

/// 수집 큐 생성기
pub struct IngestionQueue;

impl IngestionQueue {
    /// 고정 용량 큐를 만들고 생산자/소비자를 반환합니다.
    ///
    /// 용량 0은 1로 취급합니다.
    pub fn bounded(capacity: usize) -> (QueueProducer, QueueConsumer) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(QueueStats::new(capacity));
        (
            QueueProducer {
                tx,
                stats: Arc::clone(&stats),
            },
            QueueConsumer { rx, stats },
        )
    }
}

/// 생산자 (인터페이스마다 복제해서 사용)
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<PacketRecord>,
    stats: Arc<QueueStats>,
}

impl QueueProducer {
    /// 패킷을 넣습니다. 가득 차 있으면 대기하지 않고 버립니다.
    pub fn enqueue(&self, packet: PacketRecord) -> EnqueueOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        self.stats.len.fetch_add(1, Ordering::Relaxed);

        match self.tx.try_send(packet) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.decrement_len();
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::counter!(m::TRAFFIC_PACKETS_DROPPED_TOTAL).increment(1);
                if dropped.is_power_of_two() {
                    tracing::warn!(
                        dropped,
                        capacity = self.stats.capacity,
                        "ingestion queue full, dropping newest packets"
                    );
                }
                EnqueueOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.decrement_len();
                EnqueueOutcome::Closed
            }
        }
    }

    /// 공유 통계
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

/// 소비자 (분석 워커 하나만 소유)
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::Receiver<PacketRecord>,
    stats: Arc<QueueStats>,
}

impl QueueConsumer {
    /// 최대 `poll` 동안 패킷을 기다립니다.
    pub async fn dequeue(&mut self, poll: Duration) -> Dequeued {
        match tokio::time::timeout(poll, self.rx.recv()).await {
            Ok(Some(packet)) => {
                self.stats.decrement_len();
                Dequeued::Packet(packet)
            }
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Empty,
        }
    }

    /// 대기 없이 패킷 하나를 꺼냅니다.
    pub fn try_dequeue(&mut self) -> Option<PacketRecord> {
        let packet = self.rx.try_recv().ok()?;
        self.stats.decrement_len();
        Some(packet)
    }

    /// 공유 통계
    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsentry_core::types::Protocol;

    fn packet(size: u64) -> PacketRecord {
        PacketRecord::new(Protocol::Tcp, size)
    }

    #[tokio::test]
    async fn enqueue_and_dequeue_in_order() {
        let (producer, mut consumer) = IngestionQueue::bounded(10);
        assert_eq!(producer.enqueue(packet(1)), EnqueueOutcome::Queued);
        assert_eq!(producer.enqueue(packet(2)), EnqueueOutcome::Queued);
        assert_eq!(producer.stats().len(), 2);

        let Dequeued::Packet(first) = consumer.dequeue(Duration::from_millis(10)).await else {
            panic!("expected packet");
        };
        assert_eq!(first.size, 1);
        assert_eq!(consumer.try_dequeue().map(|p| p.size), Some(2));
        assert!(consumer.stats().is_empty());
    }

    #[test]
    fn full_queue_drops_newest() {
        let (producer, mut consumer) = IngestionQueue::bounded(2);
        assert_eq!(producer.enqueue(packet(1)), EnqueueOutcome::Queued);
        assert_eq!(producer.enqueue(packet(2)), EnqueueOutcome::Queued);
        assert_eq!(producer.enqueue(packet(3)), EnqueueOutcome::Dropped);

        let stats = producer.stats();
        assert_eq!(stats.dropped_count(), 1);
        assert_eq!(stats.total_received(), 3);
        assert_eq!(stats.len(), 2);
        assert!((stats.utilization() - 1.0).abs() < f64::EPSILON);

        // 버려진 것은 마지막 패킷
        assert_eq!(consumer.try_dequeue().map(|p| p.size), Some(1));
        assert_eq!(consumer.try_dequeue().map(|p| p.size), Some(2));
        assert!(consumer.try_dequeue().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_when_empty() {
        let (_producer, mut consumer) = IngestionQueue::bounded(4);
        assert!(matches!(
            consumer.dequeue(Duration::from_secs(1)).await,
            Dequeued::Empty
        ));
    }

    #[tokio::test]
    async fn dequeue_reports_closed_after_producers_drop() {
        let (producer, mut consumer) = IngestionQueue::bounded(4);
        producer.enqueue(packet(7));
        drop(producer);

        assert!(matches!(
            consumer.dequeue(Duration::from_millis(10)).await,
            Dequeued::Packet(_)
        ));
        assert!(matches!(
            consumer.dequeue(Duration::from_millis(10)).await,
            Dequeued::Closed
        ));
    }

    #[test]
    fn enqueue_after_consumer_drop_is_closed() {
        let (producer, consumer) = IngestionQueue::bounded(4);
        drop(consumer);
        assert_eq!(producer.enqueue(packet(1)), EnqueueOutcome::Closed);
        assert_eq!(producer.stats().len(), 0);
        assert_eq!(producer.stats().dropped_count(), 0);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let (producer, _consumer) = IngestionQueue::bounded(4);
        producer.enqueue(packet(1));
        let snap = producer.stats().snapshot();
        assert_eq!(snap.len, 1);
        assert_eq!(snap.capacity, 4);
        assert_eq!(snap.total_received, 1);
        assert!((snap.utilization - 0.25).abs() < f64::EPSILON);
    }
}
