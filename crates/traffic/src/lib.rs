//! netsentry 트래픽 크레이트
//!
//! # 모듈 구성
//!
//! - [`source`]: 패킷 소스 trait, 합성 패킷 생성기, 수집 워커
//! - [`queue`]: 고정 용량 수집 큐 (가득 차면 최신 패킷 드롭)
//! - [`flow`]: 양방향 플로우 세션 테이블 (유휴 타임아웃 정리)
//! - [`stats`]: 누적/방향별 통계, 프로토콜 분포, top talker, 전송률
//! - [`config`]: 트래픽 분석 런타임 설정 (core 설정 변환)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! PacketSource --run_capture--> IngestionQueue --dequeue--> FlowSessionTable
//!  (인터페이스별)               (drop newest)              StatisticsAggregator
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod queue;
pub mod source;
pub mod stats;

// --- 주요 타입 re-export ---

// 설정
pub use config::TrafficConfig;

// 에러
pub use error::TrafficError;

// 소스
pub use source::{CaptureSummary, PacketSource, SyntheticSource, run_capture};

// 큐
pub use queue::{
    Dequeued, EnqueueOutcome, IngestionQueue, QueueConsumer, QueueProducer, QueueSnapshot,
    QueueStats,
};

// 세션
pub use flow::{
    Endpoint, FlowDirection, FlowKey, FlowSession, FlowSessionTable, SessionState, SessionUpdate,
};

// 통계
pub use stats::{HostVolume, StatisticsAggregator, TrafficDirection, TrafficRates, TrafficSnapshot};
