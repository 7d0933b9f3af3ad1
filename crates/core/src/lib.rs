//! netsentry 공통 크레이트
//!
//! 모든 netsentry 크레이트가 공유하는 도메인 타입, 설정, 에러,
//! 파이프라인 trait, 영속 저장소, 외부 협력자 trait을 정의합니다.

pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod store;
pub mod types;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, NetsentryError, PipelineError, StorageError};

// 설정
pub use config::NetsentryConfig;

// 이벤트
pub use event::{AlertEvent, Event, EventMetadata};

// 파이프라인 trait
pub use pipeline::{BoxFuture, DynPipeline, HealthStatus, Pipeline};

// 저장소
pub use store::{FileStore, MemoryStore, SqliteStore, Store};

// 협력자
pub use directory::{DeviceDirectory, DeviceRef, StaticDeviceDirectory, StaticThreatIntel, ThreatIntel};
pub use network::LocalNetwork;

// 도메인 타입
pub use types::{
    Alert, AlertStatus, AlertTransition, PacketRecord, Protocol, Severity, TcpFlags,
    TransportDetail,
};
