//! netsentry 탐지 크레이트
//!
//! # 모듈 구성
//!
//! - [`signature`]: 규칙 파일 파싱, 헤더 매칭, 원격 갱신과 백업
//! - [`anomaly`]: 장치별 행동 베이스라인과 가중 점수 판정
//! - [`alert`]: 억제/중복 제거/시간당 한도를 거쳐 저장되는 알림, 전달 싱크
//! - [`config`]: 탐지 런타임 설정 (core 설정 변환)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! PacketRecord ──▶ SignatureEngine ──MatchResult──┐
//!                                                  ├──▶ AlertEngine ──▶ Store + Sinks
//! BehaviorSample ─▶ AnomalyEngine ──AnomalyResult─┘
//! ```
//!
//! 엔진들은 서로를 직접 참조하지 않습니다. 결과를 알림으로 잇는 일은 데몬의 분석 워커가 맡습니다.

pub mod alert;
pub mod anomaly;
pub mod config;
pub mod error;
pub mod signature;

// --- 주요 타입 re-export ---

// 설정
pub use config::{AlertConfig, AnomalyConfig, SignatureConfig};

// 에러
pub use error::DetectionError;

// 시그니처
pub use signature::{
    EngineState, HttpRuleFetcher, MatchResult, RefreshOutcome, RuleFetcher, RuleParser, RuleSet,
    RuleStats, RuleSummary, SignatureEngine, SignatureRule,
};

// 이상 탐지
pub use anomaly::{AnomalyEngine, AnomalyResult, AnomalyStats, BehaviorBaseline, BehaviorSample};

// 알림
pub use alert::{
    AlertEngine, AlertFilter, AlertOutcome, AlertPage, AlertStats, BroadcastSink, LogSink,
    NotificationSink, SuppressReason, SuppressionCounts,
};
