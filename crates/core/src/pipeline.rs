//! 파이프라인 trait — 모듈 생명주기 정의
//!
//! 데몬이 관리하는 모든 실행 단위는 [`Pipeline`]을 구현합니다.
//! [`Pipeline`]은 RPITIT를 사용하므로 trait 객체가 필요한 곳에서는
//! [`DynPipeline`]을 사용합니다.
//!
//! # 생명주기
//! ```text
//! Initialized → start() → Running → stop() → Stopped
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::NetsentryError;

/// 박싱된 `Send` future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 시작/정지/상태 확인이 가능한 실행 단위
pub trait Pipeline: Send + Sync {
    /// 백그라운드 작업을 시작합니다.
    ///
    /// 이미 실행 중이면 [`PipelineError::AlreadyRunning`](crate::error::PipelineError::AlreadyRunning)을 반환합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), NetsentryError>> + Send;

    /// 모든 백그라운드 작업에 취소를 알리고 종료를 기다립니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), NetsentryError>> + Send;

    /// 현재 건강 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// dyn-compatible 파이프라인 trait
pub trait DynPipeline: Send + Sync {
    fn start(&mut self) -> BoxFuture<'_, Result<(), NetsentryError>>;
    fn stop(&mut self) -> BoxFuture<'_, Result<(), NetsentryError>>;
    fn health_check(&self) -> BoxFuture<'_, HealthStatus>;
}

impl<T: Pipeline> DynPipeline for T {
    fn start(&mut self) -> BoxFuture<'_, Result<(), NetsentryError>> {
        Box::pin(Pipeline::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), NetsentryError>> {
        Box::pin(Pipeline::stop(self))
    }

    fn health_check(&self) -> BoxFuture<'_, HealthStatus> {
        Box::pin(Pipeline::health_check(self))
    }
}
