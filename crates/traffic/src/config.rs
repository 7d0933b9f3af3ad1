//! 트래픽 분석 설정
//!
//! [`TrafficConfig`]는 core의 [`TrafficAnalyzerConfig`]를 런타임 타입
//! (`Duration`, [`LocalNetwork`])으로 변환한 것입니다.

use std::time::Duration;

use netsentry_core::config::TrafficAnalyzerConfig;
use netsentry_core::network::LocalNetwork;

use crate::error::TrafficError;

/// 트래픽 분석 런타임 설정
#[derive(Debug, Clone)]
pub struct TrafficConfig {
    /// 수집 대상 인터페이스
    pub interfaces: Vec<String>,
    /// 합성 패킷 생성 간격
    pub synthetic_interval: Duration,
    /// 수집 큐 용량
    pub queue_capacity: usize,
    /// 큐 대기 최대 시간
    pub dequeue_poll: Duration,
    /// 로컬 네트워크 판별기
    pub local_network: LocalNetwork,
    /// 전송률 계산 윈도우
    pub rate_window: Duration,
    /// top talker 추적 최대 호스트 수
    pub max_tracked_hosts: usize,
    /// 세션 유휴 타임아웃
    pub session_timeout: Duration,
    /// 세션 정리 주기
    pub sweep_interval: Duration,
    /// 최대 세션 수
    pub max_sessions: usize,
}

impl TrafficConfig {
    /// core 설정에서 런타임 설정을 생성합니다.
    pub fn from_core(config: &TrafficAnalyzerConfig) -> Result<Self, TrafficError> {
        let pps = config.synthetic_packets_per_second.max(1);
        Ok(Self {
            interfaces: config.interfaces.clone(),
            synthetic_interval: Duration::from_micros(1_000_000 / pps),
            queue_capacity: config.queue_capacity,
            dequeue_poll: Duration::from_millis(config.dequeue_poll_ms),
            local_network: config.local_network()?,
            rate_window: Duration::from_secs(config.rate_window_secs),
            max_tracked_hosts: config.max_tracked_hosts,
            session_timeout: Duration::from_secs(config.session_timeout_secs),
            sweep_interval: Duration::from_secs(config.session_sweep_interval_secs),
            max_sessions: config.max_sessions,
        })
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            interfaces: vec!["eth0".to_owned()],
            synthetic_interval: Duration::from_millis(100),
            queue_capacity: 10_000,
            dequeue_poll: Duration::from_secs(1),
            local_network: LocalNetwork::default(),
            rate_window: Duration::from_secs(5),
            max_tracked_hosts: 10_000,
            session_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_sessions: 100_000,
        }
    }
}
