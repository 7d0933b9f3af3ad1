//! 이상 탐지 — 장치별 행동 베이스라인 대비 가중 점수
//!
//! # 점수 모델
//! | 특징 | 조건 | 가중치 (기본) |
//! |------|------|---------------|
//! | 트래픽 편차 | 샘플 바이트 > 배수 × 베이스라인 평균 | 0.5 |
//! | 새 목적지 | 베이스라인에 없는 목적지가 하나라도 있음 | 0.3 |
//! | 비정상 포트 | 베이스라인에 없는 포트가 하나라도 있음 | 0.2 |
//!
//! 합계를 [0, 1]로 자르고 임계값을 **초과**하면 이상으로 판정합니다.
//! 판정과 무관하게 베이스라인은 샘플로 갱신되므로 이상 샘플도 베이스라인을 이동시킵니다.

pub mod baseline;

pub use baseline::{BehaviorBaseline, BehaviorSample, HourlyTraffic};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use netsentry_core::metrics as m;
use netsentry_core::store::{self, Store, TABLE_BASELINES, storage_safe_key};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::AnomalyConfig;
use crate::error::DetectionError;

/// 첫 관측 시 사유
pub const REASON_NO_BASELINE: &str = "baseline not yet established";
pub const REASON_TRAFFIC: &str = "traffic volume deviation";
pub const REASON_NEW_DESTINATION: &str = "new destination domains";
pub const REASON_UNUSUAL_PORT: &str = "unusual ports";

/// 판정 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyResult {
    pub device_key: String,
    pub is_anomaly: bool,
    /// 0.0~1.0
    pub score: f64,
    /// 점수에 기여한 특징 (`, `로 연결)
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// 베이스라인 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyStats {
    pub baselines: usize,
    pub threshold: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// 이상 탐지 엔진
pub struct AnomalyEngine {
    config: AnomalyConfig,
    store: Arc<dyn Store>,
    baselines: RwLock<HashMap<String, Arc<BehaviorBaseline>>>,
}

impl AnomalyEngine {
    pub fn new(config: AnomalyConfig, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            baselines: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// 저장소에서 베이스라인을 읽어 메모리에 올립니다.
    ///
    /// 손상된 레코드는 경고 후 건너뜁니다.
    pub fn load_baselines(&self) -> Result<usize, DetectionError> {
        let mut loaded = HashMap::new();
        for (key, record) in self.store.scan(TABLE_BASELINES)? {
            let parsed = record.and_then(|value| {
                serde_json::from_value::<BehaviorBaseline>(value).map_err(Into::into)
            });
            match parsed {
                Ok(baseline) => {
                    loaded.insert(baseline.device_key.clone(), Arc::new(baseline));
                }
                Err(e) => warn!(key = %key, error = %e, "skipping corrupt baseline record"),
            }
        }

        let count = loaded.len();
        *self.baselines.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        set_baseline_gauge(count);
        info!(baselines = count, "behavior baselines loaded");
        Ok(count)
    }

    /// 장치 샘플을 판정하고 베이스라인을 갱신합니다.
    pub fn observe(&self, device_key: &str, sample: &BehaviorSample) -> AnomalyResult {
        metrics::counter!(m::ANOMALY_SAMPLES_TOTAL).increment(1);

        let (result, updated, created) = {
            let mut baselines = self.baselines.write().unwrap_or_else(PoisonError::into_inner);
            match baselines.get(device_key) {
                None => {
                    let baseline = Arc::new(BehaviorBaseline::from_sample(device_key, sample));
                    baselines.insert(device_key.to_owned(), Arc::clone(&baseline));
                    let result = AnomalyResult {
                        device_key: device_key.to_owned(),
                        is_anomaly: false,
                        score: 0.0,
                        reason: REASON_NO_BASELINE.to_owned(),
                        timestamp: Utc::now(),
                    };
                    (result, baseline, Some(baselines.len()))
                }
                Some(current) => {
                    let result = self.score(device_key, current, sample);
                    let mut next = BehaviorBaseline::clone(current);
                    next.update(sample);
                    let next = Arc::new(next);
                    baselines.insert(device_key.to_owned(), Arc::clone(&next));
                    (result, next, None)
                }
            }
        };

        if let Some(count) = created {
            set_baseline_gauge(count);
            debug!(device = device_key, "baseline created");
        }
        self.persist(&updated);

        if result.is_anomaly {
            metrics::counter!(m::ANOMALY_DETECTED_TOTAL).increment(1);
            info!(
                device = device_key,
                score = result.score,
                reason = %result.reason,
                "anomalous behavior detected"
            );
        }
        result
    }

    fn score(
        &self,
        device_key: &str,
        baseline: &BehaviorBaseline,
        sample: &BehaviorSample,
    ) -> AnomalyResult {
        let mut score = 0.0;
        let mut reasons = Vec::new();

        #[allow(clippy::cast_precision_loss)]
        let sample_bytes = sample.total_bytes() as f64;
        if sample_bytes > self.config.deviation_factor * baseline.mean_bytes_per_sample() {
            score += self.config.traffic_weight;
            reasons.push(REASON_TRAFFIC);
        }
        if sample.destinations.keys().any(|d| !baseline.has_destination(d)) {
            score += self.config.new_destination_weight;
            reasons.push(REASON_NEW_DESTINATION);
        }
        if sample.ports.keys().any(|&p| !baseline.has_port(p)) {
            score += self.config.unusual_port_weight;
            reasons.push(REASON_UNUSUAL_PORT);
        }

        let score = f64::clamp(score, 0.0, 1.0);
        AnomalyResult {
            device_key: device_key.to_owned(),
            is_anomaly: score > self.config.threshold,
            score,
            reason: reasons.join(", "),
            timestamp: Utc::now(),
        }
    }

    /// 저장 실패는 로그만 남깁니다. 다음 갱신 때 다시 기록됩니다.
    fn persist(&self, baseline: &BehaviorBaseline) {
        let key = storage_safe_key(&baseline.device_key);
        if let Err(e) = store::put_json(self.store.as_ref(), TABLE_BASELINES, &key, baseline) {
            warn!(device = %baseline.device_key, error = %e, "failed to persist baseline");
        }
    }

    pub fn baseline(&self, device_key: &str) -> Option<BehaviorBaseline> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_key)
            .map(|b| BehaviorBaseline::clone(b))
    }

    pub fn stats(&self) -> AnomalyStats {
        let baselines = self.baselines.read().unwrap_or_else(PoisonError::into_inner);
        AnomalyStats {
            baselines: baselines.len(),
            threshold: self.config.threshold,
            last_updated: baselines.values().map(|b| b.updated_at).max(),
        }
    }

    /// 모든 베이스라인을 노화시키고 저장합니다. 처리한 수를 반환합니다.
    pub fn age_baselines(&self, now: DateTime<Utc>) -> usize {
        let aged: Vec<Arc<BehaviorBaseline>> = {
            let mut baselines = self.baselines.write().unwrap_or_else(PoisonError::into_inner);
            baselines
                .values_mut()
                .map(|slot| {
                    let mut next = BehaviorBaseline::clone(slot);
                    next.age(now);
                    *slot = Arc::new(next);
                    Arc::clone(slot)
                })
                .collect()
        };

        for baseline in &aged {
            self.persist(baseline);
        }
        info!(baselines = aged.len(), "behavior baselines aged");
        aged.len()
    }
}

fn set_baseline_gauge(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    metrics::gauge!(m::ANOMALY_BASELINES).set(count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsentry_core::store::MemoryStore;
    use netsentry_core::types::{PacketRecord, Protocol};

    fn engine() -> (AnomalyEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = AnomalyConfig {
            threshold: 0.7,
            ..Default::default()
        };
        (AnomalyEngine::new(config, store.clone()), store)
    }

    fn sample(bytes: u64, dst: &str, port: u16) -> BehaviorSample {
        let mut sample = BehaviorSample::new(Utc::now());
        let packet = PacketRecord::new(Protocol::Tcp, bytes).with_endpoints(
            "192.168.0.2".parse().unwrap(),
            40000,
            dst.parse().unwrap(),
            port,
        );
        sample.add_outbound(&packet);
        sample
    }

    #[test]
    fn first_sight_is_never_anomalous() {
        let (engine, store) = engine();
        let result = engine.observe("aa:bb:cc:dd:ee:ff", &sample(1_000_000, "6.6.6.6", 4444));
        assert!(!result.is_anomaly);
        assert_eq!(result.reason, REASON_NO_BASELINE);
        assert!(engine.baseline("aa:bb:cc:dd:ee:ff").is_some());
        // 저장 키는 구분자가 치환됨
        assert!(
            store
                .get(TABLE_BASELINES, "aa-bb-cc-dd-ee-ff")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn familiar_behavior_scores_zero() {
        let (engine, _) = engine();
        engine.observe("dev", &sample(1000, "1.1.1.1", 443));
        let result = engine.observe("dev", &sample(1000, "1.1.1.1", 443));
        assert!(!result.is_anomaly);
        assert!(result.score.abs() < f64::EPSILON);
        assert!(result.reason.is_empty());
    }

    #[test]
    fn all_features_add_up() {
        let (engine, _) = engine();
        engine.observe("dev", &sample(1000, "1.1.1.1", 443));
        let result = engine.observe("dev", &sample(5000, "6.6.6.6", 4444));
        assert!(result.is_anomaly);
        assert!((result.score - 1.0).abs() < 1e-9);
        assert_eq!(
            result.reason,
            "traffic volume deviation, new destination domains, unusual ports"
        );
    }

    #[test]
    fn score_at_threshold_is_not_anomalous() {
        let store = Arc::new(MemoryStore::new());
        let config = AnomalyConfig {
            threshold: 0.5,
            ..Default::default()
        };
        let engine = AnomalyEngine::new(config, store);
        engine.observe("dev", &sample(1000, "1.1.1.1", 443));
        // 트래픽 편차만 (0.5)
        let result = engine.observe("dev", &sample(5000, "1.1.1.1", 443));
        assert!((result.score - 0.5).abs() < 1e-9);
        assert!(!result.is_anomaly);
    }

    #[test]
    fn anomalous_sample_still_updates_baseline() {
        let (engine, _) = engine();
        engine.observe("dev", &sample(1000, "1.1.1.1", 443));
        engine.observe("dev", &sample(5000, "6.6.6.6", 4444));
        let baseline = engine.baseline("dev").unwrap();
        assert_eq!(baseline.sample_count, 2);
        assert!(baseline.has_destination("6.6.6.6"));
    }

    #[test]
    fn baselines_survive_reload() {
        let (engine, store) = engine();
        engine.observe("aa:bb", &sample(1000, "1.1.1.1", 443));
        store
            .put(TABLE_BASELINES, "broken", &serde_json::json!({"nope": 1}))
            .unwrap();

        let reloaded = AnomalyEngine::new(AnomalyConfig::default(), store);
        assert_eq!(reloaded.load_baselines().unwrap(), 1);
        // 원래 키로 조회됨
        assert!(reloaded.baseline("aa:bb").is_some());
        assert_eq!(reloaded.stats().baselines, 1);
    }

    #[test]
    fn aging_persists_halved_counts() {
        let (engine, store) = engine();
        engine.observe("dev", &sample(1000, "1.1.1.1", 443));
        engine.observe("dev", &sample(1000, "1.1.1.1", 443));

        assert_eq!(engine.age_baselines(Utc::now()), 1);
        let stored: BehaviorBaseline = store::get_json(store.as_ref(), TABLE_BASELINES, "dev")
            .unwrap()
            .unwrap();
        assert_eq!(stored.domain_visits.get("1.1.1.1"), Some(&1));
        assert_eq!(stored.sample_count, 1);
    }
}
