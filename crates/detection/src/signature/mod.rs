//! 시그니처 탐지 — 규칙 파일 기반 패킷 헤더 매칭
//!
//! # 아키텍처
//! - [`SignatureEngine`]: 활성 규칙 집합 관리, 매칭, 갱신 코디네이터
//! - [`parser`]: 규칙 텍스트 파싱
//! - [`rule`]: 규칙/선택자/규칙 집합 데이터 구조
//! - [`refresh`]: 원격 소스 다운로드와 백업을 남기는 파일 교체
//!
//! 활성 규칙 집합은 `RwLock<Arc<RuleSet>>`로 통째로 교체됩니다.
//! 매칭 중인 워커는 교체 전 스냅샷을 끝까지 사용합니다.

pub mod parser;
pub mod refresh;
pub mod rule;

pub use parser::{ParseReport, RuleParser};
pub use refresh::{HttpRuleFetcher, RuleFetcher};
pub use rule::{
    AddressSelector, MatchResult, PortSelector, RuleHeader, RuleSet, RuleSummary, SignatureRule,
};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use netsentry_core::metrics as m;
use netsentry_core::types::{PacketRecord, Severity};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SignatureConfig;
use crate::error::DetectionError;

/// 엔진 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Unloaded,
    Loaded,
    Refreshing,
}

/// 갱신 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    /// 새로 활성화된 규칙 수
    pub rules_loaded: usize,
    /// 성공적으로 받아온 소스 수
    pub sources_fetched: usize,
    /// 건너뛴 규칙 수 (형식 오류 + 중복)
    pub rules_skipped: usize,
    /// 이전 규칙 파일의 백업 경로
    pub backup: Option<PathBuf>,
}

/// 규칙 통계
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub total: usize,
    pub enabled: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub total_matches: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub state: EngineState,
}

/// 시그니처 탐지 엔진
pub struct SignatureEngine {
    config: SignatureConfig,
    parser: RuleParser,
    rules: RwLock<Arc<RuleSet>>,
    state: Mutex<EngineState>,
    fetcher: Arc<dyn RuleFetcher>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SignatureEngine {
    /// HTTP 다운로더를 사용하는 엔진을 만듭니다.
    pub fn new(config: SignatureConfig) -> Result<Self, DetectionError> {
        let fetcher = Arc::new(HttpRuleFetcher::new(config.fetch_timeout)?);
        Self::with_fetcher(config, fetcher)
    }

    /// 다운로더를 지정해 엔진을 만듭니다.
    pub fn with_fetcher(
        config: SignatureConfig,
        fetcher: Arc<dyn RuleFetcher>,
    ) -> Result<Self, DetectionError> {
        Ok(Self {
            config,
            parser: RuleParser::new()?,
            rules: RwLock::new(Arc::new(RuleSet::default())),
            state: Mutex::new(EngineState::Unloaded),
            fetcher,
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SignatureConfig {
        &self.config
    }

    /// 규칙 파일을 읽어 활성 집합을 교체하고 규칙 수를 반환합니다.
    ///
    /// 파일이 없으면 빈 집합으로 시작합니다.
    pub async fn load(&self) -> Result<usize, DetectionError> {
        let path = &self.config.rules_path;
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "rules file not found, starting with no rules");
                String::new()
            }
            Err(e) => {
                return Err(DetectionError::RuleLoad {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let report = self.parser.parse_text(&text, &path.display().to_string());
        let count = report.rules.len();
        self.install_set(RuleSet::from_rules(report.rules));
        self.set_state(EngineState::Loaded);

        info!(
            path = %path.display(),
            rules = count,
            skipped = report.skipped + report.duplicates,
            "signature rules loaded"
        );
        Ok(count)
    }

    /// 현재 규칙 집합 스냅샷
    pub fn snapshot(&self) -> Arc<RuleSet> {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn install_set(&self, set: RuleSet) {
        metrics::gauge!(m::SIGNATURE_RULES_LOADED).set(set.len() as f64);
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(set);
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// 패킷에 매칭되는 활성 규칙을 반환하고 각 규칙의 카운터를 올립니다.
    pub fn match_packet(&self, packet: &PacketRecord) -> Vec<MatchResult> {
        let set = self.snapshot();
        let mut results = Vec::new();
        for rule in set.iter() {
            if !rule.enabled || !rule.applies_to(&packet.protocol) {
                continue;
            }
            if !rule.header.matches(packet) {
                continue;
            }
            rule.record_match();
            metrics::counter!(m::SIGNATURE_MATCHES_TOTAL, m::LABEL_SEVERITY => rule.severity.as_str())
                .increment(1);
            results.push(MatchResult {
                rule_id: rule.id.clone(),
                description: rule.description.clone(),
                severity: rule.severity,
            });
        }
        results
    }

    /// 설정된 소스에서 규칙을 다시 받아 교체합니다.
    ///
    /// 실패하면 활성 규칙 집합과 파일은 그대로 유지됩니다.
    pub async fn refresh(&self) -> Result<RefreshOutcome, DetectionError> {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            return Err(DetectionError::RefreshInProgress);
        };

        let previous = self.state();
        self.set_state(EngineState::Refreshing);
        let result = self.refresh_inner().await;
        // 한 번도 로드되지 않았으면 실패 시 Unloaded 유지
        self.set_state(match (&result, previous) {
            (Ok(_), _) => EngineState::Loaded,
            (Err(_), EngineState::Unloaded) => EngineState::Unloaded,
            (Err(_), _) => EngineState::Loaded,
        });

        match &result {
            Ok(outcome) => {
                metrics::counter!(m::SIGNATURE_REFRESH_TOTAL, m::LABEL_RESULT => "success")
                    .increment(1);
                info!(
                    rules = outcome.rules_loaded,
                    sources = outcome.sources_fetched,
                    skipped = outcome.rules_skipped,
                    "signature rules refreshed"
                );
            }
            Err(e) => {
                metrics::counter!(m::SIGNATURE_REFRESH_TOTAL, m::LABEL_RESULT => "failure")
                    .increment(1);
                error!(error = %e, "signature rule refresh failed, keeping current rules");
            }
        }
        result
    }

    async fn refresh_inner(&self) -> Result<RefreshOutcome, DetectionError> {
        if self.config.sources.is_empty() {
            return Err(DetectionError::InvalidBundle(
                "no rule sources configured".to_owned(),
            ));
        }

        let mut bundle = String::new();
        let mut fetched = 0;
        for url in &self.config.sources {
            match self.fetcher.fetch(url).await {
                Ok(text) => {
                    debug!(url = %url, bytes = text.len(), "rule source fetched");
                    bundle.push_str(&text);
                    if !bundle.ends_with('\n') {
                        bundle.push('\n');
                    }
                    fetched += 1;
                }
                Err(e) => warn!(url = %url, error = %e, "rule source fetch failed"),
            }
        }
        if fetched == 0 {
            return Err(DetectionError::InvalidBundle(
                "no rule source could be fetched".to_owned(),
            ));
        }

        let report = self.parser.parse_text(&bundle, "refresh");
        if report.rules.is_empty() {
            return Err(DetectionError::InvalidBundle(
                "fetched rules contain no valid rule".to_owned(),
            ));
        }

        let backup =
            refresh::install_rules(&self.config.rules_path, &bundle, self.config.max_backups)
                .await?;

        let outcome = RefreshOutcome {
            rules_loaded: report.rules.len(),
            sources_fetched: fetched,
            rules_skipped: report.skipped + report.duplicates,
            backup,
        };
        self.install_set(RuleSet::from_rules(report.rules));
        Ok(outcome)
    }

    /// 규칙을 활성화합니다. 없는 ID면 `false`.
    pub fn enable_rule(&self, id: &str) -> bool {
        self.toggle_rule(id, true)
    }

    /// 규칙을 비활성화합니다. 없는 ID면 `false`.
    pub fn disable_rule(&self, id: &str) -> bool {
        self.toggle_rule(id, false)
    }

    fn toggle_rule(&self, id: &str, enabled: bool) -> bool {
        let mut guard = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        match guard.with_rule_enabled(id, enabled) {
            Some(next) => {
                *guard = Arc::new(next);
                info!(rule_id = id, enabled, "signature rule toggled");
                true
            }
            None => false,
        }
    }

    pub fn rule(&self, id: &str) -> Option<RuleSummary> {
        self.snapshot().get(id).map(SignatureRule::summary)
    }

    pub fn rules_by_severity(&self, severity: Severity) -> Vec<RuleSummary> {
        self.snapshot()
            .iter()
            .filter(|r| r.severity == severity)
            .map(SignatureRule::summary)
            .collect()
    }

    pub fn stats(&self) -> RuleStats {
        let set = self.snapshot();
        let mut by_severity: BTreeMap<String, usize> = Severity::ALL
            .iter()
            .map(|s| (s.as_str().to_owned(), 0))
            .collect();
        let mut total_matches = 0;
        for rule in set.iter() {
            *by_severity.entry(rule.severity.as_str().to_owned()).or_default() += 1;
            total_matches += rule.match_count();
        }
        RuleStats {
            total: set.len(),
            enabled: set.enabled_count(),
            by_severity,
            total_matches,
            last_updated: set.loaded_at(),
            state: self.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsentry_core::pipeline::BoxFuture;
    use netsentry_core::types::Protocol;

    struct StaticFetcher(Result<String, String>);

    impl RuleFetcher for StaticFetcher {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, DetectionError>> {
            let result = self.0.clone().map_err(|reason| DetectionError::RuleFetch {
                url: url.to_owned(),
                reason,
            });
            Box::pin(async move { result })
        }
    }

    fn engine_at(path: PathBuf, fetched: Result<String, String>) -> SignatureEngine {
        let config = SignatureConfig {
            rules_path: path,
            sources: vec!["https://rules.example/netsentry.rules".to_owned()],
            ..Default::default()
        };
        SignatureEngine::with_fetcher(config, Arc::new(StaticFetcher(fetched))).unwrap()
    }

    fn tcp_to(port: u16) -> PacketRecord {
        PacketRecord::new(Protocol::Tcp, 60).with_endpoints(
            "192.168.0.2".parse().unwrap(),
            40000,
            "10.0.0.1".parse().unwrap(),
            port,
        )
    }

    #[tokio::test]
    async fn missing_file_loads_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path().join("none.rules"), Ok(String::new()));
        assert_eq!(engine.state(), EngineState::Unloaded);
        assert_eq!(engine.load().await.unwrap(), 0);
        assert_eq!(engine.state(), EngineState::Loaded);
        assert!(engine.match_packet(&tcp_to(80)).is_empty());
    }

    #[tokio::test]
    async fn match_counts_and_port_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.rules");
        std::fs::write(
            &path,
            "alert tcp any any -> any 23 (msg:\"telnet\"; sid:10; severity:high;)\n\
             alert udp any any -> any any (msg:\"udp\"; sid:11;)\n",
        )
        .unwrap();
        let engine = engine_at(path, Ok(String::new()));
        assert_eq!(engine.load().await.unwrap(), 2);

        let hits = engine.match_packet(&tcp_to(23));
        assert_eq!(
            hits,
            vec![MatchResult {
                rule_id: "10".to_owned(),
                description: "telnet".to_owned(),
                severity: Severity::High,
            }]
        );
        assert!(engine.match_packet(&tcp_to(80)).is_empty());
        assert_eq!(engine.rule("10").unwrap().match_count, 1);
        assert_eq!(engine.stats().total_matches, 1);
    }

    #[tokio::test]
    async fn disable_and_enable_rule() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.rules");
        std::fs::write(&path, "tcp (msg:\"any tcp\"; sid:1;)\n").unwrap();
        let engine = engine_at(path, Ok(String::new()));
        engine.load().await.unwrap();

        assert!(engine.disable_rule("1"));
        assert!(engine.match_packet(&tcp_to(80)).is_empty());
        assert_eq!(engine.stats().enabled, 0);

        assert!(engine.enable_rule("1"));
        assert_eq!(engine.match_packet(&tcp_to(80)).len(), 1);
        assert!(!engine.enable_rule("missing"));
    }

    #[tokio::test]
    async fn refresh_with_empty_bundle_keeps_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.rules");
        std::fs::write(&path, "tcp (msg:\"keep\"; sid:1;)\n").unwrap();
        let engine = engine_at(path.clone(), Ok("# nothing here\n".to_owned()));
        engine.load().await.unwrap();

        let err = engine.refresh().await.unwrap_err();
        assert!(matches!(err, DetectionError::InvalidBundle(_)));
        assert_eq!(engine.state(), EngineState::Loaded);
        assert!(engine.rule("1").is_some());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "tcp (msg:\"keep\"; sid:1;)\n"
        );
    }

    #[tokio::test]
    async fn refresh_fetch_failure_keeps_unloaded_state() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_at(dir.path().join("r.rules"), Err("timeout".to_owned()));
        assert!(engine.refresh().await.is_err());
        assert_eq!(engine.state(), EngineState::Unloaded);
    }

    #[tokio::test]
    async fn rules_by_severity_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.rules");
        std::fs::write(
            &path,
            "tcp (sid:1; severity:low;)\ntcp (sid:2; severity:critical;)\ntcp (sid:3;)\n",
        )
        .unwrap();
        let engine = engine_at(path, Ok(String::new()));
        engine.load().await.unwrap();

        assert_eq!(engine.rules_by_severity(Severity::Critical).len(), 1);
        let stats = engine.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_severity["medium"], 1);
        assert_eq!(stats.by_severity["high"], 0);
        assert!(stats.last_updated.is_some());
    }
}
