//! 규칙 갱신 — 원격 소스 다운로드와 규칙 파일 교체
//!
//! # 교체 순서
//! ```text
//! <rules>.tmp 작성 ──▶ <rules> → <rules>.bak.<YYYYmmddHHMMSSfff> ──▶ <rules>.tmp → <rules>
//! ```
//! 백업은 이름 순(= 시각 순)으로 최근 `max_backups`개만 남깁니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use netsentry_core::pipeline::BoxFuture;
use tracing::{debug, warn};

use crate::error::DetectionError;

/// 규칙 소스 다운로더
///
/// 테스트에서는 고정 텍스트를 돌려주는 구현으로 교체합니다.
pub trait RuleFetcher: Send + Sync {
    /// `url`의 규칙 텍스트를 가져옵니다.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, DetectionError>>;
}

/// HTTP(S) 규칙 다운로더
pub struct HttpRuleFetcher {
    client: reqwest::Client,
}

impl HttpRuleFetcher {
    pub fn new(timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("netsentry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DetectionError::RuleFetch {
                url: String::new(),
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl RuleFetcher for HttpRuleFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, DetectionError>> {
        Box::pin(async move {
            let fetch_err = |reason: String| DetectionError::RuleFetch {
                url: url.to_owned(),
                reason,
            };
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| fetch_err(e.to_string()))?
                .error_for_status()
                .map_err(|e| fetch_err(e.to_string()))?;
            response.text().await.map_err(|e| fetch_err(e.to_string()))
        })
    }
}

/// `<rules>.bak.` 접두사
fn backup_prefix(rules_path: &Path) -> String {
    let name = rules_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{name}.bak.")
}

fn parent_dir(rules_path: &Path) -> PathBuf {
    match rules_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn install_err(path: &Path, reason: String) -> DetectionError {
    DetectionError::RuleInstall {
        path: path.display().to_string(),
        reason,
    }
}

/// 새 규칙 텍스트를 설치하고 기존 파일을 백업합니다.
///
/// 기존 파일이 있었으면 백업 경로를 반환합니다.
pub async fn install_rules(
    rules_path: &Path,
    content: &str,
    max_backups: usize,
) -> Result<Option<PathBuf>, DetectionError> {
    let dir = parent_dir(rules_path);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| install_err(&dir, format!("failed to create directory: {e}")))?;

    let mut tmp_name = rules_path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|e| install_err(&tmp_path, format!("failed to write: {e}")))?;

    let backup = if tokio::fs::try_exists(rules_path).await.unwrap_or(false) {
        let backup = next_backup_path(rules_path).await;
        tokio::fs::rename(rules_path, &backup)
            .await
            .map_err(|e| install_err(rules_path, format!("failed to back up: {e}")))?;
        debug!(backup = %backup.display(), "previous rules backed up");
        Some(backup)
    } else {
        None
    };

    if let Err(e) = tokio::fs::rename(&tmp_path, rules_path).await {
        // 백업을 되돌려 활성 파일이 사라지지 않게 함
        if let Some(backup) = &backup
            && let Err(restore) = tokio::fs::rename(backup, rules_path).await
        {
            warn!(error = %restore, "failed to restore rules backup");
        }
        return Err(install_err(rules_path, format!("failed to install: {e}")));
    }

    prune_backups(rules_path, max_backups).await;
    Ok(backup)
}

/// 같은 밀리초 안의 충돌을 피해 백업 경로를 정합니다.
async fn next_backup_path(rules_path: &Path) -> PathBuf {
    let dir = parent_dir(rules_path);
    let stamp = Utc::now().format("%Y%m%d%H%M%S%3f").to_string();
    let base = format!("{}{stamp}", backup_prefix(rules_path));

    let mut candidate = dir.join(&base);
    let mut n = 1u32;
    while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        candidate = dir.join(format!("{base}-{n}"));
        n += 1;
    }
    candidate
}

/// 규칙 파일의 백업 목록 (최신순)
pub async fn list_backups(rules_path: &Path) -> Vec<PathBuf> {
    let dir = parent_dir(rules_path);
    let prefix = backup_prefix(rules_path);

    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return Vec::new();
    };
    let mut backups = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            backups.push(entry.path());
        }
    }
    backups.sort();
    backups.reverse();
    backups
}

/// 최근 `keep`개를 제외한 백업을 삭제합니다. 실패는 로그만 남깁니다.
pub async fn prune_backups(rules_path: &Path, keep: usize) {
    for old in list_backups(rules_path).await.into_iter().skip(keep) {
        match tokio::fs::remove_file(&old).await {
            Ok(()) => debug!(path = %old.display(), "removed old rules backup"),
            Err(e) => warn!(path = %old.display(), error = %e, "failed to remove rules backup"),
        }
    }
}
