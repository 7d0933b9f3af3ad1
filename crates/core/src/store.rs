//! 영속 저장소 — 테이블/키 단위 JSON 레코드 저장
//!
//! 알림(`alerts`)과 행동 베이스라인(`baselines`)을 보관합니다.
//! 모든 백엔드는 키 순서를 보장하는 `scan`을 제공합니다.
//!
//! - [`MemoryStore`]: 테스트 및 임시 실행용 `BTreeMap` 저장소
//! - [`FileStore`]: `<dir>/<table>/<key>.json` 파일 저장소
//!   (임시 파일에 쓴 뒤 rename 하여 원자적으로 교체)
//! - [`SqliteStore`]: SQLite 단일 파일 저장소. 레코드의 `timestamp` 필드를
//!   인덱스 컬럼으로 두어 최신순 로드와 보존 기간 삭제를 쿼리로 처리
//!
//! 레코드 시각은 JSON 값의 최상위 `timestamp` 필드(RFC 3339)에서 읽습니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StorageError;

/// 알림 테이블 이름
pub const TABLE_ALERTS: &str = "alerts";
/// 베이스라인 테이블 이름
pub const TABLE_BASELINES: &str = "baselines";
/// SQLite 저장소 파일 이름 (`storage.path` 디렉토리 아래)
pub const SQLITE_FILE_NAME: &str = "netsentry.db";

/// `scan` 결과 한 줄: 키와 레코드(손상 시 `Err`)
pub type ScannedRecord = (String, Result<serde_json::Value, StorageError>);

/// 키 순서 저장소
///
/// 값은 `serde_json::Value`로 저장되며 역직렬화는 호출자가 담당합니다.
pub trait Store: Send + Sync {
    /// 키에 값을 저장합니다 (덮어쓰기).
    fn put(&self, table: &str, key: &str, value: &serde_json::Value) -> Result<(), StorageError>;

    /// 키의 값을 조회합니다. 없으면 `Ok(None)`.
    fn get(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    /// 키를 삭제합니다. 존재했으면 `true`.
    fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError>;

    /// 테이블의 모든 레코드를 키 오름차순으로 반환합니다.
    ///
    /// 손상된 레코드는 해당 키에 대한 `Err`로 반환되며 나머지 레코드는 계속 읽힙니다.
    fn scan(&self, table: &str) -> Result<Vec<ScannedRecord>, StorageError>;

    /// 레코드 시각 기준 최신순으로 최대 `limit`개를 반환합니다.
    ///
    /// 시각이 없는 레코드는 맨 뒤로 갑니다.
    fn scan_latest(&self, table: &str, limit: usize) -> Result<Vec<ScannedRecord>, StorageError> {
        let mut records = self.scan(table)?;
        records.sort_by(|(ka, a), (kb, b)| {
            let ta = a.as_ref().ok().and_then(record_timestamp);
            let tb = b.as_ref().ok().and_then(record_timestamp);
            tb.cmp(&ta).then_with(|| kb.cmp(ka))
        });
        records.truncate(limit);
        Ok(records)
    }

    /// 레코드 시각이 `cutoff`보다 이른 레코드를 지우고 지운 키를 반환합니다.
    fn purge_before(
        &self,
        table: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StorageError> {
        let mut purged = Vec::new();
        for (key, record) in self.scan(table)? {
            let expired = record
                .ok()
                .and_then(|v| record_timestamp(&v))
                .is_some_and(|ts| ts < cutoff);
            if expired && self.delete(table, &key)? {
                purged.push(key);
            }
        }
        Ok(purged)
    }
}

/// JSON 레코드의 최상위 `timestamp` 필드
pub fn record_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    let raw = value.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// 값을 직렬화하여 저장합니다.
pub fn put_json<T: Serialize>(
    store: &dyn Store,
    table: &str,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_value(value)?;
    store.put(table, key, &json)
}

/// 값을 조회하여 역직렬화합니다.
pub fn get_json<T: DeserializeOwned>(
    store: &dyn Store,
    table: &str,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(table, key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                table: table.to_owned(),
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// 키를 파일 이름으로 쓸 수 있는 형태로 바꿉니다.
///
/// 영숫자, `-`, `_`, `.` 외의 문자는 `-`로 치환합니다.
pub fn storage_safe_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

// ─── MemoryStore ─────────────────────────────────────────────────────

/// 메모리 저장소
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, BTreeMap<String, serde_json::Value>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Store for MemoryStore {
    fn put(&self, table: &str, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        self.lock()
            .entry(table.to_owned())
            .or_default()
            .insert(key.to_owned(), value.clone());
        Ok(())
    }

    fn get(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        Ok(self.lock().get(table).and_then(|t| t.get(key)).cloned())
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .lock()
            .get_mut(table)
            .is_some_and(|t| t.remove(key).is_some()))
    }

    fn scan(&self, table: &str) -> Result<Vec<ScannedRecord>, StorageError> {
        Ok(self
            .lock()
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), Ok(v.clone()))).collect())
            .unwrap_or_default())
    }
}

// ─── FileStore ───────────────────────────────────────────────────────

/// 파일 저장소
///
/// 레코드 하나가 JSON 파일 하나입니다. 키는 [`storage_safe_key`]로 정규화됩니다.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// 루트 디렉토리를 열고(없으면 생성) 저장소를 반환합니다.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::Open {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %root.display(), "file store opened");
        Ok(Self { root })
    }

    /// 루트 디렉토리 경로
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(storage_safe_key(table))
    }

    fn record_path(&self, table: &str, key: &str) -> PathBuf {
        self.table_dir(table)
            .join(format!("{}.json", storage_safe_key(key)))
    }

    fn query_error(table: &str, key: &str, e: impl ToString) -> StorageError {
        StorageError::Query {
            table: table.to_owned(),
            key: key.to_owned(),
            reason: e.to_string(),
        }
    }
}

impl Store for FileStore {
    fn put(&self, table: &str, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let dir = self.table_dir(table);
        std::fs::create_dir_all(&dir).map_err(|e| Self::query_error(table, key, e))?;

        let path = self.record_path(table, key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(value)?;
        std::fs::write(&tmp, bytes).map_err(|e| Self::query_error(table, key, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| Self::query_error(table, key, e))?;
        Ok(())
    }

    fn get(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let path = self.record_path(table, key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::query_error(table, key, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                table: table.to_owned(),
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError> {
        match std::fs::remove_file(self.record_path(table, key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::query_error(table, key, e)),
        }
    }

    fn scan(&self, table: &str) -> Result<Vec<ScannedRecord>, StorageError> {
        let dir = self.table_dir(table);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::query_error(table, "*", e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::query_error(table, "*", e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(key) = name.strip_suffix(".json") {
                keys.push(key.to_owned());
            }
        }
        keys.sort();

        Ok(keys
            .into_iter()
            .map(|key| {
                let value = self
                    .get(table, &key)
                    .and_then(|v| v.ok_or_else(|| Self::query_error(table, &key, "vanished")));
                (key, value)
            })
            .collect())
    }
}

// ─── SqliteStore ─────────────────────────────────────────────────────

/// SQLite 저장소
///
/// 모든 테이블이 `records` 한 테이블에 `(tbl, key)` 기본 키로 들어갑니다.
/// `ts_ms`는 레코드 `timestamp` 필드의 밀리초 값이며 `(tbl, ts_ms)` 인덱스를 가집니다.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// 데이터베이스 파일을 열거나 만듭니다 (부모 디렉토리 포함).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let open_error = |reason: String| StorageError::Open {
            path: path.display().to_string(),
            reason,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| open_error(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| open_error(e.to_string()))?;
        let store = Self::with_connection(conn).map_err(|e| open_error(e.to_string()))?;
        debug!(path = %path.display(), "sqlite store opened");
        Ok(store)
    }

    /// 메모리 데이터베이스 (테스트용)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Open {
            path: ":memory:".to_owned(),
            reason: e.to_string(),
        })?;
        Self::with_connection(conn).map_err(|e| StorageError::Open {
            path: ":memory:".to_owned(),
            reason: e.to_string(),
        })
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                tbl TEXT NOT NULL,
                key TEXT NOT NULL,
                ts_ms INTEGER,
                value TEXT NOT NULL,
                PRIMARY KEY (tbl, key)
            );
            CREATE INDEX IF NOT EXISTS idx_records_ts ON records(tbl, ts_ms);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sql_error(table: &str, key: &str, e: rusqlite::Error) -> StorageError {
        StorageError::Query {
            table: table.to_owned(),
            key: key.to_owned(),
            reason: e.to_string(),
        }
    }

    fn decode(table: &str, key: String, raw: &str) -> ScannedRecord {
        let value = serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
            table: table.to_owned(),
            key: key.clone(),
            reason: e.to_string(),
        });
        (key, value)
    }

    fn query_records(
        &self,
        table: &str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ScannedRecord>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Self::sql_error(table, "*", e))?;
        let rows = stmt
            .query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| Self::sql_error(table, "*", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Self::sql_error(table, "*", e))?;
        Ok(rows
            .into_iter()
            .map(|(key, raw)| Self::decode(table, key, &raw))
            .collect())
    }
}

impl Store for SqliteStore {
    fn put(&self, table: &str, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        let ts_ms = record_timestamp(value).map(|ts| ts.timestamp_millis());
        self.lock()
            .execute(
                "INSERT INTO records (tbl, key, ts_ms, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(tbl, key) DO UPDATE SET ts_ms = excluded.ts_ms, value = excluded.value",
                params![table, key, ts_ms, raw],
            )
            .map_err(|e| Self::sql_error(table, key, e))?;
        Ok(())
    }

    fn get(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let raw: Option<String> = self
            .lock()
            .query_row(
                "SELECT value FROM records WHERE tbl = ?1 AND key = ?2",
                params![table, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Self::sql_error(table, key, e))?;
        raw.map(|raw| Self::decode(table, key.to_owned(), &raw).1)
            .transpose()
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool, StorageError> {
        let changed = self
            .lock()
            .execute(
                "DELETE FROM records WHERE tbl = ?1 AND key = ?2",
                params![table, key],
            )
            .map_err(|e| Self::sql_error(table, key, e))?;
        Ok(changed > 0)
    }

    fn scan(&self, table: &str) -> Result<Vec<ScannedRecord>, StorageError> {
        self.query_records(
            table,
            "SELECT key, value FROM records WHERE tbl = ?1 ORDER BY key",
            params![table],
        )
    }

    fn scan_latest(&self, table: &str, limit: usize) -> Result<Vec<ScannedRecord>, StorageError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_records(
            table,
            "SELECT key, value FROM records WHERE tbl = ?1
             ORDER BY ts_ms DESC, key DESC LIMIT ?2",
            params![table, limit],
        )
    }

    fn purge_before(
        &self,
        table: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("DELETE FROM records WHERE tbl = ?1 AND ts_ms < ?2 RETURNING key")
            .map_err(|e| Self::sql_error(table, "*", e))?;
        let keys = stmt
            .query_map(params![table, cutoff.timestamp_millis()], |row| row.get(0))
            .map_err(|e| Self::sql_error(table, "*", e))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| Self::sql_error(table, "*", e))?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn Store) {
        store
            .put(TABLE_ALERTS, "b", &serde_json::json!({"n": 2}))
            .unwrap();
        store
            .put(TABLE_ALERTS, "a", &serde_json::json!({"n": 1}))
            .unwrap();

        assert_eq!(
            store.get(TABLE_ALERTS, "a").unwrap(),
            Some(serde_json::json!({"n": 1}))
        );
        assert!(store.get(TABLE_ALERTS, "zzz").unwrap().is_none());
        assert!(store.get(TABLE_BASELINES, "a").unwrap().is_none());

        let keys: Vec<String> = store
            .scan(TABLE_ALERTS)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(store.delete(TABLE_ALERTS, "a").unwrap());
        assert!(!store.delete(TABLE_ALERTS, "a").unwrap());
        assert_eq!(store.scan(TABLE_ALERTS).unwrap().len(), 1);
        assert!(store.scan("missing").unwrap().is_empty());
    }

    #[test]
    fn memory_store_basic_operations() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn file_store_basic_operations() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn sqlite_store_basic_operations() {
        exercise(&SqliteStore::open_in_memory().unwrap());
    }

    fn record_at(ts: &str) -> serde_json::Value {
        serde_json::json!({ "timestamp": ts })
    }

    fn latest_and_purge(store: &dyn Store) {
        store.put(TABLE_ALERTS, "old", &record_at("2024-01-01T00:00:00Z")).unwrap();
        store.put(TABLE_ALERTS, "mid", &record_at("2024-06-01T12:00:00.5Z")).unwrap();
        store.put(TABLE_ALERTS, "new", &record_at("2024-12-31T23:59:59Z")).unwrap();
        store.put(TABLE_ALERTS, "untimed", &serde_json::json!({"n": 1})).unwrap();

        let latest: Vec<String> = store
            .scan_latest(TABLE_ALERTS, 2)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(latest, vec!["new", "mid"]);
        assert_eq!(store.scan_latest(TABLE_ALERTS, 10).unwrap().len(), 4);

        let cutoff = DateTime::parse_from_rfc3339("2024-07-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut purged = store.purge_before(TABLE_ALERTS, cutoff).unwrap();
        purged.sort();
        assert_eq!(purged, vec!["mid", "old"]);

        let left: Vec<String> = store
            .scan(TABLE_ALERTS)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(left, vec!["new", "untimed"]);
    }

    #[test]
    fn latest_and_purge_agree_across_backends() {
        latest_and_purge(&MemoryStore::new());
        latest_and_purge(&SqliteStore::open_in_memory().unwrap());

        let dir = tempfile::tempdir().unwrap();
        latest_and_purge(&FileStore::open(dir.path()).unwrap());
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SQLITE_FILE_NAME);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.put(TABLE_ALERTS, "a", &record_at("2024-01-01T00:00:00Z")).unwrap();
            store.put(TABLE_ALERTS, "a", &record_at("2024-02-01T00:00:00Z")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get(TABLE_ALERTS, "a").unwrap(),
            Some(record_at("2024-02-01T00:00:00Z"))
        );
        assert_eq!(store.scan(TABLE_ALERTS).unwrap().len(), 1);
    }

    #[test]
    fn sqlite_store_corrupt_record_is_isolated() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put("t", "good", &serde_json::json!({"ok": true})).unwrap();
        store
            .lock()
            .execute(
                "INSERT INTO records (tbl, key, ts_ms, value) VALUES ('t', 'bad', NULL, '{not json')",
                [],
            )
            .unwrap();

        assert!(matches!(store.get("t", "bad"), Err(StorageError::Corrupt { .. })));
        let scanned = store.scan("t").unwrap();
        assert_eq!(scanned.len(), 2);
        assert!(scanned[0].1.is_err());
        assert!(scanned[1].1.is_ok());
    }

    #[test]
    fn file_store_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.put("t", "k", &serde_json::json!(1)).unwrap();
        store.put("t", "k", &serde_json::json!(2)).unwrap();
        assert_eq!(store.get("t", "k").unwrap(), Some(serde_json::json!(2)));
        assert!(!dir.path().join("t").join("k.json.tmp").exists());
    }

    #[test]
    fn file_store_corrupt_record_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.put("t", "good", &serde_json::json!({"ok": true})).unwrap();
        std::fs::write(dir.path().join("t").join("bad.json"), b"{not json").unwrap();

        assert!(matches!(
            store.get("t", "bad"),
            Err(StorageError::Corrupt { .. })
        ));

        let scanned = store.scan("t").unwrap();
        assert_eq!(scanned.len(), 2);
        assert!(scanned[0].1.is_err());
        assert!(scanned[1].1.is_ok());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.put(TABLE_BASELINES, "aa-bb", &serde_json::json!([1, 2])).unwrap();
        }
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get(TABLE_BASELINES, "aa-bb").unwrap(),
            Some(serde_json::json!([1, 2]))
        );
    }

    #[test]
    fn typed_helpers_roundtrip() {
        let store = MemoryStore::new();
        put_json(&store, "t", "k", &vec![1u32, 2, 3]).unwrap();
        let back: Option<Vec<u32>> = get_json(&store, "t", "k").unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));

        let wrong: Result<Option<String>, _> = get_json(&store, "t", "k");
        assert!(matches!(wrong, Err(StorageError::Corrupt { .. })));
    }

    #[test]
    fn safe_key_replaces_separators() {
        assert_eq!(storage_safe_key("aa:bb:cc:dd:ee:ff"), "aa-bb-cc-dd-ee-ff");
        assert_eq!(storage_safe_key("10.0.0.1/24"), "10.0.0.1-24");
        assert_eq!(storage_safe_key("fe80::1"), "fe80--1");
    }
}
