//! Session persistence
//!
//! `SessionStore` is the seam the pipeline depends on. `FileSessionStore`
//! keeps one JSON record per session plus an in-memory index of recently
//! used sessions; `InMemorySessionStore` backs tests and offline runs.

use super::session::{validate_id, Metadata, Session, SessionSummary};
use crate::error::PipelineError;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

/// Paging and filtering for `list`
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: usize,
    pub offset: usize,
    pub tag: Option<String>,
    pub search: Option<String>,
}

/// Manifest entry written next to each backed-up record
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackupEntry {
    pub file: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackupReport {
    pub path: PathBuf,
    pub files_copied: usize,
    pub entries: Vec<BackupEntry>,
}

pub trait SessionStore: Send + Sync {
    /// Load a session; absent and unreadable records are both `None`
    fn get(&self, id: &str) -> Result<Option<Session>>;

    /// Fully overwrite the durable record
    fn persist(&self, session: &Session) -> Result<()>;

    /// `false` when nothing existed under `id`
    fn delete(&self, id: &str) -> Result<bool>;

    fn exists(&self, id: &str) -> Result<bool>;

    /// Every readable session
    fn sessions(&self) -> Result<Vec<Session>>;

    /// `(file name, record bytes)` for every session, used by backups
    fn raw_records(&self) -> Result<Vec<(String, Vec<u8>)>>;

    /// Delete sessions whose last activity is older than `max_age`
    fn sweep(&self, max_age: Duration) -> Result<usize>;

    /// Drop cached entries idle longer than `timeout`; durable records stay
    fn evict_idle(&self, timeout: Duration) -> usize;

    /// Ids currently held in memory
    fn cached_ids(&self) -> Vec<String>;

    // =============================
    // Provided operations
    // =============================

    fn get_or_create(&self, id: &str) -> Result<Session> {
        validate_id(id)?;
        let session = match self.get(id)? {
            Some(mut session) => {
                session.touch();
                session
            }
            None => {
                info!(session_id = %id, "Creating new session");
                Session::new(id)
            }
        };
        self.persist(&session)?;
        Ok(session)
    }

    /// Sorted by creation time, newest first; total counts before paging
    fn list(&self, query: &ListQuery) -> Result<(Vec<SessionSummary>, usize)> {
        let mut matching: Vec<SessionSummary> = self
            .sessions()?
            .iter()
            .filter(|s| s.matches(query.tag.as_deref(), query.search.as_deref()))
            .map(Session::summary)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok((page, total))
    }

    fn clear(&self, id: &str) -> Result<Session> {
        let mut session = self
            .get(id)?
            .ok_or_else(|| PipelineError::SessionNotFound(id.to_string()))?;
        session.clear();
        self.persist(&session)?;
        Ok(session)
    }

    fn update_metadata(
        &self,
        id: &str,
        title: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<Metadata> {
        let mut session = self
            .get(id)?
            .ok_or_else(|| PipelineError::SessionNotFound(id.to_string()))?;
        if let Some(title) = title {
            session.metadata.title = title;
        }
        if let Some(tags) = tags {
            session.metadata.tags = tags;
        }
        self.persist(&session)?;
        Ok(session.metadata)
    }

    /// Store an uploaded record under a fresh `imported_*` id, keeping at
    /// most `max_history` complete pairs
    fn import(&self, record: Value, max_history: usize) -> Result<String> {
        let base = format!("imported_{}", Utc::now().format("%Y%m%d%H%M%S"));
        let mut id = base.clone();
        let mut suffix = 1;
        while self.exists(&id)? {
            id = format!("{}_{}", base, suffix);
            suffix += 1;
        }

        let mut session = Session::from_import(&id, record)?;
        session.normalize_history(max_history);
        self.persist(&session)?;
        info!(session_id = %id, messages = session.messages.len(), "Imported conversation");
        Ok(id)
    }

    /// Copy every record into `<root>/conversations_backup_<timestamp>/`
    fn backup(&self, root: &Path) -> Result<BackupReport> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = root.join(format!("conversations_backup_{}", stamp));
        fs::create_dir_all(&path)?;

        let mut entries = Vec::new();
        for (file, bytes) in self.raw_records()? {
            fs::write(path.join(&file), &bytes)?;
            entries.push(BackupEntry {
                file,
                sha256: hex::encode(Sha256::digest(&bytes)),
            });
        }

        let manifest = serde_json::json!({
            "created_at": Utc::now().to_rfc3339(),
            "files": entries,
        });
        fs::write(path.join("manifest.json"), serde_json::to_vec_pretty(&manifest)?)?;

        info!(path = %path.display(), files = entries.len(), "Backed up conversations");
        Ok(BackupReport {
            path,
            files_copied: entries.len(),
            entries,
        })
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//
// ================= File store =================
//

struct CachedSession {
    session: Session,
    touched: DateTime<Utc>,
}

/// Directory of `<id>.json` records
pub struct FileSessionStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, CachedSession>>,
}

impl FileSessionStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "Session store opened");
        Ok(Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Ids of every `*.json` record on disk
    fn record_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load(&self, id: &str) -> Option<Session> {
        let path = self.record_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                error!(session_id = %id, error = %e, "Session record unreadable");
                return None;
            }
        };
        match Session::from_record(id, &bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(session_id = %id, error = %e, "Corrupt session record, treating as absent");
                None
            }
        }
    }

    fn cache_put(&self, session: &Session) {
        write_lock(&self.cache).insert(
            session.id.clone(),
            CachedSession {
                session: session.clone(),
                touched: Utc::now(),
            },
        );
    }

    /// Earlier of file mtime and the record's own `last_access`
    fn last_activity(&self, path: &Path) -> Result<DateTime<Utc>> {
        let modified: DateTime<Utc> = fs::metadata(path)?.modified()?.into();
        let recorded = fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
            .and_then(|record| {
                record
                    .get("last_access")
                    .and_then(Value::as_str)
                    .and_then(super::session::parse_timestamp)
            });
        Ok(match recorded {
            Some(recorded) => modified.min(recorded),
            None => modified,
        })
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, id: &str) -> Result<Option<Session>> {
        validate_id(id)?;
        if let Some(cached) = read_lock(&self.cache).get(id) {
            return Ok(Some(cached.session.clone()));
        }
        let session = self.load(id);
        if let Some(session) = &session {
            self.cache_put(session);
        }
        Ok(session)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        validate_id(&session.id)?;
        let bytes = session.to_record()?;
        let path = self.record_path(&session.id);
        let tmp = self.dir.join(format!("{}.json.tmp", session.id));

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            error!(session_id = %session.id, error = %e, "Failed to persist session");
            return Err(PipelineError::Persistence(format!(
                "could not write session {}: {}",
                session.id, e
            )));
        }

        self.cache_put(session);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        let cached = write_lock(&self.cache).remove(id).is_some();
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => {
                info!(session_id = %id, "Session deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(cached),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        Ok(read_lock(&self.cache).contains_key(id) || self.record_path(id).exists())
    }

    fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .record_ids()?
            .iter()
            .filter_map(|id| self.load(id))
            .collect())
    }

    fn raw_records(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut records = Vec::new();
        for id in self.record_ids()? {
            let file = format!("{}.json", id);
            records.push((file.clone(), fs::read(self.dir.join(&file))?));
        }
        Ok(records)
    }

    fn sweep(&self, max_age: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut deleted = 0;

        for id in self.record_ids()? {
            let path = self.record_path(&id);
            let last_activity = match self.last_activity(&path) {
                Ok(at) => at,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Could not stat session record");
                    continue;
                }
            };
            if now - last_activity <= max_age {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    write_lock(&self.cache).remove(&id);
                    deleted += 1;
                    info!(session_id = %id, "Removed expired session record");
                }
                Err(e) => error!(session_id = %id, error = %e, "Failed to remove session record"),
            }
        }
        Ok(deleted)
    }

    fn evict_idle(&self, timeout: Duration) -> usize {
        let cutoff = Utc::now() - timeout;
        let mut cache = write_lock(&self.cache);
        let before = cache.len();
        cache.retain(|_, cached| cached.touched >= cutoff);
        before - cache.len()
    }

    fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read_lock(&self.cache).keys().cloned().collect();
        ids.sort();
        ids
    }
}

//
// ================= In-memory store =================
//

/// Non-durable store; idle eviction never drops data here
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> Result<Option<Session>> {
        validate_id(id)?;
        Ok(read_lock(&self.sessions).get(id).cloned())
    }

    fn persist(&self, session: &Session) -> Result<()> {
        validate_id(&session.id)?;
        write_lock(&self.sessions).insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        Ok(write_lock(&self.sessions).remove(id).is_some())
    }

    fn exists(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        Ok(read_lock(&self.sessions).contains_key(id))
    }

    fn sessions(&self) -> Result<Vec<Session>> {
        Ok(read_lock(&self.sessions).values().cloned().collect())
    }

    fn raw_records(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut records = Vec::new();
        for session in read_lock(&self.sessions).values() {
            records.push((format!("{}.json", session.id), session.to_record()?));
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    fn sweep(&self, max_age: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = write_lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_access <= max_age);
        Ok(before - sessions.len())
    }

    fn evict_idle(&self, _timeout: Duration) -> usize {
        0
    }

    fn cached_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read_lock(&self.sessions).keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::session::{Message, Sender};
    use crate::models::ResponseSource;
    use serde_json::json;
    use std::time::{Duration as StdDuration, SystemTime};
    use tempfile::TempDir;

    fn store() -> (TempDir, FileSessionStore) {
        let dir = TempDir::new().unwrap();
        let store = FileSessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn age_record(store: &FileSessionStore, id: &str, days: u64) {
        let file = fs::File::options()
            .write(true)
            .open(store.record_path(id))
            .unwrap();
        file.set_modified(SystemTime::now() - StdDuration::from_secs(days * 86_400))
            .unwrap();
    }

    #[test]
    fn test_get_or_create_persists_fresh_session() {
        let (_dir, store) = store();
        let session = store.get_or_create("alpha").unwrap();
        assert!(session.messages.is_empty());
        assert!(store.record_path("alpha").exists());
        assert!(store.exists("alpha").unwrap());
    }

    #[test]
    fn test_persist_then_reload_from_disk() {
        let (dir, store) = store();
        let mut session = store.get_or_create("beta").unwrap();
        session.messages.push(Message::user("q"));
        session
            .messages
            .push(Message::assistant("a", ResponseSource::Conversation, false));
        store.persist(&session).unwrap();

        let reopened = FileSessionStore::open(dir.path()).unwrap();
        let loaded = reopened.get("beta").unwrap().unwrap();
        assert_eq!(loaded.messages, session.messages);
        assert_eq!(loaded.metadata, session.metadata);
        assert!(!dir.path().join("beta.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_record_becomes_fresh_session() {
        let (dir, store) = store();
        fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        store.get_or_create("healthy").unwrap();

        assert!(store.get("broken").unwrap().is_none());
        let fresh = store.get_or_create("broken").unwrap();
        assert!(fresh.messages.is_empty());
        assert_eq!(fresh.metadata.title, "Conversation broken");

        let reopened = FileSessionStore::open(dir.path()).unwrap();
        assert!(reopened.get("broken").unwrap().is_some());
        assert!(reopened.get("healthy").unwrap().is_some());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.get_or_create("../escape"),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = store();
        store.get_or_create("gone").unwrap();
        assert!(store.delete("gone").unwrap());
        assert!(!store.delete("gone").unwrap());
        assert!(store.get("gone").unwrap().is_none());
    }

    #[test]
    fn test_list_filters_sorts_and_pages() {
        let (_dir, store) = store();
        for (i, id) in ["one", "two", "three"].iter().enumerate() {
            let mut session = Session::new(id);
            session.metadata.created_at = Utc::now() - Duration::hours(10 - i as i64);
            session.metadata.tags = if i == 1 { vec!["hr".to_string()] } else { vec![] };
            session.messages.push(Message::user(&format!("salary question {}", id)));
            store.persist(&session).unwrap();
        }

        let (page, total) = store
            .list(&ListQuery { limit: 2, offset: 0, ..Default::default() })
            .unwrap();
        assert_eq!(total, 3);
        let ids: Vec<&str> = page.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["three", "two"]);

        let (page, total) = store
            .list(&ListQuery { limit: 10, offset: 2, ..Default::default() })
            .unwrap();
        assert_eq!((page.len(), total), (1, 3));

        let (page, _) = store
            .list(&ListQuery { limit: 10, tag: Some("hr".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(page[0].session_id, "two");

        let (_, total) = store
            .list(&ListQuery { limit: 10, search: Some("question one".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_sweep_uses_earlier_of_mtime_and_last_access() {
        let (_dir, store) = store();
        store.get_or_create("old").unwrap();
        store.get_or_create("recent").unwrap();
        age_record(&store, "old", 40);

        assert_eq!(store.sweep(Duration::days(30)).unwrap(), 1);
        assert!(!store.exists("old").unwrap());
        assert!(store.exists("recent").unwrap());

        // last_access in the past with a fresh mtime also counts
        let mut stale = Session::new("stale");
        stale.last_access = Utc::now() - Duration::days(45);
        store.persist(&stale).unwrap();
        assert_eq!(store.sweep(Duration::days(30)).unwrap(), 1);
    }

    #[test]
    fn test_evict_idle_keeps_records() {
        let (_dir, store) = store();
        store.get_or_create("cached").unwrap();
        assert_eq!(store.cached_ids(), vec!["cached".to_string()]);

        assert_eq!(store.evict_idle(Duration::hours(1)), 0);
        assert_eq!(store.evict_idle(Duration::seconds(-1)), 1);
        assert!(store.cached_ids().is_empty());
        assert!(store.get("cached").unwrap().is_some());
    }

    #[test]
    fn test_clear_and_update_metadata() {
        let (_dir, store) = store();
        let mut session = store.get_or_create("meta").unwrap();
        session.messages.push(Message::user("q"));
        session.context.last_result = Some(json!(1));
        store.persist(&session).unwrap();

        let metadata = store
            .update_metadata("meta", Some("Renamed".to_string()), Some(vec!["x".to_string()]))
            .unwrap();
        assert_eq!(metadata.title, "Renamed");

        let cleared = store.clear("meta").unwrap();
        assert!(cleared.messages.is_empty());
        assert!(cleared.context.last_result.is_none());
        assert_eq!(cleared.metadata.title, "Renamed");

        assert!(matches!(
            store.clear("missing"),
            Err(PipelineError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_import_assigns_unique_ids() {
        let (_dir, store) = store();
        let first = store.import(json!({"messages": []}), 10).unwrap();
        let second = store.import(json!({"messages": []}), 10).unwrap();
        assert!(first.starts_with("imported_"));
        assert_ne!(first, second);

        let session = store.get(&first).unwrap().unwrap();
        assert!(session.metadata.imported_at.is_some());
    }

    #[test]
    fn test_import_keeps_newest_complete_pairs() {
        let (_dir, store) = store();
        let messages: Vec<Value> = (0..25)
            .map(|i| {
                let sender = if i % 2 == 0 { "user" } else { "assistant" };
                json!({"text": format!("m{}", i), "sender": sender, "timestamp": "2024-01-01T09:00:00"})
            })
            .collect();

        let id = store.import(json!({ "messages": messages }), 10).unwrap();
        let session = store.get(&id).unwrap().unwrap();

        assert_eq!(session.messages.len(), 20);
        assert_eq!(session.messages[0].text, "m4");
        assert_eq!(session.messages[0].sender, Sender::User);
        assert_eq!(session.messages[19].text, "m23");
    }

    #[test]
    fn test_backup_writes_manifest() {
        let (_dir, store) = store();
        store.get_or_create("a").unwrap();
        store.get_or_create("b").unwrap();
        let target = TempDir::new().unwrap();

        let report = store.backup(target.path()).unwrap();
        assert_eq!(report.files_copied, 2);
        assert!(report.path.join("a.json").exists());

        let manifest: Value =
            serde_json::from_slice(&fs::read(report.path.join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["files"].as_array().unwrap().len(), 2);
        assert_eq!(manifest["files"][0]["sha256"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_in_memory_store_sweep() {
        let store = InMemorySessionStore::new();
        let mut old = Session::new("old");
        old.last_access = Utc::now() - Duration::days(2);
        store.persist(&old).unwrap();
        store.get_or_create("new").unwrap();

        assert_eq!(store.sweep(Duration::days(1)).unwrap(), 1);
        assert_eq!(store.cached_ids(), vec!["new".to_string()]);
    }
}
