use async_trait::async_trait;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::ids;
use crate::model::{Checkpoint, SessionFilter};

const LOCK_FILE_NAME: &str = ".store.lock";
const CHECKPOINT_EXT: &str = "json";
const TMP_MARKER: &str = ".tmp-";

/// Durable checkpoint persistence. Pure storage: no state-machine rules live here.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists `checkpoint`. Its sequence must be greater than any stored for the session.
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    async fn get_latest(&self, session_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Latest checkpoint of every matching session, most recently updated first.
    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Checkpoint>, StoreError>;

    /// Deletes every checkpoint of a session. Returns `false` if nothing was stored.
    async fn remove(&self, session_id: &str) -> Result<bool, StoreError>;

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn sort_and_limit(mut checkpoints: Vec<Checkpoint>, filter: &SessionFilter) -> Vec<Checkpoint> {
    checkpoints.sort_by(|a, b| {
        b.session
            .updated_at_ms
            .cmp(&a.session.updated_at_ms)
            .then_with(|| b.sequence.cmp(&a.sequence))
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    if let Some(limit) = filter.limit {
        checkpoints.truncate(limit);
    }
    checkpoints
}

/// One directory per session holding `<seq:020>.json` files.
pub struct FileSessionStore {
    dir: PathBuf,
    retain: usize,
    latest: Mutex<HashMap<String, u64>>,
    lock: Mutex<Option<File>>,
}

impl FileSessionStore {
    /// Opens (creating if needed) the store and takes the directory lock.
    pub fn open(dir: impl AsRef<Path>, retain: usize) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("create store dir", &dir, e))?;

        let lock_path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io("open store lock", &lock_path, e))?;
        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(dir));
        }

        let removed = remove_stale_temp_files(&dir);
        if removed > 0 {
            log::warn!(
                "Removed {removed} leftover temp checkpoint(s) under {}",
                dir.display()
            );
        }
        log::info!("Session store opened at {}", dir.display());

        Ok(Self {
            dir,
            retain: retain.max(1),
            latest: Mutex::new(HashMap::new()),
            lock: Mutex::new(Some(file)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        if !ids::is_valid(session_id) {
            return Err(StoreError::InvalidId(session_id.to_string()));
        }
        Ok(self.dir.join(session_id))
    }

    fn release_lock(&self) {
        if let Some(file) = lock_or_recover(&self.lock).take() {
            let _ = file.unlock();
        }
    }
}

impl Drop for FileSessionStore {
    fn drop(&mut self) {
        self.release_lock();
    }
}

async fn blocking<T, F>(task: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let session_dir = self.session_dir(&checkpoint.session_id)?;
        let known = lock_or_recover(&self.latest)
            .get(&checkpoint.session_id)
            .copied();
        let latest = match known {
            Some(seq) => Some(seq),
            None => {
                let dir = session_dir.clone();
                blocking(move || Ok(checkpoint_files(&dir)?.last().map(|(seq, _)| *seq))).await?
            }
        };
        if let Some(latest) = latest {
            if checkpoint.sequence <= latest {
                return Err(StoreError::SequenceRegression {
                    session_id: checkpoint.session_id.clone(),
                    sequence: checkpoint.sequence,
                    latest,
                });
            }
        }

        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let sequence = checkpoint.sequence;
        let retain = self.retain;
        blocking(move || {
            fs::create_dir_all(&session_dir)
                .map_err(|e| StoreError::io("create session dir", &session_dir, e))?;
            let path = session_dir.join(checkpoint_file_name(sequence));
            write_atomic(&path, &bytes)?;
            prune(&session_dir, retain);
            Ok(())
        })
        .await?;

        lock_or_recover(&self.latest).insert(checkpoint.session_id.clone(), sequence);
        log::debug!(
            "Checkpoint {sequence} written for {}",
            checkpoint.session_id
        );
        Ok(())
    }

    async fn get_latest(&self, session_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let session_dir = self.session_dir(session_id)?;
        let loaded = blocking(move || read_latest(&session_dir)).await?;
        if let Some(checkpoint) = &loaded {
            let mut latest = lock_or_recover(&self.latest);
            let entry = latest.entry(checkpoint.session_id.clone()).or_insert(0);
            *entry = (*entry).max(checkpoint.sequence);
        }
        Ok(loaded)
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Checkpoint>, StoreError> {
        let dir = self.dir.clone();
        let filter_owned = filter.clone();
        let checkpoints = blocking(move || {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => return Err(StoreError::io("read store dir", &dir, e)),
            };
            let mut out = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                if !path.is_dir() || !ids::is_valid(name) {
                    continue;
                }
                match read_latest(&path) {
                    Ok(Some(checkpoint)) if filter_owned.matches(&checkpoint.session) => {
                        out.push(checkpoint)
                    }
                    Ok(_) => {}
                    Err(err) => log::warn!("Skipping session {name} while listing: {err}"),
                }
            }
            Ok(out)
        })
        .await?;
        Ok(sort_and_limit(checkpoints, filter))
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        let session_dir = self.session_dir(session_id)?;
        let removed = blocking(move || match fs::remove_dir_all(&session_dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io("remove session dir", &session_dir, e)),
        })
        .await?;
        lock_or_recover(&self.latest).remove(session_id);
        if removed {
            log::debug!("Removed checkpoints of {session_id}");
        }
        Ok(removed)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.release_lock();
        log::info!("Session store closed at {}", self.dir.display());
        Ok(())
    }
}

fn checkpoint_file_name(sequence: u64) -> String {
    format!("{sequence:020}.{CHECKPOINT_EXT}")
}

/// Checkpoint files of one session, ascending by sequence.
fn checkpoint_files(session_dir: &Path) -> Result<Vec<(u64, PathBuf)>, StoreError> {
    let entries = match fs::read_dir(session_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io("read session dir", session_dir, e)),
    };
    let mut files: Vec<(u64, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXT) {
                return None;
            }
            let seq = path.file_stem()?.to_str()?.parse::<u64>().ok()?;
            Some((seq, path))
        })
        .collect();
    files.sort_by_key(|(seq, _)| *seq);
    Ok(files)
}

/// Newest readable checkpoint; corrupt files are skipped with a warning.
fn read_latest(session_dir: &Path) -> Result<Option<Checkpoint>, StoreError> {
    for (_, path) in checkpoint_files(session_dir)?.into_iter().rev() {
        match read_checkpoint(&path) {
            Ok(checkpoint) => return Ok(Some(checkpoint)),
            Err(err) => log::warn!("Falling back past unreadable checkpoint: {err}"),
        }
    }
    Ok(None)
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io("read checkpoint", path, e))?;
    let checkpoint: Checkpoint =
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if checkpoint.sequence != checkpoint.session.checkpoint_seq {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!(
                "sequence {} does not match session checkpoint {}",
                checkpoint.sequence, checkpoint.session.checkpoint_seq
            ),
        });
    }
    Ok(checkpoint)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::io("resolve parent", path, std::io::ErrorKind::NotFound.into()))?;
    let tmp = parent.join(format!(
        ".{}{TMP_MARKER}{}",
        path.file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("checkpoint"),
        std::process::id()
    ));

    {
        let mut file = File::create(&tmp).map_err(|e| StoreError::io("create tmp", &tmp, e))?;
        file.write_all(bytes)
            .map_err(|e| StoreError::io("write tmp", &tmp, e))?;
        file.sync_all()
            .map_err(|e| StoreError::io("sync tmp", &tmp, e))?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io("rename tmp", path, e));
    }
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn prune(session_dir: &Path, retain: usize) {
    let files = match checkpoint_files(session_dir) {
        Ok(files) => files,
        Err(err) => {
            log::warn!("Checkpoint prune skipped: {err}");
            return;
        }
    };
    let excess = files.len().saturating_sub(retain);
    for (_, path) in files.into_iter().take(excess) {
        if let Err(err) = fs::remove_file(&path) {
            log::warn!("Failed to prune checkpoint {}: {err}", path.display());
        }
    }
}

fn remove_stale_temp_files(dir: &Path) -> usize {
    let mut removed = 0;
    let Ok(sessions) = fs::read_dir(dir) else {
        return 0;
    };
    for session in sessions.flatten() {
        let path = session.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(entries) = fs::read_dir(&path) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let is_tmp = name
                .to_str()
                .is_some_and(|n| n.starts_with('.') && n.contains(TMP_MARKER));
            if is_tmp && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }
    removed
}

/// In-process store with the same contract as [`FileSessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Vec<Checkpoint>>>,
    retain: Option<usize>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retain: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            retain: Some(retain.max(1)),
        }
    }

    /// Every retained checkpoint of one session, ascending.
    pub fn history(&self, session_id: &str) -> Vec<Checkpoint> {
        lock_or_recover(&self.sessions)
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        if !ids::is_valid(&checkpoint.session_id) {
            return Err(StoreError::InvalidId(checkpoint.session_id.clone()));
        }
        let mut sessions = lock_or_recover(&self.sessions);
        let history = sessions.entry(checkpoint.session_id.clone()).or_default();
        if let Some(last) = history.last() {
            if checkpoint.sequence <= last.sequence {
                return Err(StoreError::SequenceRegression {
                    session_id: checkpoint.session_id.clone(),
                    sequence: checkpoint.sequence,
                    latest: last.sequence,
                });
            }
        }
        history.push(checkpoint.clone());
        if let Some(retain) = self.retain {
            let excess = history.len().saturating_sub(retain);
            history.drain(..excess);
        }
        Ok(())
    }

    async fn get_latest(&self, session_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(lock_or_recover(&self.sessions)
            .get(session_id)
            .and_then(|history| history.last().cloned()))
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<Checkpoint>, StoreError> {
        let checkpoints = lock_or_recover(&self.sessions)
            .values()
            .filter_map(|history| history.last())
            .filter(|checkpoint| filter.matches(&checkpoint.session))
            .cloned()
            .collect();
        Ok(sort_and_limit(checkpoints, filter))
    }

    async fn remove(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(lock_or_recover(&self.sessions).remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{sample_session, SessionState};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn checkpoint(id: &str, seq: u64, updated: u64) -> Checkpoint {
        let mut session = sample_session(id);
        session.checkpoint_seq = seq;
        session.updated_at_ms = updated;
        Checkpoint::of(&session)
    }

    #[tokio::test]
    async fn file_store_round_trips_latest_checkpoint() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileSessionStore::open(temp.path(), 8).expect("open");
        store.put(&checkpoint("s1", 1, 10)).await.expect("put 1");
        store.put(&checkpoint("s1", 2, 20)).await.expect("put 2");

        let latest = store.get_latest("s1").await.expect("get").expect("some");
        assert_eq!(latest.sequence, 2);
        assert!(temp.path().join("s1").join(checkpoint_file_name(2)).exists());
        assert!(store.get_latest("nope").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn sequence_must_increase_even_after_reopen() {
        let temp = TempDir::new().expect("tempdir");
        {
            let store = FileSessionStore::open(temp.path(), 8).expect("open");
            store.put(&checkpoint("s1", 3, 10)).await.expect("put");
            store.close().await.expect("close");
        }
        let store = FileSessionStore::open(temp.path(), 8).expect("reopen");
        let err = store
            .put(&checkpoint("s1", 3, 11))
            .await
            .expect_err("regression");
        assert!(matches!(err, StoreError::SequenceRegression { latest: 3, .. }));
    }

    #[tokio::test]
    async fn corrupt_newest_checkpoint_falls_back() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileSessionStore::open(temp.path(), 8).expect("open");
        store.put(&checkpoint("s1", 1, 10)).await.expect("put");
        fs::write(
            temp.path().join("s1").join(checkpoint_file_name(2)),
            b"{ half a checkpo",
        )
        .expect("write corrupt");

        let latest = store.get_latest("s1").await.expect("get").expect("some");
        assert_eq!(latest.sequence, 1);
    }

    #[tokio::test]
    async fn old_checkpoints_are_pruned() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileSessionStore::open(temp.path(), 2).expect("open");
        for seq in 1..=5 {
            store.put(&checkpoint("s1", seq, seq)).await.expect("put");
        }
        let files = checkpoint_files(&temp.path().join("s1")).expect("files");
        let seqs: Vec<u64> = files.into_iter().map(|(seq, _)| seq).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[tokio::test]
    async fn second_open_is_rejected_while_locked() {
        let temp = TempDir::new().expect("tempdir");
        let _store = FileSessionStore::open(temp.path(), 8).expect("open");
        let err = FileSessionStore::open(temp.path(), 8)
            .err()
            .expect("second open must fail");
        assert!(matches!(err, StoreError::Locked(_)));
    }

    #[tokio::test]
    async fn stale_temp_files_are_removed_on_open() {
        let temp = TempDir::new().expect("tempdir");
        let session_dir = temp.path().join("s1");
        fs::create_dir_all(&session_dir).expect("mkdir");
        let stale = session_dir.join(".00000000000000000002.json.tmp-4242");
        fs::write(&stale, b"partial").expect("write");

        let _store = FileSessionStore::open(temp.path(), 8).expect("open");
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn list_filters_and_orders_by_recency() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileSessionStore::open(temp.path(), 8).expect("open");
        store.put(&checkpoint("old", 1, 100)).await.expect("put");
        store.put(&checkpoint("new", 1, 300)).await.expect("put");
        let mut done = checkpoint("done", 2, 200);
        done.session.state = SessionState::Completed;
        store.put(&done).await.expect("put");

        let all = store.list(&SessionFilter::default()).await.expect("list");
        let ids: Vec<&str> = all.iter().map(|c| c.session_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "done", "old"]);

        let completed = store
            .list(&SessionFilter {
                state: Some(SessionState::Completed),
                ..SessionFilter::default()
            })
            .await
            .expect("list");
        assert_eq!(completed.len(), 1);

        let limited = store
            .list(&SessionFilter {
                limit: Some(1),
                ..SessionFilter::default()
            })
            .await
            .expect("list");
        assert_eq!(limited[0].session_id, "new");
    }

    #[tokio::test]
    async fn memory_store_enforces_same_contract() {
        let store = MemorySessionStore::with_retention(2);
        store.put(&checkpoint("m1", 1, 1)).await.expect("put");
        store.put(&checkpoint("m1", 2, 2)).await.expect("put");
        store.put(&checkpoint("m1", 3, 3)).await.expect("put");
        assert!(store.put(&checkpoint("m1", 3, 4)).await.is_err());
        assert!(store.put(&checkpoint("../x", 1, 1)).await.is_err());

        let history: Vec<u64> = store.history("m1").iter().map(|c| c.sequence).collect();
        assert_eq!(history, vec![2, 3]);
    }

    #[tokio::test]
    async fn removed_session_is_gone_and_can_restart_at_one() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileSessionStore::open(temp.path(), 8).expect("open");
        store.put(&checkpoint("s1", 1, 10)).await.expect("put 1");
        store.put(&checkpoint("s1", 2, 20)).await.expect("put 2");

        assert!(store.remove("s1").await.expect("remove"));
        assert!(!temp.path().join("s1").exists());
        assert!(store.get_latest("s1").await.expect("get").is_none());
        assert!(!store.remove("s1").await.expect("remove again"));
        store.put(&checkpoint("s1", 1, 30)).await.expect("fresh history");
        assert!(store.remove("../s1").await.is_err());
    }
}
