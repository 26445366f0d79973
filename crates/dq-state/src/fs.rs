use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::{LockError, LockResult};
use crate::lock_store::{LockKey, LockStore, RunIdentifier};

const HELD: &str = "1";
const FREE: &str = "0";

/// Filesystem-backed lock store shared with the training workers.
///
/// Layout, one pair of files per lock:
/// - `<root>/<def|att>_<train|test>_lock_<run>.txt` holds `1` (held) or `0` (free)
/// - `<root>/<def|att>_<train|test>_port_<run>.txt` holds the last port
///
/// A missing lock file means free; a missing port file means no port yet.
pub struct FsLockStore {
    root: PathBuf,
}

impl FsLockStore {
    /// Create a store rooted at `root`. Nothing is touched on disk until the
    /// first write, which creates `root` if needed.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn lock_path(&self, run: &RunIdentifier, key: LockKey) -> PathBuf {
        self.root.join(format!(
            "{}_{}_lock_{}.txt",
            key.player.short(),
            key.phase,
            run
        ))
    }

    pub fn port_path(&self, run: &RunIdentifier, key: LockKey) -> PathBuf {
        self.root.join(format!(
            "{}_{}_port_{}.txt",
            key.player.short(),
            key.phase,
            run
        ))
    }

    fn read_trimmed(path: &Path) -> LockResult<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::Io(e)),
        }
    }

    // Atomic write: temp file in the same directory, then rename.
    fn write_atomic(&self, path: &Path, content: &str) -> LockResult<()> {
        fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl LockStore for FsLockStore {
    async fn is_unlocked(&self, run: &RunIdentifier, key: LockKey) -> LockResult<bool> {
        let path = self.lock_path(run, key);
        match Self::read_trimmed(&path)?.as_deref() {
            None | Some(FREE) => Ok(true),
            Some(HELD) => Ok(false),
            Some(other) => Err(LockError::Corrupt {
                path,
                content: other.to_string(),
            }),
        }
    }

    async fn acquire(&self, run: &RunIdentifier, key: LockKey) -> LockResult<()> {
        self.write_atomic(&self.lock_path(run, key), HELD)
    }

    async fn release(&self, run: &RunIdentifier, key: LockKey) -> LockResult<()> {
        self.write_atomic(&self.lock_path(run, key), FREE)
    }

    async fn read_port(&self, run: &RunIdentifier, key: LockKey) -> LockResult<Option<u16>> {
        let path = self.port_path(run, key);
        match Self::read_trimmed(&path)? {
            None => Ok(None),
            Some(content) => content
                .parse::<u16>()
                .map(Some)
                .map_err(|_| LockError::Corrupt { path, content }),
        }
    }

    async fn record_port(&self, run: &RunIdentifier, key: LockKey, port: u16) -> LockResult<()> {
        self.write_atomic(&self.port_path(run, key), &port.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsLockStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLockStore::new(dir.path());
        (dir, store)
    }

    fn run() -> RunIdentifier {
        RunIdentifier::new("s29").unwrap()
    }

    #[test]
    fn lock_and_port_paths_follow_naming() {
        let (_dir, store) = make_store();
        let lock = store.lock_path(&run(), LockKey::DEFENDER_TRAIN);
        let port = store.port_path(&run(), LockKey::ATTACKER_TEST);
        assert!(lock.ends_with("def_train_lock_s29.txt"));
        assert!(port.ends_with("att_test_port_s29.txt"));
    }

    #[tokio::test]
    async fn missing_lock_file_is_unlocked() {
        let (_dir, store) = make_store();
        assert!(store.is_unlocked(&run(), LockKey::DEFENDER_TRAIN).await.unwrap());
    }

    #[tokio::test]
    async fn acquire_writes_held_marker() {
        let (_dir, store) = make_store();
        store.acquire(&run(), LockKey::DEFENDER_TRAIN).await.unwrap();
        let content = fs::read_to_string(store.lock_path(&run(), LockKey::DEFENDER_TRAIN)).unwrap();
        assert_eq!(content, "1");
        assert!(!store.is_unlocked(&run(), LockKey::DEFENDER_TRAIN).await.unwrap());
    }

    #[tokio::test]
    async fn externally_written_marker_with_newline_is_read() {
        let (_dir, store) = make_store();
        fs::write(store.lock_path(&run(), LockKey::ATTACKER_TRAIN), "1\n").unwrap();
        assert!(!store.is_unlocked(&run(), LockKey::ATTACKER_TRAIN).await.unwrap());
        fs::write(store.lock_path(&run(), LockKey::ATTACKER_TRAIN), "0\n").unwrap();
        assert!(store.is_unlocked(&run(), LockKey::ATTACKER_TRAIN).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_lock_file_is_an_error() {
        let (_dir, store) = make_store();
        fs::write(store.lock_path(&run(), LockKey::DEFENDER_TEST), "yes").unwrap();
        match store.is_unlocked(&run(), LockKey::DEFENDER_TEST).await {
            Err(LockError::Corrupt { content, .. }) => assert_eq!(content, "yes"),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn port_round_trip_and_corrupt_port() {
        let (_dir, store) = make_store();
        assert_eq!(store.read_port(&run(), LockKey::DEFENDER_TRAIN).await.unwrap(), None);
        store.record_port(&run(), LockKey::DEFENDER_TRAIN, 25339).await.unwrap();
        assert_eq!(
            store.read_port(&run(), LockKey::DEFENDER_TRAIN).await.unwrap(),
            Some(25339)
        );

        fs::write(store.port_path(&run(), LockKey::DEFENDER_TRAIN), "port").unwrap();
        assert!(matches!(
            store.read_port(&run(), LockKey::DEFENDER_TRAIN).await,
            Err(LockError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn root_is_created_on_first_write_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("locks");
        let store = FsLockStore::new(&root);

        assert!(store.are_all_unlocked(&run()).await.unwrap());
        assert_eq!(store.read_port(&run(), LockKey::DEFENDER_TRAIN).await.unwrap(), None);
        assert!(!root.exists());

        store.acquire(&run(), LockKey::DEFENDER_TRAIN).await.unwrap();
        assert!(root.is_dir());
        assert!(!store.is_unlocked(&run(), LockKey::DEFENDER_TRAIN).await.unwrap());
    }

    #[tokio::test]
    async fn runs_do_not_share_files() {
        let (_dir, store) = make_store();
        let other = RunIdentifier::new("s30").unwrap();
        store.acquire(&run(), LockKey::DEFENDER_TRAIN).await.unwrap();
        assert!(store.is_unlocked(&other, LockKey::DEFENDER_TRAIN).await.unwrap());
    }
}
