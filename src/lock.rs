//! Exclusive per-document lock.
//!
//! A session holds `<document>.lock`, created with `create_new` so exactly one
//! process can own it. The file carries [`LockHolder`] metadata so a caller
//! that loses the race can report who holds the document.
//!
//! The guard removes the file on drop, which covers every exit path of a
//! session: normal return, `?` propagation and unwinding.
//!
//! ## Abandoned locks
//!
//! A holder killed before its guard drops leaves the file behind. A lock is
//! reclaimed when its holder process is known to be gone, or when it is older
//! than the caller's `stale_after` bound. Reclaiming happens at most once per
//! [`DocumentLock::acquire`] call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Metadata written into a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Process id of the holder.
    pub pid: u32,
    /// Session that acquired the lock.
    pub session_id: Uuid,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

/// Path of the lock file guarding `document`.
pub fn lock_path(document: &Path) -> PathBuf {
    let mut name = document
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    document.with_file_name(name)
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct DocumentLock {
    path: PathBuf,
    holder: LockHolder,
}

impl DocumentLock {
    /// Acquire the lock for `document`, polling every `poll` until `wait` has elapsed.
    ///
    /// A zero `wait` makes a single attempt. An abandoned lock (see module docs)
    /// is removed and the attempt repeated.
    pub fn acquire(
        document: &Path,
        session_id: Uuid,
        wait: Duration,
        poll: Duration,
        stale_after: Duration,
    ) -> EngineResult<Self> {
        let path = lock_path(document);
        let holder = LockHolder {
            pid: std::process::id(),
            session_id,
            acquired_at: Utc::now(),
        };
        let payload = serde_json::to_vec(&holder)?;
        let started = Instant::now();
        let mut reclaimed = false;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(&payload) {
                        let _ = fs::remove_file(&path);
                        return Err(e.into());
                    }
                    debug!(lock = %path.display(), %session_id, "document lock acquired");
                    return Ok(Self { path, holder });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !reclaimed && reclaim_if_abandoned(&path, stale_after) {
                        reclaimed = true;
                        continue;
                    }
                    if started.elapsed() >= wait {
                        let holder = read_holder(&path);
                        warn!(
                            lock = %path.display(),
                            holder_session = ?holder.as_ref().map(|h| h.session_id),
                            "document lock contended"
                        );
                        return Err(EngineError::LockContention {
                            path: document.to_path_buf(),
                            holder,
                        });
                    }
                    thread::sleep(poll.min(wait.saturating_sub(started.elapsed())).max(Duration::from_millis(1)));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Metadata this lock was taken with.
    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(lock = %self.path.display(), "document lock released"),
            Err(e) => warn!(lock = %self.path.display(), error = %e, "failed to remove lock file"),
        }
    }
}

/// Read holder metadata from an existing lock file.
pub fn read_holder(lock_file: &Path) -> Option<LockHolder> {
    let bytes = fs::read(lock_file).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Whether process `pid` is running. `None` when the platform gives no cheap answer.
fn process_alive(pid: u32) -> Option<bool> {
    if cfg!(target_os = "linux") {
        Some(Path::new("/proc").join(pid.to_string()).exists())
    } else {
        None
    }
}

/// Age of a lock: from the holder's timestamp, or the file's mtime when the
/// metadata is unreadable (a holder that died mid-write).
fn lock_age(lock_file: &Path, holder: Option<&LockHolder>) -> Option<Duration> {
    match holder {
        Some(h) => (Utc::now() - h.acquired_at).to_std().ok(),
        None => fs::metadata(lock_file).ok()?.modified().ok()?.elapsed().ok(),
    }
}

/// Remove `lock_file` if its holder is gone or it is older than `stale_after`.
/// Returns whether the file was removed.
fn reclaim_if_abandoned(lock_file: &Path, stale_after: Duration) -> bool {
    let holder = read_holder(lock_file);
    let dead = holder.as_ref().and_then(|h| process_alive(h.pid)) == Some(false);
    let expired = lock_age(lock_file, holder.as_ref()).map_or(false, |age| age > stale_after);
    if !dead && !expired {
        return false;
    }

    // Another reclaimer may have replaced the file since it was read.
    if read_holder(lock_file) != holder {
        return false;
    }
    match fs::remove_file(lock_file) {
        Ok(()) => {
            warn!(
                lock = %lock_file.display(),
                holder_pid = ?holder.as_ref().map(|h| h.pid),
                holder_session = ?holder.as_ref().map(|h| h.session_id),
                dead,
                expired,
                "reclaimed abandoned document lock"
            );
            true
        }
        Err(e) => {
            debug!(lock = %lock_file.display(), error = %e, "abandoned lock already gone");
            e.kind() == ErrorKind::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    fn plant_lock(doc: &Path, holder: &LockHolder) {
        fs::write(lock_path(doc), serde_json::to_vec(holder).unwrap()).unwrap();
    }

    #[test]
    fn test_lock_path_is_sibling() {
        assert_eq!(lock_path(Path::new("/tmp/deck.json")), PathBuf::from("/tmp/deck.json.lock"));
    }

    #[test]
    fn test_second_acquire_reports_holder() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("deck.json");
        let first_session = Uuid::new_v4();

        let first = DocumentLock::acquire(&doc, first_session, Duration::ZERO, Duration::from_millis(1), HOUR).unwrap();
        assert_eq!(first.holder().session_id, first_session);

        let err = DocumentLock::acquire(&doc, Uuid::new_v4(), Duration::from_millis(20), Duration::from_millis(5), HOUR)
            .unwrap_err();
        match err {
            EngineError::LockContention { path, holder } => {
                assert_eq!(path, doc);
                assert_eq!(holder.map(|h| h.session_id), Some(first_session));
            }
            other => panic!("expected LockContention, got {other:?}"),
        }
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("deck.json");
        {
            let lock = DocumentLock::acquire(&doc, Uuid::new_v4(), Duration::ZERO, Duration::from_millis(1), HOUR).unwrap();
            assert!(lock.path().exists());
        }
        assert!(!lock_path(&doc).exists());
        DocumentLock::acquire(&doc, Uuid::new_v4(), Duration::ZERO, Duration::from_millis(1), HOUR).unwrap();
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("deck.json");
        let held = DocumentLock::acquire(&doc, Uuid::new_v4(), Duration::ZERO, Duration::from_millis(1), HOUR).unwrap();

        let waiter_doc = doc.clone();
        let waiter = thread::spawn(move || {
            DocumentLock::acquire(&waiter_doc, Uuid::new_v4(), Duration::from_secs(5), Duration::from_millis(5), HOUR)
                .map(|lock| lock.holder().pid)
        });
        thread::sleep(Duration::from_millis(30));
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), std::process::id());
    }

    #[test]
    fn test_lock_of_dead_process_is_reclaimed() {
        if process_alive(std::process::id()) != Some(true) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("deck.json");
        // Above the Linux pid_max ceiling, so never a live process.
        plant_lock(&doc, &LockHolder { pid: 4_194_305, session_id: Uuid::new_v4(), acquired_at: Utc::now() });

        let session = Uuid::new_v4();
        let lock = DocumentLock::acquire(&doc, session, Duration::ZERO, Duration::from_millis(1), HOUR).unwrap();
        assert_eq!(read_holder(lock.path()).map(|h| h.session_id), Some(session));
    }

    #[test]
    fn test_expired_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("deck.json");
        let old = Utc::now() - chrono::Duration::hours(2);
        plant_lock(&doc, &LockHolder { pid: std::process::id(), session_id: Uuid::new_v4(), acquired_at: old });

        DocumentLock::acquire(&doc, Uuid::new_v4(), Duration::ZERO, Duration::from_millis(1), HOUR).unwrap();
    }

    #[test]
    fn test_live_recent_lock_is_respected() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("deck.json");
        let holder = LockHolder { pid: std::process::id(), session_id: Uuid::new_v4(), acquired_at: Utc::now() };
        plant_lock(&doc, &holder);

        let err = DocumentLock::acquire(&doc, Uuid::new_v4(), Duration::ZERO, Duration::from_millis(1), HOUR)
            .unwrap_err();
        assert!(matches!(err, EngineError::LockContention { holder: Some(h), .. } if h == holder));
        assert!(lock_path(&doc).exists());
    }
}
