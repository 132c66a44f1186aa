//! Run-wide mutual exclusion between indexer processes.
//!
//! The lock is a directory: `create_dir` either succeeds atomically or fails because another
//! run holds it. Inside, `owner.json` records who holds it so contention can be reported,
//! dead owners can be cleared with [`RunLock::remove_stale`], and a restarting process can
//! pass the lock to its successor without ever releasing it ([`RunLock::hand_off`] /
//! [`RunLock::adopt`]).

use std::io::Write;
use std::path::{Path, PathBuf};

use atomic_write_file::AtomicWriteFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{LOCK_SENTINEL_NAME, RUN_LOCK_NAME};
use crate::error::{IndexerError, Result};

/// Contents of the owner sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub created_at: DateTime<Utc>,
    pub holder: String,
    /// Set while the lock is in transit to a successor process.
    #[serde(default)]
    pub handed_off: bool,
    /// Token a successor must present to adopt a handed-off lock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl LockOwner {
    fn current(holder: &str) -> Self {
        Self {
            pid: std::process::id(),
            created_at: Utc::now(),
            holder: holder.to_string(),
            handed_off: false,
            token: None,
        }
    }

    /// Whether the recorded process still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        is_pid_alive(self.pid)
    }

    fn describe(&self) -> String {
        format!(
            "{} pid {} since {}",
            self.holder,
            self.pid,
            self.created_at.to_rfc3339()
        )
    }
}

/// What [`RunLock::remove_stale`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleLockCheck {
    /// No lock directory exists.
    Absent,
    /// The lock was stale and has been removed.
    Removed { owner: Option<LockOwner> },
    /// The recorded owner is alive; the lock was left alone.
    Held { owner: LockOwner },
}

/// A held run lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct RunLock {
    dir: PathBuf,
    owner: LockOwner,
    active: bool,
}

impl RunLock {
    /// Path of the lock directory below `lock_dir`.
    #[must_use]
    pub fn lock_path(lock_dir: &Path) -> PathBuf {
        lock_dir.join(RUN_LOCK_NAME)
    }

    /// Take the lock or fail immediately with [`IndexerError::LockContention`].
    pub fn acquire(lock_dir: &Path, holder: &str) -> Result<Self> {
        fs_err::create_dir_all(lock_dir)?;
        let dir = Self::lock_path(lock_dir);
        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = read_owner(&dir)
                    .ok()
                    .flatten()
                    .map(|owner| owner.describe());
                return Err(IndexerError::LockContention { path: dir, holder });
            }
            Err(err) => return Err(err.into()),
        }

        let owner = LockOwner::current(holder);
        let lock = Self {
            dir,
            owner,
            active: true,
        };
        lock.write_owner()?;
        tracing::debug!(lock.path = %lock.dir.display(), lock.pid = lock.owner.pid, "run lock acquired");
        Ok(lock)
    }

    /// Take over a lock that a predecessor handed off with `token`.
    pub fn adopt(lock_dir: &Path, token: &str, holder: &str) -> Result<Self> {
        let dir = Self::lock_path(lock_dir);
        let previous = read_owner(&dir)?.ok_or_else(|| IndexerError::InvalidLockToken {
            path: dir.clone(),
        })?;
        if !previous.handed_off || previous.token.as_deref() != Some(token) {
            return Err(IndexerError::InvalidLockToken { path: dir });
        }

        let lock = Self {
            dir,
            owner: LockOwner::current(holder),
            active: true,
        };
        lock.write_owner()?;
        tracing::debug!(
            lock.path = %lock.dir.display(),
            lock.previous_pid = previous.pid,
            "run lock adopted"
        );
        Ok(lock)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Mark the lock as in transit and return the token the successor must present.
    ///
    /// The lock directory stays in place; nobody else can acquire it in between.
    pub fn hand_off(mut self) -> Result<String> {
        let token = uuid::Uuid::new_v4().to_string();
        self.owner.handed_off = true;
        self.owner.token = Some(token.clone());
        self.write_owner()?;
        self.active = false;
        tracing::debug!(lock.path = %self.dir.display(), "run lock handed off");
        Ok(token)
    }

    /// Remove the lock directory.
    pub fn release(mut self) -> Result<()> {
        self.active = false;
        remove_lock_dir(&self.dir)?;
        tracing::debug!(lock.path = %self.dir.display(), "run lock released");
        Ok(())
    }

    /// Leave the lock directory in place, e.g. after a failed flush that needs attention.
    pub fn abandon(mut self) -> PathBuf {
        self.active = false;
        tracing::warn!(lock.path = %self.dir.display(), "run lock left in place");
        self.dir.clone()
    }

    /// Owner recorded in the lock below `lock_dir`, if any.
    pub fn inspect(lock_dir: &Path) -> Result<Option<LockOwner>> {
        read_owner(&Self::lock_path(lock_dir))
    }

    /// Remove the lock below `lock_dir` if its owner is gone.
    ///
    /// A lock whose sentinel is missing or unreadable counts as stale.
    pub fn remove_stale(lock_dir: &Path) -> Result<StaleLockCheck> {
        let dir = Self::lock_path(lock_dir);
        if !dir.exists() {
            return Ok(StaleLockCheck::Absent);
        }
        let owner = read_owner(&dir).unwrap_or_else(|err| {
            tracing::warn!(lock.path = %dir.display(), error = %err, "unreadable lock sentinel");
            None
        });
        if let Some(owner) = &owner {
            if owner.is_alive() {
                return Ok(StaleLockCheck::Held {
                    owner: owner.clone(),
                });
            }
        }
        remove_lock_dir(&dir)?;
        tracing::warn!(
            lock.path = %dir.display(),
            lock.pid = owner.as_ref().map(|o| o.pid),
            "stale run lock removed"
        );
        Ok(StaleLockCheck::Removed { owner })
    }

    fn write_owner(&self) -> Result<()> {
        let mut file = AtomicWriteFile::open(self.dir.join(LOCK_SENTINEL_NAME))?;
        file.write_all(&serde_json::to_vec_pretty(&self.owner)?)?;
        file.commit()?;
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = remove_lock_dir(&self.dir) {
                tracing::warn!(lock.path = %self.dir.display(), error = %err, "failed to release run lock");
            }
        }
    }
}

fn read_owner(dir: &Path) -> Result<Option<LockOwner>> {
    match fs_err::read(dir.join(LOCK_SENTINEL_NAME)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn remove_lock_dir(dir: &Path) -> Result<()> {
    match fs_err::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(unix)]
fn is_pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM means the process exists but belongs to someone else.
    !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
fn is_pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_without_retry() {
        let dir = tempdir().expect("tmp");
        let first = RunLock::acquire(dir.path(), "test").expect("first");
        let err = RunLock::acquire(dir.path(), "test").expect_err("contended");
        match err {
            IndexerError::LockContention { holder, .. } => {
                let holder = holder.expect("holder described");
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("unexpected error {other:?}"),
        }
        first.release().expect("release");
        RunLock::acquire(dir.path(), "test").expect("free again");
    }

    #[test]
    fn drop_releases_and_abandon_keeps() {
        let dir = tempdir().expect("tmp");
        {
            let _lock = RunLock::acquire(dir.path(), "test").expect("acquire");
            assert!(RunLock::lock_path(dir.path()).exists());
        }
        assert!(!RunLock::lock_path(dir.path()).exists());

        let lock = RunLock::acquire(dir.path(), "test").expect("acquire");
        let kept = lock.abandon();
        assert!(kept.exists());
        assert!(RunLock::acquire(dir.path(), "test").is_err());
    }

    #[test]
    fn hand_off_requires_the_matching_token() {
        let dir = tempdir().expect("tmp");
        let lock = RunLock::acquire(dir.path(), "first").expect("acquire");
        let token = lock.hand_off().expect("hand off");
        assert!(RunLock::lock_path(dir.path()).exists());
        assert!(RunLock::acquire(dir.path(), "intruder").is_err());

        let err = RunLock::adopt(dir.path(), "wrong", "second").expect_err("bad token");
        assert!(matches!(err, IndexerError::InvalidLockToken { .. }));

        let adopted = RunLock::adopt(dir.path(), &token, "second").expect("adopt");
        assert_eq!(adopted.owner().holder, "second");
        assert!(!adopted.owner().handed_off);
        // the token is single use
        assert!(RunLock::adopt(dir.path(), &token, "third").is_err());
    }

    #[test]
    fn remove_stale_leaves_live_owner_alone() {
        let dir = tempdir().expect("tmp");
        assert_eq!(
            RunLock::remove_stale(dir.path()).expect("check"),
            StaleLockCheck::Absent
        );
        let lock = RunLock::acquire(dir.path(), "live").expect("acquire");
        match RunLock::remove_stale(dir.path()).expect("check") {
            StaleLockCheck::Held { owner } => assert_eq!(owner.pid, std::process::id()),
            other => panic!("unexpected {other:?}"),
        }
        drop(lock);
    }

    #[cfg(unix)]
    #[test]
    fn remove_stale_clears_dead_owner_and_missing_sentinel() {
        let dir = tempdir().expect("tmp");
        let lock_path = RunLock::lock_path(dir.path());

        fs_err::create_dir_all(&lock_path).expect("mkdir");
        let dead = LockOwner {
            pid: i32::MAX as u32,
            created_at: Utc::now(),
            holder: "crashed".into(),
            handed_off: false,
            token: None,
        };
        fs_err::write(
            lock_path.join(LOCK_SENTINEL_NAME),
            serde_json::to_vec(&dead).expect("json"),
        )
        .expect("sentinel");
        assert!(matches!(
            RunLock::remove_stale(dir.path()).expect("check"),
            StaleLockCheck::Removed { owner: Some(_) }
        ));
        assert!(!lock_path.exists());

        fs_err::create_dir_all(&lock_path).expect("mkdir");
        assert_eq!(
            RunLock::remove_stale(dir.path()).expect("check"),
            StaleLockCheck::Removed { owner: None }
        );
    }
}
