use std::path::PathBuf;

use crate::run::state::ResumeState;

/// Where a resumed run picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub queue_path: PathBuf,
    /// Line offset into the queue file.
    pub cursor: usize,
}

/// Caller-controlled behavior of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Wipe every partition and marker before enumerating. Implies `force`.
    pub clear: bool,
    /// Re-index documents even when their marker is current.
    pub force: bool,
    /// Only enumerate documents inside this namespace.
    pub namespace: Option<String>,
    /// Restart after this many documents changed the index in one process instance.
    pub max_runs: Option<usize>,
    /// Suppress progress output.
    pub quiet: bool,
    /// Skip enumeration and continue an existing queue.
    pub resume: Option<ResumePoint>,
    /// Adopt a lock handed off by a predecessor instead of acquiring it.
    pub lock_token: Option<String>,
    /// Clear a lock left behind by a dead process before acquiring.
    pub remove_locks: bool,
    /// Also enqueue known documents whose content is gone but whose marker remains.
    pub detect_deletions: bool,
    /// Enumerate without consulting access control.
    pub skip_acl: bool,
    /// Depth limit of the enumeration walk.
    pub depth: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            clear: false,
            force: false,
            namespace: None,
            max_runs: None,
            quiet: false,
            resume: None,
            lock_token: None,
            remove_locks: false,
            detect_deletions: false,
            skip_acl: true,
            depth: None,
        }
    }
}

impl RunOptions {
    /// Effective force flag: clearing the index forces every document.
    #[must_use]
    pub fn forced(&self) -> bool {
        self.force || self.clear
    }

    /// Options of the successor of a run that restarted with `state`.
    ///
    /// `clear` turns into `force`; the successor never clears again.
    #[must_use]
    pub fn resumed(&self, state: &ResumeState) -> Self {
        Self {
            clear: false,
            force: state.force,
            resume: Some(ResumePoint {
                queue_path: state.queue_path.clone(),
                cursor: state.cursor,
            }),
            lock_token: Some(state.lock_token.clone()),
            remove_locks: false,
            ..self.clone()
        }
    }
}
