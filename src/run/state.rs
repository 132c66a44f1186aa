use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::DocumentOutcome;

/// Phases of a run, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Enumerating,
    Processing,
    FlushingAndExiting,
    Restarting,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Enumerating => "enumerating",
            Self::Processing => "processing",
            Self::FlushingAndExiting => "flushing_and_exiting",
            Self::Restarting => "restarting",
        })
    }
}

/// Mutable state of the run in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub phase: RunPhase,
    pub lock_held: bool,
    pub queue_path: Option<PathBuf>,
    pub total: usize,
    /// Line offset of the next queue entry to process.
    pub cursor: usize,
    /// Unflushed mutations exist.
    pub dirty: bool,
}

impl RunState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Enumerating,
            lock_held: false,
            queue_path: None,
            total: 0,
            cursor: 0,
            dirty: false,
        }
    }

    pub fn enter(&mut self, phase: RunPhase) {
        tracing::debug!(run.from = %self.phase, run.to = %phase, run.cursor = self.cursor, "run phase");
        self.phase = phase;
    }

    /// Whether every queued document has been processed.
    #[must_use]
    pub fn queue_complete(&self) -> bool {
        self.cursor >= self.total
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a successor process needs to continue a restarted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    pub queue_path: PathBuf,
    pub cursor: usize,
    pub lock_token: String,
    pub force: bool,
}

impl ResumeState {
    /// Command-line arguments (program name excluded) for the successor process.
    ///
    /// `--clear`/`-c` becomes `--force`, the lock is never removed again, and earlier resume
    /// arguments are replaced with the current ones.
    #[must_use]
    pub fn successor_args<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        const DROPPED_WITH_VALUE: [&str; 5] = ["--start", "-s", "--temp-file", "-t", "--lock-token"];

        let mut out = Vec::new();
        let mut has_force = false;
        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            if DROPPED_WITH_VALUE.contains(&arg.as_str()) {
                args.next();
                continue;
            }
            if DROPPED_WITH_VALUE
                .iter()
                .any(|flag| flag.starts_with("--") && arg.starts_with(&format!("{flag}=")))
            {
                continue;
            }
            if attached_short_value(&arg) {
                continue;
            }
            match arg.as_str() {
                "--clear" | "-c" | "--remove-locks" | "-l" => continue,
                "--force" | "-f" => {
                    if has_force {
                        continue;
                    }
                    has_force = true;
                }
                _ => {}
            }
            if let Some(cluster) = short_flag_cluster(&arg) {
                let kept: String = cluster.chars().filter(|c| !matches!(c, 'c' | 'l')).collect();
                if cluster.contains('f') {
                    has_force = true;
                }
                if !kept.is_empty() {
                    out.push(format!("-{kept}"));
                }
                continue;
            }
            out.push(arg);
        }

        if self.force && !has_force {
            out.push("--force".to_string());
        }
        out.push("--start".to_string());
        out.push(self.cursor.to_string());
        out.push("--temp-file".to_string());
        out.push(self.queue_path.display().to_string());
        out.push("--lock-token".to_string());
        out.push(self.lock_token.clone());
        out
    }
}

/// `-s5` or `-t/tmp/q.txt`: a resume option with its value attached.
fn attached_short_value(arg: &str) -> bool {
    !arg.starts_with("--") && arg.len() > 2 && (arg.starts_with("-s") || arg.starts_with("-t"))
}

/// Bundled boolean short flags such as `-cq`.
fn short_flag_cluster(arg: &str) -> Option<&str> {
    let cluster = arg.strip_prefix('-')?;
    (cluster.len() > 1 && cluster.chars().all(|c| matches!(c, 'c' | 'f' | 'q' | 'l')))
        .then_some(cluster)
}

/// Counters of one or more process instances of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Documents in the queue.
    pub total: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub disabled: usize,
    /// Documents skipped because rendering failed.
    pub failed: usize,
    pub restarts: usize,
    pub interrupted: bool,
    /// Line offset the run stopped at.
    pub cursor: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: DocumentOutcome) {
        match outcome {
            DocumentOutcome::Indexed => self.indexed += 1,
            DocumentOutcome::Unchanged => self.unchanged += 1,
            DocumentOutcome::Deleted => self.deleted += 1,
            DocumentOutcome::Disabled => self.disabled += 1,
        }
    }

    /// Documents that changed the index.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.indexed + self.deleted
    }

    /// Fold the counters of a later process instance into this one.
    pub fn absorb(&mut self, later: &RunSummary) {
        self.total = later.total.max(self.total);
        self.indexed += later.indexed;
        self.unchanged += later.unchanged;
        self.deleted += later.deleted;
        self.disabled += later.disabled;
        self.failed += later.failed;
        self.restarts += later.restarts;
        self.interrupted = later.interrupted;
        self.cursor = later.cursor;
    }
}

/// How a process instance of a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The whole queue was processed; the queue file is gone and the lock released.
    Completed(RunSummary),
    /// Stopped early on request; the queue file is kept for a later resume.
    Interrupted(RunSummary),
    /// A resource limit was hit; the lock is handed off and a successor must continue.
    Restart {
        state: ResumeState,
        summary: RunSummary,
    },
}

impl RunOutcome {
    #[must_use]
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Completed(summary) | Self::Interrupted(summary) => summary,
            Self::Restart { summary, .. } => summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(force: bool) -> ResumeState {
        ResumeState {
            queue_path: PathBuf::from("/tmp/q.txt"),
            cursor: 7,
            lock_token: "tok".into(),
            force,
        }
    }

    #[test]
    fn successor_args_turn_clear_into_force_and_replace_resume_args() {
        let args = state(true).successor_args([
            "--clear", "-q", "--start", "3", "--temp-file", "/old", "--lock-token", "old", "-l",
            "--namespace", "wiki",
        ]);
        assert_eq!(
            args,
            vec![
                "-q", "--namespace", "wiki", "--force", "--start", "7", "--temp-file",
                "/tmp/q.txt", "--lock-token", "tok",
            ]
        );
    }

    #[test]
    fn successor_args_do_not_duplicate_force() {
        let args = state(true).successor_args(["-cf", "--force", "--start=2"]);
        assert_eq!(
            args,
            vec!["-f", "--start", "7", "--temp-file", "/tmp/q.txt", "--lock-token", "tok"]
        );

        let args = state(false).successor_args(["-cq"]);
        assert_eq!(args[0], "-q");
        assert!(!args.contains(&"--force".to_string()));
    }

    #[test]
    fn successor_args_drop_attached_short_resume_values() {
        let args = state(false).successor_args(["-s5", "-t/old/q.txt", "-q", "-n", "wiki"]);
        assert_eq!(
            args,
            vec![
                "-q", "-n", "wiki", "--start", "7", "--temp-file", "/tmp/q.txt", "--lock-token",
                "tok",
            ]
        );
    }

    #[test]
    fn summary_absorbs_later_instances() {
        let mut first = RunSummary {
            total: 3,
            indexed: 2,
            cursor: 2,
            ..RunSummary::default()
        };
        first.restarts = 1;
        let later = RunSummary {
            total: 3,
            indexed: 1,
            unchanged: 0,
            cursor: 3,
            ..RunSummary::default()
        };
        first.absorb(&later);
        assert_eq!(first.indexed, 3);
        assert_eq!(first.processed(), 3);
        assert_eq!(first.cursor, 3);
        assert_eq!(first.restarts, 1);
    }
}
