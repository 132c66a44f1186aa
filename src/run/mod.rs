//! The run controller: lock, enumerate, process, then flush and exit or restart.
//!
//! A run moves through [`RunPhase::Enumerating`] → [`RunPhase::Processing`] →
//! ([`RunPhase::FlushingAndExiting`] | [`RunPhase::Restarting`]). Processing stops between
//! documents, never inside one: on interruption the controller flushes and exits keeping the
//! queue file for a later resume; on a resource limit it flushes, hands the lock off and returns
//! a [`ResumeState`] that a successor (a fresh process, or [`run_supervised`]) continues from.

mod interrupt;
mod options;
mod resources;
mod restart;
mod state;

use std::fmt;
use std::io::Write;

use tracing::instrument;

use crate::collab::{Collaborators, Permission, WalkDecision, WalkEntry, WalkOptions};
use crate::config::IndexerConfig;
use crate::engine::{DocumentOutcome, IndexEngine};
use crate::error::{IndexerError, Result};
use crate::id::{DocId, clean_id};
use crate::io::lock::{RunLock, StaleLockCheck};
use crate::io::queue::PendingQueue;

pub use interrupt::{InterruptToken, install_signal_handlers};
pub use options::{ResumePoint, RunOptions};
pub use resources::MemoryMonitor;
pub use restart::restart_process;
pub use state::{ResumeState, RunOutcome, RunPhase, RunState, RunSummary};

/// Holder name recorded in the lock sentinel.
const LOCK_HOLDER: &str = "docindex";

/// Why processing stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Finished,
    Interrupted,
    Restart,
}

/// Drives one process instance of a run.
pub struct RunController<'a> {
    config: &'a IndexerConfig,
    options: RunOptions,
    collab: Collaborators<'a>,
    interrupt: InterruptToken,
    state: RunState,
    summary: RunSummary,
}

impl<'a> RunController<'a> {
    pub fn new(
        config: &'a IndexerConfig,
        options: RunOptions,
        collab: Collaborators<'a>,
        interrupt: InterruptToken,
    ) -> Self {
        Self {
            config,
            options,
            collab,
            interrupt,
            state: RunState::new(),
            summary: RunSummary::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    #[must_use]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Run the whole queue (or until interrupted or restarted).
    #[instrument(skip_all, fields(run.clear = self.options.clear, run.force = self.options.force))]
    pub fn run(&mut self) -> Result<RunOutcome> {
        self.config.ensure_dirs()?;
        let lock = self.take_lock()?;
        let mut engine = IndexEngine::open_writable(self.config)?;

        if self.options.clear && self.options.resume.is_none() {
            self.say(format_args!("Clearing index... "));
            engine.clear()?;
            self.say(format_args!("done\n"));
        }

        let queue = match self.options.resume.clone() {
            Some(point) => {
                self.say(format_args!("Finding last position... "));
                let queue = PendingQueue::open(&point.queue_path)?;
                self.say(format_args!("resuming at {} of {}\n", point.cursor, queue.len()));
                self.state.cursor = point.cursor;
                queue
            }
            None => self.enumerate(&mut engine)?,
        };
        self.state.total = queue.len();
        self.state.queue_path = Some(queue.path().to_path_buf());
        self.summary.total = queue.len();

        self.state.enter(RunPhase::Processing);
        let stop = match self.process(&mut engine, &queue) {
            Ok(stop) => stop,
            Err(err) => return Err(self.abort(engine, lock, err)),
        };
        self.summary.cursor = self.state.cursor;

        match stop {
            Stop::Finished | Stop::Interrupted => self.finish(engine, lock, queue),
            Stop::Restart => self.restart(engine, lock, &queue),
        }
    }

    /// Index exactly one document under the run lock.
    #[instrument(skip_all, fields(doc.id = %id))]
    pub fn run_single(&mut self, id: &DocId) -> Result<DocumentOutcome> {
        self.config.ensure_dirs()?;
        let lock = self.take_lock()?;
        let mut engine = IndexEngine::open_writable(self.config)?;

        self.say(format_args!("{id}... "));
        let result = engine.index_document(id, self.options.forced(), &self.collab);
        let lock = self.flush(&mut engine, lock)?;
        lock.release()?;
        self.state.lock_held = false;

        let outcome = result?;
        self.summary.record(outcome);
        self.say(format_args!("{}\n", outcome_label(outcome)));
        Ok(outcome)
    }

    fn take_lock(&mut self) -> Result<RunLock> {
        let lock_dir = &self.config.lock_dir;
        let lock = match &self.options.lock_token {
            Some(token) => RunLock::adopt(lock_dir, token, LOCK_HOLDER)?,
            None => {
                if self.options.remove_locks {
                    self.say(format_args!("clearing lock... "));
                    match RunLock::remove_stale(lock_dir)? {
                        StaleLockCheck::Absent => self.say(format_args!("none found\n")),
                        StaleLockCheck::Removed { .. } => self.say(format_args!("done\n")),
                        StaleLockCheck::Held { owner } => self.say(format_args!(
                            "held by live process {} since {}\n",
                            owner.pid, owner.created_at
                        )),
                    }
                }
                RunLock::acquire(lock_dir, LOCK_HOLDER)?
            }
        };
        self.state.lock_held = true;
        Ok(lock)
    }

    fn enumerate(&mut self, engine: &mut IndexEngine) -> Result<PendingQueue> {
        self.say(format_args!("Searching pages... "));
        let namespace = self
            .options
            .namespace
            .as_deref()
            .map(clean_id)
            .filter(|ns| !ns.is_empty());
        let walk = WalkOptions {
            depth: self.options.depth,
            skip_acl: self.options.skip_acl,
        };
        let acl = self.collab.acl;
        let store = self.collab.store;

        let mut writer = PendingQueue::create(&self.config.tmp_dir)?;
        let mut failure: Option<IndexerError> = None;
        let walked = store.walk(namespace.as_deref(), walk, &mut |entry| match entry {
            WalkEntry::Namespace { .. } => WalkDecision::Include,
            WalkEntry::Document { id, .. } => {
                if !walk.skip_acl && acl.check_read(&id) < Permission::Read {
                    tracing::trace!(doc.id = %id, "not readable; skipped");
                    return WalkDecision::Skip;
                }
                if failure.is_none() {
                    if let Err(err) = writer.push(&id) {
                        failure = Some(err);
                    }
                }
                WalkDecision::Include
            }
        });
        if let Some(err) = walked.err().or(failure) {
            discard_queue(writer.path());
            return Err(err);
        }

        if self.options.detect_deletions {
            let mut vanished = 0;
            for id in engine.known_pages()? {
                if namespace.as_deref().is_some_and(|ns| !id.is_within(ns)) {
                    continue;
                }
                if !store.id_exists(&id) && engine.tracker().has_marker(&id) {
                    if let Err(err) = writer.push(&id) {
                        discard_queue(writer.path());
                        return Err(err);
                    }
                    vanished += 1;
                }
            }
            tracing::debug!(queue.vanished = vanished, "deleted documents enqueued");
        }

        let queue = writer.finish()?;
        self.say(format_args!("{} pages found.\n", queue.len()));
        tracing::info!(queue.path = %queue.path().display(), queue.total = queue.len(), "queue built");
        Ok(queue)
    }

    fn process(&mut self, engine: &mut IndexEngine, queue: &PendingQueue) -> Result<Stop> {
        let mut monitor = MemoryMonitor::new(self.config.memory_high_water_bytes());
        let mut changed = 0;
        let force = self.options.forced();
        let mut reader = queue.iter_from(self.state.cursor)?;

        while let Some(item) = reader.next() {
            match item {
                Ok((line, id)) => {
                    self.say(format_args!("{} of {}: {id}... ", line + 1, self.state.total));
                    match engine.index_document(&id, force, &self.collab) {
                        Ok(outcome) => {
                            self.summary.record(outcome);
                            if outcome.changed_index() {
                                changed += 1;
                            }
                            self.say(format_args!("{}\n", outcome_label(outcome)));
                        }
                        Err(err) if !err.is_fatal() => {
                            self.summary.failed += 1;
                            tracing::warn!(doc.id = %id, error = %err, "document skipped");
                            self.say(format_args!("failed\n"));
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => {
                    self.summary.failed += 1;
                    tracing::warn!(error = %err, "unreadable queue entry skipped");
                }
            }
            self.state.cursor = reader.position();
            self.state.dirty = engine.is_dirty();

            if self.state.queue_complete() {
                break;
            }
            if self.interrupt.is_interrupted() {
                tracing::info!(run.cursor = self.state.cursor, "interrupt requested");
                return Ok(Stop::Interrupted);
            }
            if monitor.exceeded() {
                return Ok(Stop::Restart);
            }
            if self.options.max_runs.is_some_and(|max| changed >= max) {
                tracing::info!(run.changed = changed, "max runs reached");
                return Ok(Stop::Restart);
            }
        }
        Ok(Stop::Finished)
    }

    /// Flush the engine; on failure leave the lock in place and surface the error.
    fn flush(&mut self, engine: &mut IndexEngine, lock: RunLock) -> Result<RunLock> {
        match engine.flush() {
            Ok(report) => {
                self.state.dirty = false;
                tracing::debug!(index.flushed = report.partitions.len(), "run flushed");
                Ok(lock)
            }
            Err(err) => {
                tracing::error!(error = %err, "flush failed; lock and queue left in place");
                lock.abandon();
                Err(err)
            }
        }
    }

    fn finish(
        &mut self,
        mut engine: IndexEngine,
        lock: RunLock,
        queue: PendingQueue,
    ) -> Result<RunOutcome> {
        self.state.enter(RunPhase::FlushingAndExiting);
        let lock = self.flush(&mut engine, lock)?;
        lock.release()?;
        self.state.lock_held = false;

        if self.state.queue_complete() {
            self.say(format_args!("Removing temp file... "));
            queue.remove()?;
            self.say(format_args!("done\n"));
            return Ok(RunOutcome::Completed(self.summary.clone()));
        }

        tracing::info!(
            run.cursor = self.state.cursor,
            queue.path = %queue.path().display(),
            "run interrupted; queue kept for resume"
        );
        self.say(format_args!(
            "Interrupted. Resume with --start {} --temp-file {}\n",
            self.state.cursor,
            queue.path().display()
        ));
        self.summary.interrupted = true;
        Ok(RunOutcome::Interrupted(self.summary.clone()))
    }

    fn restart(
        &mut self,
        mut engine: IndexEngine,
        lock: RunLock,
        queue: &PendingQueue,
    ) -> Result<RunOutcome> {
        self.state.enter(RunPhase::Restarting);
        let lock = self.flush(&mut engine, lock)?;
        let lock_token = lock.hand_off()?;
        self.state.lock_held = false;

        let state = ResumeState {
            queue_path: queue.path().to_path_buf(),
            cursor: self.state.cursor,
            lock_token,
            force: self.options.forced(),
        };
        self.say(format_args!("Restarting at {} of {}\n", state.cursor, self.state.total));
        Ok(RunOutcome::Restart {
            state,
            summary: self.summary.clone(),
        })
    }

    /// Persist what was done before a fatal error, then return the error.
    fn abort(&mut self, mut engine: IndexEngine, lock: RunLock, err: IndexerError) -> IndexerError {
        tracing::error!(error = %err, run.cursor = self.state.cursor, "run aborted");
        match self.flush(&mut engine, lock) {
            Ok(lock) => {
                if let Err(release) = lock.release() {
                    tracing::warn!(error = %release, "failed to release run lock");
                }
                self.state.lock_held = false;
            }
            Err(flush) => tracing::error!(error = %flush, "flush after abort failed"),
        }
        err
    }

    fn say(&self, message: fmt::Arguments<'_>) {
        if self.options.quiet {
            return;
        }
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_fmt(message);
        let _ = stdout.flush();
    }
}

impl fmt::Debug for RunController<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunController")
            .field("options", &self.options)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn outcome_label(outcome: DocumentOutcome) -> &'static str {
    match outcome {
        DocumentOutcome::Indexed => "done",
        DocumentOutcome::Unchanged => "unchanged",
        DocumentOutcome::Deleted => "deleted",
        DocumentOutcome::Disabled => "disabled",
    }
}

fn discard_queue(path: &std::path::Path) {
    if let Err(err) = fs_err::remove_file(path) {
        tracing::warn!(error = %err, "failed to remove partial queue file");
    }
}

/// Run to completion in this process, resuming in-process after every restart.
///
/// Each restart rebuilds the engine from disk, so the memory held by the previous instance's
/// cache is released even though the process stays the same.
pub fn run_supervised(
    config: &IndexerConfig,
    options: RunOptions,
    collab: Collaborators<'_>,
    interrupt: &InterruptToken,
) -> Result<RunSummary> {
    let mut options = options;
    let mut total: Option<RunSummary> = None;
    loop {
        let outcome =
            RunController::new(config, options.clone(), collab, interrupt.clone()).run()?;
        match &mut total {
            Some(total) => total.absorb(outcome.summary()),
            None => total = Some(outcome.summary().clone()),
        }
        match outcome {
            RunOutcome::Completed(_) | RunOutcome::Interrupted(_) => {
                return Ok(total.unwrap_or_default());
            }
            RunOutcome::Restart { state, .. } => {
                if let Some(total) = total.as_mut() {
                    total.restarts += 1;
                }
                options = options.resumed(&state);
            }
        }
    }
}
