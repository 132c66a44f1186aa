//! Integration tests for run lifecycle edges.
//! Tests: supervised restarts, lock contention, stale lock removal, resume after interruption,
//! failed flushes

use std::path::{Path, PathBuf};

use docindex_core::{
    Collaborators, DocId, FsDocumentStore, IndexEngine, IndexHooks, IndexerConfig, IndexerError,
    InterruptToken, PageData, PlainTextRenderer, ResumePoint, RunController, RunLock, RunOptions,
    RunOutcome, run_supervised,
};
use tempfile::TempDir;

fn create_wiki(root: &Path, pages: usize) -> IndexerConfig {
    let config = IndexerConfig::from_root(root);
    for n in 0..pages {
        let path = config.data_dir.join(format!("page{n}.txt"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("common text number{n}")).unwrap();
    }
    config
}

fn quiet() -> RunOptions {
    RunOptions {
        quiet: true,
        ..RunOptions::default()
    }
}

fn tmp_entries(config: &IndexerConfig) -> usize {
    std::fs::read_dir(&config.tmp_dir).unwrap().count()
}

#[test]
fn supervised_run_restarts_after_max_runs_and_finishes() {
    let dir = TempDir::new().unwrap();
    let config = create_wiki(dir.path(), 5);
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);

    let options = RunOptions {
        clear: true,
        max_runs: Some(2),
        ..quiet()
    };
    let summary = run_supervised(&config, options, collab, &InterruptToken::new()).unwrap();

    assert_eq!(summary.indexed, 5);
    assert_eq!(summary.restarts, 2);
    assert_eq!(summary.cursor, 5);
    assert!(!summary.interrupted);
    assert!(!RunLock::lock_path(&config.lock_dir).exists());
    assert_eq!(tmp_entries(&config), 0);

    let mut engine = IndexEngine::open_read_only(&config);
    assert_eq!(engine.known_pages().unwrap().len(), 5);
    assert_eq!(engine.word_postings("common").unwrap().split(':').count(), 5);
}

#[test]
fn supervised_run_survives_the_memory_high_water_mark() {
    let dir = TempDir::new().unwrap();
    let mut config = create_wiki(dir.path(), 3);
    config.memory_ceiling = 1;
    config.memory_high_water = 1.0;
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);

    let summary = run_supervised(&config, quiet(), collab, &InterruptToken::new()).unwrap();

    assert_eq!(summary.indexed, 3);
    assert!(summary.restarts <= 2);
    assert!(!RunLock::lock_path(&config.lock_dir).exists());
    assert_eq!(tmp_entries(&config), 0);
}

#[test]
fn held_lock_fails_the_run_without_touching_the_index() {
    let dir = TempDir::new().unwrap();
    let config = create_wiki(dir.path(), 2);
    config.ensure_dirs().unwrap();
    let held = RunLock::acquire(&config.lock_dir, "other indexer").unwrap();

    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);
    let mut controller = RunController::new(&config, quiet(), collab, InterruptToken::new());
    let err = controller.run().unwrap_err();

    assert!(matches!(err, IndexerError::LockContention { .. }));
    assert!(err.is_fatal());
    assert_eq!(std::fs::read_dir(&config.index_dir).unwrap().count(), 0);
    assert_eq!(tmp_entries(&config), 0);
    held.release().unwrap();
}

#[test]
fn remove_locks_clears_a_lock_without_owner() {
    let dir = TempDir::new().unwrap();
    let config = create_wiki(dir.path(), 1);
    config.ensure_dirs().unwrap();
    std::fs::create_dir_all(RunLock::lock_path(&config.lock_dir)).unwrap();

    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);

    let mut controller = RunController::new(&config, quiet(), collab, InterruptToken::new());
    assert!(controller.run().is_err());

    let options = RunOptions {
        remove_locks: true,
        ..quiet()
    };
    let mut controller = RunController::new(&config, options, collab, InterruptToken::new());
    let outcome = controller.run().unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(outcome.summary().indexed, 1);
}

#[test]
fn interrupted_run_resumes_from_the_kept_queue() {
    let dir = TempDir::new().unwrap();
    let config = create_wiki(dir.path(), 4);
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);

    let interrupt = InterruptToken::new();
    interrupt.interrupt();
    let mut controller = RunController::new(&config, quiet(), collab, interrupt);
    let outcome = controller.run().unwrap();
    let RunOutcome::Interrupted(first) = outcome else {
        panic!("expected an interrupted run");
    };
    assert_eq!(first.indexed, 1);
    assert!(first.interrupted);
    let queue_path = controller.state().queue_path.clone().unwrap();
    assert!(queue_path.exists());
    assert!(!RunLock::lock_path(&config.lock_dir).exists());

    // The first document is already flushed and marked.
    let mut engine = IndexEngine::open_read_only(&config);
    assert_eq!(engine.known_pages().unwrap().len(), 1);

    let options = RunOptions {
        resume: Some(ResumePoint {
            queue_path: queue_path.clone(),
            cursor: first.cursor,
        }),
        ..quiet()
    };
    let mut controller = RunController::new(&config, options, collab, InterruptToken::new());
    let outcome = controller.run().unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(outcome.summary().indexed, 3);
    assert!(!queue_path.exists());
}

#[test]
fn resuming_a_missing_queue_is_an_error() {
    let dir = TempDir::new().unwrap();
    let config = create_wiki(dir.path(), 1);
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);

    let options = RunOptions {
        resume: Some(ResumePoint {
            queue_path: config.tmp_dir.join("gone.txt"),
            cursor: 0,
        }),
        ..quiet()
    };
    let mut controller = RunController::new(&config, options, collab, InterruptToken::new());
    let err = controller.run().unwrap_err();
    assert!(matches!(err, IndexerError::InvalidQueue { .. }));
    assert!(!RunLock::lock_path(&config.lock_dir).exists());
}

/// Puts a directory where the `page` partition will be written, so its rename fails.
struct BlockPagePartition {
    target: PathBuf,
}

impl IndexHooks for BlockPagePartition {
    fn post_index(&self, _data: &PageData) {
        std::fs::create_dir_all(&self.target).unwrap();
    }
}

#[test]
fn failed_flush_keeps_queue_and_lock_and_writes_no_marker() {
    let dir = TempDir::new().unwrap();
    let config = create_wiki(dir.path(), 1);
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let hooks = BlockPagePartition {
        target: config.index_dir.join("page.idx"),
    };
    let collab = Collaborators::new(&store, &renderer).with_hooks(&hooks);

    let mut controller = RunController::new(&config, quiet(), collab, InterruptToken::new());
    let err = controller.run().unwrap_err();

    let IndexerError::FlushFailed { partitions, .. } = &err else {
        panic!("expected a flush failure, got {err:?}");
    };
    assert!(partitions.contains(&"page".to_string()));
    assert!(err.is_fatal());
    let queue_path = controller.state().queue_path.clone().unwrap();
    assert!(queue_path.exists());
    assert_eq!(tmp_entries(&config), 1);
    assert!(RunLock::lock_path(&config.lock_dir).exists());
    let engine = IndexEngine::open_read_only(&config);
    assert!(!engine.tracker().has_marker(&DocId::parse("page0").unwrap()));
}
