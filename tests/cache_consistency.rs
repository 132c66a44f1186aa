//! Integration tests for the write-back cache as seen through the engine.
//! Tests: flush visibility, deferred markers, cross-index consistency, read-only access

use std::collections::BTreeSet;

use docindex_core::{
    Collaborators, DocId, DocumentOutcome, FsDocumentStore, IndexEngine, IndexerConfig,
    IndexerError, PlainTextRenderer,
};
use tempfile::TempDir;

fn setup() -> (TempDir, IndexerConfig) {
    let dir = TempDir::new().unwrap();
    let config = IndexerConfig::from_root(dir.path());
    config.ensure_dirs().unwrap();
    (dir, config)
}

fn write_page(config: &IndexerConfig, rel: &str, body: &str) {
    let path = config.data_dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn id(raw: &str) -> DocId {
    DocId::parse(raw).unwrap()
}

/// Every `(length, word id)` a page lists must carry a posting for that page, and nothing else.
fn assert_consistent(engine: &mut IndexEngine, pages: &[&str], vocabulary: &[&str]) {
    for page in pages {
        let pid = engine.lookup_pid(&id(page)).unwrap().unwrap();
        let listed = engine.page_words(pid).unwrap();
        let mut posted = BTreeSet::new();
        for word in vocabulary {
            let postings = engine.word_postings(word).unwrap();
            let has_pid = postings
                .split(':')
                .any(|tuple| tuple.split_once('*').is_some_and(|(p, _)| p == pid.to_string()));
            if has_pid {
                let wid = engine.word_id(word).unwrap().unwrap();
                posted.insert((word.chars().count(), wid));
            }
        }
        assert_eq!(listed, posted, "page {page}");
    }
}

#[test]
fn nothing_reaches_disk_before_flush() {
    let (_dir, config) = setup();
    write_page(&config, "one.txt", "first page body");
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);

    let mut engine = IndexEngine::open_writable(&config).unwrap();
    assert_eq!(
        engine.index_document(&id("one"), false, &collab).unwrap(),
        DocumentOutcome::Indexed
    );
    assert!(engine.is_dirty());
    assert_eq!(std::fs::read_dir(&config.index_dir).unwrap().count(), 0);
    assert!(!engine.tracker().has_marker(&id("one")));

    let mut reader = IndexEngine::open_read_only(&config);
    assert!(reader.lookup_pid(&id("one")).unwrap().is_none());

    let report = engine.flush().unwrap();
    assert!(!report.is_empty());
    assert!(!engine.is_dirty());
    assert!(engine.tracker().has_marker(&id("one")));

    let mut reader = IndexEngine::open_read_only(&config);
    assert_eq!(reader.lookup_pid(&id("one")).unwrap(), Some(0));
    assert_eq!(reader.word_postings("body").unwrap(), "0*1");
}

#[test]
fn edits_keep_page_words_and_postings_in_step() {
    let (_dir, config) = setup();
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);
    let vocabulary = ["red", "green", "blue", "cyan", "magenta"];

    write_page(&config, "x.txt", "red green green blue");
    write_page(&config, "y.txt", "blue cyan");
    let mut engine = IndexEngine::open_writable(&config).unwrap();
    for page in ["x", "y"] {
        engine.index_document(&id(page), false, &collab).unwrap();
    }
    assert_consistent(&mut engine, &["x", "y"], &vocabulary);
    let x = engine.lookup_pid(&id("x")).unwrap().unwrap();
    assert_eq!(engine.word_postings("green").unwrap(), format!("{x}*2"));
    engine.flush().unwrap();

    write_page(&config, "x.txt", "magenta cyan");
    let mut engine = IndexEngine::open_writable(&config).unwrap();
    engine.index_document(&id("x"), true, &collab).unwrap();
    assert_consistent(&mut engine, &["x", "y"], &vocabulary);
    assert_eq!(engine.word_postings("green").unwrap(), "");
    assert_eq!(engine.word_postings("red").unwrap(), "");
    assert_eq!(engine.word_postings("cyan").unwrap().split(':').count(), 2);
    engine.flush().unwrap();

    let mut reader = IndexEngine::open_read_only(&config);
    assert_consistent(&mut reader, &["x", "y"], &vocabulary);
    let lengths = std::fs::read_to_string(config.index_dir.join("lengths.idx")).unwrap();
    assert_eq!(lengths.lines().collect::<Vec<_>>(), vec!["3", "4", "5", "7"]);
}

#[test]
fn read_only_engine_refuses_mutations() {
    let (_dir, config) = setup();
    write_page(&config, "one.txt", "text");
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);

    let mut engine = IndexEngine::open_read_only(&config);
    assert!(!engine.is_writable());
    assert!(matches!(
        engine.index_document(&id("one"), false, &collab),
        Err(IndexerError::Locked { .. })
    ));
    assert!(matches!(engine.clear(), Err(IndexerError::Locked { .. })));
    assert!(matches!(
        engine.page_pid(&id("one")),
        Err(IndexerError::Locked { .. })
    ));
    assert_eq!(std::fs::read_dir(&config.index_dir).unwrap().count(), 0);
}

#[test]
fn pids_are_never_reused_after_deletion() {
    let (_dir, config) = setup();
    write_page(&config, "gone.txt", "short lived");
    write_page(&config, "kept.txt", "long lived");
    let store = FsDocumentStore::new(&config.data_dir);
    let renderer = PlainTextRenderer::new();
    let collab = Collaborators::new(&store, &renderer);

    let mut engine = IndexEngine::open_writable(&config).unwrap();
    engine.index_document(&id("gone"), false, &collab).unwrap();
    engine.index_document(&id("kept"), false, &collab).unwrap();
    engine.flush().unwrap();

    std::fs::remove_file(config.data_dir.join("gone.txt")).unwrap();
    write_page(&config, "new.txt", "fresh words");
    assert_eq!(
        engine.index_document(&id("gone"), false, &collab).unwrap(),
        DocumentOutcome::Deleted
    );
    engine.index_document(&id("new"), false, &collab).unwrap();
    engine.flush().unwrap();

    let mut reader = IndexEngine::open_read_only(&config);
    assert_eq!(reader.lookup_pid(&id("gone")).unwrap(), Some(0));
    assert_eq!(reader.lookup_pid(&id("kept")).unwrap(), Some(1));
    assert_eq!(reader.lookup_pid(&id("new")).unwrap(), Some(2));
    assert_eq!(reader.word_postings("lived").unwrap(), "1*1");
    assert!(reader.page_words(0).unwrap().is_empty());
    assert!(!reader.tracker().has_marker(&id("gone")));
}
