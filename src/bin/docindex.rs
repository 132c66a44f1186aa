//! `docindex` command line driver.
//!
//! Indexes every stale document below the data directory, or exactly one with `--id`.
//! When the memory high-water mark or `--max-runs` is hit, the process flushes, hands the run
//! lock off and replaces itself with a successor that continues from the same queue file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use docindex_core::{
    Collaborators, DocId, FsDocumentStore, IndexerConfig, InterruptToken, PageRenderer,
    PlainTextRenderer, Result, ResumePoint, RunController, RunOptions, RunOutcome,
    install_signal_handlers, parse_byte_size, restart_process,
};

/// Incrementally update the full-text index.
#[derive(Parser, Debug)]
#[command(name = "docindex", version)]
#[command(about = "Incrementally update the full-text index of a document tree")]
struct Cli {
    /// Clear the index before indexing (implies --force)
    #[arg(short, long)]
    clear: bool,

    /// Re-index documents even when their marker is current
    #[arg(short, long)]
    force: bool,

    /// Index only this document
    #[arg(short, long, value_name = "ID")]
    id: Option<String>,

    /// Only index documents inside this namespace
    #[arg(short, long, value_name = "NAMESPACE")]
    namespace: Option<String>,

    /// Restart after this many documents were indexed (0 = never)
    #[arg(short = 'r', long, value_name = "N", default_value_t = 0)]
    max_runs: usize,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Queue line to resume at (used with --temp-file)
    #[arg(short, long, value_name = "OFFSET", default_value_t = 0)]
    start: usize,

    /// Resume from an existing queue file instead of enumerating
    #[arg(short = 't', long, value_name = "PATH")]
    temp_file: Option<PathBuf>,

    /// Remove a lock left behind by a process that no longer exists
    #[arg(short = 'l', long)]
    remove_locks: bool,

    /// Lock hand-off token passed to a restarted process
    #[arg(long, value_name = "TOKEN", hide = true)]
    lock_token: Option<String>,

    /// Also remove documents whose content disappeared
    #[arg(long)]
    detect_deletions: bool,

    /// Root holding pages/, meta/, index/, locks/ and tmp/
    #[arg(long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// JSON configuration file (overrides --root)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Memory ceiling of one process, e.g. 512M
    #[arg(long, value_name = "SIZE", value_parser = parse_memory_limit)]
    memory_limit: Option<u64>,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            clear: self.clear,
            force: self.force,
            namespace: self.namespace.clone(),
            max_runs: (self.max_runs > 0).then_some(self.max_runs),
            quiet: self.quiet,
            resume: self.temp_file.clone().map(|queue_path| ResumePoint {
                queue_path,
                cursor: self.start,
            }),
            lock_token: self.lock_token.clone(),
            remove_locks: self.remove_locks,
            detect_deletions: self.detect_deletions,
            ..RunOptions::default()
        }
    }

    fn config(&self) -> Result<IndexerConfig> {
        let mut config = match &self.config {
            Some(path) => IndexerConfig::load(path)?,
            None => IndexerConfig::from_root(&self.root),
        };
        if let Some(limit) = self.memory_limit {
            config.memory_ceiling = limit;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_memory_limit(raw: &str) -> std::result::Result<u64, String> {
    parse_byte_size(raw).map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_tracing(cli.quiet);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "indexer failed");
            eprintln!("docindex: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let mut config = cli.config()?;
    let renderer = PlainTextRenderer::new();
    if config.version_suffix.is_none() {
        config.version_suffix = Some(renderer.version());
    }
    let store = FsDocumentStore::new(&config.data_dir);
    let collab = Collaborators::new(&store, &renderer);
    install_signal_handlers()?;

    let mut controller =
        RunController::new(&config, cli.run_options(), collab, InterruptToken::new());

    if let Some(raw) = &cli.id {
        let id = DocId::parse(raw)?;
        return match controller.run_single(&id) {
            Ok(_) => Ok(ExitCode::SUCCESS),
            Err(err) if !err.is_fatal() => {
                tracing::warn!(doc.id = %id, error = %err, "document skipped");
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => Err(err),
        };
    }

    match controller.run()? {
        RunOutcome::Completed(summary) | RunOutcome::Interrupted(summary) => {
            tracing::info!(
                run.indexed = summary.indexed,
                run.deleted = summary.deleted,
                run.unchanged = summary.unchanged,
                run.failed = summary.failed,
                run.interrupted = summary.interrupted,
                "indexer finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Restart { state, .. } => {
            let code = restart_process(&state)?;
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
    }
}

fn setup_tracing(quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("DOCINDEX_LOG").unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("docindex_core=error,docindex=error")
        } else {
            EnvFilter::new("docindex_core=warn,docindex=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
