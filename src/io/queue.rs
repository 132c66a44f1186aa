//! File-backed queue of document IDs pending in a run.
//!
//! Enumeration writes one ID per line to a temp file so the queue size never depends on
//! available memory. The resume cursor is a line offset into that file, which lets a restarted
//! process pick up exactly where its predecessor stopped.

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::constants::QUEUE_FILE_PREFIX;
use crate::error::{IndexerError, Result};
use crate::id::DocId;

/// A finished queue file and the number of IDs it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQueue {
    path: PathBuf,
    total: usize,
}

impl PendingQueue {
    /// Start a fresh queue file inside `dir`.
    pub fn create(dir: &Path) -> Result<QueueWriter> {
        fs_err::create_dir_all(dir)?;
        let named = tempfile::Builder::new()
            .prefix(QUEUE_FILE_PREFIX)
            .suffix(".txt")
            .tempfile_in(dir)?;
        let (file, path) = named.keep().map_err(|err| err.error)?;
        tracing::debug!(queue.path = %path.display(), "queue file created");
        Ok(QueueWriter {
            writer: BufWriter::new(file),
            path,
            total: 0,
        })
    }

    /// Open an existing queue file, e.g. one handed over by a restarting predecessor.
    pub fn open(path: &Path) -> Result<Self> {
        let file = fs_err::File::open(path).map_err(|err| IndexerError::InvalidQueue {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let total = count_lines(file)?;
        Ok(Self {
            path: path.to_path_buf(),
            total,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of queued IDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Iterate queued IDs starting at line `cursor`.
    pub fn iter_from(&self, cursor: usize) -> Result<QueueReader> {
        let file = fs_err::File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut skipped = 0;
        let mut scratch = Vec::new();
        while skipped < cursor {
            scratch.clear();
            if reader.read_until(b'\n', &mut scratch)? == 0 {
                break;
            }
            skipped += 1;
        }
        Ok(QueueReader {
            reader,
            position: skipped,
            path: self.path.clone(),
        })
    }

    /// Delete the queue file.
    pub fn remove(self) -> Result<()> {
        match fs_err::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Appends IDs to a queue file under construction.
#[derive(Debug)]
pub struct QueueWriter {
    writer: BufWriter<std::fs::File>,
    path: PathBuf,
    total: usize,
}

impl QueueWriter {
    pub fn push(&mut self, id: &DocId) -> Result<()> {
        self.writer.write_all(id.as_str().as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.total += 1;
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and sync the file, yielding the finished queue.
    pub fn finish(mut self) -> Result<PendingQueue> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(PendingQueue {
            path: self.path,
            total: self.total,
        })
    }
}

/// Reads queued IDs one line at a time.
#[derive(Debug)]
pub struct QueueReader {
    reader: BufReader<fs_err::File>,
    position: usize,
    path: PathBuf,
}

impl QueueReader {
    /// Line offset of the next ID to be returned.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Iterator for QueueReader {
    /// `(line offset, id)`; unparsable lines surface as errors without ending iteration.
    type Item = Result<(usize, DocId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                let offset = self.position;
                self.position += 1;
                let raw = line.trim_end_matches(['\n', '\r']);
                Some(
                    DocId::parse(raw)
                        .map(|id| (offset, id))
                        .map_err(|_| IndexerError::InvalidQueue {
                            path: self.path.clone(),
                            reason: format!("line {offset} holds no valid id: {raw:?}"),
                        }),
                )
            }
            Err(err) => Some(Err(err.into())),
        }
    }
}

/// Count lines, treating a non-empty unterminated last line as a line.
fn count_lines<R: Read>(mut reader: R) -> Result<usize> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut count = 0;
    let mut last = b'\n';
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        count += memchr::memchr_iter(b'\n', &buf[..read]).count();
        last = buf[read - 1];
    }
    if last != b'\n' {
        count += 1;
    }
    Ok(count)
}
