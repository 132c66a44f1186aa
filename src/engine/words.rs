use std::collections::{BTreeMap, BTreeSet};

use crate::constants::{LENGTHS_INDEX, PAGEWORD_INDEX, POSTING_INDEX, WORD_INDEX};
use crate::engine::IndexEngine;
use crate::error::{IndexerError, Result};
use crate::io::store::{LineIndex, PartitionKey, WriteStatus};
use crate::io::tuple::{tuple_count, update_tuple};

/// `(word length, word id)` reference as stored in the `pageword` index.
type WordRef = (usize, usize);

impl IndexEngine {
    /// Replace the words indexed for `pid` with `tokens`.
    ///
    /// Postings of words the page no longer contains are removed; an empty token list removes
    /// the page from the word index entirely. Tokens spanning lines are dropped, since a word
    /// partition holds one word per line.
    pub fn add_page_words(&mut self, pid: usize, tokens: &[String]) -> Result<WriteStatus> {
        let mut counts: BTreeMap<usize, BTreeMap<&str, u32>> = BTreeMap::new();
        for token in tokens {
            if token.is_empty() {
                continue;
            }
            if token.contains(['\n', '\r']) {
                tracing::debug!(doc.pid = pid, token = %token.escape_debug(), "multi-line token dropped");
                continue;
            }
            *counts
                .entry(token.chars().count())
                .or_default()
                .entry(token.as_str())
                .or_insert(0) += 1;
        }

        let mut status = WriteStatus::Skipped;
        let mut current: BTreeMap<WordRef, u32> = BTreeMap::new();
        for (&len, words) in &counts {
            let key = PartitionKey::new(WORD_INDEX, len.to_string());
            for (&word, &count) in words {
                let outcome = self.cache.add_key(&key, word)?;
                status = status.merge(outcome.status());
                let wid = outcome.line_id().ok_or(IndexerError::Locked {
                    operation: "add_page_words",
                })?;
                current.insert((len, wid), count);
            }
        }
        if !counts.is_empty() {
            status = status.merge(self.add_lengths(counts.keys().copied())?);
        }

        let pageword = PartitionKey::new(PAGEWORD_INDEX, "");
        let previous = parse_word_refs(&self.cache.get_line(&pageword, pid)?);

        for (&(len, wid), &count) in &current {
            status = status.merge(self.update_posting(len, wid, pid, count)?);
        }
        let kept: BTreeSet<WordRef> = current.keys().copied().collect();
        for &(len, wid) in previous.difference(&kept) {
            status = status.merge(self.update_posting(len, wid, pid, 0)?);
        }

        let line = current
            .keys()
            .map(|(len, wid)| format!("{len}*{wid}"))
            .collect::<Vec<_>>()
            .join(":");
        status = status.merge(self.cache.set_line(&pageword, pid, &line)?);

        if status == WriteStatus::Locked {
            return Err(IndexerError::Locked {
                operation: "add_page_words",
            });
        }
        Ok(status)
    }

    /// Word IDs recorded for `pid`, as `(length, word id)` pairs.
    pub fn page_words(&mut self, pid: usize) -> Result<BTreeSet<(usize, usize)>> {
        let line = self
            .cache
            .get_line(&PartitionKey::new(PAGEWORD_INDEX, ""), pid)?;
        Ok(parse_word_refs(&line))
    }

    /// Look up the word ID of `word`, if indexed.
    pub fn word_id(&mut self, word: &str) -> Result<Option<usize>> {
        let key = PartitionKey::new(WORD_INDEX, word.chars().count().to_string());
        self.cache.find_key(&key, word)
    }

    /// Posting line of a word.
    pub fn word_postings(&mut self, word: &str) -> Result<String> {
        let len = word.chars().count();
        match self.word_id(word)? {
            Some(wid) => self
                .cache
                .get_line(&PartitionKey::new(POSTING_INDEX, len.to_string()), wid),
            None => Ok(String::new()),
        }
    }

    fn update_posting(
        &mut self,
        len: usize,
        wid: usize,
        pid: usize,
        count: u32,
    ) -> Result<WriteStatus> {
        let key = PartitionKey::new(POSTING_INDEX, len.to_string());
        let line = self.cache.get_line(&key, wid)?;
        if tuple_count(&line, pid as u64) == (count > 0).then_some(count) {
            return Ok(WriteStatus::Skipped);
        }
        self.cache.set_line(&key, wid, &update_tuple(&line, &pid, count))
    }

    fn add_lengths(&mut self, lengths: impl Iterator<Item = usize>) -> Result<WriteStatus> {
        let key = PartitionKey::new(LENGTHS_INDEX, "");
        let mut known: BTreeSet<usize> = self
            .cache
            .get_index(&key)?
            .iter()
            .filter_map(|line| line.parse().ok())
            .collect();
        let before = known.len();
        known.extend(lengths);
        if known.len() == before {
            return Ok(WriteStatus::Skipped);
        }
        let lines = known.iter().map(ToString::to_string).collect();
        self.cache.save_index(&key, lines)
    }
}

fn parse_word_refs(line: &str) -> BTreeSet<WordRef> {
    line.split(':')
        .filter_map(|entry| {
            let (len, wid) = entry.split_once('*')?;
            Some((len.parse().ok()?, wid.parse().ok()?))
        })
        .collect()
}
