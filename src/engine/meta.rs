use std::collections::BTreeSet;

use crate::constants::{METADATA_INDEX, TITLE_INDEX};
use crate::engine::IndexEngine;
use crate::error::{IndexerError, Result};
use crate::io::store::{LineIndex, PartitionKey, WriteStatus};
use crate::io::tuple::{parse_tuples, tuple_count, update_tuple};

fn values_key(key: &str) -> PartitionKey {
    PartitionKey::new(format!("{key}_w"), "")
}

fn postings_key(key: &str) -> PartitionKey {
    PartitionKey::new(format!("{key}_i"), "")
}

fn page_values_key(key: &str) -> PartitionKey {
    PartitionKey::new(format!("{key}_p"), "")
}

fn locked(status: WriteStatus, operation: &'static str) -> Result<WriteStatus> {
    if status == WriteStatus::Locked {
        Err(IndexerError::Locked { operation })
    } else {
        Ok(status)
    }
}

impl IndexEngine {
    /// Replace the values page `pid` carries under metadata `key`.
    pub fn add_meta_keys(
        &mut self,
        pid: usize,
        key: &str,
        values: &BTreeSet<String>,
    ) -> Result<WriteStatus> {
        let registered = self
            .cache
            .add_key(&PartitionKey::new(METADATA_INDEX, ""), key)?;
        let status = registered.status().merge(self.update_meta_values(pid, key, values)?);
        locked(status, "add_meta_keys")
    }

    /// Metadata keys known to the index.
    pub fn metadata_keys(&mut self) -> Result<Vec<String>> {
        Ok(self
            .cache
            .get_index(&PartitionKey::new(METADATA_INDEX, ""))?
            .into_iter()
            .filter(|line| !line.is_empty())
            .collect())
    }

    /// Values page `pid` carries under `key`.
    pub fn meta_values(&mut self, pid: usize, key: &str) -> Result<BTreeSet<String>> {
        let vids = parse_value_ids(&self.cache.get_line(&page_values_key(key), pid)?);
        let mut values = BTreeSet::new();
        for vid in vids {
            let value = self.cache.get_line(&values_key(key), vid)?;
            if !value.is_empty() {
                values.insert(value);
            }
        }
        Ok(values)
    }

    /// PIDs of pages carrying `value` under `key`.
    pub fn pages_with_meta(&mut self, key: &str, value: &str) -> Result<Vec<usize>> {
        let Some(vid) = self.cache.find_key(&values_key(key), value)? else {
            return Ok(Vec::new());
        };
        let line = self.cache.get_line(&postings_key(key), vid)?;
        Ok(parse_tuples(&line)
            .into_iter()
            .map(|(pid, _)| pid as usize)
            .collect())
    }

    /// Set the title line of `pid`.
    pub fn set_title(&mut self, pid: usize, title: &str) -> Result<WriteStatus> {
        let title = title.replace(['\n', '\r'], " ");
        let status = self
            .cache
            .set_line(&PartitionKey::new(TITLE_INDEX, ""), pid, title.trim())?;
        locked(status, "set_title")
    }

    pub fn page_title(&mut self, pid: usize) -> Result<String> {
        self.cache
            .get_line(&PartitionKey::new(TITLE_INDEX, ""), pid)
    }

    pub(crate) fn update_meta_values(
        &mut self,
        pid: usize,
        key: &str,
        values: &BTreeSet<String>,
    ) -> Result<WriteStatus> {
        let mut status = WriteStatus::Skipped;
        let mut current = BTreeSet::new();
        for value in values {
            let value = value.replace(['\n', '\r'], " ");
            if value.is_empty() {
                continue;
            }
            let outcome = self.cache.add_key(&values_key(key), &value)?;
            status = status.merge(outcome.status());
            let vid = outcome.line_id().ok_or(IndexerError::Locked {
                operation: "add_meta_keys",
            })?;
            current.insert(vid);
        }

        let page_key = page_values_key(key);
        let previous = parse_value_ids(&self.cache.get_line(&page_key, pid)?);
        let postings = postings_key(key);
        for &vid in previous.difference(&current) {
            let line = self.cache.get_line(&postings, vid)?;
            status = status.merge(self.cache.set_line(&postings, vid, &update_tuple(&line, &pid, 0))?);
        }
        for &vid in &current {
            let line = self.cache.get_line(&postings, vid)?;
            if tuple_count(&line, pid as u64) == Some(1) {
                continue;
            }
            status = status.merge(self.cache.set_line(&postings, vid, &update_tuple(&line, &pid, 1))?);
        }

        let line = current
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(":");
        status = status.merge(self.cache.set_line(&page_key, pid, &line)?);
        Ok(status)
    }
}

fn parse_value_ids(line: &str) -> BTreeSet<usize> {
    line.split(':').filter_map(|vid| vid.parse().ok()).collect()
}
