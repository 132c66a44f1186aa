//! Document identifiers.
//!
//! IDs are colon-separated paths (`wiki:syntax`), lower-cased and accent-stripped, with every
//! component restricted to `[a-z0-9_.-]`. They map 1:1 to `<data_dir>/wiki/syntax.txt` and
//! to the marker `<meta_dir>/wiki/syntax.indexed`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::constants::CONTENT_FILE_EXTENSION;
use crate::error::{IndexerError, Result};

static INVALID_CHARS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"[^a-z0-9_.:-]+").expect("static pattern")
});
static REPEATED_UNDERSCORES: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"_{2,}").expect("static pattern")
});

/// A cleaned document identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocId(String);

impl DocId {
    /// Clean `raw` into a canonical ID. Fails when nothing usable remains.
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned = clean_id(raw);
        if cleaned.is_empty() {
            return Err(IndexerError::InvalidId {
                raw: raw.to_string(),
            });
        }
        Ok(Self(cleaned))
    }

    /// Derive the ID of a content file given its path relative to the data directory.
    pub fn from_relative_path(path: &Path) -> Result<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            if let Component::Normal(part) = component {
                parts.push(part.to_string_lossy().into_owned());
            }
        }
        if let Some(last) = parts.last_mut() {
            if let Some(stem) = last
                .strip_suffix(CONTENT_FILE_EXTENSION)
                .and_then(|rest| rest.strip_suffix('.'))
            {
                *last = stem.to_string();
            }
        }
        Self::parse(&parts.join(":"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path components (`a:b:c` → `["a", "b", "c"]`).
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split(':')
    }

    /// Enclosing namespace, `None` at the top level.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.0.rsplit_once(':').map(|(ns, _)| ns)
    }

    /// Whether this ID lives inside `namespace` (at any depth).
    #[must_use]
    pub fn is_within(&self, namespace: &str) -> bool {
        let namespace = namespace.trim_matches(':');
        namespace.is_empty()
            || self
                .0
                .strip_prefix(namespace)
                .is_some_and(|rest| rest.starts_with(':'))
    }

    /// `base/<c1>/<c2>/.../<cn>.<extension>`.
    #[must_use]
    pub fn to_path(&self, base: &Path, extension: &str) -> PathBuf {
        let mut path = base.to_path_buf();
        let mut components = self.components().peekable();
        while let Some(component) = components.next() {
            if components.peek().is_some() {
                path.push(component);
            } else {
                path.push(format!("{component}.{extension}"));
            }
        }
        path
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DocId {
    type Error = IndexerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DocId> for String {
    fn from(value: DocId) -> Self {
        value.0
    }
}

/// Normalize a raw ID: lowercase, strip accents, unify separators, replace disallowed
/// characters with `_`, and trim separators and `_.-` from component edges.
#[must_use]
pub fn clean_id(raw: &str) -> String {
    let folded: String = raw
        .trim()
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            '/' | ';' | '\\' => ':',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    let replaced = INVALID_CHARS.replace_all(&folded, "_");
    let collapsed = REPEATED_UNDERSCORES.replace_all(&replaced, "_");

    collapsed
        .split(':')
        .map(|part| part.trim_matches(|c| c == '_' || c == '.' || c == '-'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_case_accents_and_separators() {
        assert_eq!(clean_id("Wiki/Syntax"), "wiki:syntax");
        assert_eq!(clean_id("Café;Menü"), "cafe:menu");
        assert_eq!(clean_id("::a:::b::"), "a:b");
        assert_eq!(clean_id("hello world!!"), "hello_world");
        assert_eq!(clean_id("_.-edge-._:x"), "edge:x");
    }

    #[test]
    fn rejects_ids_that_clean_to_nothing() {
        assert!(matches!(
            DocId::parse(" :: "),
            Err(IndexerError::InvalidId { .. })
        ));
    }

    #[test]
    fn maps_to_paths_and_back() {
        let id = DocId::parse("ns:sub:page").expect("id");
        let path = id.to_path(Path::new("/data"), "txt");
        assert_eq!(path, PathBuf::from("/data/ns/sub/page.txt"));

        let back = DocId::from_relative_path(Path::new("ns/sub/page.txt")).expect("id");
        assert_eq!(back, id);

        let dotted = DocId::parse("release:v1.2").expect("id");
        assert_eq!(
            dotted.to_path(Path::new("/meta"), "indexed"),
            PathBuf::from("/meta/release/v1.2.indexed")
        );
    }

    #[test]
    fn namespace_membership_respects_component_boundaries() {
        let id = DocId::parse("wiki:syntax").expect("id");
        assert!(id.is_within("wiki"));
        assert!(id.is_within(""));
        assert!(!id.is_within("wik"));
        assert!(!id.is_within("wiki:syntax"));
        assert_eq!(id.namespace(), Some("wiki"));
    }
}
