use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::collab::{PageMetadata, PageRenderer, RenderedPage};
use crate::constants::MIN_TOKEN_CHARS;
use crate::error::Result;
use crate::id::{DocId, clean_id};

const NOINDEX_MACRO: &str = "~~NOINDEX~~";
const RENDERER_VERSION: &str = "plain1";

static HEADING: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?m)^[ \t]*={2,}[ \t]*(.+?)[ \t]*={2,}[ \t]*$").expect("static pattern")
});
static LINK: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\[\[([^\]|]+)(?:\|[^\]]*)?\]\]").expect("static pattern")
});
static MEDIA: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\{\{([^}|?]+)(?:[?|][^}]*)?\}\}").expect("static pattern")
});

/// Minimal wiki-text renderer.
///
/// Title is the first `== heading ==` (any level) or else the first non-empty line.
/// `[[target|label]]` links become references and `{{file}}` embeds become media; external
/// URLs are ignored. `~~NOINDEX~~` anywhere in the page opts it out of the index.
#[derive(Debug, Clone, Default)]
pub struct PlainTextRenderer;

impl PlainTextRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PageRenderer for PlainTextRenderer {
    fn render(&self, _id: &DocId, source: &str) -> Result<RenderedPage> {
        let title = HEADING
            .captures(source)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .or_else(|| {
                source
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_string)
            });

        let references = LINK
            .captures_iter(source)
            .filter_map(|caps| internal_target(caps.get(1)?.as_str()))
            .collect();
        let media = MEDIA
            .captures_iter(source)
            .filter_map(|caps| internal_target(caps.get(1)?.as_str()))
            .collect();

        Ok(RenderedPage {
            body_text: source.replace(NOINDEX_MACRO, ""),
            metadata: PageMetadata {
                title,
                references,
                media,
                index_disabled: source.contains(NOINDEX_MACRO),
            },
        })
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .map(str::to_lowercase)
            .filter(|word| word.chars().count() >= MIN_TOKEN_CHARS)
            .collect()
    }

    fn version(&self) -> String {
        RENDERER_VERSION.to_string()
    }
}

/// Cleaned target of a link or embed, `None` for external or empty targets.
fn internal_target(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.contains("://") || raw.starts_with("mailto:") {
        return None;
    }
    let without_anchor = raw.split('#').next().unwrap_or_default();
    let cleaned = clean_id(without_anchor);
    (!cleaned.is_empty()).then_some(cleaned)
}
