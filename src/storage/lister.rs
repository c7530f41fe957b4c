//! Cursor-based pagination over a backend's flat key listing.
//!
//! The backend returns every key under a prefix with no ordering guarantee
//! and no cursor. Pages are cut from the sorted key set; the cursor is the
//! decimal offset of the first entry not yet returned. A listing is not a
//! snapshot: keys added or removed between calls shift later pages.

use futures::{stream, StreamExt, TryStreamExt};
use serde::{Serialize, Deserialize};
use tracing::debug;
use crate::error::StorageResult;
use crate::storage::{BlobBackend, PartialMetadata, RawMetadata};

pub const DEFAULT_HYDRATE_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
    pub include_metadata: bool,
}

impl ListOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
    }
}

/// One listed key. Descriptive fields are only present when metadata was
/// requested and the record still existed when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_modified: Option<i64>,
}

impl ListEntry {
    pub fn key_only(key: String) -> Self {
        Self {
            key,
            name: None,
            mime_type: None,
            size: None,
            last_modified: None,
        }
    }

    fn hydrated(key: String, raw: &RawMetadata) -> Self {
        let PartialMetadata { name, mime_type, last_modified, size } = PartialMetadata::from_raw(raw);
        Self {
            key,
            name,
            mime_type,
            size,
            last_modified,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    /// Absent on the last page.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next_cursor: Option<String>,
}

/// Offset encoded in `cursor`. Only a non-empty run of ASCII digits that
/// fits in `usize` is an offset; whitespace, signs, trailing text and
/// overflow all restart the listing from the beginning.
pub fn parse_cursor(cursor: Option<&str>) -> usize {
    let raw = match cursor {
        None => return 0,
        Some(raw) => raw,
    };

    let offset = (!raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()))
        .then(|| raw.parse::<usize>().ok())
        .flatten();
    offset.unwrap_or_else(|| {
        debug!("ignoring malformed list cursor {:?}", raw);
        0
    })
}

/// `[start, end)` over `count` candidates plus the cursor for the next page.
pub fn page_bounds(start: usize, limit: Option<usize>, count: usize) -> (usize, usize, Option<String>) {
    let end = limit.map_or(count, |l| start.saturating_add(l));
    let next_cursor = (end < count).then(|| end.to_string());
    (start.min(count), end.min(count), next_cursor)
}

pub async fn list_page<B: BlobBackend + ?Sized>(
    backend: &B,
    options: &ListOptions,
    concurrency: usize,
) -> StorageResult<ListPage> {
    let mut keys = backend.list(options.prefix.as_deref()).await?;
    keys.sort_unstable();
    keys.dedup();

    let start = parse_cursor(options.cursor.as_deref());
    let (from, to, next_cursor) = page_bounds(start, options.limit, keys.len());
    let page_keys: Vec<String> = keys.drain(from..to).collect();

    debug!(
        "listing prefix={:?} start={} returned={} total={}",
        options.prefix,
        start,
        page_keys.len(),
        keys.len() + page_keys.len()
    );

    let entries = if options.include_metadata {
        stream::iter(page_keys)
            .map(|key| async move {
                let raw = backend.get_metadata(&key).await?;
                Ok::<_, crate::error::StorageError>(match raw {
                    Some(raw) => ListEntry::hydrated(key, &raw),
                    None => {
                        debug!("key {:?} vanished before metadata was fetched", key);
                        ListEntry::key_only(key)
                    }
                })
            })
            .buffered(concurrency.max(1))
            .try_collect::<Vec<_>>()
            .await?
    } else {
        page_keys.into_iter().map(ListEntry::key_only).collect()
    };

    Ok(ListPage { entries, next_cursor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cursor_accepts_only_plain_digits() {
        assert_eq!(parse_cursor(None), 0);
        assert_eq!(parse_cursor(Some("7")), 7);
        assert_eq!(parse_cursor(Some("007")), 7);
        assert_eq!(parse_cursor(Some(" 2 ")), 0);
        assert_eq!(parse_cursor(Some("+1")), 0);
        assert_eq!(parse_cursor(Some("2abc")), 0);
        assert_eq!(parse_cursor(Some("")), 0);
        assert_eq!(parse_cursor(Some("-3")), 0);
        assert_eq!(parse_cursor(Some("abc")), 0);
        assert_eq!(parse_cursor(Some("2.5")), 0);
        assert_eq!(parse_cursor(Some("99999999999999999999999999")), 0);
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(0, Some(2), 3), (0, 2, Some("2".to_string())));
        assert_eq!(page_bounds(2, Some(2), 3), (2, 3, None));
        assert_eq!(page_bounds(0, None, 3), (0, 3, None));
        assert_eq!(page_bounds(1, Some(0), 3), (1, 1, Some("1".to_string())));
        assert_eq!(page_bounds(0, Some(0), 0), (0, 0, None));
        assert_eq!(page_bounds(10, Some(2), 3), (3, 3, None));
        assert_eq!(page_bounds(1, Some(usize::MAX), 3), (1, 3, None));
    }
}
