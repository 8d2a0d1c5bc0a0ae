//! An in-memory changes feed.

use crate::error::FetchError;
use crate::fetcher::ChangesClient;
use async_trait::async_trait;
use changefeed_protocol::{
    ChangeRecord, ChangesFilter, ChangesRequest, ChangesResponse, FeedStyle, SINCE_NOW,
};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;

/// Long-poll timeout used when a request does not carry one.
const DEFAULT_LONG_POLL: Duration = Duration::from_secs(60);

/// One document's latest change.
#[derive(Debug, Clone)]
struct Entry {
    sequence: u64,
    document_id: String,
    revision: String,
    deleted: bool,
    body: Value,
}

#[derive(Debug, Default)]
struct FeedLog {
    /// Latest change per document, in sequence order.
    entries: Vec<Entry>,
    /// Revision generation per document.
    generations: HashMap<String, u64>,
    /// Last assigned sequence number.
    last_sequence: u64,
}

/// An append-only, sequence-numbered document change log that serves
/// changes requests.
///
/// The feed behaves like a server's `_changes` endpoint:
/// - each document appears once, at its latest change
/// - sequence tokens are `"<n>-<suffix>"` strings, `"now"` means the
///   current end and `"0"` the beginning
/// - long-poll requests wait for a write or for the request timeout
/// - `doc_ids` and simple equality `selector` filters are honored
///
/// # Example
///
/// ```rust,ignore
/// let feed = Arc::new(MemoryFeed::new());
/// feed.put("invoice:1", json!({"total": 10}));
///
/// let follower = ChangesFollower::new(Arc::clone(&feed), config);
/// ```
#[derive(Debug, Default)]
pub struct MemoryFeed {
    log: RwLock<FeedLog>,
    writes: Notify,
}

impl MemoryFeed {
    /// Creates an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a document and returns its new revision.
    pub fn put(&self, document_id: &str, body: Value) -> String {
        let revision = self.append(document_id, false, body);
        self.writes.notify_waiters();
        revision
    }

    /// Deletes a document and returns the tombstone revision.
    ///
    /// Returns `None` if the document was never written.
    pub fn delete(&self, document_id: &str) -> Option<String> {
        if !self.log.read().generations.contains_key(document_id) {
            return None;
        }
        let revision = self.append(document_id, true, Value::Object(Map::new()));
        self.writes.notify_waiters();
        Some(revision)
    }

    /// Returns the token of the latest change.
    pub fn update_seq(&self) -> String {
        token(self.log.read().last_sequence)
    }

    /// Returns the number of documents with at least one change.
    pub fn len(&self) -> usize {
        self.log.read().entries.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.log.read().entries.is_empty()
    }

    fn append(&self, document_id: &str, deleted: bool, body: Value) -> String {
        let mut log = self.log.write();
        log.last_sequence += 1;
        let sequence = log.last_sequence;

        let generation = log
            .generations
            .entry(document_id.to_string())
            .and_modify(|g| *g += 1)
            .or_insert(1);
        let revision = format!("{generation}-{sequence:08x}");

        log.entries.retain(|e| e.document_id != document_id);
        log.entries.push(Entry {
            sequence,
            document_id: document_id.to_string(),
            revision: revision.clone(),
            deleted,
            body,
        });
        revision
    }

    fn resolve_since(&self, since: &str) -> Result<u64, FetchError> {
        if since == SINCE_NOW {
            return Ok(self.log.read().last_sequence);
        }
        parse_token(since)
            .ok_or_else(|| FetchError::http(400, format!("bad_request: malformed since `{since}`")))
    }

    fn poll(&self, since: u64, request: &ChangesRequest) -> Result<ChangesResponse, FetchError> {
        let log = self.log.read();
        let limit = request
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        let mut matching = Vec::new();
        for entry in log.entries.iter().filter(|e| e.sequence > since) {
            if matches_filter(entry, &request.filter)? {
                matching.push(entry);
            }
        }

        let page: Vec<ChangeRecord> = matching
            .iter()
            .take(limit)
            .map(|e| to_record(e, request.include_docs))
            .collect();
        let pending = (matching.len() - page.len()) as u64;
        let last_seq = match page.len() {
            // Nothing matched: the whole log up to its end was scanned.
            0 if matching.is_empty() => token(log.last_sequence.max(since)),
            0 => token(since),
            n => token(matching[n - 1].sequence),
        };

        Ok(ChangesResponse::new(page, last_seq, pending))
    }
}

#[async_trait]
impl ChangesClient for MemoryFeed {
    async fn fetch_changes(&self, request: &ChangesRequest) -> Result<ChangesResponse, FetchError> {
        let since = self.resolve_since(&request.since)?;
        let wait = request.timeout.unwrap_or(DEFAULT_LONG_POLL);
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let written = self.writes.notified();
            let response = self.poll(since, request)?;

            if request.feed == FeedStyle::Normal || !response.results.is_empty() {
                return Ok(response);
            }
            if tokio::time::timeout_at(deadline, written).await.is_err() {
                return Ok(response);
            }
        }
    }
}

/// Formats a sequence number as an opaque-looking token.
fn token(sequence: u64) -> String {
    format!("{sequence}-g1A{:06x}", sequence.wrapping_mul(0x9E37) & 0xFF_FFFF)
}

/// Parses the numeric prefix of a token.
fn parse_token(token: &str) -> Option<u64> {
    token.split('-').next().and_then(|n| n.parse().ok())
}

fn to_record(entry: &Entry, include_docs: bool) -> ChangeRecord {
    let record = if entry.deleted {
        ChangeRecord::deletion(token(entry.sequence), &entry.document_id, &entry.revision)
    } else {
        ChangeRecord::new(token(entry.sequence), &entry.document_id, &entry.revision)
    };

    if !include_docs {
        return record;
    }

    let mut doc = match &entry.body {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    doc.insert("_id".into(), json!(entry.document_id));
    doc.insert("_rev".into(), json!(entry.revision));
    if entry.deleted {
        doc.insert("_deleted".into(), json!(true));
    }
    record.with_document(Value::Object(doc))
}

fn matches_filter(entry: &Entry, filter: &ChangesFilter) -> Result<bool, FetchError> {
    match filter {
        ChangesFilter::None => Ok(true),
        ChangesFilter::DocIds(ids) => Ok(ids.iter().any(|id| *id == entry.document_id)),
        ChangesFilter::Selector(Value::Object(fields)) => Ok(fields
            .iter()
            .all(|(field, expected)| entry.body.get(field) == Some(expected))),
        ChangesFilter::Selector(_) => Err(FetchError::http(
            400,
            "bad_request: selector must be an object",
        )),
        ChangesFilter::Design { name, .. } => Err(FetchError::http(
            404,
            format!("not_found: missing filter function `{name}`"),
        )),
        ChangesFilter::View(view) => Err(FetchError::http(
            404,
            format!("not_found: missing view `{view}`"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn feed_with(ids: &[&str]) -> MemoryFeed {
        let feed = MemoryFeed::new();
        for id in ids {
            feed.put(id, json!({"kind": "test"}));
        }
        feed
    }

    #[tokio::test]
    async fn poll_from_beginning() {
        let feed = feed_with(&["a", "b", "c"]);

        let response = feed
            .fetch_changes(&ChangesRequest::new("db", "0"))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.pending, 0);
        assert_eq!(response.last_seq, feed.update_seq());
        assert_eq!(response.results[0].document_id, "a");
    }

    #[tokio::test]
    async fn poll_with_limit_reports_pending() {
        let feed = feed_with(&["a", "b", "c", "d", "e"]);

        let first = feed
            .fetch_changes(&ChangesRequest::new("db", "0").with_limit(2))
            .await
            .unwrap();
        assert_eq!(first.results.len(), 2);
        assert_eq!(first.pending, 3);
        assert_eq!(first.last_seq, first.results[1].sequence);

        let second = feed
            .fetch_changes(&ChangesRequest::new("db", first.last_seq.clone()).with_limit(10))
            .await
            .unwrap();
        assert_eq!(second.results.len(), 3);
        assert_eq!(second.results[0].document_id, "c");
    }

    #[tokio::test]
    async fn since_now_skips_history() {
        let feed = feed_with(&["a", "b"]);
        let response = feed
            .fetch_changes(&ChangesRequest::new("db", "now"))
            .await
            .unwrap();
        assert!(response.is_caught_up());
        assert_eq!(response.last_seq, feed.update_seq());
    }

    #[tokio::test]
    async fn updates_collapse_to_latest_change() {
        let feed = feed_with(&["a", "b"]);
        let rev = feed.put("a", json!({"v": 2}));
        assert!(rev.starts_with("2-"));

        let response = feed
            .fetch_changes(&ChangesRequest::new("db", "0").with_include_docs(true))
            .await
            .unwrap();
        let ids: Vec<_> = response.results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(response.results[1].revision(), Some(rev.as_str()));
        assert_eq!(response.results[1].document.as_ref().unwrap()["v"], 2);
    }

    #[tokio::test]
    async fn deletions_are_reported() {
        let feed = feed_with(&["a"]);
        assert!(feed.delete("missing").is_none());
        feed.delete("a").unwrap();

        let response = feed
            .fetch_changes(&ChangesRequest::new("db", "0").with_include_docs(true))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(response.results[0].deleted);
        assert_eq!(
            response.results[0].document.as_ref().unwrap()["_deleted"],
            true
        );
    }

    #[tokio::test]
    async fn doc_ids_and_selector_filters() {
        let feed = MemoryFeed::new();
        feed.put("a", json!({"type": "order"}));
        feed.put("b", json!({"type": "user"}));
        feed.put("c", json!({"type": "order"}));

        let by_id = feed
            .fetch_changes(
                &ChangesRequest::new("db", "0")
                    .with_filter(ChangesFilter::DocIds(vec!["b".into()])),
            )
            .await
            .unwrap();
        assert_eq!(by_id.results.len(), 1);
        assert_eq!(by_id.last_seq, by_id.results[0].sequence);

        let by_selector = feed
            .fetch_changes(
                &ChangesRequest::new("db", "0")
                    .with_filter(ChangesFilter::Selector(json!({"type": "order"}))),
            )
            .await
            .unwrap();
        let ids: Vec<_> = by_selector
            .results
            .iter()
            .map(|r| r.document_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn filtered_empty_page_moves_to_end() {
        let feed = feed_with(&["a", "b"]);
        let response = feed
            .fetch_changes(
                &ChangesRequest::new("db", "0")
                    .with_filter(ChangesFilter::DocIds(vec!["zzz".into()])),
            )
            .await
            .unwrap();
        assert!(response.is_caught_up());
        assert_eq!(response.last_seq, feed.update_seq());
    }

    #[tokio::test]
    async fn unsupported_filters_fail() {
        let feed = feed_with(&["a"]);
        let err = feed
            .fetch_changes(
                &ChangesRequest::new("db", "0").with_filter(ChangesFilter::View("app/v".into())),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn malformed_since_is_bad_request() {
        let feed = feed_with(&["a"]);
        let err = feed
            .fetch_changes(&ChangesRequest::new("db", "garbage"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[tokio::test]
    async fn long_poll_wakes_on_write() {
        let feed = Arc::new(feed_with(&["a"]));
        let request = ChangesRequest::new("db", "now")
            .with_feed(FeedStyle::LongPoll)
            .with_timeout(Duration::from_secs(10));

        let writer = Arc::clone(&feed);
        let poll = tokio::spawn(async move { writer.fetch_changes(&request).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        feed.put("b", json!({}));

        let response = poll.await.unwrap().unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].document_id, "b");
    }

    #[tokio::test]
    async fn long_poll_times_out_empty() {
        let feed = feed_with(&["a"]);
        let response = feed
            .fetch_changes(
                &ChangesRequest::new("db", "now")
                    .with_feed(FeedStyle::LongPoll)
                    .with_timeout(Duration::from_millis(10)),
            )
            .await
            .unwrap();
        assert!(response.is_caught_up());
    }

    #[test]
    fn token_round_trip() {
        assert_eq!(parse_token(&token(42)), Some(42));
        assert_eq!(parse_token("0"), Some(0));
        assert_eq!(parse_token("x-1"), None);
    }
}
