//! Request and response messages for the changes endpoint.

use crate::error::{ProtocolError, ProtocolResult};
use crate::record::{deserialize_token, ChangeRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// How the server should answer a changes request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedStyle {
    /// Answer immediately with whatever is available.
    #[default]
    Normal,
    /// Hold the request open until at least one change arrives or the
    /// server-side timeout elapses.
    LongPoll,
}

impl FeedStyle {
    /// Returns the value of the `feed` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedStyle::Normal => "normal",
            FeedStyle::LongPoll => "longpoll",
        }
    }
}

/// Server-side filtering applied to a changes request.
///
/// The follower passes filters through without interpreting them.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ChangesFilter {
    /// No filtering.
    #[default]
    None,
    /// Only changes to the listed document IDs.
    DocIds(Vec<String>),
    /// Only changes whose document matches a selector.
    Selector(Value),
    /// A design-document filter function (`ddoc/name`) with extra parameters.
    Design {
        /// Filter name in `ddoc/name` form.
        name: String,
        /// Extra query parameters handed to the filter.
        params: Vec<(String, String)>,
    },
    /// Only changes that emit a row in the given view (`ddoc/view`).
    View(String),
}

/// A request for one page of the changes feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesRequest {
    /// Target database.
    pub db: String,
    /// Position to read from.
    pub since: String,
    /// Maximum number of rows the server should return.
    pub limit: Option<u64>,
    /// Feed style.
    pub feed: FeedStyle,
    /// Server-side long-poll timeout.
    pub timeout: Option<Duration>,
    /// Whether document bodies are included.
    pub include_docs: bool,
    /// Server-side filter.
    pub filter: ChangesFilter,
}

impl ChangesRequest {
    /// Creates a normal-feed request with no limit and no filter.
    pub fn new(db: impl Into<String>, since: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            since: since.into(),
            limit: None,
            feed: FeedStyle::Normal,
            timeout: None,
            include_docs: false,
            filter: ChangesFilter::None,
        }
    }

    /// Sets the row limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the feed style.
    pub fn with_feed(mut self, feed: FeedStyle) -> Self {
        self.feed = feed;
        self
    }

    /// Sets the long-poll timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets whether document bodies are included.
    pub fn with_include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    /// Sets the server-side filter.
    pub fn with_filter(mut self, filter: ChangesFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Returns the query parameters of this request in a stable order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("feed".to_string(), self.feed.as_str().to_string()),
            ("since".to_string(), self.since.clone()),
        ];

        if let Some(limit) = self.limit {
            pairs.push(("limit".into(), limit.to_string()));
        }
        if let Some(timeout) = self.timeout {
            pairs.push(("timeout".into(), timeout.as_millis().to_string()));
        }
        if self.include_docs {
            pairs.push(("include_docs".into(), "true".into()));
        }

        match &self.filter {
            ChangesFilter::None => {}
            ChangesFilter::DocIds(_) => pairs.push(("filter".into(), "_doc_ids".into())),
            ChangesFilter::Selector(_) => pairs.push(("filter".into(), "_selector".into())),
            ChangesFilter::Design { name, params } => {
                pairs.push(("filter".into(), name.clone()));
                pairs.extend(params.iter().cloned());
            }
            ChangesFilter::View(view) => {
                pairs.push(("filter".into(), "_view".into()));
                pairs.push(("view".into(), view.clone()));
            }
        }

        pairs
    }

    /// Returns the JSON body required by body-carrying filters.
    ///
    /// Requests without a body are sent as GET, the others as POST.
    pub fn body(&self) -> Option<Value> {
        match &self.filter {
            ChangesFilter::DocIds(ids) => Some(json!({ "doc_ids": ids })),
            ChangesFilter::Selector(selector) => Some(json!({ "selector": selector })),
            _ => None,
        }
    }

    /// Encodes the request body to JSON bytes, if there is one.
    pub fn encode_body(&self) -> ProtocolResult<Option<Vec<u8>>> {
        self.body()
            .map(|body| {
                serde_json::to_vec(&body).map_err(|e| ProtocolError::Encode {
                    what: "changes request body",
                    message: e.to_string(),
                })
            })
            .transpose()
    }
}

/// One page of the changes feed as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesResponse {
    /// Change rows in non-decreasing sequence order.
    #[serde(default)]
    pub results: Vec<ChangeRecord>,
    /// Estimate of changes remaining after this page.
    #[serde(default)]
    pub pending: u64,
    /// Checkpoint to resume from after this page.
    #[serde(deserialize_with = "deserialize_token")]
    pub last_seq: String,
}

impl ChangesResponse {
    /// Creates a new changes response.
    pub fn new(results: Vec<ChangeRecord>, last_seq: impl Into<String>, pending: u64) -> Self {
        Self {
            results,
            pending,
            last_seq: last_seq.into(),
        }
    }

    /// Creates an empty "caught up" response.
    pub fn caught_up(last_seq: impl Into<String>) -> Self {
        Self::new(Vec::new(), last_seq, 0)
    }

    /// Returns true if the page has no rows and nothing is pending.
    pub fn is_caught_up(&self) -> bool {
        self.results.is_empty() && self.pending == 0
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode {
            what: "changes response",
            message: e.to_string(),
        })
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let response: Self = serde_json::from_slice(bytes)?;
        if response.last_seq.is_empty() {
            return Err(ProtocolError::invalid_field("last_seq", "empty token"));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_page() {
        let body = br#"{
            "results": [
                {"seq": "1-a", "id": "x", "changes": [{"rev": "1-r"}]},
                {"seq": "2-b", "id": "y", "changes": [{"rev": "4-r"}], "deleted": true}
            ],
            "last_seq": "2-b",
            "pending": 7
        }"#;

        let page = ChangesResponse::decode(body).unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.last_seq, "2-b");
        assert_eq!(page.pending, 7);
        assert!(page.results[1].deleted);
        assert!(!page.is_caught_up());
    }

    #[test]
    fn decode_missing_pending_defaults_to_zero() {
        let page = ChangesResponse::decode(br#"{"results": [], "last_seq": 9}"#).unwrap();
        assert_eq!(page.pending, 0);
        assert_eq!(page.last_seq, "9");
        assert!(page.is_caught_up());
    }

    #[test]
    fn decode_rejects_missing_last_seq() {
        let err = ChangesResponse::decode(br#"{"results": []}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn decode_rejects_empty_last_seq() {
        let err = ChangesResponse::decode(br#"{"results": [], "last_seq": ""}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "last_seq", .. }));
    }

    #[test]
    fn encode_decode_page() {
        let page = ChangesResponse::new(vec![ChangeRecord::new("5-z", "d", "1-r")], "5-z", 0);
        let decoded = ChangesResponse::decode(&page.encode().unwrap()).unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn query_pairs_for_longpoll() {
        let request = ChangesRequest::new("orders", "now")
            .with_feed(FeedStyle::LongPoll)
            .with_limit(500)
            .with_timeout(Duration::from_secs(60))
            .with_include_docs(true);

        let pairs = request.query_pairs();
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("feed"), Some("longpoll"));
        assert_eq!(get("since"), Some("now"));
        assert_eq!(get("limit"), Some("500"));
        assert_eq!(get("timeout"), Some("60000"));
        assert_eq!(get("include_docs"), Some("true"));
        assert_eq!(get("filter"), None);
        assert!(request.body().is_none());
    }

    #[test]
    fn doc_ids_filter_uses_body() {
        let request = ChangesRequest::new("orders", "0")
            .with_filter(ChangesFilter::DocIds(vec!["a".into(), "b".into()]));

        assert!(request
            .query_pairs()
            .contains(&("filter".into(), "_doc_ids".into())));
        assert_eq!(request.body(), Some(json!({"doc_ids": ["a", "b"]})));
        assert!(request.encode_body().unwrap().is_some());
    }

    #[test]
    fn design_and_view_filters() {
        let design = ChangesRequest::new("db", "0").with_filter(ChangesFilter::Design {
            name: "app/by_type".into(),
            params: vec![("type".into(), "order".into())],
        });
        let pairs = design.query_pairs();
        assert!(pairs.contains(&("filter".into(), "app/by_type".into())));
        assert!(pairs.contains(&("type".into(), "order".into())));
        assert!(design.body().is_none());

        let view = ChangesRequest::new("db", "0").with_filter(ChangesFilter::View("app/v".into()));
        let pairs = view.query_pairs();
        assert!(pairs.contains(&("filter".into(), "_view".into())));
        assert!(pairs.contains(&("view".into(), "app/v".into())));
    }
}
