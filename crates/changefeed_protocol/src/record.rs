//! Change records.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single revision entry of a change row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionInfo {
    /// Revision identifier.
    pub rev: String,
}

/// A single document mutation from the changes feed.
///
/// Records are immutable once returned from a fetch. Within one page the
/// server delivers them in non-decreasing sequence order.
///
/// # Fields
///
/// - `sequence`: opaque position token of this change
/// - `document_id`: the document that changed
/// - `changes`: leaf revisions reported for the document
/// - `deleted`: whether the change is a deletion
/// - `document`: the document body, present only with `include_docs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Sequence token of the change.
    #[serde(rename = "seq", deserialize_with = "deserialize_token")]
    pub sequence: String,
    /// Document ID.
    #[serde(rename = "id")]
    pub document_id: String,
    /// Revisions reported for the change.
    #[serde(default)]
    pub changes: Vec<RevisionInfo>,
    /// Whether the document was deleted.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Document body (only with `include_docs`).
    #[serde(rename = "doc", default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}

impl ChangeRecord {
    /// Creates a change record for a live document revision.
    pub fn new(
        sequence: impl Into<String>,
        document_id: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            sequence: sequence.into(),
            document_id: document_id.into(),
            changes: vec![RevisionInfo {
                rev: revision.into(),
            }],
            deleted: false,
            document: None,
        }
    }

    /// Creates a change record for a deletion.
    pub fn deletion(
        sequence: impl Into<String>,
        document_id: impl Into<String>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            deleted: true,
            ..Self::new(sequence, document_id, revision)
        }
    }

    /// Attaches a document body.
    pub fn with_document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }

    /// Returns the winning revision of this change, if the server reported one.
    pub fn revision(&self) -> Option<&str> {
        self.changes.first().map(|c| c.rev.as_str())
    }
}

/// Accepts a position token encoded either as a JSON string or number.
///
/// Older servers report integer sequences, newer ones opaque strings.
pub(crate) fn deserialize_token<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number sequence token, found {other}"
        ))),
    }
}
