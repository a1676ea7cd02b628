//! The remote document
//!
//! The hosted JSON service stores one document holding the whole board.
//! Every write replaces it; there is no finer granularity.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::ValidationError;
use crate::forms::Form;
use crate::models::Notice;

/// Schema version written into every document
pub const DOCUMENT_VERSION: &str = "2.0";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default)]
    pub total_notices: usize,
    #[serde(default)]
    pub total_forms: usize,
    /// Incremented on every write; part of the compare token
    #[serde(default)]
    pub revision: u64,
    /// Keys written by other clients, kept as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(default)]
    pub notices: Vec<Notice>,
    #[serde(default)]
    pub forms: Vec<Form>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

/// Identifies one state of the remote document for compare-and-swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentToken {
    pub revision: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// A parsed document plus the entries that had to be dropped
#[derive(Debug, Default)]
pub struct ParsedDocument {
    pub document: RemoteDocument,
    pub skipped: Vec<ValidationError>,
}

impl ParsedDocument {
    /// Ids of the notices that were present but could not be decoded
    pub fn skipped_notice_ids(&self) -> Vec<String> {
        self.skipped
            .iter()
            .filter_map(|err| match err {
                ValidationError::MalformedEntry {
                    collection: "notices",
                    id: Some(id),
                    ..
                } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

impl RemoteDocument {
    /// Empty skeleton used when the remote document doesn't exist yet
    pub fn empty() -> Self {
        Self {
            version: DOCUMENT_VERSION.to_string(),
            ..Self::default()
        }
    }

    /// Build the outgoing document. `previous` carries the revision forward.
    pub fn assemble(
        notices: Vec<Notice>,
        forms: Vec<Form>,
        previous: Option<&RemoteDocument>,
        now: DateTime<Utc>,
    ) -> Self {
        let (revision, extra) = previous
            .map(|p| (p.metadata.revision + 1, p.metadata.extra.clone()))
            .unwrap_or((1, Map::new()));

        Self {
            metadata: DocumentMetadata {
                total_notices: notices.len(),
                total_forms: forms.len(),
                revision,
                extra,
            },
            notices,
            forms,
            last_updated: Some(now),
            version: DOCUMENT_VERSION.to_string(),
        }
    }

    pub fn token(&self) -> DocumentToken {
        DocumentToken {
            revision: self.metadata.revision,
            last_updated: self.last_updated,
        }
    }

    pub fn form(&self, id: &str) -> Option<&Form> {
        self.forms.iter().find(|f| f.id == id)
    }

    pub fn form_mut(&mut self, id: &str) -> Option<&mut Form> {
        self.forms.iter_mut().find(|f| f.id == id)
    }

    /// Serialized body as sent over the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a document body, skipping malformed notices and forms.
    ///
    /// Some hosts wrap the stored document in `{"record": ...}`; that
    /// envelope is unwrapped. Only a body that isn't a JSON object at all
    /// is an error.
    pub fn parse_lenient(body: &[u8]) -> Result<ParsedDocument, ValidationError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ValidationError::MalformedDocument(e.to_string()))?;
        Self::from_value_lenient(value)
    }

    pub fn from_value_lenient(value: Value) -> Result<ParsedDocument, ValidationError> {
        let mut root = match value {
            Value::Object(mut map) => match map.remove("record") {
                Some(Value::Object(inner)) => inner,
                Some(other) => {
                    map.insert("record".to_string(), other);
                    map
                }
                None => map,
            },
            other => {
                return Err(ValidationError::MalformedDocument(format!(
                    "expected a JSON object, found {}",
                    json_kind(&other)
                )))
            }
        };

        let mut skipped = Vec::new();
        let notices = parse_entries::<Notice>(root.remove("notices"), "notices", &mut skipped);
        let forms = parse_entries::<Form>(root.remove("forms"), "forms", &mut skipped);

        let last_updated = match root.remove("lastUpdated") {
            Some(Value::Null) | None => None,
            Some(v) => match serde_json::from_value(v) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    warn!("Ignoring unreadable lastUpdated: {}", e);
                    None
                }
            },
        };

        let version = match root.remove("version") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        };

        let metadata = root
            .remove("metadata")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        for err in &skipped {
            warn!("Skipped remote entry: {}", err);
        }

        Ok(ParsedDocument {
            document: RemoteDocument {
                notices,
                forms,
                last_updated,
                version,
                metadata,
            },
            skipped,
        })
    }
}

/// Decode each element of a JSON array on its own, recording failures
pub(crate) fn parse_entries<T: DeserializeOwned>(
    value: Option<Value>,
    collection: &'static str,
    skipped: &mut Vec<ValidationError>,
) -> Vec<T> {
    let items = match value {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => return Vec::new(),
        Some(other) => {
            skipped.push(ValidationError::MalformedEntry {
                collection,
                index: 0,
                id: None,
                details: format!("expected an array, found {}", json_kind(&other)),
            });
            return Vec::new();
        }
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let id = entry_id(&item);
            match serde_json::from_value(item) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    skipped.push(ValidationError::MalformedEntry {
                        collection,
                        index,
                        id,
                        details: e.to_string(),
                    });
                    None
                }
            }
        })
        .collect()
}

/// The `id` of a raw entry, written as a string or a number
fn entry_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notice_json(id: &str, title: &str) -> Value {
        json!({
            "id": id,
            "title": title,
            "date": "2024-03-01",
            "timestamp": "2024-03-01T09:00:00Z",
            "lastModified": "2024-03-01T09:00:00Z"
        })
    }

    #[test]
    fn test_assemble_counts_and_revision() {
        let now = Utc::now();
        let first = RemoteDocument::assemble(vec![Notice::new("a")], vec![], None, now);
        assert_eq!(first.metadata.total_notices, 1);
        assert_eq!(first.metadata.revision, 1);
        assert_eq!(first.version, DOCUMENT_VERSION);
        assert_eq!(first.last_updated, Some(now));

        let second = RemoteDocument::assemble(vec![], vec![], Some(&first), now);
        assert_eq!(second.metadata.revision, 2);
        assert_eq!(second.metadata.total_notices, 0);
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let body = json!({
            "notices": [
                notice_json("1", "Valid"),
                {"id": "2"},
                notice_json("3", "Also valid"),
            ],
            "forms": "not a list",
            "lastUpdated": "2024-03-01T10:00:00Z",
            "version": "2.0"
        });

        let parsed = RemoteDocument::from_value_lenient(body).unwrap();
        let titles: Vec<&str> = parsed
            .document
            .notices
            .iter()
            .map(|n| n.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Valid", "Also valid"]);
        assert!(parsed.document.forms.is_empty());
        assert_eq!(parsed.skipped.len(), 2);
        assert_eq!(parsed.skipped_notice_ids(), vec!["2"]);
        assert!(parsed.document.last_updated.is_some());
    }

    #[test]
    fn test_parse_unwraps_record_envelope() {
        let body = json!({
            "record": {"notices": [notice_json("1", "Wrapped")], "version": 2},
            "metadata": {"private": false}
        });

        let parsed = RemoteDocument::from_value_lenient(body).unwrap();
        assert_eq!(parsed.document.notices.len(), 1);
        assert_eq!(parsed.document.version, "2");
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            RemoteDocument::parse_lenient(b"[1, 2, 3]"),
            Err(ValidationError::MalformedDocument(_))
        ));
        assert!(RemoteDocument::parse_lenient(b"{not json").is_err());
    }

    #[test]
    fn test_metadata_extra_round_trips() {
        let body = json!({
            "notices": [],
            "metadata": {"totalNotices": 0, "revision": 7, "source": "admin-panel"}
        });
        let parsed = RemoteDocument::from_value_lenient(body).unwrap().document;
        assert_eq!(parsed.metadata.revision, 7);
        assert_eq!(parsed.metadata.extra["source"], "admin-panel");

        let next = RemoteDocument::assemble(vec![], vec![], Some(&parsed), Utc::now());
        let json = serde_json::to_value(&next).unwrap();
        assert_eq!(json["metadata"]["source"], "admin-panel");
        assert_eq!(json["metadata"]["revision"], 8);
    }

    #[test]
    fn test_token_changes_with_write() {
        let doc = RemoteDocument::assemble(vec![], vec![], None, Utc::now());
        let next = RemoteDocument::assemble(vec![], vec![], Some(&doc), Utc::now());
        assert_ne!(doc.token(), next.token());
    }
}
