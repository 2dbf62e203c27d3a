//! Request and response models for the record engine.

use recordkit_db::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A record as seen by a caller: field name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Requested sort key. The direction is kept as given and validated by the
/// engine (`asc` / `desc`, any case).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: String,
}

/// Listing request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    /// Caller filter, AND-ed with the row filter the caller is subject to.
    pub filter: Condition,
    pub offset: u64,
    /// Page size. `None` means the configured default.
    pub limit: Option<u64>,
    pub order_by: Vec<SortSpec>,
}

impl SearchQuery {
    #[must_use]
    pub fn filter(mut self, filter: Condition) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: impl Into<String>) -> Self {
        self.order_by.push(SortSpec {
            field: field.into(),
            direction: direction.into(),
        });
        self
    }
}

/// Capabilities granted to a single create or update call.
///
/// Without them the object-store fields and the workflow field are
/// protected from direct writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WriteOptions {
    pub modify_object_store_fields: bool,
    pub modify_workflow_status: bool,
}

impl WriteOptions {
    #[must_use]
    pub fn with_object_store_fields(mut self) -> Self {
        self.modify_object_store_fields = true;
        self
    }

    #[must_use]
    pub fn with_workflow_status(mut self) -> Self {
        self.modify_workflow_status = true;
        self
    }
}

/// Workflow transition request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub trigger: String,
    /// Extra field changes applied together with the state change.
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    Value::Object(Record::new())
}

impl TransitionRequest {
    #[must_use]
    pub fn new(trigger: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            payload: empty_object(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Time-limited URL granting direct access to an object-store key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrl {
    pub url: String,
    pub method: String,
    pub key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_query_accepts_partial_json() {
        let q: SearchQuery = serde_json::from_value(json!({
            "limit": 5,
            "orderBy": [{"field": "title", "direction": "DESC"}]
        }))
        .unwrap();
        assert_eq!(q.filter, Condition::True);
        assert_eq!(q.offset, 0);
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.order_by[0].direction, "DESC");
    }

    #[test]
    fn transition_payload_defaults_to_empty_object() {
        let req: TransitionRequest = serde_json::from_value(json!({"trigger": "publish"})).unwrap();
        assert_eq!(req, TransitionRequest::new("publish"));
        assert!(req.payload.as_object().is_some_and(serde_json::Map::is_empty));
    }
}
