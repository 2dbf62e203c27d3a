use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Row, cond::compare};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parse `asc` / `desc`, ignoring ASCII case. Anything else is `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("asc") {
            Some(Self::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Some(Self::Desc)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Total order used for sorting: null < bool < number < string < other.
fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) | Value::Object(_) => 4,
    }
}

fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    compare(a, b).unwrap_or_else(|| kind_rank(a).cmp(&kind_rank(b)))
}

/// Stable sort of `rows` by the given keys; rows equal on every key keep
/// their incoming order.
pub fn sort_rows(rows: &mut [Row], order: &[OrderBy]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in order {
            let av = a.get(&key.field).unwrap_or(&Value::Null);
            let bv = b.get(&key.field).unwrap_or(&Value::Null);
            let ord = match key.direction {
                SortDirection::Asc => sort_key_cmp(av, bv),
                SortDirection::Desc => sort_key_cmp(bv, av),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direction_parse_is_case_insensitive_and_strict() {
        assert_eq!(SortDirection::parse("ASC"), Some(SortDirection::Asc));
        assert_eq!(SortDirection::parse("desc"), Some(SortDirection::Desc));
        assert_eq!(SortDirection::parse("descending"), None);
        assert_eq!(SortDirection::parse(""), None);
    }

    #[test]
    fn sorts_by_multiple_keys_with_nulls_first() {
        let mut rows: Vec<Row> = [
            json!({"id": 1, "group": "b", "rank": 2}),
            json!({"id": 2, "group": "a", "rank": 1}),
            json!({"id": 3, "group": "b", "rank": 9}),
            json!({"id": 4, "rank": 5}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        sort_rows(&mut rows, &[OrderBy::asc("group"), OrderBy::desc("rank")]);
        let ids: Vec<i64> = rows.iter().filter_map(|r| r["id"].as_i64()).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }
}
