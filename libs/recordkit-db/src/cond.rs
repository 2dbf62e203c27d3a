use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use recordkit_security::access_scope::{AccessScope, ScopeConstraint, ScopeFilter, ScopeValue};

use crate::Row;

/// Row predicate evaluated by storage backends.
///
/// Missing fields read as `null`. Comparisons between values of different
/// JSON kinds never match.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    #[default]
    True,
    False,
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    /// Substring match on string fields.
    Contains { field: String, value: String },
    IsNull { field: String },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    #[must_use]
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull {
            field: field.into(),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not {
            condition: Box::new(self),
        }
    }

    /// AND two conditions, flattening trivially true operands.
    #[must_use]
    pub fn and(self, other: Condition) -> Self {
        match (self, other) {
            (Self::True, c) | (c, Self::True) => c,
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::All { mut conditions }, c) => {
                conditions.push(c);
                Self::All { conditions }
            }
            (a, b) => Self::All {
                conditions: vec![a, b],
            },
        }
    }

    /// Every field name this condition reads, in traversal order.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::True | Self::False => {}
            Self::Eq { field, .. }
            | Self::Ne { field, .. }
            | Self::Lt { field, .. }
            | Self::Lte { field, .. }
            | Self::Gt { field, .. }
            | Self::Gte { field, .. }
            | Self::In { field, .. }
            | Self::Contains { field, .. }
            | Self::IsNull { field } => out.push(field),
            Self::All { conditions } | Self::Any { conditions } => {
                for c in conditions {
                    c.collect_fields(out);
                }
            }
            Self::Not { condition } => condition.collect_fields(out),
        }
    }

    /// Evaluate against a stored row.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        let get = |field: &str| row.get(field).unwrap_or(&Value::Null);
        match self {
            Self::True => true,
            Self::False => false,
            Self::Eq { field, value } => values_equal(get(field), value),
            Self::Ne { field, value } => !values_equal(get(field), value),
            Self::Lt { field, value } => compare(get(field), value) == Some(Ordering::Less),
            Self::Lte { field, value } => matches!(
                compare(get(field), value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Gt { field, value } => compare(get(field), value) == Some(Ordering::Greater),
            Self::Gte { field, value } => matches!(
                compare(get(field), value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::In { field, values } => {
                let v = get(field);
                values.iter().any(|candidate| values_equal(v, candidate))
            }
            Self::Contains { field, value } => get(field)
                .as_str()
                .is_some_and(|s| s.contains(value.as_str())),
            Self::IsNull { field } => get(field).is_null(),
            Self::All { conditions } => conditions.iter().all(|c| c.matches(row)),
            Self::Any { conditions } => conditions.iter().any(|c| c.matches(row)),
            Self::Not { condition } => !condition.matches(row),
        }
    }
}

/// Equality with numeric normalisation (`1` equals `1.0`).
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Partial order between two JSON scalars of the same kind.
#[must_use]
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        _ => None,
    }
}

#[must_use]
pub fn scope_value_to_json(v: &ScopeValue) -> Value {
    match v {
        ScopeValue::String(s) => Value::String(s.clone()),
        ScopeValue::Int(n) => Value::from(*n),
        ScopeValue::Bool(b) => Value::Bool(*b),
    }
}

/// Builds a [`Condition`] from an [`AccessScope`] using field resolution.
///
/// # OR/AND Semantics
///
/// - Multiple constraints are OR-ed (alternative access paths)
/// - Filters within a constraint are AND-ed (all must match)
/// - A filter on a field rejected by `is_known` fails its constraint (fail-closed)
/// - If all constraints fail resolution, deny-all
///
/// | Scope | Result |
/// |-------|--------|
/// | deny-all (default) | `Condition::False` |
/// | unconstrained (allow-all) | `Condition::True` |
/// | single constraint | AND of its filters |
/// | multiple constraints | OR of AND-ed filter groups |
pub fn build_scope_condition<F>(scope: &AccessScope, is_known: F) -> Condition
where
    F: Fn(&str) -> bool,
{
    if scope.is_unconstrained() {
        return Condition::True;
    }
    if scope.is_deny_all() {
        return Condition::False;
    }

    let mut compiled: Vec<Condition> = scope
        .constraints()
        .iter()
        .filter_map(|c| build_constraint_condition(c, &is_known))
        .collect();

    match compiled.len() {
        0 => Condition::False,
        1 => compiled.pop().unwrap_or(Condition::False),
        _ => Condition::Any {
            conditions: compiled,
        },
    }
}

/// Returns `None` if any filter references an unknown field.
fn build_constraint_condition<F>(constraint: &ScopeConstraint, is_known: &F) -> Option<Condition>
where
    F: Fn(&str) -> bool,
{
    let mut cond = Condition::True;
    for filter in constraint.filters() {
        if !is_known(filter.field()) {
            tracing::debug!(field = filter.field(), "scope filter on unknown field");
            return None;
        }
        let next = match filter {
            ScopeFilter::Eq(eq) => Condition::eq(eq.field(), scope_value_to_json(eq.value())),
            ScopeFilter::In(inf) => Condition::is_in(
                inf.field(),
                inf.values().iter().map(scope_value_to_json).collect(),
            ),
        };
        cond = cond.and(next);
    }
    Some(cond)
}
