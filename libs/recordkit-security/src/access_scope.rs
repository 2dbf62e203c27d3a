use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar value for row filtering.
///
/// Used in [`ScopeFilter`] predicates to represent typed record values.
/// JSON conversion happens at the storage boundary (see the condition
/// compiler in `recordkit-db`), not inside the security model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value (record ids, counters, flags stored as numbers).
    Int(i64),
    /// String value (owners, statuses, names).
    String(String),
}

impl ScopeValue {
    /// Returns the string payload, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Int(_) | Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for ScopeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<String> for ScopeValue {
    #[inline]
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for ScopeValue {
    #[inline]
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<i64> for ScopeValue {
    #[inline]
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for ScopeValue {
    #[inline]
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A single scope filter: a typed predicate on a named record field.
///
/// Variants:
/// - [`ScopeFilter::Eq`]: equality (`field = value`)
/// - [`ScopeFilter::In`]: set membership (`field IN (values)`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Equality: `field = value`.
    Eq(EqScopeFilter),
    /// Set membership: `field IN (values)`.
    In(InScopeFilter),
}

/// Equality scope filter: `field = value`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EqScopeFilter {
    field: String,
    value: ScopeValue,
}

/// Set membership scope filter: `field IN (values)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InScopeFilter {
    field: String,
    values: Vec<ScopeValue>,
}

impl EqScopeFilter {
    #[must_use]
    pub fn new(field: impl Into<String>, value: impl Into<ScopeValue>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    #[inline]
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[inline]
    #[must_use]
    pub fn value(&self) -> &ScopeValue {
        &self.value
    }
}

impl InScopeFilter {
    #[must_use]
    pub fn new(field: impl Into<String>, values: Vec<ScopeValue>) -> Self {
        Self {
            field: field.into(),
            values,
        }
    }

    /// Create from an iterator of convertible values.
    #[must_use]
    pub fn from_values<V: Into<ScopeValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    #[inline]
    #[must_use]
    pub fn values(&self) -> &[ScopeValue] {
        &self.values
    }
}

impl ScopeFilter {
    /// Create an equality filter (`field = value`).
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<ScopeValue>) -> Self {
        Self::Eq(EqScopeFilter::new(field, value))
    }

    /// Create a set membership filter (`field IN (values)`).
    #[must_use]
    pub fn r#in(field: impl Into<String>, values: Vec<ScopeValue>) -> Self {
        Self::In(InScopeFilter::new(field, values))
    }

    /// The record field this filter applies to.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Eq(f) => f.field(),
            Self::In(f) => f.field(),
        }
    }

}

/// A conjunction (AND) of scope filters: one access path.
///
/// All filters within a constraint must match simultaneously for a row
/// to be visible through this path. An empty constraint matches every row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeConstraint {
    filters: Vec<ScopeFilter>,
}

impl ScopeConstraint {
    #[must_use]
    pub fn new(filters: Vec<ScopeFilter>) -> Self {
        Self { filters }
    }

    /// The filters in this constraint (AND-ed together).
    #[inline]
    #[must_use]
    pub fn filters(&self) -> &[ScopeFilter] {
        &self.filters
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// A disjunction (OR) of scope constraints defining which rows are visible.
///
/// Each constraint is an independent access path (OR-ed). Filters within a
/// constraint are AND-ed. An unconstrained scope bypasses row filtering.
///
/// # Examples
///
/// ```
/// use recordkit_security::access_scope::{AccessScope, ScopeConstraint, ScopeFilter, ScopeValue};
///
/// // deny-all (default)
/// let scope = AccessScope::deny_all();
/// assert!(scope.is_deny_all());
///
/// // rows owned by one creator
/// let scope = AccessScope::single(ScopeConstraint::new(vec![
///     ScopeFilter::eq("creator", "alice@example.com"),
/// ]));
/// assert!(!scope.is_deny_all());
/// assert_eq!(scope.constraints()[0].filters()[0].field(), "creator");
///
/// let scope = AccessScope::single(ScopeConstraint::new(vec![ScopeFilter::r#in(
///     "status",
///     vec![ScopeValue::from("draft"), ScopeValue::from(1_i64)],
/// )]));
/// assert!(!scope.is_unconstrained());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessScope {
    constraints: Vec<ScopeConstraint>,
    unconstrained: bool,
}

impl Default for AccessScope {
    /// Default is deny-all: no constraints and not unconstrained.
    fn default() -> Self {
        Self::deny_all()
    }
}

impl AccessScope {
    // ── Constructors ────────────────────────────────────────────────

    /// Create an access scope from a list of constraints (OR-ed).
    #[must_use]
    pub fn from_constraints(constraints: Vec<ScopeConstraint>) -> Self {
        Self {
            constraints,
            unconstrained: false,
        }
    }

    /// Create an access scope with a single constraint.
    #[must_use]
    pub fn single(constraint: ScopeConstraint) -> Self {
        Self::from_constraints(vec![constraint])
    }

    /// Create an "allow all" (unconstrained) scope.
    ///
    /// A legitimate policy outcome with no row-level filtering.
    #[must_use]
    pub fn allow_all() -> Self {
        Self {
            constraints: Vec::new(),
            unconstrained: true,
        }
    }

    /// Create a "deny all" scope (no rows visible).
    #[must_use]
    pub fn deny_all() -> Self {
        Self {
            constraints: Vec::new(),
            unconstrained: false,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// The constraints in this scope (OR-ed).
    #[inline]
    #[must_use]
    pub fn constraints(&self) -> &[ScopeConstraint] {
        &self.constraints
    }

    /// Returns `true` if this scope is unconstrained (allow-all).
    #[inline]
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.unconstrained
    }

    /// Returns `true` if this scope hides every row.
    ///
    /// A scope is deny-all when it is not unconstrained and has no constraints.
    #[must_use]
    pub fn is_deny_all(&self) -> bool {
        !self.unconstrained && self.constraints.is_empty()
    }

}
