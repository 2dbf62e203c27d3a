//! Permission resolution.
//!
//! Rules are evaluated in declaration order against the caller's identity
//! set. The row filter comes from the first matching rule that carries one;
//! field permissions are folded over every matching rule, the last one
//! winning.

use std::collections::{BTreeMap, BTreeSet};

use recordkit_security::{AccessScope, ScopeConstraint, identity};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldPermission {
    #[default]
    ReadWrite,
    /// Visible to the caller, settable only by the engine.
    ReadOnly,
    /// Never returned, never settable.
    Restricted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionRule {
    pub identities: Vec<String>,
    /// `None` (or an empty constraint) means the rule does not restrict rows.
    pub row_filter: Option<ScopeConstraint>,
    pub default_permission: FieldPermission,
    pub read_write: Vec<String>,
    pub read_only: Vec<String>,
    pub restricted: Vec<String>,
}

impl PermissionRule {
    #[must_use]
    pub fn new<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identities: identities.into_iter().map(Into::into).collect(),
            row_filter: None,
            default_permission: FieldPermission::ReadWrite,
            read_write: Vec::new(),
            read_only: Vec::new(),
            restricted: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_row_filter(mut self, filter: ScopeConstraint) -> Self {
        self.row_filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_default(mut self, permission: FieldPermission) -> Self {
        self.default_permission = permission;
        self
    }

    #[must_use]
    pub fn read_write<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.read_write.extend(fields.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn read_only<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.read_only.extend(fields.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn restricted<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.restricted.extend(fields.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn matches(&self, identities: &BTreeSet<String>) -> bool {
        identity::matches(&self.identities, identities)
    }

    /// Every field name this rule refers to.
    pub fn referenced_fields(&self) -> impl Iterator<Item = &str> {
        self.read_write
            .iter()
            .chain(&self.read_only)
            .chain(&self.restricted)
            .map(String::as_str)
            .chain(
                self.row_filter
                    .iter()
                    .flat_map(|c| c.filters().iter().map(|f| f.field())),
            )
    }
}

/// Row visibility for `identities`.
///
/// | Rules | Result |
/// |-------|--------|
/// | no rule carries a non-empty filter | allow-all |
/// | first matching rule with a non-empty filter | that filter |
/// | filtered rules exist, none matches | deny-all |
#[must_use]
pub fn resolve_row_filter(identities: &BTreeSet<String>, rules: &[PermissionRule]) -> AccessScope {
    let mut any_filtered = false;
    for rule in rules {
        let Some(filter) = rule.row_filter.as_ref().filter(|f| !f.is_empty()) else {
            continue;
        };
        any_filtered = true;
        if rule.matches(identities) {
            return AccessScope::single(filter.clone());
        }
    }
    if any_filtered {
        AccessScope::deny_all()
    } else {
        AccessScope::allow_all()
    }
}

/// Resolved permission per field name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPermissions {
    map: BTreeMap<String, FieldPermission>,
}

impl FieldPermissions {
    /// Every field read-write. Used for unsecured calls.
    pub fn all_read_write<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            map: fields
                .into_iter()
                .map(|f| (f.to_owned(), FieldPermission::ReadWrite))
                .collect(),
        }
    }

    /// Permission of `field`. Fields outside the model are restricted.
    #[must_use]
    pub fn get(&self, field: &str) -> FieldPermission {
        self.map
            .get(field)
            .copied()
            .unwrap_or(FieldPermission::Restricted)
    }

    #[must_use]
    pub fn is_visible(&self, field: &str) -> bool {
        self.get(field) != FieldPermission::Restricted
    }

    #[must_use]
    pub fn is_writable(&self, field: &str) -> bool {
        self.get(field) == FieldPermission::ReadWrite
    }
}

/// Field permissions for `identities` over `fields`.
///
/// Each matching rule, in declaration order, resets every field to the rule
/// default and then applies its read-write, read-only and restricted lists.
/// The last matching rule therefore decides every field.
#[must_use]
pub fn resolve_field_permissions<'a>(
    identities: &BTreeSet<String>,
    rules: &[PermissionRule],
    default: FieldPermission,
    fields: impl IntoIterator<Item = &'a str>,
) -> FieldPermissions {
    let mut map: BTreeMap<String, FieldPermission> =
        fields.into_iter().map(|f| (f.to_owned(), default)).collect();

    for rule in rules.iter().filter(|r| r.matches(identities)) {
        for p in map.values_mut() {
            *p = rule.default_permission;
        }
        let lists = [
            (&rule.read_write, FieldPermission::ReadWrite),
            (&rule.read_only, FieldPermission::ReadOnly),
            (&rule.restricted, FieldPermission::Restricted),
        ];
        for (list, permission) in lists {
            for field in list {
                if let Some(p) = map.get_mut(field) {
                    *p = permission;
                }
            }
        }
    }

    FieldPermissions { map }
}
