//! Caller identity strings.
//!
//! Identities are opaque strings with a kind prefix (`sub:<id>`,
//! `email:<address>`, `role:<name>`). Permission rules list identities
//! verbatim or use the [`WILDCARD`] to match every caller, anonymous
//! callers included.

use std::collections::BTreeSet;

/// Matches any caller in a permission rule.
pub const WILDCARD: &str = "*";

pub const SUBJECT_PREFIX: &str = "sub:";
pub const EMAIL_PREFIX: &str = "email:";
pub const ROLE_PREFIX: &str = "role:";

#[must_use]
pub fn subject(id: &str) -> String {
    format!("{SUBJECT_PREFIX}{id}")
}

#[must_use]
pub fn email(address: &str) -> String {
    format!("{EMAIL_PREFIX}{address}")
}

#[must_use]
pub fn role(name: &str) -> String {
    format!("{ROLE_PREFIX}{name}")
}

/// Returns `true` when a rule listing `rule_identities` applies to a caller
/// holding `caller`.
///
/// A rule applies if it lists the wildcard or shares at least one identity
/// with the caller. A rule with no identities never applies.
#[must_use]
pub fn matches<S: AsRef<str>>(rule_identities: &[S], caller: &BTreeSet<String>) -> bool {
    rule_identities.iter().any(|identity| {
        let identity = identity.as_ref();
        identity == WILDCARD || caller.contains(identity)
    })
}
