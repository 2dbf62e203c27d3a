#![allow(clippy::unwrap_used, clippy::expect_used)]

use recordkit_security::identity::{self, WILDCARD};
use recordkit_security::{AccessScope, ScopeConstraint, ScopeFilter, ScopeValue, SecurityContext};

#[test]
fn empty_scope_is_deny_all() {
    let scope = AccessScope::default();
    assert!(scope.is_deny_all());
    assert!(!scope.is_unconstrained());
    assert!(scope.constraints().is_empty());
}

#[test]
fn empty_constraint_is_not_deny_all() {
    // an access path without filters still admits rows
    let scope = AccessScope::single(ScopeConstraint::new(Vec::new()));
    assert!(!scope.is_deny_all());
    assert!(scope.constraints()[0].filters().is_empty());
}

#[test]
fn constraints_are_alternative_access_paths() {
    let scope = AccessScope::from_constraints(vec![
        ScopeConstraint::new(vec![ScopeFilter::eq("creator", "alice@example.com")]),
        ScopeConstraint::new(vec![ScopeFilter::r#in(
            "creator",
            vec![ScopeValue::from("bob@example.com"), ScopeValue::from(7_i64)],
        )]),
    ]);

    assert!(!scope.is_deny_all());
    let fields: Vec<&str> = scope
        .constraints()
        .iter()
        .flat_map(|c| c.filters().iter().map(ScopeFilter::field))
        .collect();
    assert_eq!(fields, vec!["creator", "creator"]);
    assert_eq!(ScopeValue::from(7_i64).to_string(), "7");
    assert_eq!(ScopeValue::from("bob@example.com").as_str(), Some("bob@example.com"));
}

#[test]
fn context_identities_drive_rule_matching() {
    let ctx = SecurityContext::builder()
        .email("carol@example.com")
        .role("reviewer")
        .build();

    assert!(identity::matches(&["role:reviewer"], ctx.identities()));
    assert!(identity::matches(&[WILDCARD], ctx.identities()));
    assert!(!identity::matches(&["email:dave@example.com"], ctx.identities()));
    assert!(!identity::matches(&["role:reviewer"], SecurityContext::anonymous().identities()));
}
