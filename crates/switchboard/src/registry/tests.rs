//! Unit tests for the handler registry.

use std::sync::Arc;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::tests::support::{FnHandler, sample_envelope};

fn echo() -> Arc<dyn Handler> {
    Arc::new(FnHandler::new(|envelope, _| Ok(envelope.payload().clone())))
}

#[fixture]
fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for version in ["1.0.0", "1.0.10", "1.0.2"] {
        registry
            .register("memory", version, echo(), HandlerDescriptor::new())
            .expect("register memory");
    }
    registry
        .register(
            "query",
            "2.0.0",
            echo(),
            HandlerDescriptor::new().with_kind(MessageKind::Query),
        )
        .expect("register query");
    registry
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn new_registry_is_empty() {
    let registry = HandlerRegistry::new();
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
}

#[rstest]
fn rejects_duplicate_registration(mut registry: HandlerRegistry) {
    let error = registry
        .register("memory", "1.0.2", echo(), HandlerDescriptor::new())
        .expect_err("duplicate should fail");
    assert_eq!(
        error,
        RegistryError::Duplicate {
            key: "memory@1.0.2".to_owned()
        }
    );
    assert!(error.to_string().contains("already registered"));
    assert_eq!(registry.len(), 4);
}

#[rstest]
#[case::short("memory", "1.0")]
#[case::alpha("memory", "one.two.three")]
#[case::empty_module("", "1.0.0")]
#[case::bad_module("mem ory", "1.0.0")]
#[case::leading_zero("memory", "3.021.0")]
fn rejects_invalid_versions(#[case] module: &str, #[case] version: &str) {
    let mut registry = HandlerRegistry::new();
    let error = registry
        .register(module, version, echo(), HandlerDescriptor::new())
        .expect_err("invalid version should fail");
    assert!(matches!(error, RegistryError::InvalidVersion { .. }));
    assert!(registry.is_empty());
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

#[rstest]
fn latest_uses_numeric_ordering(registry: HandlerRegistry) {
    let latest = registry.get("memory", None).expect("latest memory");
    assert_eq!(latest.version(), Version::new(1, 0, 10));
    assert_eq!(
        registry.latest("memory").map(|found| found.key()),
        Some("memory@1.0.10".to_owned())
    );
}

#[rstest]
fn exact_lookup_does_not_fall_back(registry: HandlerRegistry) {
    let pinned = "memory@1.0.2".parse::<ModuleVersion>().expect("parse");
    assert_eq!(
        registry.resolve(&pinned).map(|found| found.key()),
        Some("memory@1.0.2".to_owned())
    );
    let missing = "memory@1.0.3".parse::<ModuleVersion>().expect("parse");
    assert!(registry.resolve(&missing).is_none());
    assert!(registry.get("unknown", None).is_none());
}

#[rstest]
fn versions_are_sorted(registry: HandlerRegistry) {
    assert_eq!(
        registry.versions("memory"),
        vec![
            Version::new(1, 0, 0),
            Version::new(1, 0, 2),
            Version::new(1, 0, 10)
        ]
    );
    assert!(registry.versions("missing").is_empty());
}

#[rstest]
fn list_orders_by_module_then_version(registry: HandlerRegistry) {
    let keys: Vec<String> = registry.list().iter().map(Registration::key).collect();
    assert_eq!(
        keys,
        vec![
            "memory@1.0.0",
            "memory@1.0.2",
            "memory@1.0.10",
            "query@2.0.0"
        ]
    );
}

#[rstest]
fn list_by_kind_respects_descriptors(registry: HandlerRegistry) {
    assert_eq!(registry.list_by_kind(MessageKind::Query).len(), 4);
    let commands: Vec<String> = registry
        .list_by_kind(MessageKind::Command)
        .iter()
        .map(|registration| registration.module().to_owned())
        .collect();
    assert!(commands.iter().all(|module| module == "memory"));
    assert_eq!(commands.len(), 3);
}

#[rstest]
fn snapshots_do_not_alias_the_registry(registry: HandlerRegistry) {
    let mut copy = registry.clone();
    copy.register("memory", "9.9.9", echo(), HandlerDescriptor::new())
        .expect("register on copy");
    assert!(registry.get("memory", Some(Version::new(9, 9, 9))).is_none());
}

// ---------------------------------------------------------------------------
// Capability checks
// ---------------------------------------------------------------------------

#[test]
fn accepts_checks_schema_kind_and_handler() {
    let envelope = sample_envelope("msg", "key");
    let mut registry = HandlerRegistry::new();
    registry
        .register(
            "memory",
            "3.21.0",
            echo(),
            HandlerDescriptor::new().with_schema("memory.read"),
        )
        .expect("register");
    registry
        .register(
            "memory",
            "3.22.0",
            Arc::new(FnHandler::new(|_, _| Ok(json!(null))).refusing()),
            HandlerDescriptor::new(),
        )
        .expect("register");
    registry
        .register(
            "memory",
            "3.23.0",
            echo(),
            HandlerDescriptor::new()
                .with_schema("memory.write")
                .with_kind(MessageKind::Command),
        )
        .expect("register");

    let schema = registry.get("memory", Some(Version::new(3, 21, 0))).expect("3.21.0");
    assert!(schema.accepts(&envelope).is_err_and(|reason| reason.contains("schema")));
    let declined = registry.get("memory", Some(Version::new(3, 22, 0))).expect("3.22.0");
    assert!(declined.accepts(&envelope).is_err_and(|reason| reason.contains("declined")));
    let accepted = registry.get("memory", Some(Version::new(3, 23, 0))).expect("3.23.0");
    assert_eq!(accepted.accepts(&envelope), Ok(()));
}
