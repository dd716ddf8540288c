//! Unit tests for envelope parsing, versions, and digests.

use rstest::rstest;
use serde_json::{Value, json};

use super::*;
use crate::tests::support::valid_envelope_json;

fn with_field(field: &str, value: Value) -> Value {
    let mut raw = valid_envelope_json("msg-001", "key-001");
    if let Some(map) = raw.as_object_mut() {
        map.insert(field.to_owned(), value);
    }
    raw
}

fn without_field(field: &str) -> Value {
    let mut raw = valid_envelope_json("msg-001", "key-001");
    if let Some(map) = raw.as_object_mut() {
        map.remove(field);
    }
    raw
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[test]
fn parses_valid_envelope() {
    let envelope =
        Envelope::from_value(&valid_envelope_json("msg-001", "key-001")).expect("valid envelope");
    assert_eq!(envelope.message_id(), "msg-001");
    assert_eq!(envelope.trace_id(), "trace-001");
    assert_eq!(envelope.kind(), MessageKind::Command);
    assert_eq!(envelope.module_version().module(), "memory");
    assert_eq!(envelope.module_version().version(), Version::new(3, 21, 0));
    assert_eq!(envelope.payload_schema_parts(), ("memory", "write"));
    assert_eq!(envelope.replay_protection_key(), "key-001");
    assert!(envelope.parent_span_id().is_none());
}

#[rstest]
#[case::null(Value::Null)]
#[case::array(json!([]))]
#[case::string(json!("envelope"))]
#[case::number(json!(42))]
fn rejects_non_objects(#[case] raw: Value) {
    let errors = Envelope::from_value(&raw).expect_err("non-object must fail");
    assert!(matches!(
        errors.issues(),
        [EnvelopeError::NotAnObject { .. }]
    ));
}

#[test]
fn reports_every_missing_field() {
    let errors = Envelope::from_value(&json!({ "foo": "bar" })).expect_err("must fail");
    assert!(
        errors
            .issues()
            .contains(&EnvelopeError::UnknownField { field: "foo".to_owned() })
    );
    let missing = errors
        .issues()
        .iter()
        .filter(|issue| matches!(issue, EnvelopeError::MissingField { .. }))
        .count();
    assert_eq!(missing, 11);
}

#[rstest]
#[case::message_id("message_id")]
#[case::trace_id("trace_id")]
#[case::timestamp("timestamp")]
#[case::module_version("module_version")]
#[case::replay_key("replay_protection_key")]
#[case::payload("payload")]
fn rejects_missing_required_field(#[case] field: &str) {
    let errors = Envelope::from_value(&without_field(field)).expect_err("must fail");
    assert!(
        errors
            .issues()
            .iter()
            .any(|issue| matches!(issue, EnvelopeError::MissingField { field: name } if *name == field))
    );
}

#[rstest]
#[case::empty("")]
#[case::whitespace("   ")]
fn rejects_blank_strings(#[case] blank: &str) {
    let errors = Envelope::from_value(&with_field("message_id", json!(blank))).expect_err("blank");
    assert_eq!(
        errors.issues(),
        &[EnvelopeError::EmptyField { field: "message_id" }]
    );
}

#[rstest]
#[case::string(json!("not a number"))]
#[case::negative(json!(-1))]
#[case::fraction(json!(1.5))]
fn rejects_bad_timestamps(#[case] timestamp: Value) {
    assert!(Envelope::from_value(&with_field("timestamp", timestamp)).is_err());
}

#[test]
fn accepts_zero_timestamp() {
    let envelope = Envelope::from_value(&with_field("timestamp", json!(0))).expect("zero is valid");
    assert_eq!(envelope.timestamp(), 0);
}

#[rstest]
#[case::event("event")]
#[case::upper("COMMAND")]
fn rejects_unknown_kinds(#[case] kind: &str) {
    let errors = Envelope::from_value(&with_field("kind", json!(kind))).expect_err("bad kind");
    assert!(matches!(errors.issues(), [EnvelopeError::InvalidKind { .. }]));
}

#[rstest]
#[case::no_dot("nodot")]
#[case::two_dots("too.many.dots")]
#[case::empty_action("memory.")]
fn rejects_malformed_payload_schema(#[case] schema: &str) {
    let errors =
        Envelope::from_value(&with_field("payload_schema", json!(schema))).expect_err("schema");
    assert!(matches!(
        errors.issues(),
        [EnvelopeError::InvalidPayloadSchema { .. }]
    ));
}

#[rstest]
#[case::no_separator("memory-3.21.0")]
#[case::short_version("memory@3.21")]
#[case::alpha_version("memory@3.x.0")]
#[case::empty_module("@1.0.0")]
#[case::leading_zero_major("memory@03.21.0")]
#[case::leading_zero_patch("memory@3.21.00")]
fn rejects_malformed_module_version(#[case] module_version: &str) {
    let errors = Envelope::from_value(&with_field("module_version", json!(module_version)))
        .expect_err("module version");
    assert!(matches!(
        errors.issues(),
        [EnvelopeError::InvalidModuleVersion { .. }]
    ));
}

#[test]
fn rejects_unknown_fields_but_accepts_optional_extras() {
    assert!(Envelope::from_value(&with_field("unknown_field", json!("value"))).is_err());

    let mut raw = valid_envelope_json("msg-001", "key-001");
    if let Some(map) = raw.as_object_mut() {
        map.insert("parent_span_id".to_owned(), json!("span"));
        map.insert("auth_context".to_owned(), json!({ "subject": "user" }));
        map.insert("expected_previous_hash".to_owned(), json!("hash"));
    }
    let envelope = Envelope::from_value(&raw).expect("extras are allowed");
    assert_eq!(envelope.parent_span_id(), Some("span"));
    assert_eq!(envelope.expected_previous_hash(), Some("hash"));
    assert!(envelope.auth_context().is_some());
}

#[test]
fn rejects_non_object_auth_context() {
    assert!(Envelope::from_value(&with_field("auth_context", json!("admin"))).is_err());
}

#[test]
fn validation_error_summary_lists_issues() {
    let errors = Envelope::from_value(&Value::Null).expect_err("null");
    assert_eq!(
        errors.to_string(),
        "invalid envelope: envelope must be an object, found null"
    );
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

#[test]
fn versions_compare_numerically() {
    let low = "1.0.2".parse::<Version>().expect("parse");
    let high = "1.0.10".parse::<Version>().expect("parse");
    assert!(high > low);
}

#[rstest]
#[case::zero_components("0.0.0", true)]
#[case::multi_digit("10.20.30", true)]
#[case::leading_zero_minor("1.02.0", false)]
#[case::all_padded("01.01.01", false)]
#[case::double_zero("1.0.00", false)]
fn version_components_reject_leading_zeros(#[case] input: &str, #[case] accepted: bool) {
    assert_eq!(input.parse::<Version>().is_ok(), accepted);
}

#[test]
fn module_version_round_trips_through_display() {
    let parsed = "memory@3.21.0".parse::<ModuleVersion>().expect("parse");
    assert_eq!(parsed.key(), "memory@3.21.0");
    assert_eq!(
        serde_json::to_value(&parsed).expect("serialise"),
        json!("memory@3.21.0")
    );
}

#[test]
fn split_payload_schema_extracts_halves() {
    assert_eq!(split_payload_schema("memory.write"), Some(("memory", "write")));
    assert_eq!(split_payload_schema(""), None);
}

// ---------------------------------------------------------------------------
// Builder and digests
// ---------------------------------------------------------------------------

fn builder(message_id: &str, timestamp: u64, payload: Value) -> EnvelopeBuilder {
    Envelope::builder()
        .message_id(message_id)
        .trace_id("trace-001")
        .timestamp(timestamp)
        .source_module("gateway")
        .target_module("memory")
        .kind(MessageKind::Command)
        .payload_schema("memory.write")
        .payload_version("v1.0.0")
        .module_version("memory@3.21.0")
        .payload(payload)
}

#[test]
fn builder_derives_stable_replay_key() {
    let first = builder("id-1", 1_000, json!({ "key": "k", "value": { "b": 2, "a": 1 } }))
        .build()
        .expect("first");
    let second = builder("id-2", 9_999, json!({ "key": "k", "value": { "a": 1, "b": 2 } }))
        .build()
        .expect("second");
    let hex = first
        .replay_protection_key()
        .strip_prefix("rpk-")
        .expect("derived keys carry the rpk- prefix");
    assert_eq!(hex.len(), 64);
    assert!(
        hex.chars()
            .all(|digit| digit.is_ascii_digit() || ('a'..='f').contains(&digit))
    );
    assert!(first.is_same_replay_key(&second));
    assert!(first.verify_replay_key());
}

#[test]
fn different_payloads_derive_different_keys() {
    let first = builder("id", 1, json!({ "x": 1 })).build().expect("first");
    let second = builder("id", 1, json!({ "x": 2 })).build().expect("second");
    assert!(!first.is_same_replay_key(&second));
}

#[test]
fn explicit_replay_key_is_kept() {
    let envelope = builder("id", 1, json!({}))
        .replay_protection_key("caller-key")
        .build()
        .expect("envelope");
    assert_eq!(envelope.replay_protection_key(), "caller-key");
    assert!(!envelope.verify_replay_key());
}

#[test]
fn builder_reports_missing_fields() {
    let errors = Envelope::builder()
        .message_id("id")
        .build()
        .expect_err("incomplete");
    assert!(errors.len() > 1);
}

#[test]
fn digest_tracks_content() {
    let envelope = builder("id", 1, json!({ "a": 1 })).build().expect("envelope");
    let same = builder("id", 1, json!({ "a": 1 })).build().expect("envelope");
    let other = builder("id", 2, json!({ "a": 1 })).build().expect("envelope");
    assert_eq!(envelope.digest().len(), 64);
    assert_eq!(envelope.digest(), same.digest());
    assert_ne!(envelope.digest(), other.digest());
}
