//! Validation tests - schema adapters and field rules
//!
//! Verifies that schemas accept what they should, reject with issues otherwise, and that
//! rejected input never reaches a handler.

use proptest::prelude::*;

use crate::error::RpcErrorCode;
use crate::event::RequestEvent;
use crate::procedure::procedure;
use crate::validation::{
    FieldError, Issue, Optional, Schema, Validate, Validated, Validation, ValidationResult,
    ValidationRules, from_async_fn, from_fn, typed, validate_path,
};
use crate::value::Value;
use serde::Deserialize;

#[derive(Debug, Deserialize, PartialEq)]
struct CreateUser {
    name: String,
    email: String,
    age: u8,
}

impl Validate for CreateUser {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .required("name", &self.name)
            .max_length("name", &self.name, 20)
            .email("email", &self.email)
            .range("age", self.age, 13, 120)
            .build()
    }
}

fn user(name: &str, email: &str, age: u8) -> Value {
    Value::object([
        ("name", Value::from(name)),
        ("email", Value::from(email)),
        ("age", Value::from(age)),
    ])
}

// =============================================================================
// Property-Based Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: valid dotted names pass path validation
    #[test]
    fn prop_valid_paths_accepted(path in "[a-zA-Z0-9_-]{1,10}(\\.[a-zA-Z0-9_-]{1,10}){0,4}") {
        prop_assert!(validate_path(&path).is_ok());
    }

    /// Property: names with empty segments are rejected
    #[test]
    fn prop_empty_segments_rejected(a in "[a-z]{1,5}", b in "[a-z]{1,5}") {
        for path in [format!(".{}", a), format!("{}.", a), format!("{}..{}", a, b)] {
            prop_assert!(validate_path(&path).is_err(), "{} accepted", path);
        }
    }

    /// Property: a string within the length rule never fails it
    #[test]
    fn prop_length_rules(value in "[a-z]{0,30}", min in 0usize..10, max in 10usize..25) {
        let result = ValidationRules::new()
            .min_length("field", &value, min)
            .max_length("field", &value, max)
            .build();
        let len = value.chars().count();
        prop_assert_eq!(result.is_valid(), len >= min && len <= max);
    }
}

// =============================================================================
// Schema adapters
// =============================================================================

#[tokio::test]
async fn test_typed_schema() {
    let schema = typed::<CreateUser>();
    let accepted = schema.validate(user("ada", "ada@example.com", 36)).await;
    assert!(accepted.is_valid());

    let rejected = schema.validate(Value::object([("name", "ada")])).await;
    let Validation::Invalid(issues) = rejected else {
        panic!("missing fields must be rejected");
    };
    assert_eq!(issues.len(), 1);
}

#[tokio::test]
async fn test_validated_schema_reports_every_rule() {
    let schema = Validated::<CreateUser>::new();
    assert!(schema.validate(user("ada", "ada@example.com", 36)).await.is_valid());

    let Validation::Invalid(issues) = schema.validate(user("", "nope", 5)).await else {
        panic!("rule violations must be rejected");
    };
    let fields: Vec<&str> = issues.iter().map(|issue| issue.path[0].as_str()).collect();
    assert_eq!(fields, vec!["name", "email", "age"]);
}

#[tokio::test]
async fn test_fn_schemas() {
    let positive = from_fn(|input: Value| match input.as_f64() {
        Some(n) if n > 0.0 => Ok(n),
        _ => Err(vec![Issue::new("Expected a positive number")]),
    });
    assert_eq!(positive.validate(Value::from(3)).await, Validation::Valid(3.0));
    assert!(!positive.validate(Value::from(-3)).await.is_valid());

    let lookup = from_async_fn(|input: Value| async move {
        tokio::task::yield_now().await;
        match input.as_str() {
            Some("taken") => Err(vec![Issue::new("Name is taken").at("name")]),
            Some(name) => Ok(name.to_string()),
            None => Err(vec![Issue::new("Expected a string")]),
        }
    });
    assert_eq!(
        lookup.validate(Value::from("free")).await,
        Validation::Valid("free".to_string())
    );
    let Validation::Invalid(issues) = lookup.validate(Value::from("taken")).await else {
        panic!("taken name must be rejected");
    };
    assert_eq!(issues[0].to_string(), "name: Name is taken");
}

#[tokio::test]
async fn test_optional_schema() {
    let schema = Optional(typed::<u32>());
    assert_eq!(schema.validate(Value::Undefined).await, Validation::Valid(None));
    assert_eq!(schema.validate(Value::Null).await, Validation::Valid(None));
    assert_eq!(schema.validate(Value::from(4)).await, Validation::Valid(Some(4)));
    assert!(!schema.validate(Value::from("four")).await.is_valid());
}

#[tokio::test]
async fn test_rejected_input_is_bad_request_with_issues() {
    let p = procedure()
        .input(Validated::<CreateUser>::new())
        .handle(|args| async move { Ok(args.input.name) });

    let err = p
        .call(RequestEvent::detached(), user("", "ada@example.com", 36))
        .await
        .unwrap_err();
    assert_eq!(err.code, RpcErrorCode::BadRequest);
    assert_eq!(err.issues, vec![Issue::new("name is required").at("name")]);
}

// =============================================================================
// Field rules
// =============================================================================

#[test]
fn test_rules_collect_all_errors() {
    let result = ValidationRules::new()
        .required("name", "")
        .pattern("code", "abc", r"^\d+$")
        .custom("terms", || false, "Terms must be accepted")
        .add_error(FieldError::custom("extra", "Always fails"))
        .build();
    assert!(!result.is_valid());
    let issues = result.into_issues();
    assert_eq!(issues.len(), 4);
    assert_eq!(issues[2], Issue::new("Terms must be accepted").at("terms"));
}

#[test]
fn test_collections_merge_results() {
    let users = vec![
        CreateUser { name: "ok".into(), email: "ok@example.com".into(), age: 20 },
        CreateUser { name: "".into(), email: "bad".into(), age: 20 },
    ];
    assert_eq!(users.validate().into_issues().len(), 2);
    assert!(None::<CreateUser>.validate().is_valid());
}
