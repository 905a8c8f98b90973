//! Input validation
//!
//! A procedure's input passes through a [`Schema`] before its handler runs. The trait is the
//! single capability the router consumes: take the decoded [`Value`], answer with the parsed
//! output or a list of [`Issue`]s. Adapters cover the common cases:
//!
//! - [`Typed`]: the input must deserialize into `T`
//! - [`Validated`]: as `Typed`, then `T`'s own [`Validate`] rules run
//! - [`from_fn`] / [`from_async_fn`]: any closure
//! - [`Optional`]: `undefined` and `null` pass as `None`
//!
//! # Example
//!
//! ```rust,ignore
//! use nexus_rpc::validation::{Validate, ValidationResult, ValidationRules, Validated};
//!
//! #[derive(serde::Deserialize)]
//! struct CreateUserInput {
//!     name: String,
//!     email: String,
//!     age: i64,
//! }
//!
//! impl Validate for CreateUserInput {
//!     fn validate(&self) -> ValidationResult {
//!         ValidationRules::new()
//!             .required("name", &self.name)
//!             .min_length("name", &self.name, 2)
//!             .email("email", &self.email)
//!             .range("age", self.age, 0, 150)
//!             .build()
//!     }
//! }
//!
//! let schema = Validated::<CreateUserInput>::new();
//! ```

use crate::error::{RpcError, RpcResult};
use crate::value::{Value, from_value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use tracing::{debug, trace, warn};

/// One reason an input was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Human-readable message
    pub message: String,
    /// Location of the offending value, outermost first
    #[serde(default)]
    pub path: Vec<String>,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }

    /// Append a path segment.
    pub fn at(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

/// Outcome of running a schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation<T> {
    Valid(T),
    Invalid(Vec<Issue>),
}

impl<T> Validation<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid(_))
    }

    /// Map a valid output.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Validation<U> {
        match self {
            Validation::Valid(value) => Validation::Valid(f(value)),
            Validation::Invalid(issues) => Validation::Invalid(issues),
        }
    }

    /// Turn rejection into the `BAD_REQUEST` error carrying the issues.
    pub fn into_result(self) -> RpcResult<T> {
        match self {
            Validation::Valid(value) => Ok(value),
            Validation::Invalid(issues) => Err(RpcError::invalid_input(issues)),
        }
    }
}

impl<T> From<Result<T, Vec<Issue>>> for Validation<T> {
    fn from(result: Result<T, Vec<Issue>>) -> Self {
        match result {
            Ok(value) => Validation::Valid(value),
            Err(issues) => Validation::Invalid(issues),
        }
    }
}

/// Future returned by [`Schema::validate`].
pub type ValidationFuture<'a, T> = Pin<Box<dyn Future<Output = Validation<T>> + Send + 'a>>;

/// Parses and checks a procedure's raw input.
pub trait Schema: Send + Sync + 'static {
    /// Parsed input handed to the handler
    type Output: Send + 'static;

    fn validate(&self, input: Value) -> ValidationFuture<'_, Self::Output>;
}

// =============================================================================
// Adapters
// =============================================================================

/// Accepts any input that deserializes into `T`.
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Typed<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for [`Typed::new`].
pub fn typed<T>() -> Typed<T> {
    Typed::new()
}

fn decode<T: DeserializeOwned>(input: Value) -> Validation<T> {
    match from_value::<T>(input) {
        Ok(value) => Validation::Valid(value),
        Err(err) => {
            let issue = Issue::new(match err {
                crate::codec::CodecError::Malformed(message) => message,
                other => other.to_string(),
            });
            trace!(issue = %issue, "Input does not match its type");
            Validation::Invalid(vec![issue])
        }
    }
}

impl<T> Schema for Typed<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn validate(&self, input: Value) -> ValidationFuture<'_, T> {
        Box::pin(async move { decode(input) })
    }
}

/// Deserializes into `T`, then applies `T`'s [`Validate`] rules.
pub struct Validated<T>(PhantomData<fn() -> T>);

impl<T> Validated<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Validated<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schema for Validated<T>
where
    T: DeserializeOwned + Validate + Send + 'static,
{
    type Output = T;

    fn validate(&self, input: Value) -> ValidationFuture<'_, T> {
        Box::pin(async move {
            match decode::<T>(input) {
                Validation::Valid(value) => {
                    let result = value.validate();
                    if result.is_valid() {
                        Validation::Valid(value)
                    } else {
                        Validation::Invalid(result.into_issues())
                    }
                }
                invalid => invalid,
            }
        })
    }
}

/// Schema backed by a synchronous closure.
pub struct FnSchema<F, T> {
    check: F,
    _output: PhantomData<fn() -> T>,
}

/// Build a schema from a closure returning the parsed value or the issues.
///
/// ```rust,ignore
/// let positive = from_fn(|input: Value| match input.as_f64() {
///     Some(n) if n > 0.0 => Ok(n),
///     _ => Err(vec![Issue::new("Expected a positive number")]),
/// });
/// ```
pub fn from_fn<F, T>(check: F) -> FnSchema<F, T>
where
    F: Fn(Value) -> Result<T, Vec<Issue>> + Send + Sync + 'static,
    T: Send + 'static,
{
    FnSchema {
        check,
        _output: PhantomData,
    }
}

impl<F, T> Schema for FnSchema<F, T>
where
    F: Fn(Value) -> Result<T, Vec<Issue>> + Send + Sync + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn validate(&self, input: Value) -> ValidationFuture<'_, T> {
        let result = (self.check)(input);
        Box::pin(async move { result.into() })
    }
}

/// Schema backed by an asynchronous closure.
pub struct AsyncFnSchema<F, T> {
    check: F,
    _output: PhantomData<fn() -> T>,
}

/// Build a schema from an async closure, for checks that need I/O.
pub fn from_async_fn<F, Fut, T>(check: F) -> AsyncFnSchema<F, T>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Vec<Issue>>> + Send + 'static,
    T: Send + 'static,
{
    AsyncFnSchema {
        check,
        _output: PhantomData,
    }
}

impl<F, Fut, T> Schema for AsyncFnSchema<F, T>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Vec<Issue>>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn validate(&self, input: Value) -> ValidationFuture<'_, T> {
        let pending = (self.check)(input);
        Box::pin(async move { pending.await.into() })
    }
}

/// Lets `undefined` and `null` through as `None`; anything else goes to the inner schema.
pub struct Optional<S>(pub S);

impl<S: Schema> Schema for Optional<S> {
    type Output = Option<S::Output>;

    fn validate(&self, input: Value) -> ValidationFuture<'_, Option<S::Output>> {
        Box::pin(async move {
            if input.is_nullish() {
                Validation::Valid(None)
            } else {
                self.0.validate(input).await.map(Some)
            }
        })
    }
}

// =============================================================================
// Field rules
// =============================================================================

/// A rule violation on one named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field that failed
    pub field: String,
    /// Human-readable message
    pub message: String,
    /// Rule identifier (`required`, `min_length`, ...)
    pub code: String,
}

impl FieldError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn custom(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, "custom")
    }
}

impl From<FieldError> for Issue {
    fn from(error: FieldError) -> Self {
        Issue::new(error.message).at(error.field)
    }
}

/// Collected outcome of [`Validate::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<FieldError>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Combine with another result.
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self
    }

    pub fn into_issues(self) -> Vec<Issue> {
        self.errors.into_iter().map(Issue::from).collect()
    }
}

/// Field-level rules for an input type, applied by [`Validated`].
pub trait Validate {
    fn validate(&self) -> ValidationResult;
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> ValidationResult {
        self.as_ref()
            .map(Validate::validate)
            .unwrap_or_default()
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> ValidationResult {
        self.iter()
            .fold(ValidationResult::ok(), |acc, item| acc.merge(item.validate()))
    }
}

/// Fluent builder for common field rules.
#[derive(Debug, Default)]
pub struct ValidationRules {
    errors: Vec<FieldError>,
}

impl ValidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    fn fail(mut self, field: &str, message: String, code: &str) -> Self {
        trace!(field, code, "Field rule failed");
        self.errors.push(FieldError::new(field, message, code));
        self
    }

    /// The string must contain something other than whitespace.
    pub fn required(self, field: &str, value: &str) -> Self {
        if value.trim().is_empty() {
            return self.fail(field, format!("{} is required", field), "required");
        }
        self
    }

    /// At least `min` characters.
    pub fn min_length(self, field: &str, value: &str, min: usize) -> Self {
        if value.chars().count() < min {
            return self.fail(
                field,
                format!("{} must be at least {} characters", field, min),
                "min_length",
            );
        }
        self
    }

    /// At most `max` characters.
    pub fn max_length(self, field: &str, value: &str, max: usize) -> Self {
        if value.chars().count() > max {
            return self.fail(
                field,
                format!("{} must be at most {} characters", field, max),
                "max_length",
            );
        }
        self
    }

    /// Inclusive bounds.
    pub fn range<N>(self, field: &str, value: N, min: N, max: N) -> Self
    where
        N: PartialOrd + fmt::Display,
    {
        if value < min || value > max {
            return self.fail(
                field,
                format!("{} must be between {} and {}", field, min, max),
                "range",
            );
        }
        self
    }

    /// Regular-expression match. An invalid pattern fails the field.
    pub fn pattern(self, field: &str, value: &str, pattern: &str) -> Self {
        match regex::Regex::new(pattern) {
            Ok(re) if re.is_match(value) => self,
            Ok(_) => self.fail(
                field,
                format!("{} must match pattern: {}", field, pattern),
                "pattern",
            ),
            Err(e) => {
                warn!(field, pattern, error = %e, "Invalid validation pattern");
                self.fail(
                    field,
                    format!("Invalid validation pattern: {}", pattern),
                    "invalid_pattern",
                )
            }
        }
    }

    /// `local@domain.tld` shape.
    pub fn email(self, field: &str, value: &str) -> Self {
        let valid = match value.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };
        if !valid {
            return self.fail(
                field,
                format!("{} must be a valid email address", field),
                "email",
            );
        }
        self
    }

    /// Arbitrary predicate.
    pub fn custom(self, field: &str, predicate: impl FnOnce() -> bool, message: &str) -> Self {
        if !predicate() {
            return self.fail(field, message.to_string(), "custom");
        }
        self
    }

    pub fn add_error(mut self, error: FieldError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn build(self) -> ValidationResult {
        if !self.errors.is_empty() {
            debug!(error_count = self.errors.len(), "Validation rules failed");
        }
        ValidationResult::from_errors(self.errors)
    }
}

// =============================================================================
// Procedure names
// =============================================================================

/// Check a dotted procedure name: non-empty segments of ASCII letters, digits, `_` or `-`.
pub fn validate_path(path: &str) -> Result<(), RpcError> {
    if path.is_empty() {
        return Err(RpcError::bad_request("Procedure path cannot be empty"));
    }
    if path.split('.').any(str::is_empty) {
        return Err(RpcError::bad_request(format!(
            "Procedure path has an empty segment (got: '{}')",
            path
        )));
    }
    if let Some(invalid) = path
        .chars()
        .find(|&ch| !ch.is_ascii_alphanumeric() && !matches!(ch, '_' | '-' | '.'))
    {
        return Err(RpcError::bad_request(format!(
            "Procedure path contains invalid character: '{}' in path '{}'",
            invalid, path
        )));
    }
    Ok(())
}
