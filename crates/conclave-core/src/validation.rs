//! Reply validators.
//!
//! A validator is a named predicate over reply text. The trait is async so
//! network-backed implementations (a remote moderation endpoint, say) fit
//! the same seam as the pure built-ins.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::reply::ValidationOutcome;

/// Construction-time validator errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Named predicate over reply content.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Name reported in [`ValidationOutcome::validator`].
    fn name(&self) -> &str;

    /// Check the content. Never errors; rejection is encoded in the outcome.
    async fn validate(&self, content: &str, ctx: &CancellationToken) -> ValidationOutcome;
}

/// Passes when the content parses as JSON, optionally requiring top-level
/// properties. A single leading fenced code block is stripped first.
pub struct JsonSchemaValidator {
    required: Vec<String>,
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self { required: Vec::new() }
    }

    /// Require the named top-level properties to be present.
    pub fn with_required<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for JsonSchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for JsonSchemaValidator {
    fn name(&self) -> &str {
        "JsonSchema"
    }

    async fn validate(&self, content: &str, _ctx: &CancellationToken) -> ValidationOutcome {
        let body = strip_code_fence(content);
        if body.trim().is_empty() {
            return ValidationOutcome::fail(self.name(), "content is empty");
        }

        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                return ValidationOutcome::fail(self.name(), format!("not valid JSON: {e}"))
            }
        };

        if self.required.is_empty() {
            return ValidationOutcome::pass(self.name());
        }

        let Some(object) = value.as_object() else {
            return ValidationOutcome::fail(
                self.name(),
                "required properties given but content is not a JSON object",
            );
        };
        for property in &self.required {
            if !object.contains_key(property) {
                return ValidationOutcome::fail(
                    self.name(),
                    format!("missing required property '{property}'"),
                );
            }
        }
        ValidationOutcome::pass(self.name())
    }
}

/// Strip a single leading ```-fenced block, returning its body.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        // The first line may carry a language tag ("```json").
        if let Some(newline) = rest.find('\n') {
            let body = &rest[newline + 1..];
            if let Some(end) = body.rfind("```") {
                return body[..end].trim();
            }
        }
    }
    trimmed
}

/// Passes when every required token occurs and no forbidden token does.
pub struct ContentFilterValidator {
    must_contain: Vec<String>,
    must_not_contain: Vec<String>,
    case_sensitive: bool,
}

impl ContentFilterValidator {
    pub fn new() -> Self {
        Self {
            must_contain: Vec::new(),
            must_not_contain: Vec::new(),
            case_sensitive: false,
        }
    }

    pub fn must_contain(mut self, token: impl Into<String>) -> Self {
        self.must_contain.push(token.into());
        self
    }

    pub fn must_not_contain(mut self, token: impl Into<String>) -> Self {
        self.must_not_contain.push(token.into());
        self
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    fn contains(&self, haystack: &str, needle: &str) -> bool {
        if self.case_sensitive {
            haystack.contains(needle)
        } else {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
    }
}

impl Default for ContentFilterValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for ContentFilterValidator {
    fn name(&self) -> &str {
        "ContentFilter"
    }

    async fn validate(&self, content: &str, _ctx: &CancellationToken) -> ValidationOutcome {
        if content.trim().is_empty() {
            return ValidationOutcome::fail(self.name(), "content is empty");
        }
        for token in &self.must_contain {
            if !self.contains(content, token) {
                return ValidationOutcome::fail(
                    self.name(),
                    format!("missing required text '{token}'"),
                );
            }
        }
        for token in &self.must_not_contain {
            if self.contains(content, token) {
                return ValidationOutcome::fail(
                    self.name(),
                    format!("contains forbidden text '{token}'"),
                );
            }
        }
        ValidationOutcome::pass(self.name())
    }
}

/// Passes when the character count lies within the configured bounds.
pub struct LengthValidator {
    min: Option<usize>,
    max: Option<usize>,
}

impl LengthValidator {
    pub fn new(min: Option<usize>, max: Option<usize>) -> Self {
        Self { min, max }
    }

    pub fn at_least(min: usize) -> Self {
        Self::new(Some(min), None)
    }

    pub fn at_most(max: usize) -> Self {
        Self::new(None, Some(max))
    }
}

#[async_trait]
impl Validator for LengthValidator {
    fn name(&self) -> &str {
        "Length"
    }

    async fn validate(&self, content: &str, _ctx: &CancellationToken) -> ValidationOutcome {
        let length = content.chars().count();
        if let Some(min) = self.min {
            if length < min {
                return ValidationOutcome::fail(
                    self.name(),
                    format!("length {length} below minimum {min}"),
                );
            }
        }
        if let Some(max) = self.max {
            if length > max {
                return ValidationOutcome::fail(
                    self.name(),
                    format!("length {length} above maximum {max}"),
                );
            }
        }
        ValidationOutcome::pass(self.name())
    }
}

/// Passes when the pattern matches somewhere in the content.
///
/// The pattern is compiled once at construction; the `regex` engine is
/// linear-time, so matching needs no evaluation guard.
pub struct RegexValidator {
    pattern: Regex,
}

impl RegexValidator {
    pub fn new(pattern: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

#[async_trait]
impl Validator for RegexValidator {
    fn name(&self) -> &str {
        "Regex"
    }

    async fn validate(&self, content: &str, _ctx: &CancellationToken) -> ValidationOutcome {
        if content.trim().is_empty() {
            return ValidationOutcome::fail(self.name(), "content is empty");
        }
        if self.pattern.is_match(content) {
            ValidationOutcome::pass(self.name())
        } else {
            ValidationOutcome::fail(
                self.name(),
                format!("pattern '{}' not found", self.pattern.as_str()),
            )
        }
    }
}

/// Caller-supplied predicate under a caller-supplied name.
///
/// The check returns `Err` for internal faults; those become failures with
/// the fault appended to the configured message.
pub struct CustomValidator {
    name: String,
    message: String,
    check: Arc<dyn Fn(&str) -> Result<bool, String> + Send + Sync>,
}

impl CustomValidator {
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        check: impl Fn(&str) -> Result<bool, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            check: Arc::new(check),
        }
    }
}

#[async_trait]
impl Validator for CustomValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn validate(&self, content: &str, _ctx: &CancellationToken) -> ValidationOutcome {
        match (self.check)(content) {
            Ok(true) => ValidationOutcome::pass(self.name()),
            Ok(false) => ValidationOutcome::fail(self.name(), self.message.clone()),
            Err(fault) => {
                ValidationOutcome::fail(self.name(), format!("{}: {fault}", self.message))
            }
        }
    }
}

/// Runs children in order.
///
/// `validate` short-circuits at the first rejection; `validate_all` reports
/// every child's outcome.
pub struct CompositeValidator {
    validators: Vec<Arc<dyn Validator>>,
}

impl CompositeValidator {
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> Self {
        Self { validators }
    }

    pub fn push(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Every child's outcome, in order, without short-circuiting.
    pub async fn validate_all(
        &self,
        content: &str,
        ctx: &CancellationToken,
    ) -> Vec<ValidationOutcome> {
        let mut outcomes = Vec::with_capacity(self.validators.len());
        for validator in &self.validators {
            outcomes.push(validator.validate(content, ctx).await);
        }
        outcomes
    }
}

#[async_trait]
impl Validator for CompositeValidator {
    fn name(&self) -> &str {
        "Composite"
    }

    async fn validate(&self, content: &str, ctx: &CancellationToken) -> ValidationOutcome {
        for validator in &self.validators {
            let outcome = validator.validate(content, ctx).await;
            if !outcome.valid {
                let reason = outcome.error.unwrap_or_default();
                return ValidationOutcome::fail(
                    self.name(),
                    format!("validator '{}' failed: {reason}", outcome.validator),
                );
            }
        }
        ValidationOutcome::pass(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn test_json_valid_object() {
        let validator = JsonSchemaValidator::new();
        let outcome = validator.validate(r#"{"answer": 42}"#, &ctx()).await;
        assert!(outcome.valid);
    }

    #[tokio::test]
    async fn test_json_required_properties() {
        let validator = JsonSchemaValidator::with_required(["name", "age"]);
        let ok = validator
            .validate(r#"{"name": "Ada", "age": 36}"#, &ctx())
            .await;
        assert!(ok.valid);

        let missing = validator.validate(r#"{"name": "Ada"}"#, &ctx()).await;
        assert!(!missing.valid);
        assert!(missing.error.unwrap().contains("age"));
    }

    #[tokio::test]
    async fn test_json_strips_fenced_block() {
        let validator = JsonSchemaValidator::new();
        let fenced = "```json\n{\"ok\": true}\n```";
        assert!(validator.validate(fenced, &ctx()).await.valid);
    }

    #[tokio::test]
    async fn test_json_rejects_empty_and_garbage() {
        let validator = JsonSchemaValidator::new();
        assert!(!validator.validate("", &ctx()).await.valid);
        assert!(!validator.validate("   ", &ctx()).await.valid);
        assert!(!validator.validate("not json", &ctx()).await.valid);
    }

    #[tokio::test]
    async fn test_content_filter() {
        let validator = ContentFilterValidator::new()
            .must_contain("Paris")
            .must_not_contain("London");

        assert!(
            validator
                .validate("The capital is paris", &ctx())
                .await
                .valid,
            "match is case-insensitive by default"
        );
        assert!(!validator.validate("The capital is London", &ctx()).await.valid);
        assert!(!validator.validate("", &ctx()).await.valid);
    }

    #[tokio::test]
    async fn test_content_filter_case_sensitive() {
        let validator = ContentFilterValidator::new()
            .must_contain("Paris")
            .case_sensitive(true);
        assert!(!validator.validate("the capital is paris", &ctx()).await.valid);
        assert!(validator.validate("the capital is Paris", &ctx()).await.valid);
    }

    #[tokio::test]
    async fn test_length_bounds() {
        let validator = LengthValidator::new(Some(3), Some(5));
        assert!(!validator.validate("ab", &ctx()).await.valid);
        assert!(validator.validate("abc", &ctx()).await.valid);
        assert!(validator.validate("abcde", &ctx()).await.valid);
        assert!(!validator.validate("abcdef", &ctx()).await.valid);
    }

    #[tokio::test]
    async fn test_length_counts_chars_not_bytes() {
        // "héll" is 4 chars but 5 bytes
        let validator = LengthValidator::at_most(4);
        assert!(validator.validate("héll", &ctx()).await.valid);
    }

    #[tokio::test]
    async fn test_regex_match() {
        let validator = RegexValidator::new(r"\d{4}").unwrap();
        assert!(validator.validate("year 2026", &ctx()).await.valid);
        assert!(!validator.validate("no digits", &ctx()).await.valid);
        assert!(!validator.validate("  ", &ctx()).await.valid);
    }

    #[test]
    fn test_regex_invalid_pattern_rejected() {
        assert!(RegexValidator::new("(unclosed").is_err());
    }

    #[tokio::test]
    async fn test_custom_validator_fault_appends_message() {
        let validator = CustomValidator::new("NonEmpty", "content rejected", |content| {
            if content == "explode" {
                Err("internal fault".to_string())
            } else {
                Ok(!content.is_empty())
            }
        });

        assert!(validator.validate("fine", &ctx()).await.valid);

        let rejected = validator.validate("", &ctx()).await;
        assert_eq!(rejected.error.as_deref(), Some("content rejected"));

        let faulted = validator.validate("explode", &ctx()).await;
        assert_eq!(
            faulted.error.as_deref(),
            Some("content rejected: internal fault")
        );
    }

    #[tokio::test]
    async fn test_composite_short_circuits_and_names_child() {
        let composite = CompositeValidator::new(vec![
            Arc::new(LengthValidator::at_least(3)),
            Arc::new(RegexValidator::new(r"\d").unwrap()),
        ]);

        let outcome = composite.validate("ab", &ctx()).await;
        assert!(!outcome.valid);
        assert!(outcome.error.unwrap().contains("'Length'"));

        let all = composite.validate_all("ab", &ctx()).await;
        assert_eq!(all.len(), 2);
        assert!(!all[0].valid);
        assert!(!all[1].valid);
    }
}
