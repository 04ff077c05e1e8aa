//! Input validation.
//!
//! Request payloads are parsed into loose DTOs and then turned into typed
//! domain inputs by [`Validate::validate`], which either yields the typed
//! value or the full list of problems found.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\w+([.-]?\w+)*@\w+([.-]?\w+)*(\.\w{2,})+$").expect("valid email regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `questions.2.options`
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self(vec![FieldError {
            path: path.into(),
            message: message.into(),
        }])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.path, e.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Turns an unchecked payload into a typed, checked value.
pub trait Validate {
    type Valid;

    fn validate(self) -> Result<Self::Valid, ValidationErrors>;
}

/// Collects field errors while a payload is checked.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn check(&mut self, ok: bool, path: impl Into<String>, message: impl Into<String>) {
        if !ok {
            self.error(path, message);
        }
    }

    /// Trims `value` and records an error if nothing is left.
    pub fn required(&mut self, path: &str, value: String) -> String {
        let value = value.trim().to_string();
        if value.is_empty() {
            self.error(path, "must not be empty");
        }
        value
    }

    /// Trims `value` and checks its length in characters.
    pub fn length(&mut self, path: &str, value: String, min: usize, max: usize) -> String {
        let value = value.trim().to_string();
        let len = value.chars().count();
        if len < min || len > max {
            self.error(
                path,
                format!("must be between {min} and {max} characters long"),
            );
        }
        value
    }

    pub fn email(&mut self, path: &str, value: String) -> String {
        let value = value.trim().to_lowercase();
        if !is_email(&value) {
            self.error(path, "must be a valid email address");
        }
        value
    }

    pub fn range<T: PartialOrd + fmt::Display + Copy>(
        &mut self,
        path: &str,
        value: T,
        min: T,
        max: T,
    ) -> T {
        if value < min || value > max {
            self.error(path, format!("must be between {min} and {max}"));
        }
        value
    }

    /// Merges errors of a nested value under `prefix`.
    pub fn nested(&mut self, prefix: &str, errors: ValidationErrors) {
        for e in errors.0 {
            self.errors.push(FieldError {
                path: format!("{prefix}.{}", e.path),
                message: e.message,
            });
        }
    }

    pub fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}

pub fn is_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn difficulty(v: &mut Validator, path: &str, value: i64) -> i64 {
    v.range(path, value, 1, 5)
}
