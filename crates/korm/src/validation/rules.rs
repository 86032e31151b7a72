//! Common field checks for `Entity::validate` implementations.
//!
//! Each check records an error on failure and returns `&mut Self`, so a
//! validator reads as one chain:
//!
//! ```ignore
//! let mut errors = ValidationErrors::new();
//! errors
//!     .present("title", &post.title)
//!     .length("title", &post.title, 1..=120)
//!     .email("author_email", &post.author_email);
//! errors.into_result()
//! ```

use super::{ValidationCode, ValidationError, ValidationErrors};
use regex::Regex;
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Mutex, OnceLock};

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
}

/// Compiled patterns, keyed by source. An invalid pattern is cached as `None`.
fn compiled(pattern: &'static str) -> Option<Regex> {
    static PATTERNS: OnceLock<Mutex<HashMap<&'static str, Option<Regex>>>> = OnceLock::new();
    let mut patterns = PATTERNS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    patterns
        .entry(pattern)
        .or_insert_with(|| Regex::new(pattern).ok())
        .clone()
}

impl ValidationErrors {
    fn fail(&mut self, field: &str, code: ValidationCode, message: String) -> &mut Self {
        self.push(ValidationError::new(field, code, message));
        self
    }

    /// Non-blank after trimming.
    pub fn present(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.required(field);
        }
        self
    }

    /// Character count within `bounds`.
    pub fn length(&mut self, field: &str, value: &str, bounds: RangeInclusive<usize>) -> &mut Self {
        let chars = value.chars().count();
        if bounds.contains(&chars) {
            return self;
        }
        let message = format!(
            "{field} must be {} to {} characters, got {chars}",
            bounds.start(),
            bounds.end()
        );
        self.fail(field, ValidationCode::Length, message)
    }

    pub fn range(&mut self, field: &str, value: i64, bounds: RangeInclusive<i64>) -> &mut Self {
        if bounds.contains(&value) {
            return self;
        }
        let message = format!("{field} must be between {} and {}", bounds.start(), bounds.end());
        self.push(ValidationError::new(field, ValidationCode::Range, message).with_value(value));
        self
    }

    /// Loose address check: something, an `@`, a dotted domain.
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if email_pattern().is_some_and(|re| re.is_match(value)) {
            return self;
        }
        self.fail(field, ValidationCode::Email, format!("{field} is not an email address"))
    }

    /// An unparsable pattern fails every value.
    pub fn matches(&mut self, field: &str, value: &str, pattern: &'static str) -> &mut Self {
        if compiled(pattern).is_some_and(|re| re.is_match(value)) {
            return self;
        }
        self.fail(field, ValidationCode::Pattern, format!("{field} does not match {pattern}"))
    }

    pub fn url(&mut self, field: &str, value: &str) -> &mut Self {
        if url::Url::parse(value).is_ok() {
            return self;
        }
        self.fail(field, ValidationCode::Url, format!("{field} is not a URL"))
    }

    pub fn uuid(&mut self, field: &str, value: &str) -> &mut Self {
        if uuid::Uuid::parse_str(value).is_ok() {
            return self;
        }
        self.fail(field, ValidationCode::Uuid, format!("{field} is not a UUID"))
    }

    pub fn one_of(&mut self, field: &str, value: &str, choices: &[&str]) -> &mut Self {
        if choices.contains(&value) {
            return self;
        }
        let message = format!("{field} must be one of {}", choices.join(", "));
        self.fail(field, ValidationCode::Choice, message)
    }
}
