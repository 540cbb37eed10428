//! Field validation applied to submitted input before a pause is resumed.
//!
//! The gate itself has no opinion on field semantics; the session validates
//! here and re-presents the pause when anything is rejected.

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::errors::FieldError;
use crate::event::{FieldKind, FieldSpec, InputValues};

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

/// Checks `values` against `fields`.
///
/// Returns only the declared fields on success. Every failing field is
/// reported, not just the first.
pub fn validate_input(fields: &[FieldSpec], values: &InputValues) -> Result<InputValues, Vec<FieldError>> {
    let mut accepted = InputValues::new();
    let mut errors = Vec::new();

    for field in fields {
        match values.get(&field.name).filter(|v| !is_blank(v)) {
            None if field.required => errors.push(FieldError::new(&field.name, "is required")),
            None => {}
            Some(value) => match check_kind(&field.kind, value) {
                Ok(()) => {
                    accepted.insert(field.name.clone(), value.clone());
                }
                Err(reason) => errors.push(FieldError::new(&field.name, reason)),
            },
        }
    }

    if errors.is_empty() {
        Ok(accepted)
    } else {
        Err(errors)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn check_kind(kind: &FieldKind, value: &Value) -> Result<(), String> {
    match kind {
        FieldKind::Text => value
            .as_str()
            .map(|_| ())
            .ok_or_else(|| "must be text".to_string()),
        FieldKind::Number => {
            let parsed = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match parsed {
                Some(n) if n.is_finite() => Ok(()),
                _ => Err("must be a number".into()),
            }
        }
        FieldKind::Email => match value.as_str() {
            Some(s) if EMAIL.is_match(s.trim()) => Ok(()),
            _ => Err("must be a valid e-mail address".into()),
        },
        FieldKind::Url => match value.as_str().map(|s| url::Url::parse(s.trim())) {
            Some(Ok(_)) => Ok(()),
            _ => Err("must be a valid URL".into()),
        },
        FieldKind::Date => match value.as_str().map(str::trim) {
            Some(s) if is_date(s) => Ok(()),
            _ => Err("must be a date (YYYY-MM-DD or RFC 3339)".into()),
        },
        FieldKind::Choice { options } => match value.as_str() {
            Some(s) if options.iter().any(|o| o == s) => Ok(()),
            _ => Err(format!("must be one of: {}", options.join(", "))),
        },
    }
}

fn is_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
}
