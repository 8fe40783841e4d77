//! Value normalization shared by the SQL cast compiler and the preview
//! pipeline.
//!
//! The regex patterns below are embedded verbatim in generated SQL and used
//! by the in-process pipeline, so both paths accept and reject the same
//! inputs.

use std::sync::LazyLock;

use regex::Regex;

use crate::ast::OutputType;
use crate::ast::values::json_to_text;

/// Whitespace removed before anything else (POSIX class, valid in Postgres,
/// MySQL and the `regex` crate).
pub const WHITESPACE_PATTERN: &str = "[[:space:]]";

/// Characters stripped after separator normalization.
pub const NON_NUMERIC_PATTERN: &str = "[^0-9.-]";

/// A sanitized value must match this to be cast; anything else is NULL.
pub const NUMBER_PATTERN: &str = "^-?([0-9]+[.]?[0-9]*|[.][0-9]+)$";

/// Accepted spellings of `true` (compared trimmed and lowercased).
pub const TRUTHY: &[&str] = &["true", "t", "1", "yes", "y", "si", "sí"];

/// Accepted spellings of `false`.
pub const FALSY: &[&str] = &["false", "f", "0", "no", "n"];

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(WHITESPACE_PATTERN).expect("valid whitespace pattern"));
static NON_NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NON_NUMERIC_PATTERN).expect("valid non-numeric pattern"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NUMBER_PATTERN).expect("valid number pattern"));

/// Normalize a locale-formatted number to canonical `[-]digits[.digits]`.
///
/// Returns `None` when nothing numeric is left; never `0`, never an error.
///
/// ```
/// use qail_etl::sanitize::sanitize_numeric;
///
/// assert_eq!(sanitize_numeric("1.234.567,89").as_deref(), Some("1234567.89"));
/// assert_eq!(sanitize_numeric("abc"), None);
/// ```
pub fn sanitize_numeric(raw: &str) -> Option<String> {
    let s = WHITESPACE.replace_all(raw, "");
    let dots = s.matches('.').count();
    let commas = s.matches(',').count();

    let normalized = if dots > 0 && commas > 0 {
        // The separator that occurs last is the decimal one
        let last_dot = s.rfind('.');
        let last_comma = s.rfind(',');
        if last_dot > last_comma {
            s.replace(',', "")
        } else {
            s.replace('.', "").replace(',', ".")
        }
    } else if dots > 1 {
        s.replace('.', "")
    } else if commas > 1 {
        s.replace(',', "")
    } else if commas == 1 {
        s.replace(',', ".")
    } else {
        s.into_owned()
    };

    let cleaned = NON_NUMERIC.replace_all(&normalized, "");
    if NUMBER.is_match(&cleaned) {
        Some(cleaned.into_owned())
    } else {
        None
    }
}

/// Parse a boolean from the accepted truthy/falsy spellings.
pub fn parse_boolean(raw: &str) -> Option<bool> {
    let v = raw.trim().to_lowercase();
    if TRUTHY.contains(&v.as_str()) {
        Some(true)
    } else if FALSY.contains(&v.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Whether `s` is a plain numeric literal safe to inline.
pub fn is_numeric_literal(s: &str) -> bool {
    NUMBER.is_match(s.trim())
}

/// Normalize a THEN/ELSE value to the rule's output type, as text.
///
/// Booleans become `true`/`false`, numbers that do not parse become `0`,
/// strings pass through.
pub fn output_literal(value: &serde_json::Value, output_type: OutputType) -> String {
    let text = json_to_text(value).unwrap_or_default();
    match output_type {
        OutputType::Boolean => parse_boolean(&text).unwrap_or(false).to_string(),
        OutputType::Number => {
            if is_numeric_literal(&text) {
                text.trim().to_string()
            } else {
                "0".to_string()
            }
        }
        OutputType::String => text,
    }
}
