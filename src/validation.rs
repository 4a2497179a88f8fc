//! Field rules checked before a step is allowed to write anything.
//!
//! Rules are plain data attached to each step descriptor. A field stops at its
//! first failing rule, so each field reports at most one message.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationErrors;
use crate::value::{Entry, FieldValue, Fields};

lazy_static! {
    pub static ref OUTPUT_NAME_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    pub static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    pub static ref PHONE_REGEX: Regex = Regex::new(r"^[0-9+() -]+$").unwrap();
    pub static ref URL_REGEX: Regex =
        Regex::new(r"^https?://[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*(:[0-9]+)?(/\S*)?$").unwrap();
    pub static ref BUNDLE_ID_REGEX: Regex =
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*(\.[a-zA-Z][a-zA-Z0-9_]*)+$").unwrap();
}

/// Date format used by the campaign date inputs
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single check applied to one field
#[derive(Debug, Clone)]
pub enum Check {
    Required,
    Matches(&'static Regex),
    MinChars(usize),
    Positive,
    Date,
    /// Value must be one of the listed options
    OneOf(Vec<String>),
    /// Value must differ from a placeholder option
    NotEqual(&'static str),
    /// Date must not be later than the date in the named field
    NotAfter(&'static str),
    /// Date must not be earlier than the date in the named field
    NotBefore(&'static str),
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: &'static str,
    pub check: Check,
    pub message: &'static str,
}

impl FieldRule {
    pub fn new(field: &'static str, check: Check, message: &'static str) -> Self {
        Self {
            field,
            check,
            message,
        }
    }
}

/// Rules for a multi-row section: the list as a whole, then every entry
#[derive(Debug, Clone, Default)]
pub struct EntryRules {
    /// Message when the list is empty; `None` allows an empty list
    pub min_one: Option<&'static str>,
    pub entry: Vec<FieldRule>,
}

/// Checks `values` against `rules`, collecting the first failure per field.
pub fn validate_fields(values: &Fields, rules: &[FieldRule]) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    check_into(&mut errors, values, rules, "");
    errors
}

/// Checks the entries stored under `list` in `values`.
pub fn validate_entries(values: &Fields, list: &str, rules: &EntryRules) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let entries = values
        .get(list)
        .and_then(FieldValue::as_entries)
        .unwrap_or(&[]);

    if entries.is_empty() {
        if let Some(message) = rules.min_one {
            errors.add(list, message);
        }
        return errors;
    }

    for (index, entry) in entries.iter().enumerate() {
        let prefix = format!("{}[{}].", list, index);
        check_into(&mut errors, entry, &rules.entry, &prefix);
    }
    errors
}

fn check_into(errors: &mut ValidationErrors, values: &Entry, rules: &[FieldRule], prefix: &str) {
    for rule in rules {
        let key = format!("{}{}", prefix, rule.field);
        if errors.message_for(&key).is_some() {
            continue;
        }
        if !passes(values, rule) {
            errors.add(key, rule.message);
        }
    }
}

fn passes(values: &Entry, rule: &FieldRule) -> bool {
    let value = values.get(rule.field);
    let blank = value.is_none_or(FieldValue::is_blank);

    if let Check::Required = rule.check {
        return !blank;
    }
    // optional fields are only format-checked once something was entered
    let Some(value) = value.filter(|_| !blank) else {
        return true;
    };

    match &rule.check {
        Check::Required => true,
        Check::Matches(regex) => regex.is_match(value.to_text().trim()),
        Check::MinChars(min) => value.to_text().trim().chars().count() >= *min,
        Check::Positive => value.as_number().is_some_and(|n| n > 0.0),
        Check::Date => parse_date(value).is_some(),
        Check::OneOf(options) => {
            let text = value.to_text();
            options.iter().any(|o| o == text.trim())
        }
        Check::NotEqual(placeholder) => value.to_text().trim() != *placeholder,
        Check::NotAfter(other) => compare_dates(value, values.get(*other), |a, b| a <= b),
        Check::NotBefore(other) => compare_dates(value, values.get(*other), |a, b| a >= b),
    }
}

/// Cross-field comparisons only fail when both sides are valid dates; a
/// missing or malformed counterpart is reported by its own rules.
fn compare_dates(
    value: &FieldValue,
    other: Option<&FieldValue>,
    ok: impl Fn(NaiveDate, NaiveDate) -> bool,
) -> bool {
    match (parse_date(value), other.and_then(parse_date)) {
        (Some(a), Some(b)) => ok(a, b),
        _ => true,
    }
}

pub fn parse_date(value: &FieldValue) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.as_text()?.trim(), DATE_FORMAT).ok()
}
