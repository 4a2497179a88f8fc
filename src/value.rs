use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One entry of a multi-row section (an event, an offer, an image)
pub type Entry = BTreeMap<String, FieldValue>;

/// Field name to value mapping used for both wizard state and step input
pub type Fields = BTreeMap<String, FieldValue>;

/// Value held by a wizard field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Entries(Vec<Entry>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// Empty text, an empty list, or a text made only of whitespace
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Entries(entries) => entries.is_empty(),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_entries(&self) -> Option<&[Entry]> {
        match self {
            FieldValue::Entries(entries) => Some(entries),
            _ => None,
        }
    }

    /// Numeric view, accepting numbers typed into text inputs
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            FieldValue::Number(n) => *n,
            FieldValue::Text(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    /// Textual view used by pattern checks
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Entries(_) => String::new(),
        }
    }

    /// Spreadsheet cell for this value
    pub fn to_cell(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Entries(_) => Value::Null,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<Vec<Entry>> for FieldValue {
    fn from(entries: Vec<Entry>) -> Self {
        FieldValue::Entries(entries)
    }
}

/// Cell for `name` in `source`, or an empty string when the field is absent
pub fn cell_of(source: &BTreeMap<String, FieldValue>, name: &str) -> Value {
    source
        .get(name)
        .map(FieldValue::to_cell)
        .unwrap_or_else(|| Value::String(String::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_finite_text_is_not_a_number() {
        for raw in ["inf", "-inf", "NaN", "infinity", "1e999"] {
            assert_eq!(FieldValue::text(raw).as_number(), None, "{}", raw);
        }
        assert_eq!(FieldValue::text(" 12.5 ").as_number(), Some(12.5));
        assert_eq!(FieldValue::Number(f64::INFINITY).as_number(), None);
    }

    #[test]
    fn deserializes_mixed_field_values() {
        let fields: Fields = serde_json::from_value(json!({
            "clientName": "Acme",
            "campaignBudget": 1500,
            "events": [{ "eventName": "install", "isIAP": false }]
        }))
        .unwrap();

        assert_eq!(fields["clientName"], FieldValue::text("Acme"));
        assert_eq!(fields["campaignBudget"].as_number(), Some(1500.0));
        let events = fields["events"].as_entries().unwrap();
        assert_eq!(events[0]["isIAP"], FieldValue::Bool(false));
    }

    #[test]
    fn blank_values() {
        assert!(FieldValue::text("  ").is_blank());
        assert!(FieldValue::Entries(Vec::new()).is_blank());
        assert!(!FieldValue::Bool(false).is_blank());
        assert_eq!(FieldValue::text(" 12.5 ").as_number(), Some(12.5));
    }

    #[test]
    fn missing_field_becomes_empty_cell() {
        let fields = Fields::new();
        assert_eq!(cell_of(&fields, "eventValue"), json!(""));
    }
}
