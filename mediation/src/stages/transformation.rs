use std::fmt::Write;

use bytes::Bytes;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::record::{Record, RecordError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `seconds`: float duration to whole seconds, truncating
    Convert,
    /// `last4` or `full`
    Mask,
    FormatDate,
    Uppercase,
    Lowercase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationRule {
    pub field: String,
    pub operation: Operation,
    #[serde(default, alias = "value")]
    pub operand: String,
}

impl TransformationRule {
    pub fn new(field: &str, operation: Operation, operand: &str) -> Self {
        Self {
            field: field.to_owned(),
            operation,
            operand: operand.to_owned(),
        }
    }
}

/// Rewrites record fields with an ordered list of rules.
///
/// A rule that cannot apply (missing field, wrong value type, unparsable date)
/// leaves the field as it was. Only a payload that is not a record fails.
pub struct Transformer {
    rules: Vec<TransformationRule>,
    date_format: String,
    time_zone: Tz,
}

impl Transformer {
    pub fn new(rules: Vec<TransformationRule>, date_format: &str, time_zone: Tz) -> Self {
        Self {
            rules,
            date_format: date_format.to_owned(),
            time_zone,
        }
    }

    pub fn transform(&self, payload: Bytes) -> Result<Bytes, RecordError> {
        let mut record = Record::from_slice(&payload)?;
        for rule in &self.rules {
            self.apply_rule(&mut record, rule);
        }
        record.to_bytes()
    }

    fn apply_rule(&self, record: &mut Record, rule: &TransformationRule) {
        let Some(value) = record.get_mut(&rule.field) else {
            return;
        };

        let rewritten = match (rule.operation, &*value) {
            (Operation::Convert, Value::Float(seconds)) if rule.operand == "seconds" => {
                Some(Value::Int(seconds.trunc() as i64))
            }
            (Operation::Mask, Value::String(s)) => Some(Value::String(mask(s, &rule.operand))),
            (Operation::FormatDate, Value::String(s)) => self.format_date(s).map(Value::String),
            (Operation::Uppercase, Value::String(s)) => Some(Value::String(s.to_uppercase())),
            (Operation::Lowercase, Value::String(s)) => Some(Value::String(s.to_lowercase())),
            _ => None,
        };

        match rewritten {
            Some(rewritten) => *value = rewritten,
            None => trace!(
                field = %rule.field,
                operation = ?rule.operation,
                kind = value.type_name(),
                "transformation rule does not apply"
            ),
        }
    }

    fn format_date(&self, timestamp: &str) -> Option<String> {
        let parsed = DateTime::parse_from_rfc3339(timestamp).ok()?;
        let local = parsed.with_timezone(&self.time_zone);

        // Writing through fmt reports a bad format string instead of panicking
        let mut formatted = String::new();
        write!(formatted, "{}", local.format(&self.date_format)).ok()?;
        Some(formatted)
    }
}

/// Masks a string character by character.
///
/// `last4` keeps the final four characters, and values of four characters or
/// fewer come back unchanged. `full` masks everything. Any other mode is a
/// no-op.
pub fn mask(value: &str, mode: &str) -> String {
    match mode {
        "last4" => {
            let len = value.chars().count();
            if len <= 4 {
                return value.to_owned();
            }
            value
                .chars()
                .enumerate()
                .map(|(i, c)| if i < len - 4 { '*' } else { c })
                .collect()
        }
        "full" => "*".repeat(value.chars().count()),
        _ => value.to_owned(),
    }
}
