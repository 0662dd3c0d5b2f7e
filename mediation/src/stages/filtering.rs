use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::{Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    LessThan,
    GreaterThan,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub field: String,
    pub operator: Operator,
    #[serde(default, alias = "value")]
    pub operand: String,
}

impl FilterRule {
    pub fn new(field: &str, operator: Operator, operand: &str) -> Self {
        Self {
            field: field.to_owned(),
            operator,
            operand: operand.to_owned(),
        }
    }

    /// A missing field never matches.
    pub fn matches(&self, record: &Record) -> bool {
        let Some(value) = record.get(&self.field) else {
            return false;
        };

        match self.operator {
            Operator::Equals => equals(value, &self.operand),
            Operator::NotEquals => !equals(value, &self.operand),
            Operator::LessThan => compare_numeric(value, &self.operand, |a, b| a < b, |a, b| a < b),
            Operator::GreaterThan => {
                compare_numeric(value, &self.operand, |a, b| a > b, |a, b| a > b)
            }
            Operator::Contains => value
                .as_str()
                .is_some_and(|s| s.contains(self.operand.as_str())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterAction {
    #[default]
    Keep,
    Drop,
}

#[derive(Debug, PartialEq, Eq)]
pub struct UnknownFilterAction(pub String);

impl fmt::Display for UnknownFilterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown filter action {:?}, expected keep or drop", self.0)
    }
}

impl FromStr for FilterAction {
    type Err = UnknownFilterAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(FilterAction::Keep),
            "drop" => Ok(FilterAction::Drop),
            _ => Err(UnknownFilterAction(s.to_owned())),
        }
    }
}

/// Decides whether a record continues down the pipeline.
///
/// Conditions are tried in order. The first match returns
/// `action != Drop`; when nothing matches the result is `action == Drop`.
/// So with `Drop` a matching record is dropped and everything else kept,
/// while with `Keep` only matching records are kept.
pub struct Filter {
    enabled: bool,
    rules: Vec<FilterRule>,
    action: FilterAction,
}

impl Filter {
    pub fn new(enabled: bool, rules: Vec<FilterRule>, action: FilterAction) -> Self {
        Self {
            enabled,
            rules,
            action,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Vec::new(), FilterAction::Keep)
    }

    pub fn should_process(&self, payload: &[u8]) -> bool {
        if !self.enabled {
            return true;
        }

        let record = match Record::from_slice(payload) {
            Ok(record) => record,
            Err(err) => {
                debug!("filtering malformed record: {}", err);
                return false;
            }
        };

        match self.rules.iter().find(|rule| rule.matches(&record)) {
            Some(_) => self.action != FilterAction::Drop,
            None => self.action == FilterAction::Drop,
        }
    }
}

fn equals(value: &Value, operand: &str) -> bool {
    match value {
        Value::String(s) => s == operand,
        _ => compare_numeric(value, operand, |a, b| a == b, |a, b| a == b),
    }
}

/// Integers compare exactly against an integer operand, every other numeric
/// pairing compares as f64.
fn compare_numeric(
    value: &Value,
    operand: &str,
    int_cmp: fn(i64, i64) -> bool,
    float_cmp: fn(f64, f64) -> bool,
) -> bool {
    if let (Value::Int(i), Ok(n)) = (value, operand.parse::<i64>()) {
        return int_cmp(*i, n);
    }
    match (value.as_f64(), operand.parse::<f64>()) {
        (Some(a), Ok(b)) => float_cmp(a, b),
        _ => false,
    }
}
