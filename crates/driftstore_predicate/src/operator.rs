//! Leaf operators over field values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A comparison applied to a single field value.
///
/// Every operator is total over comparable operand types: values of
/// incompatible types simply do not match ordering operators. String
/// operators assume string-coercible values. A null or missing value is
/// never `Contains`-matched but always satisfies `NotContains`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op", content = "operand")]
pub enum FieldOperator {
    /// Equal to the operand.
    Eq(Value),
    /// Not equal to the operand.
    Ne(Value),
    /// Strictly less than the operand.
    Lt(Value),
    /// Less than or equal to the operand.
    Le(Value),
    /// Strictly greater than the operand.
    Gt(Value),
    /// Greater than or equal to the operand.
    Ge(Value),
    /// Between two operands, inclusive at both bounds.
    Between(Value, Value),
    /// String starts with the operand.
    BeginsWith(String),
    /// String (substring) or array (membership) contains the operand.
    Contains(String),
    /// Negation of `Contains`; true for null and missing values.
    NotContains(String),
}

impl FieldOperator {
    /// Evaluates this operator against a field value.
    ///
    /// `value` is `None` when the field is absent from the record;
    /// absent and JSON null are treated alike.
    pub fn evaluate(&self, value: Option<&Value>) -> bool {
        let value = value.filter(|v| !v.is_null());
        match self {
            FieldOperator::Eq(operand) => value == Some(operand),
            FieldOperator::Ne(operand) => value != Some(operand),
            FieldOperator::Lt(operand) => ordered(value, operand, Ordering::is_lt),
            FieldOperator::Le(operand) => ordered(value, operand, Ordering::is_le),
            FieldOperator::Gt(operand) => ordered(value, operand, Ordering::is_gt),
            FieldOperator::Ge(operand) => ordered(value, operand, Ordering::is_ge),
            FieldOperator::Between(min, max) => {
                ordered(value, min, Ordering::is_ge) && ordered(value, max, Ordering::is_le)
            }
            FieldOperator::BeginsWith(prefix) => value
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            FieldOperator::Contains(needle) => contains(value, needle),
            FieldOperator::NotContains(needle) => !contains(value, needle),
        }
    }
}

/// Compares a field value to an operand, applying `check` to the result.
///
/// Numbers compare numerically, strings lexicographically, booleans as
/// false < true. Mismatched or non-comparable types never match.
fn ordered(value: Option<&Value>, operand: &Value, check: fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    match (value, operand) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).is_some_and(check),
            _ => false,
        },
        (Value::String(a), Value::String(b)) => check(a.as_str().cmp(b.as_str())),
        (Value::Bool(a), Value::Bool(b)) => check(a.cmp(b)),
        _ => false,
    }
}

fn contains(value: Option<&Value>, needle: &str) -> bool {
    match value {
        Some(Value::String(s)) => s.contains(needle),
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| item.as_str().is_some_and(|s| s == needle)),
        _ => false,
    }
}
