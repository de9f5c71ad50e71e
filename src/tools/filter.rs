//! Row selection by predicate.

use crate::dataset::{Dataset, Value};
use crate::error::{StepError, StepResult};
use crate::plan::{Combine, CompareOp, Condition, FilterStep, Operand};
use crate::tools::ToolOutput;
use regex::Regex;
use std::cmp::Ordering;

/// Equality used by filters and expressions: numeric when both sides are numeric
/// (numeric text included), otherwise by display text. Null only equals null.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.to_string() == b.to_string(),
        },
    }
}

/// Ordering used by comparison operators. `None` when either side is null.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
            _ => Some(a.to_string().cmp(&b.to_string())),
        },
    }
}

struct BoundCondition<'a> {
    column: usize,
    condition: &'a Condition,
    pattern: Option<Regex>,
}

impl BoundCondition<'_> {
    fn holds(&self, row: &[Value]) -> bool {
        let cell = &row[self.column];
        let condition = self.condition;
        match condition.op {
            CompareOp::IsNull => is_blank(cell),
            CompareOp::NotNull => !is_blank(cell),
            CompareOp::Matches => match &self.pattern {
                Some(re) if !cell.is_null() => re.is_match(&cell.to_string()),
                _ => false,
            },
            CompareOp::Eq | CompareOp::In => any_operand(&condition.value, |v| values_equal(cell, v)),
            CompareOp::Ne => !any_operand(&condition.value, |v| values_equal(cell, v)),
            CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
                let Operand::Scalar(target) = &condition.value else {
                    return false;
                };
                match compare_values(cell, target) {
                    Some(ord) => match condition.op {
                        CompareOp::Gt => ord == Ordering::Greater,
                        CompareOp::Gte => ord != Ordering::Less,
                        CompareOp::Lt => ord == Ordering::Less,
                        _ => ord != Ordering::Greater,
                    },
                    None => false,
                }
            }
            CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith => {
                if cell.is_null() {
                    return false;
                }
                let haystack = cell.to_string().to_lowercase();
                any_operand(&condition.value, |v| {
                    let needle = v.to_string().to_lowercase();
                    match condition.op {
                        CompareOp::Contains => haystack.contains(&needle),
                        CompareOp::StartsWith => haystack.starts_with(&needle),
                        _ => haystack.ends_with(&needle),
                    }
                })
            }
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn any_operand(operand: &Operand, mut pred: impl FnMut(&Value) -> bool) -> bool {
    match operand {
        Operand::Scalar(v) => pred(v),
        Operand::List(items) => items.iter().any(pred),
    }
}

fn bind<'a>(dataset: &Dataset, condition: &'a Condition) -> StepResult<BoundCondition<'a>> {
    let column = dataset.require_column(&condition.column)?;
    let pattern = match (condition.op, &condition.value) {
        (CompareOp::Matches, Operand::Scalar(Value::Text(p))) => Some(
            Regex::new(p).map_err(|e| StepError::InvalidParameters(format!("invalid regex '{}': {}", p, e)))?,
        ),
        (CompareOp::Matches, _) => {
            return Err(StepError::InvalidParameters("matches needs a text pattern".to_string()))
        }
        _ => None,
    };
    Ok(BoundCondition {
        column,
        condition,
        pattern,
    })
}

pub fn apply(dataset: &Dataset, step: &FilterStep) -> StepResult<ToolOutput> {
    if step.conditions.is_empty() {
        return Err(StepError::InvalidParameters("filter has no conditions".to_string()));
    }
    let bound = step
        .conditions
        .iter()
        .map(|c| bind(dataset, c))
        .collect::<StepResult<Vec<_>>>()?;

    let rows: Vec<Vec<Value>> = dataset
        .rows()
        .iter()
        .filter(|row| match step.combine {
            Combine::All => bound.iter().all(|c| c.holds(row)),
            Combine::Any => bound.iter().any(|c| c.holds(row)),
        })
        .cloned()
        .collect();

    let kept = rows.len();
    let mut output = ToolOutput::with_dataset(dataset.with_rows(rows)?);
    output.notes.push(format!("kept {} of {} rows", kept, dataset.row_count()));
    Ok(output)
}
