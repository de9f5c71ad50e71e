//! Computed columns.

use crate::dataset::{Dataset, Value};
use crate::error::{StepError, StepResult};
use crate::plan::DeriveStep;
use crate::tools::expr::Expr;
use crate::tools::ToolOutput;

/// Evaluates the expression per row. An existing column of the same name is
/// overwritten in place, otherwise the new column is appended.
pub fn apply(dataset: &Dataset, step: &DeriveStep) -> StepResult<ToolOutput> {
    let name = step.column.trim();
    if name.is_empty() {
        return Err(StepError::InvalidParameters("derived column needs a name".to_string()));
    }
    let expr = Expr::compile(&step.expression, dataset)?;

    let target = dataset.column_index(name);
    let mut headers = dataset.headers().to_vec();
    if target.is_none() {
        headers.push(name.to_string());
    }

    let mut nulls = 0;
    let rows: Vec<Vec<Value>> = dataset
        .rows()
        .iter()
        .map(|row| {
            let value = expr.eval(row);
            if value.is_null() {
                nulls += 1;
            }
            let mut out = row.clone();
            match target {
                Some(idx) => out[idx] = value,
                None => out.push(value),
            }
            out
        })
        .collect();

    let mut output = ToolOutput::with_dataset(Dataset::new(headers, rows)?);
    if target.is_some() {
        output.notes.push(format!("overwrote column '{}'", name));
    }
    if nulls > 0 {
        output.notes.push(format!(
            "'{}' is null for {} of {} rows",
            name,
            nulls,
            dataset.row_count()
        ));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Dataset {
        Dataset::new(
            vec!["price".to_string(), "qty".to_string()],
            vec![
                vec![Value::Number(2.5), Value::Number(4.0)],
                vec![Value::Number(10.0), Value::Null],
            ],
        )
        .unwrap()
    }

    fn derive(column: &str, expression: &str) -> DeriveStep {
        DeriveStep {
            column: column.to_string(),
            expression: expression.to_string(),
        }
    }

    #[test]
    fn test_appends_new_column() {
        let out = apply(&orders(), &derive("total", "price * qty")).unwrap();
        let ds = out.dataset.unwrap();
        assert_eq!(ds.headers().last().map(String::as_str), Some("total"));
        assert_eq!(ds.rows()[0][2], Value::Number(10.0));
        assert_eq!(ds.rows()[1][2], Value::Null);
        assert_eq!(out.notes, vec!["'total' is null for 1 of 2 rows"]);
    }

    #[test]
    fn test_overwrites_existing_column() {
        let out = apply(&orders(), &derive("price", "round(price * 1.1, 2)")).unwrap();
        let ds = out.dataset.unwrap();
        assert_eq!(ds.column_count(), 2);
        assert_eq!(ds.rows()[1][0], Value::Number(11.0));
        assert!(out.notes[0].starts_with("overwrote"));
    }

    #[test]
    fn test_unknown_column_in_expression() {
        let err = apply(&orders(), &derive("x", "cost * 2")).unwrap_err();
        assert!(matches!(err, StepError::MissingColumn { .. }));
    }
}
