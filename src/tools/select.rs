//! Column projection and row limits.

use crate::dataset::{Dataset, Value};
use crate::error::{StepError, StepResult};
use crate::plan::{LimitStep, SelectStep};
use crate::tools::ToolOutput;

/// Keeps the named columns, in the order given.
pub fn select(dataset: &Dataset, step: &SelectStep) -> StepResult<ToolOutput> {
    if step.columns.is_empty() {
        return Err(StepError::InvalidParameters("select needs at least one column".to_string()));
    }
    let indices = step
        .columns
        .iter()
        .map(|c| dataset.require_column(c))
        .collect::<StepResult<Vec<_>>>()?;

    let rows: Vec<Vec<Value>> = dataset
        .rows()
        .iter()
        .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok(ToolOutput::with_dataset(Dataset::new(step.columns.clone(), rows)?))
}

/// Keeps the first `count` rows.
pub fn limit(dataset: &Dataset, step: &LimitStep) -> StepResult<ToolOutput> {
    let rows = dataset.sample(step.count).to_vec();
    let mut output = ToolOutput::with_dataset(dataset.with_rows(rows)?);
    if step.count < dataset.row_count() {
        output
            .notes
            .push(format!("dropped {} row(s)", dataset.row_count() - step.count));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatasetError;

    fn wide() -> Dataset {
        Dataset::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            (0..4)
                .map(|i| vec![Value::from(i as i64), Value::from("x"), Value::Null])
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_select_reorders_columns() {
        let step = SelectStep {
            columns: vec!["c".to_string(), "a".to_string()],
        };
        let ds = select(&wide(), &step).unwrap().dataset.unwrap();
        assert_eq!(ds.headers(), &["c".to_string(), "a".to_string()]);
        assert_eq!(ds.rows()[3], vec![Value::Null, Value::Number(3.0)]);
    }

    #[test]
    fn test_select_rejects_duplicates() {
        let step = SelectStep {
            columns: vec!["a".to_string(), "a".to_string()],
        };
        let err = select(&wide(), &step).unwrap_err();
        assert_eq!(err, StepError::Dataset(DatasetError::DuplicateHeader("a".to_string())));
    }

    #[test]
    fn test_limit() {
        let out = limit(&wide(), &LimitStep { count: 2 }).unwrap();
        assert_eq!(out.dataset.unwrap().row_count(), 2);
        assert_eq!(out.notes, vec!["dropped 2 row(s)"]);
        let out = limit(&wide(), &LimitStep { count: 10 }).unwrap();
        assert_eq!(out.dataset.unwrap().row_count(), 4);
    }
}
