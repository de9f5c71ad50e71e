use crate::dataset::{Dataset, Value};
use crate::error::{StepError, StepResult};
use crate::plan::{SortOrder, SortStep};
use crate::tools::ToolOutput;
use std::cmp::Ordering;

/// Stable multi-key sort. Nulls sort first ascending and last descending.
pub fn apply(dataset: &Dataset, step: &SortStep) -> StepResult<ToolOutput> {
    if step.by.is_empty() {
        return Err(StepError::InvalidParameters("sort needs at least one column".to_string()));
    }
    let keys = step
        .by
        .iter()
        .map(|key| Ok((dataset.require_column(&key.column)?, key.order)))
        .collect::<StepResult<Vec<_>>>()?;

    let mut rows: Vec<Vec<Value>> = dataset.rows().to_vec();
    rows.sort_by(|a, b| {
        keys.iter()
            .map(|&(idx, order)| {
                let ord = a[idx].total_cmp(&b[idx]);
                match order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });

    Ok(ToolOutput::with_dataset(dataset.with_rows(rows)?))
}
