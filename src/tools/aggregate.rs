//! Reductions, either to a single named metric or to one row per group.

use crate::dataset::{Dataset, Value};
use crate::error::{StepError, StepResult};
use crate::plan::{AggFn, AggregateStep};
use crate::result::MetricValue;
use crate::tools::ToolOutput;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

/// Outcome of one reduction over a column slice.
#[derive(Debug, Clone, PartialEq)]
struct Reduction {
    value: Option<f64>,
    skipped: usize,
}

fn reduce<'a>(func: AggFn, cells: impl Iterator<Item = &'a Value>) -> Reduction {
    match func {
        AggFn::Count => {
            let n = cells.filter(|v| !v.is_null()).count();
            Reduction {
                value: Some(n as f64),
                skipped: 0,
            }
        }
        AggFn::DistinctCount => {
            let distinct: IndexSet<String> = cells
                .filter(|v| !v.is_null())
                .map(|v| v.to_json().to_string())
                .collect();
            Reduction {
                value: Some(distinct.len() as f64),
                skipped: 0,
            }
        }
        _ => {
            let mut skipped = 0;
            let mut numbers = Vec::new();
            for cell in cells {
                match cell.as_f64() {
                    Some(n) => numbers.push(n),
                    None if !cell.is_null() => skipped += 1,
                    None => {}
                }
            }
            Reduction {
                value: reduce_numbers(func, numbers),
                skipped,
            }
        }
    }
}

fn reduce_numbers(func: AggFn, mut numbers: Vec<f64>) -> Option<f64> {
    if numbers.is_empty() {
        return None;
    }
    let n = numbers.len() as f64;
    match func {
        AggFn::Sum => Some(numbers.iter().sum()),
        AggFn::Mean => Some(numbers.iter().sum::<f64>() / n),
        AggFn::Min => numbers.iter().copied().reduce(f64::min),
        AggFn::Max => numbers.iter().copied().reduce(f64::max),
        AggFn::Median => {
            numbers.sort_by(|a, b| a.total_cmp(b));
            let mid = numbers.len() / 2;
            if numbers.len() % 2 == 0 {
                Some((numbers[mid - 1] + numbers[mid]) / 2.0)
            } else {
                Some(numbers[mid])
            }
        }
        AggFn::Count | AggFn::DistinctCount => Some(n),
    }
}

fn skipped_note(skipped: usize, column: &str) -> String {
    format!("ignored {} non-numeric value(s) in '{}'", skipped, column)
}

pub fn apply(dataset: &Dataset, step: &AggregateStep) -> StepResult<ToolOutput> {
    let column = match &step.column {
        Some(name) => Some(dataset.require_column(name)?),
        None if step.func == AggFn::Count => None,
        None => {
            return Err(StepError::InvalidParameters(format!(
                "{} needs a column",
                step.func.name()
            )))
        }
    };
    let group_columns = step
        .group_by
        .iter()
        .map(|name| dataset.require_column(name))
        .collect::<StepResult<Vec<_>>>()?;

    let output_name = step.output_name();
    let column_name = step.column.clone().unwrap_or_default();

    if group_columns.is_empty() {
        let reduction = match column {
            Some(idx) => reduce(step.func, dataset.column_values(idx)),
            None => Reduction {
                value: Some(dataset.row_count() as f64),
                skipped: 0,
            },
        };
        let Some(value) = reduction.value else {
            return Err(StepError::NoNumericValues(column_name));
        };
        let mut output = ToolOutput::with_metric(output_name, MetricValue::Number(value));
        if reduction.skipped > 0 {
            output.notes.push(skipped_note(reduction.skipped, &column_name));
        }
        return Ok(output);
    }

    // Group keys compare by JSON form so 1 and "1" stay distinct. Order is first appearance.
    let mut groups: IndexMap<Vec<String>, Vec<usize>> = IndexMap::new();
    for (row_idx, row) in dataset.rows().iter().enumerate() {
        let key = group_columns
            .iter()
            .map(|&c| row[c].to_json().to_string())
            .collect_vec();
        groups.entry(key).or_default().push(row_idx);
    }

    let mut headers: Vec<String> = step.group_by.clone();
    headers.push(output_name);

    let mut skipped = 0;
    let rows = groups
        .values()
        .map(|members| {
            let first = &dataset.rows()[members[0]];
            let mut row = group_columns.iter().map(|&c| first[c].clone()).collect_vec();
            let reduction = match column {
                Some(idx) => reduce(step.func, members.iter().map(|&r| &dataset.rows()[r][idx])),
                None => Reduction {
                    value: Some(members.len() as f64),
                    skipped: 0,
                },
            };
            skipped += reduction.skipped;
            row.push(reduction.value.map(Value::Number).unwrap_or(Value::Null));
            row
        })
        .collect_vec();

    let group_count = rows.len();
    let mut output = ToolOutput::with_dataset(Dataset::new(headers, rows)?);
    output.notes.push(format!("{} group(s)", group_count));
    if skipped > 0 {
        output.notes.push(skipped_note(skipped, &column_name));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;
    use serde_json::json;

    fn sales() -> Dataset {
        Dataset::new(
            vec!["region".to_string(), "amount".to_string()],
            vec![
                vec![Value::from("east"), Value::Number(10.0)],
                vec![Value::from("west"), Value::Number(4.0)],
                vec![Value::from("east"), Value::from("n/a")],
                vec![Value::from("east"), Value::Number(2.0)],
                vec![Value::from("north"), Value::Null],
            ],
        )
        .unwrap()
    }

    fn aggregate(raw: serde_json::Value) -> AggregateStep {
        match Step::from_json(raw) {
            Step::Aggregate(a) => a,
            other => panic!("not an aggregate: {:?}", other),
        }
    }

    #[test]
    fn test_sum_metric_matches_column_total() {
        let ds = Dataset::new(
            vec!["x".to_string()],
            vec![vec![Value::Number(1.0)], vec![Value::Number(2.0)], vec![Value::Number(3.0)]],
        )
        .unwrap();
        let out = apply(&ds, &aggregate(json!({"kind": "aggregate", "column": "x", "fn": "sum"}))).unwrap();
        assert_eq!(out.metric, Some(("x_sum".to_string(), MetricValue::Number(6.0))));
        assert!(out.dataset.is_none());
    }

    #[test]
    fn test_mean_skips_text_and_notes_it() {
        let out = apply(&sales(), &aggregate(json!({"kind": "aggregate", "column": "amount", "fn": "avg", "as": "avg_amount"}))).unwrap();
        let (name, value) = out.metric.unwrap();
        assert_eq!(name, "avg_amount");
        assert_eq!(value, MetricValue::Number(16.0 / 3.0));
        assert_eq!(out.notes, vec!["ignored 1 non-numeric value(s) in 'amount'"]);
    }

    #[test]
    fn test_grouped_sum_keeps_first_appearance_order() {
        let out = apply(&sales(), &aggregate(json!({"kind": "aggregate", "column": "amount", "fn": "sum", "group_by": "region"}))).unwrap();
        let ds = out.dataset.unwrap();
        assert_eq!(ds.headers(), &["region".to_string(), "amount_sum".to_string()]);
        assert_eq!(
            ds.rows(),
            &[
                vec![Value::from("east"), Value::Number(12.0)],
                vec![Value::from("west"), Value::Number(4.0)],
                vec![Value::from("north"), Value::Null],
            ]
        );
    }

    #[test]
    fn test_count_without_column_counts_rows() {
        let out = apply(&sales(), &aggregate(json!({"kind": "aggregate", "fn": "count"}))).unwrap();
        assert_eq!(out.metric, Some(("row_count".to_string(), MetricValue::Number(5.0))));

        let out = apply(&sales(), &aggregate(json!({"kind": "aggregate", "column": "region", "fn": "distinct_count"}))).unwrap();
        assert_eq!(out.metric.unwrap().1, MetricValue::Number(3.0));
    }

    #[test]
    fn test_median_and_extremes() {
        let ds = Dataset::new(
            vec!["v".to_string()],
            [5.0, 1.0, 4.0, 2.0].iter().map(|n| vec![Value::Number(*n)]).collect(),
        )
        .unwrap();
        let metric = |f: &str| apply(&ds, &aggregate(json!({"kind": "aggregate", "column": "v", "fn": f}))).unwrap().metric.unwrap().1;
        assert_eq!(metric("median"), MetricValue::Number(3.0));
        assert_eq!(metric("min"), MetricValue::Number(1.0));
        assert_eq!(metric("max"), MetricValue::Number(5.0));
    }

    #[test]
    fn test_text_only_column_fails() {
        let err = apply(&sales(), &aggregate(json!({"kind": "aggregate", "column": "region", "fn": "sum"}))).unwrap_err();
        assert_eq!(err, StepError::NoNumericValues("region".to_string()));
    }
}
