//! Result contracts and the final merge.

use crate::dataset::{number_to_json, Dataset};
use crate::executor::Execution;
use crate::tools::ChartSpec;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::warn;

/// A named scalar produced by an ungrouped aggregation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Number(n) => number_to_json(*n).serialize(serializer),
            MetricValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// Something that did not go as planned but did not stop the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepWarning {
    /// Zero-based step position, absent for plan-level warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub kind: String,
    pub message: String,
}

impl StepWarning {
    pub fn for_step(step_index: usize, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_index: Some(step_index),
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn for_plan(message: impl Into<String>) -> Self {
        Self {
            step_index: None,
            kind: "plan".to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub description: String,
    pub dataset: Dataset,
    #[serde(default)]
    pub metrics: IndexMap<String, MetricValue>,
    #[serde(default)]
    pub charts: Vec<ChartSpec>,
    #[serde(default)]
    pub warnings: Vec<StepWarning>,
    /// Informational messages from tools, e.g. row counts kept by a filter.
    #[serde(default)]
    pub notes: Vec<String>,
    pub steps_applied: usize,
    pub steps_skipped: usize,
}

impl ExecutionResult {
    /// The input unchanged, described.
    pub fn identity(input: &Dataset, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            dataset: input.clone(),
            metrics: IndexMap::new(),
            charts: Vec::new(),
            warnings: Vec::new(),
            notes: Vec::new(),
            steps_applied: 0,
            steps_skipped: 0,
        }
    }
}

pub struct ResultAggregator;

impl ResultAggregator {
    /// Merges an execution with the plan description and any parse warnings. The output
    /// dataset is always well-formed: an invalid final dataset is replaced by the input.
    pub fn aggregate(
        input: &Dataset,
        description: String,
        execution: Execution,
        parse_warnings: Vec<StepWarning>,
    ) -> ExecutionResult {
        let mut warnings = parse_warnings;
        warnings.extend(execution.warnings);

        let dataset = match execution.dataset.validate() {
            Ok(()) => execution.dataset,
            Err(e) => {
                warn!("Final dataset is malformed, returning input: {}", e);
                warnings.push(StepWarning::for_plan(format!(
                    "final dataset was malformed ({}); returning the input dataset",
                    e
                )));
                input.clone()
            }
        };

        ExecutionResult {
            description,
            dataset,
            metrics: execution.metrics,
            charts: execution.charts,
            warnings,
            notes: execution.notes,
            steps_applied: execution.steps_applied,
            steps_skipped: execution.steps_skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    fn input() -> Dataset {
        Dataset::new(vec!["a".to_string()], vec![vec![Value::Number(1.0)]]).unwrap()
    }

    #[test]
    fn test_metric_serializes_integral_numbers_as_integers() {
        assert_eq!(serde_json::to_string(&MetricValue::Number(6.0)).unwrap(), "6");
        assert_eq!(serde_json::to_string(&MetricValue::Number(2.5)).unwrap(), "2.5");
        assert_eq!(serde_json::to_string(&MetricValue::Text("x".into())).unwrap(), "\"x\"");
    }

    #[test]
    fn test_aggregate_orders_parse_warnings_first() {
        let mut execution = Execution::start(input());
        execution.warnings.push(StepWarning::for_step(0, "filter", "Column not found: b"));
        execution.metrics.insert("a_sum".to_string(), MetricValue::Number(1.0));
        execution.steps_skipped = 1;

        let result = ResultAggregator::aggregate(
            &input(),
            "Summed a".to_string(),
            execution,
            vec![StepWarning::for_plan("ignored newData")],
        );
        assert_eq!(result.description, "Summed a");
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.warnings[0].kind, "plan");
        assert_eq!(result.warnings[1].step_index, Some(0));
        assert_eq!(result.dataset, input());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["metrics"]["a_sum"], serde_json::json!(1));
        assert_eq!(json["dataset"]["data"], serde_json::json!([[1]]));
        assert!(json["warnings"][0].get("step_index").is_none());
    }

    #[test]
    fn test_identity_result() {
        let result = ExecutionResult::identity(&input(), "nothing to do");
        assert_eq!(result.dataset, input());
        assert_eq!(result.steps_applied, 0);
        assert!(result.metrics.is_empty());
    }
}
