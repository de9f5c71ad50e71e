use crate::dataset::Dataset;
use crate::plan::Plan;
use crate::result::{MetricValue, StepWarning};
use crate::tools::{ChartSpec, ToolRegistry};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

/// State accumulated while running a plan's steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub dataset: Dataset,
    pub metrics: IndexMap<String, MetricValue>,
    pub charts: Vec<ChartSpec>,
    pub warnings: Vec<StepWarning>,
    pub notes: Vec<String>,
    pub steps_applied: usize,
    pub steps_skipped: usize,
}

impl Execution {
    pub fn start(dataset: Dataset) -> Self {
        Self {
            dataset,
            metrics: IndexMap::new(),
            charts: Vec::new(),
            warnings: Vec::new(),
            notes: Vec::new(),
            steps_applied: 0,
            steps_skipped: 0,
        }
    }
}

pub struct PlanExecutor<'a> {
    registry: &'a ToolRegistry,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(registry: &'a ToolRegistry) -> Self {
        Self { registry }
    }

    /// Applies the plan's steps in order to a private copy of `input`. A failing step is
    /// recorded as a warning and leaves the working dataset as it was.
    pub fn execute(&self, input: &Dataset, plan: &Plan) -> Execution {
        let mut execution = Execution::start(input.clone());

        if plan.steps.is_empty() {
            if let Some(new_data) = &plan.new_data {
                info!(
                    "Plan has no steps, using literal newData ({} rows)",
                    new_data.row_count()
                );
                execution.dataset = new_data.clone();
                execution.notes.push("used the dataset returned by the model".to_string());
            }
            return execution;
        }
        if plan.new_data.is_some() {
            execution
                .notes
                .push("ignored newData because the plan has steps".to_string());
        }

        for (idx, step) in plan.steps.iter().enumerate() {
            let kind = step.kind_label();
            debug!("Step {}: {}", idx, kind);

            match self.registry.execute(step, &execution.dataset) {
                Ok(output) => {
                    execution.steps_applied += 1;
                    if let Some(dataset) = output.dataset {
                        execution.dataset = dataset;
                    }
                    if let Some((name, value)) = output.metric {
                        if execution.metrics.insert(name.clone(), value).is_some() {
                            execution
                                .notes
                                .push(format!("step {} ({}): replaced metric '{}'", idx, kind, name));
                        }
                    }
                    if let Some(chart) = output.chart {
                        execution.charts.push(chart);
                    }
                    for note in output.notes {
                        execution.notes.push(format!("step {} ({}): {}", idx, kind, note));
                    }
                }
                Err(e) => {
                    warn!("Step {} ({}) skipped: {}", idx, kind, e);
                    execution.steps_skipped += 1;
                    execution
                        .warnings
                        .push(StepWarning::for_step(idx, kind, e.to_string()));
                }
            }
        }

        info!(
            "Executed plan: {} applied, {} skipped, {} rows",
            execution.steps_applied,
            execution.steps_skipped,
            execution.dataset.row_count()
        );
        execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use crate::plan::Step;
    use serde_json::json;

    fn input() -> Dataset {
        Dataset::new(
            vec!["x".to_string(), "label".to_string()],
            vec![
                vec![Value::Number(1.0), Value::from("a")],
                vec![Value::Number(2.0), Value::from("b")],
                vec![Value::Number(3.0), Value::from("c")],
            ],
        )
        .unwrap()
    }

    fn plan(steps: serde_json::Value) -> Plan {
        let steps = steps
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(Step::from_json)
            .collect();
        Plan::description_only("test").with_steps(steps)
    }

    #[test]
    fn test_empty_plan_is_identity() {
        let registry = ToolRegistry::new();
        let execution = PlanExecutor::new(&registry).execute(&input(), &Plan::description_only("noop"));
        assert_eq!(execution.dataset, input());
        assert!(execution.warnings.is_empty());
        assert_eq!(execution.steps_applied, 0);
    }

    #[test]
    fn test_missing_column_becomes_warning_and_later_steps_run() {
        let registry = ToolRegistry::new();
        let plan = plan(json!([
            {"kind": "filter", "column": "nonexistent", "op": "eq", "value": 1},
            {"kind": "aggregate", "column": "x", "fn": "sum"}
        ]));
        let execution = PlanExecutor::new(&registry).execute(&input(), &plan);
        assert_eq!(execution.dataset, input());
        assert_eq!(execution.steps_skipped, 1);
        assert_eq!(execution.steps_applied, 1);
        assert_eq!(execution.warnings[0].step_index, Some(0));
        assert_eq!(execution.warnings[0].kind, "filter");
        assert!(execution.warnings[0].message.contains("nonexistent"));
        assert_eq!(execution.metrics.get("x_sum"), Some(&MetricValue::Number(6.0)));
    }

    #[test]
    fn test_unrecognized_step_is_skipped() {
        let registry = ToolRegistry::new();
        let plan = plan(json!([{"kind": "pivot", "rows": "label"}, {"kind": "limit", "n": 2}]));
        let execution = PlanExecutor::new(&registry).execute(&input(), &plan);
        assert_eq!(execution.warnings[0].kind, "pivot");
        assert_eq!(execution.dataset.row_count(), 2);
    }

    #[test]
    fn test_new_data_only_without_steps() {
        let registry = ToolRegistry::new();
        let literal = Dataset::new(vec!["y".to_string()], vec![vec![Value::from("z")]]).unwrap();

        let mut literal_plan = Plan::description_only("literal");
        literal_plan.new_data = Some(literal.clone());
        let execution = PlanExecutor::new(&registry).execute(&input(), &literal_plan);
        assert_eq!(execution.dataset, literal);

        let mut mixed = plan(json!([{"kind": "limit", "count": 1}]));
        mixed.new_data = Some(literal);
        let execution = PlanExecutor::new(&registry).execute(&input(), &mixed);
        assert_eq!(execution.dataset.headers(), input().headers());
        assert_eq!(execution.notes[0], "ignored newData because the plan has steps");
    }

    #[test]
    fn test_caller_dataset_is_untouched() {
        let registry = ToolRegistry::new();
        let original = input();
        let plan = plan(json!([{"kind": "derive_column", "column": "y", "expression": "x * 2"}]));
        let execution = PlanExecutor::new(&registry).execute(&original, &plan);
        assert_eq!(original, input());
        assert_eq!(execution.dataset.column_count(), 3);
    }
}
