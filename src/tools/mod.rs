//! Tool registry and dispatch.
//!
//! Every step kind a plan may use is backed by one registered [`Tool`]. The
//! registry describes the tools to the model and routes decoded steps to the
//! matching implementation. Tools are pure: they read one dataset and return
//! a [`ToolOutput`] without touching their input.

pub mod aggregate;
pub mod chart;
pub mod derive;
pub mod expr;
pub mod filter;
pub mod select;
pub mod sort;

pub use chart::{ChartEncoding, ChartSpec};

use crate::dataset::Dataset;
use crate::error::{StepError, StepResult};
use crate::plan::{Step, StepKind};
use crate::result::MetricValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub kind: StepKind,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub category: ToolCategory,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolCategory {
    Filtering,
    Aggregation,
    Transformation,
    Visualization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub parameter_type: ParameterType,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParameterType {
    String,
    Number,
    Array(String),
}

impl ParameterType {
    fn label(&self) -> String {
        match self {
            ParameterType::String => "string".to_string(),
            ParameterType::Number => "number".to_string(),
            ParameterType::Array(inner) => format!("array<{}>", inner),
        }
    }
}

/// What a tool produced. A `None` dataset means the working dataset is unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub dataset: Option<Dataset>,
    pub metric: Option<(String, MetricValue)>,
    pub chart: Option<ChartSpec>,
    pub notes: Vec<String>,
}

impl ToolOutput {
    pub fn with_dataset(dataset: Dataset) -> Self {
        Self {
            dataset: Some(dataset),
            ..Default::default()
        }
    }

    pub fn with_metric(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            metric: Some((name.into(), value)),
            ..Default::default()
        }
    }

    pub fn with_chart(chart: ChartSpec) -> Self {
        Self {
            chart: Some(chart),
            ..Default::default()
        }
    }
}

fn param(name: &str, description: &str, parameter_type: ParameterType, required: bool) -> ToolParameter {
    ToolParameter {
        name: name.to_string(),
        description: description.to_string(),
        parameter_type,
        required,
    }
}

/// The set of tools a plan may call.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    available_tools: Vec<Tool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            available_tools: Vec::new(),
        };
        registry.register_tools();
        registry
    }

    /// Registry restricted to the given kinds. Steps of any other kind are reported as unsupported.
    pub fn with_kinds(kinds: &[StepKind]) -> Self {
        let mut registry = Self::new();
        registry.available_tools.retain(|t| kinds.contains(&t.kind));
        registry
    }

    fn register_tools(&mut self) {
        self.available_tools.push(Tool {
            kind: StepKind::Filter,
            description: "Keep only rows matching the conditions. Ops: eq, ne, gt, gte, lt, lte, contains, starts_with, ends_with, in, matches (regex), is_null, not_null. Text matching is case-insensitive.".to_string(),
            parameters: vec![
                param(
                    "conditions",
                    "List of {column, op, value}",
                    ParameterType::Array("object{column, op, value}".to_string()),
                    true,
                ),
                param("combine", "\"all\" (default) or \"any\"", ParameterType::String, false),
            ],
            category: ToolCategory::Filtering,
        });

        self.available_tools.push(Tool {
            kind: StepKind::Aggregate,
            description: "Reduce a column with sum, mean, count, min, max, median or distinct_count. Without group_by the result is a named metric; with group_by the dataset becomes one row per group.".to_string(),
            parameters: vec![
                param("column", "Column to reduce (optional for count)", ParameterType::String, false),
                param("fn", "Aggregation function", ParameterType::String, true),
                param("group_by", "Columns to group by", ParameterType::Array("string".to_string()), false),
                param("as", "Output metric or column name", ParameterType::String, false),
            ],
            category: ToolCategory::Aggregation,
        });

        self.available_tools.push(Tool {
            kind: StepKind::DeriveColumn,
            description: "Add or overwrite a column computed per row. Expressions support + - * / %, comparisons, parentheses, 'text' literals, `quoted column` names and abs, round, lower, upper, len, concat, coalesce.".to_string(),
            parameters: vec![
                param("column", "Name of the new column", ParameterType::String, true),
                param("expression", "Row expression, e.g. price * qty", ParameterType::String, true),
            ],
            category: ToolCategory::Transformation,
        });

        self.available_tools.push(Tool {
            kind: StepKind::Sort,
            description: "Stable sort by one or more columns.".to_string(),
            parameters: vec![param(
                "by",
                "List of {column, order} where order is asc or desc",
                ParameterType::Array("object{column, order}".to_string()),
                true,
            )],
            category: ToolCategory::Transformation,
        });

        self.available_tools.push(Tool {
            kind: StepKind::Chart,
            description: "Declare a chart over the current dataset. Types: bar, line, scatter, pie, area, histogram.".to_string(),
            parameters: vec![
                param("chart_type", "Chart type", ParameterType::String, true),
                param("x", "Column for the x axis or categories", ParameterType::String, true),
                param("y", "Value column(s)", ParameterType::Array("string".to_string()), false),
                param("color", "Column used to split series", ParameterType::String, false),
                param("title", "Chart title", ParameterType::String, false),
            ],
            category: ToolCategory::Visualization,
        });

        self.available_tools.push(Tool {
            kind: StepKind::Select,
            description: "Keep only the listed columns, in that order.".to_string(),
            parameters: vec![param(
                "columns",
                "Columns to keep",
                ParameterType::Array("string".to_string()),
                true,
            )],
            category: ToolCategory::Transformation,
        });

        self.available_tools.push(Tool {
            kind: StepKind::Limit,
            description: "Keep the first N rows.".to_string(),
            parameters: vec![param("count", "Number of rows to keep", ParameterType::Number, true)],
            category: ToolCategory::Filtering,
        });
    }

    pub fn get_tool(&self, kind: StepKind) -> Option<&Tool> {
        self.available_tools.iter().find(|t| t.kind == kind)
    }

    pub fn list_tools(&self) -> &[Tool] {
        &self.available_tools
    }

    /// Tool catalog as pretty JSON, for the plan prompt.
    pub fn describe_for_prompt(&self) -> String {
        let tools_json: Vec<serde_json::Value> = self
            .available_tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "kind": tool.kind.name(),
                    "description": tool.description,
                    "parameters": tool.parameters.iter().map(|p| {
                        serde_json::json!({
                            "name": p.name,
                            "description": p.description,
                            "type": p.parameter_type.label(),
                            "required": p.required
                        })
                    }).collect::<Vec<_>>()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools_json).unwrap_or_default()
    }

    /// Runs one step against `dataset`.
    pub fn execute(&self, step: &Step, dataset: &Dataset) -> StepResult<ToolOutput> {
        let kind = match step {
            Step::Unrecognized { reason, .. } => return Err(StepError::Unsupported(reason.clone())),
            other => other.kind(),
        };
        if let Some(kind) = kind {
            if self.get_tool(kind).is_none() {
                return Err(StepError::Unsupported(format!("tool '{}' is not enabled", kind)));
            }
        }

        match step {
            Step::Filter(p) => filter::apply(dataset, p),
            Step::Aggregate(p) => aggregate::apply(dataset, p),
            Step::DeriveColumn(p) => derive::apply(dataset, p),
            Step::Sort(p) => sort::apply(dataset, p),
            Step::Chart(p) => chart::apply(dataset, p),
            Step::Select(p) => select::select(dataset, p),
            Step::Limit(p) => select::limit(dataset, p),
            Step::Unrecognized { reason, .. } => Err(StepError::Unsupported(reason.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;
    use serde_json::json;

    fn tiny() -> Dataset {
        Dataset::new(vec!["n".to_string()], vec![vec![Value::Number(1.0)], vec![Value::Number(2.0)]]).unwrap()
    }

    #[test]
    fn test_every_step_kind_has_a_tool() {
        let registry = ToolRegistry::new();
        for kind in StepKind::ALL {
            assert!(registry.get_tool(kind).is_some(), "missing tool for {}", kind);
        }
        let catalog = registry.describe_for_prompt();
        assert!(catalog.contains("\"kind\": \"derive_column\""));
        assert!(catalog.contains("array<string>"));
    }

    #[test]
    fn test_dispatch_and_unknown_kind() {
        let registry = ToolRegistry::new();
        let step = Step::from_json(json!({"kind": "limit", "count": 1}));
        let out = registry.execute(&step, &tiny()).unwrap();
        assert_eq!(out.dataset.unwrap().row_count(), 1);

        let step = Step::from_json(json!({"kind": "pivot", "column": "n"}));
        assert!(matches!(registry.execute(&step, &tiny()), Err(StepError::Unsupported(_))));
    }

    #[test]
    fn test_restricted_registry() {
        let registry = ToolRegistry::with_kinds(&[StepKind::Filter]);
        assert_eq!(registry.list_tools().len(), 1);
        let step = Step::from_json(json!({"kind": "limit", "count": 1}));
        let err = registry.execute(&step, &tiny()).unwrap_err();
        assert_eq!(err, StepError::Unsupported("tool 'limit' is not enabled".to_string()));
    }
}
