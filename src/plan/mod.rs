//! Plans produced from a model reply, and the lenient parser that recovers them.

pub mod parser;
pub mod step;

pub use parser::{parse_plan, render_fenced, ParsedPlan, PlanSource};
pub use step::{
    AggFn, AggregateStep, ChartStep, ChartType, Combine, CompareOp, Condition, DeriveStep,
    FilterStep, LimitStep, Operand, SelectStep, SortKey, SortOrder, SortStep, Step, StepKind,
};

use crate::dataset::Dataset;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// What the model asked for: a description, optionally a literal result table, and
/// an ordered list of steps to run against the full dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Plan {
    pub description: String,
    #[serde(rename = "newData", skip_serializing_if = "Option::is_none")]
    pub new_data: Option<Dataset>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn description_only(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            new_data: None,
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    /// Builds a plan from a decoded JSON object. Malformed parts are dropped and
    /// explained in the returned notes.
    pub fn from_json_object(obj: &Map<String, JsonValue>) -> (Plan, Vec<String>) {
        let mut notes = Vec::new();

        let description = match obj.get("description").or_else(|| obj.get("summary")) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let new_data = match obj.get("newData").or_else(|| obj.get("new_data")) {
            None | Some(JsonValue::Null) => None,
            Some(raw) => match serde_json::from_value::<Dataset>(raw.clone()) {
                Ok(ds) => Some(ds),
                Err(e) => {
                    notes.push(format!("ignored malformed newData: {}", e));
                    None
                }
            },
        };

        let steps = match obj.get("steps").or_else(|| obj.get("plan")) {
            None | Some(JsonValue::Null) => Vec::new(),
            Some(JsonValue::Array(items)) => items.iter().cloned().map(Step::from_json).collect(),
            Some(single @ JsonValue::Object(_)) => vec![Step::from_json(single.clone())],
            Some(_) => {
                notes.push("ignored steps: expected an array".to_string());
                Vec::new()
            }
        };

        (
            Plan {
                description,
                new_data,
                steps,
            },
            notes,
        )
    }
}
