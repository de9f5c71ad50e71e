//! Plan request text.

use crate::config::PipelineConfig;
use crate::dataset::{Dataset, Value};
use crate::tools::ToolRegistry;
use itertools::Itertools;

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{
  "description": "one or two sentences describing the transformation",
  "newData": {"headers": ["col1", "col2"], "data": [["v1", "v2"]]},
  "steps": [{"kind": "filter", "column": "col1", "op": "gt", "value": 10}]
}

Rules:
- "description" is required.
- Use "steps" for anything that depends on the full dataset; the sample above is partial.
  Steps run in order against every row using the tools listed above.
- "newData" is only used when "steps" is empty or missing; it must hold the complete result table."#;

fn render_row(row: &[Value]) -> String {
    row.iter().map(|v| v.to_string()).join(",")
}

/// Builds the single prompt sent to the model for one transformation request.
pub fn build_plan_prompt(
    dataset: &Dataset,
    instruction: &str,
    config: &PipelineConfig,
    registry: &ToolRegistry,
) -> String {
    let sample = dataset.sample(config.sample_rows);
    let sample_text = if sample.is_empty() {
        "(no rows)".to_string()
    } else {
        sample.iter().map(|row| render_row(row)).join("\n")
    };

    format!(
        r#"You are a data transformation assistant. Transform the dataset according to the instruction.

Available tools:
{}

Dataset: {} rows, {} columns
Headers: {}
Sample rows (first {} of {}):
{}

Instruction: {}

{}"#,
        registry.describe_for_prompt(),
        dataset.row_count(),
        dataset.column_count(),
        dataset.headers().join(","),
        sample.len(),
        dataset.row_count(),
        sample_text,
        instruction.trim(),
        RESPONSE_FORMAT
    )
}
