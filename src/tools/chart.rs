//! Chart descriptors. Rendering is left to the caller; this tool only checks the
//! encoding against the dataset and records it.

use crate::dataset::Dataset;
use crate::error::{StepError, StepResult};
use crate::plan::{ChartStep, ChartType};
use crate::tools::ToolOutput;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartEncoding {
    pub x: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub y: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub title: String,
    pub encoding: ChartEncoding,
    /// Rows in the dataset the chart was declared against.
    pub row_count: usize,
}

pub fn apply(dataset: &Dataset, step: &ChartStep) -> StepResult<ToolOutput> {
    dataset.require_column(&step.x)?;
    for y in &step.y {
        dataset.require_column(y)?;
    }
    if let Some(color) = &step.color {
        dataset.require_column(color)?;
    }
    if step.y.is_empty() && step.chart_type != ChartType::Histogram {
        return Err(StepError::InvalidParameters(format!(
            "{:?} chart needs at least one y column",
            step.chart_type
        )));
    }

    let title = step
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| default_title(step));

    Ok(ToolOutput::with_chart(ChartSpec {
        chart_type: step.chart_type,
        title,
        encoding: ChartEncoding {
            x: step.x.clone(),
            y: step.y.clone(),
            color: step.color.clone(),
        },
        row_count: dataset.row_count(),
    }))
}

fn default_title(step: &ChartStep) -> String {
    if step.y.is_empty() {
        format!("Distribution of {}", step.x)
    } else {
        format!("{} by {}", step.y.join(", "), step.x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    fn monthly() -> Dataset {
        Dataset::new(
            vec!["month".to_string(), "revenue".to_string(), "cost".to_string()],
            vec![vec![Value::from("Jan"), Value::Number(10.0), Value::Number(4.0)]],
        )
        .unwrap()
    }

    fn chart(chart_type: ChartType, y: &[&str]) -> ChartStep {
        ChartStep {
            chart_type,
            x: "month".to_string(),
            y: y.iter().map(|s| s.to_string()).collect(),
            color: None,
            title: None,
        }
    }

    #[test]
    fn test_records_encoding_and_default_title() {
        let out = apply(&monthly(), &chart(ChartType::Line, &["revenue", "cost"])).unwrap();
        assert!(out.dataset.is_none());
        let spec = out.chart.unwrap();
        assert_eq!(spec.title, "revenue, cost by month");
        assert_eq!(spec.encoding.y.len(), 2);
        assert_eq!(spec.row_count, 1);
    }

    #[test]
    fn test_histogram_needs_no_y() {
        let spec = apply(&monthly(), &chart(ChartType::Histogram, &[])).unwrap().chart.unwrap();
        assert_eq!(spec.title, "Distribution of month");
        assert!(apply(&monthly(), &chart(ChartType::Bar, &[])).is_err());
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let err = apply(&monthly(), &chart(ChartType::Bar, &["profit"])).unwrap_err();
        assert!(matches!(err, StepError::MissingColumn { .. }));
    }
}
