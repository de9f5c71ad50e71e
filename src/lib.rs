//! Natural-language transformations of tabular data.
//!
//! A [`TransformPipeline`] sends a sample of the dataset and the user's instruction to a
//! model, recovers a plan from the reply, runs the plan's steps against the full dataset
//! with the built-in tools, and returns an [`ExecutionResult`].

pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod http;
pub mod ingestion;
pub mod llm;
pub mod pipeline;
pub mod plan;
pub mod prompt;
pub mod result;
pub mod tools;

pub use config::{LlmConfig, PipelineConfig};
pub use dataset::{Dataset, Value};
pub use error::{ErrorKind, PipelineError, Result};
pub use llm::{CannedModel, LlmClient, PlanModel};
pub use pipeline::{PipelineStage, StageEvent, TransformPipeline, TransformResponse};
pub use plan::{parse_plan, Plan, Step};
pub use result::{ExecutionResult, MetricValue, StepWarning};
pub use tools::ToolRegistry;
