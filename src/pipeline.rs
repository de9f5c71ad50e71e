//! End-to-end orchestration of one transformation request.
//!
//! Stages run strictly in order: validate the input, ask the model for a plan,
//! parse the reply, execute the steps, aggregate the result. Only the first two
//! stages can fail; everything after the model reply degrades into warnings.

use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::executor::PlanExecutor;
use crate::llm::PlanModel;
use crate::plan::parse_plan;
use crate::prompt::build_plan_prompt;
use crate::result::{ExecutionResult, ResultAggregator, StepWarning};
use crate::tools::ToolRegistry;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Validating,
    RequestingPlan,
    ParsingPlan,
    ExecutingSteps,
    Aggregating,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub stage: PipelineStage,
    pub ts_ms: u64,
}

impl StageEvent {
    pub fn now(stage: PipelineStage) -> Self {
        Self {
            stage,
            ts_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<&PipelineError> for ErrorBody {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            detail: err.detail(),
        }
    }
}

/// Wire form of one run, as returned by the HTTP server and printed by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResponse {
    pub request_id: String,
    pub status: TransformStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub stages: Vec<StageEvent>,
}

impl TransformResponse {
    /// Response for a request that never reached the pipeline, e.g. an unreadable body.
    pub fn rejected(err: &PipelineError) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            status: TransformStatus::Error,
            result: None,
            error: Some(ErrorBody::from(err)),
            stages: vec![StageEvent::now(PipelineStage::Error)],
        }
    }

    /// HTTP status code matching the outcome.
    pub fn http_status(&self) -> u16 {
        match self.error.as_ref().map(|e| e.kind) {
            None => 200,
            Some(ErrorKind::InvalidInput) => 400,
            Some(ErrorKind::UpstreamUnavailable) => 502,
            Some(ErrorKind::Cancelled) => 499,
        }
    }
}

#[derive(Default)]
struct StageTracker {
    events: Vec<StageEvent>,
}

impl StageTracker {
    fn enter(&mut self, stage: PipelineStage) {
        info!("Stage: {:?}", stage);
        self.events.push(StageEvent::now(stage));
    }
}

pub struct TransformPipeline<M: PlanModel> {
    model: M,
    config: PipelineConfig,
    registry: ToolRegistry,
}

impl<M: PlanModel> TransformPipeline<M> {
    pub fn new(model: M, config: PipelineConfig) -> Self {
        Self {
            model,
            config,
            registry: ToolRegistry::new(),
        }
    }

    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn transform(&self, dataset: &Dataset, instruction: &str) -> Result<ExecutionResult> {
        self.transform_with_cancel(dataset, instruction, CancellationToken::new())
            .await
    }

    pub async fn transform_with_cancel(
        &self,
        dataset: &Dataset,
        instruction: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let request_id = Uuid::new_v4().to_string();
        let mut tracker = StageTracker::default();
        self.run_stages(dataset, instruction, &cancel, &mut tracker)
            .instrument(info_span!("transform", request_id = %request_id))
            .await
    }

    /// Like [`transform_with_cancel`](Self::transform_with_cancel) but never fails: the
    /// outcome and the stage trail are folded into a [`TransformResponse`].
    pub async fn respond(
        &self,
        dataset: &Dataset,
        instruction: &str,
        cancel: CancellationToken,
    ) -> TransformResponse {
        let request_id = Uuid::new_v4().to_string();
        let mut tracker = StageTracker::default();
        let outcome = self
            .run_stages(dataset, instruction, &cancel, &mut tracker)
            .instrument(info_span!("transform", request_id = %request_id))
            .await;

        match outcome {
            Ok(result) => TransformResponse {
                request_id,
                status: TransformStatus::Success,
                result: Some(result),
                error: None,
                stages: tracker.events,
            },
            Err(e) => {
                tracker.events.push(StageEvent::now(PipelineStage::Error));
                TransformResponse {
                    request_id,
                    status: TransformStatus::Error,
                    result: None,
                    error: Some(ErrorBody::from(&e)),
                    stages: tracker.events,
                }
            }
        }
    }

    async fn run_stages(
        &self,
        dataset: &Dataset,
        instruction: &str,
        cancel: &CancellationToken,
        tracker: &mut StageTracker,
    ) -> Result<ExecutionResult> {
        tracker.enter(PipelineStage::Validating);
        if dataset.headers().is_empty() {
            return Err(PipelineError::InvalidInput("dataset has no headers".to_string()));
        }
        dataset
            .validate()
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        if instruction.trim().is_empty() {
            return Err(PipelineError::InvalidInput("instruction is empty".to_string()));
        }

        tracker.enter(PipelineStage::RequestingPlan);
        let reply = self.request_plan(dataset, instruction, cancel).await?;

        tracker.enter(PipelineStage::ParsingPlan);
        let parsed = parse_plan(&reply, self.config.description_limit);
        info!(
            "Parsed plan from {:?}: {} step(s), newData: {}",
            parsed.source,
            parsed.plan.steps.len(),
            parsed.plan.new_data.is_some()
        );
        let parse_warnings: Vec<StepWarning> = parsed.notes.into_iter().map(StepWarning::for_plan).collect();

        tracker.enter(PipelineStage::ExecutingSteps);
        let execution = PlanExecutor::new(&self.registry).execute(dataset, &parsed.plan);

        tracker.enter(PipelineStage::Aggregating);
        let result = ResultAggregator::aggregate(dataset, parsed.plan.description, execution, parse_warnings);

        tracker.enter(PipelineStage::Done);
        Ok(result)
    }

    async fn request_plan(
        &self,
        dataset: &Dataset,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let prompt = build_plan_prompt(dataset, instruction, &self.config, &self.registry);
        let timeout = self.config.model_timeout;

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Model request cancelled");
                return Err(PipelineError::Cancelled);
            }
            outcome = tokio::time::timeout(timeout, self.model.complete(&prompt)) => match outcome {
                Err(_) => {
                    return Err(PipelineError::UpstreamUnavailable(format!(
                        "model did not answer within {}s",
                        timeout.as_secs_f64()
                    )))
                }
                Ok(Err(e)) => return Err(PipelineError::UpstreamUnavailable(e.to_string())),
                Ok(Ok(text)) => text,
            },
        };

        if reply.trim().is_empty() {
            return Err(PipelineError::UpstreamUnavailable(
                "model returned an empty response".to_string(),
            ));
        }
        Ok(reply)
    }
}
