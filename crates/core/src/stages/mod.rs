pub mod aggregator;
pub mod assessor;
pub mod curator;
pub mod grounding;
pub mod planner;
pub mod scoring;

use crate::error::{PipelineError, Stage, StageError};
use crate::progress::{ProgressEvent, ProgressObserver};
use crate::retry::{call_with_policy, RetryPolicy};
use crate::schema;
use crate::traits::{GenerationRequest, Generator};
use crate::usage::UsageLedger;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-run settings and sinks shared by every stage call.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub policy: RetryPolicy,
    pub cancel: &'a CancellationToken,
    pub temperature: f32,
    pub usage: &'a UsageLedger,
    pub observer: &'a dyn ProgressObserver,
}

impl<'a> StageContext<'a> {
    pub fn request(&self, system: &str, prompt: String, schema: Value) -> GenerationRequest {
        GenerationRequest {
            system: system.to_string(),
            prompt,
            schema,
            temperature: self.temperature,
        }
    }

    pub fn started(&self, stage: Stage) {
        self.observer.on_progress(&ProgressEvent::StageStarted { stage });
    }

    pub fn finished(&self, stage: Stage) {
        self.observer.on_progress(&ProgressEvent::StageFinished {
            stage,
            usage: self.usage.stage(stage),
        });
    }
}

/// Issues `request` under the retry policy. Output is validated against the
/// request schema and then handed to `interpret`; a violation at either step
/// is a retryable schema error. Every attempt is recorded in the usage ledger.
pub async fn generate_structured<G, T, F>(
    generator: &G,
    stage: Stage,
    context: &StageContext<'_>,
    request: &GenerationRequest,
    interpret: F,
) -> Result<T, PipelineError>
where
    G: Generator + ?Sized,
    F: Fn(Value) -> Result<T, StageError>,
{
    let interpret = &interpret;
    let usage = context.usage;
    call_with_policy(stage, &context.policy, context.cancel, move || async move {
        let generation = match generator.generate(request).await {
            Ok(generation) => generation,
            Err(error) => {
                usage.record_failure(stage);
                return Err(error);
            }
        };
        usage.record_success(stage, &generation.usage);

        schema::validate(&request.schema, &generation.value)?;
        debug!(stage = %stage, "generation output validated");
        interpret(generation.value)
    })
    .await
}
