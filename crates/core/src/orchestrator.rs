use crate::chunking::ChunkingConfig;
use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::error::{PipelineError, Stage};
use crate::models::{Finding, Idea, OriginalityReport, PipelineConfig};
use crate::progress::{NoProgress, ProgressEvent, ProgressObserver};
use crate::retry::RetryPolicy;
use crate::stages::assessor::{assess, prepare_content, AssessorTools};
use crate::stages::curator::{curate, Retrieval};
use crate::stages::{aggregator, planner, StageContext};
use crate::traits::{DocumentConverter, EvidenceStore, Generator, LiteratureSearch};
use crate::usage::{RunUsage, UsageLedger};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

/// A finished evaluation with the generator calls and tokens it consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub report: OriginalityReport,
    pub usage: RunUsage,
}

/// One originality evaluation runs plan, curate, assess (fanned out per
/// paper) and aggregate, strictly in that order. Evaluations share no state
/// besides the evidence store, which they only read.
pub struct OriginalityPipeline<G, L, S, C, E = CharacterNgramEmbedder>
where
    G: Generator,
    L: LiteratureSearch,
    S: EvidenceStore,
    C: DocumentConverter,
    E: Embedder,
{
    generator: G,
    literature: L,
    store: S,
    converter: Arc<C>,
    embedder: Arc<E>,
    config: PipelineConfig,
    chunking: ChunkingConfig,
}

impl<G, L, S, C> OriginalityPipeline<G, L, S, C, CharacterNgramEmbedder>
where
    G: Generator,
    L: LiteratureSearch,
    S: EvidenceStore,
    C: DocumentConverter + 'static,
{
    pub fn new(
        generator: G,
        literature: L,
        store: S,
        converter: C,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Self::with_embedder(
            generator,
            literature,
            store,
            converter,
            CharacterNgramEmbedder::default(),
            config,
        )
    }
}

impl<G, L, S, C, E> OriginalityPipeline<G, L, S, C, E>
where
    G: Generator,
    L: LiteratureSearch,
    S: EvidenceStore,
    C: DocumentConverter + 'static,
    E: Embedder + 'static,
{
    pub fn with_embedder(
        generator: G,
        literature: L,
        store: S,
        converter: C,
        embedder: E,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            generator,
            literature,
            store,
            converter: Arc::new(converter),
            embedder: Arc::new(embedder),
            config,
            chunking: ChunkingConfig::default(),
        })
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn literature(&self) -> &L {
        &self.literature
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn evaluate(
        &self,
        idea_text: &str,
        cancel: &CancellationToken,
    ) -> Result<OriginalityReport, PipelineError> {
        self.evaluate_with_observer(idea_text, cancel, &NoProgress)
            .await
            .map(|evaluation| evaluation.report)
    }

    /// Runs one evaluation, reporting stage boundaries and per-paper
    /// completion to `observer` as they happen.
    pub async fn evaluate_with_observer(
        &self,
        idea_text: &str,
        cancel: &CancellationToken,
        observer: &dyn ProgressObserver,
    ) -> Result<Evaluation, PipelineError> {
        let idea = Idea::new(idea_text)?;
        let usage = UsageLedger::new();
        let context = StageContext {
            policy: RetryPolicy::from(&self.config),
            cancel,
            temperature: self.config.temperature,
            usage: &usage,
            observer,
        };

        info!(chars = idea.text().len(), "evaluating idea");
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage: Stage::Planning });
        }

        context.started(Stage::Planning);
        let queries = planner::plan(&self.generator, &idea, self.config.max_query_count, &context)
            .instrument(info_span!("planning"))
            .await?;
        context.finished(Stage::Planning);

        let retrieval = Retrieval {
            literature: &self.literature,
            store: &self.store,
            embedder: &*self.embedder,
        };
        let selected = curate(&self.generator, &retrieval, &idea, &queries, &self.config, &context)
            .instrument(info_span!("curation"))
            .await?;

        let tools = AssessorTools {
            literature: &self.literature,
            converter: Arc::clone(&self.converter),
            embedder: Arc::clone(&self.embedder),
            chunking: self.chunking,
            context_passages: self.config.context_passages,
        };
        let total = selected.len();
        let mut completed = 0;
        context.started(Stage::Assessment);
        let findings: Vec<Finding> = stream::iter(selected.iter())
            .map(|paper| {
                let idea = &idea;
                let tools = &tools;
                let context = &context;
                async move {
                    let content = prepare_content(tools, idea, paper, context).await?;
                    assess(&self.generator, idea, paper, &content, context).await
                }
                .instrument(info_span!("assessment", paper_id = %paper.paper_id()))
            })
            .buffered(self.config.max_concurrent_assessments)
            .inspect_ok(|finding| {
                completed += 1;
                observer.on_progress(&ProgressEvent::PaperAssessed {
                    paper_id: finding.paper_id.clone(),
                    completed,
                    total,
                });
            })
            .try_collect()
            .await?;
        context.finished(Stage::Assessment);

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage: Stage::Aggregation });
        }

        context.started(Stage::Aggregation);
        let report = aggregator::aggregate(&self.generator, &idea, &findings, &context)
            .instrument(info_span!("aggregation"))
            .await?;
        context.finished(Stage::Aggregation);

        let usage = usage.snapshot();
        info!(
            calls = usage.calls(),
            input_tokens = usage.tokens().input_tokens,
            output_tokens = usage.tokens().output_tokens,
            score = report.score,
            "evaluation finished"
        );
        Ok(Evaluation { report, usage })
    }
}
