use super::grounding::check_finding;
use super::{generate_structured, StageContext};
use crate::chunking::{chunk_sections, select_passages, ChunkingConfig, Passage};
use crate::embeddings::Embedder;
use crate::error::{GroundingViolation, PipelineError, Stage, StageError};
use crate::extractor::StructuredText;
use crate::models::{Finding, Idea, OverlapDimension, SelectedPaper, Severity};
use crate::prompts::{assessor_prompt, ASSESSOR_SYSTEM, GROUNDING_RETRY_NOTE};
use crate::retry::call_with_policy;
use crate::schema::finding_schema;
use crate::traits::{DocumentConverter, Generator, LiteratureSearch};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct Assessment {
    overlap_dimensions: BTreeSet<OverlapDimension>,
    severity: Severity,
    cited_excerpt: String,
    rationale: String,
}

/// Paper content an assessment may cite from.
#[derive(Debug, Clone)]
pub struct PaperContent {
    pub source_text: String,
    pub passages: Vec<Passage>,
}

/// Collaborators and settings for preparing paper content. Conversion and
/// passage selection run on the blocking pool, so they hold owned handles.
pub struct AssessorTools<'t, L: ?Sized, C: ?Sized, E: ?Sized> {
    pub literature: &'t L,
    pub converter: Arc<C>,
    pub embedder: Arc<E>,
    pub chunking: ChunkingConfig,
    pub context_passages: usize,
}

/// Fetches and converts the full text when available; on any failure other
/// than cancellation the abstract alone is used.
pub async fn prepare_content<L, C, E>(
    tools: &AssessorTools<'_, L, C, E>,
    idea: &Idea,
    paper: &SelectedPaper,
    context: &StageContext<'_>,
) -> Result<PaperContent, PipelineError>
where
    L: LiteratureSearch + ?Sized + Sync,
    C: DocumentConverter + ?Sized + Send + Sync + 'static,
    E: Embedder + ?Sized + Send + Sync + 'static,
{
    let fetch_policy = crate::retry::RetryPolicy {
        retry_budget: 0,
        ..context.policy
    };
    let fetched = call_with_policy(Stage::Assessment, &fetch_policy, context.cancel, || {
        tools.literature.fetch_document(&paper.candidate)
    })
    .await;

    let raw = match fetched {
        Ok(raw) => raw,
        Err(error @ PipelineError::Cancelled { .. }) => return Err(error),
        Err(error) => {
            warn!(paper_id = %paper.paper_id(), error = %error, "full text unavailable, using abstract");
            None
        }
    };

    let converter = Arc::clone(&tools.converter);
    let embedder = Arc::clone(&tools.embedder);
    let idea_text = idea.text().to_string();
    let chunking = tools.chunking;
    let limit = tools.context_passages;
    let preparation = tokio::task::spawn_blocking(move || {
        let (structured, failure) = match raw.map(|raw| converter.convert(&raw)) {
            Some(Ok(structured)) => (structured, None),
            Some(Err(error)) => (StructuredText::default(), Some(error)),
            None => (StructuredText::default(), None),
        };
        let passages = select_passages(
            &*embedder,
            &idea_text,
            &chunk_sections(&structured, chunking),
            limit,
        );
        (structured, passages, failure)
    });

    let joined = tokio::select! {
        biased;
        _ = context.cancel.cancelled() => {
            return Err(PipelineError::Cancelled { stage: Stage::Assessment });
        }
        joined = preparation => joined,
    };

    let (structured, passages) = match joined {
        Ok((structured, passages, failure)) => {
            if let Some(error) = failure {
                warn!(paper_id = %paper.paper_id(), error = %error, "conversion failed, using abstract");
            }
            (structured, passages)
        }
        Err(error) => {
            warn!(paper_id = %paper.paper_id(), error = %error, "content preparation aborted, using abstract");
            (StructuredText::default(), Vec::new())
        }
    };

    debug!(
        paper_id = %paper.paper_id(),
        sections = structured.sections.len(),
        passages = passages.len(),
        "paper content prepared"
    );

    Ok(PaperContent {
        source_text: format!("{}\n\n{}", paper.candidate.abstract_text, structured.full_text()),
        passages,
    })
}

fn interpret_assessment(value: serde_json::Value) -> Result<Assessment, StageError> {
    Ok(serde_json::from_value(value)?)
}

fn grounded(paper_id: &str, assessment: &Assessment, content: &PaperContent) -> Result<(), GroundingViolation> {
    check_finding(
        paper_id,
        assessment.severity,
        &assessment.cited_excerpt,
        &content.source_text,
    )
}

/// Produces one finding for one paper from that paper's content alone. An
/// overlap claim whose excerpt is missing or cannot be located in the content
/// triggers one re-assessment; if that is also ungrounded, the excerpt is
/// cleared and severity lowered.
pub async fn assess<G>(
    generator: &G,
    idea: &Idea,
    paper: &SelectedPaper,
    content: &PaperContent,
    context: &StageContext<'_>,
) -> Result<Finding, PipelineError>
where
    G: Generator + ?Sized,
{
    let paper_id = paper.paper_id();
    let prompt = assessor_prompt(idea, &paper.candidate, &content.passages);
    let request = context.request(ASSESSOR_SYSTEM, prompt.clone(), finding_schema());

    let mut assessment =
        generate_structured(generator, Stage::Assessment, context, &request, interpret_assessment).await?;

    if let Err(violation) = grounded(paper_id, &assessment, content) {
        warn!(paper_id, error = %violation, "ungrounded excerpt, re-assessing");
        let retry = context.request(
            ASSESSOR_SYSTEM,
            format!("{prompt}\n{GROUNDING_RETRY_NOTE}"),
            finding_schema(),
        );
        assessment =
            generate_structured(generator, Stage::Assessment, context, &retry, interpret_assessment).await?;

        if let Err(violation) = grounded(paper_id, &assessment, content) {
            let downgraded = assessment.severity.downgrade();
            warn!(
                paper_id,
                error = %violation,
                from = ?assessment.severity,
                to = ?downgraded,
                "excerpt still ungrounded, clearing it and downgrading severity"
            );
            assessment.cited_excerpt.clear();
            assessment.severity = downgraded;
        }
    }

    info!(paper_id, severity = ?assessment.severity, "paper assessed");
    Ok(Finding {
        paper_id: paper_id.to_string(),
        overlap_dimensions: assessment.overlap_dimensions,
        severity: assessment.severity,
        cited_excerpt: assessment.cited_excerpt.trim().to_string(),
        rationale: assessment.rationale.trim().to_string(),
    })
}
