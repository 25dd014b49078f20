use super::scoring::{clamp_originality, score};
use super::{generate_structured, StageContext};
use crate::error::{PipelineError, Stage, StageError};
use crate::models::{Finding, Idea, Originality, OriginalityReport, PaperSummary, SentenceLabel, Severity};
use crate::prompts::{synthesizer_prompt, SYNTHESIZER_SYSTEM};
use crate::schema::synthesis_schema;
use crate::traits::Generator;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

pub const NO_EVIDENCE_RATIONALE: &str =
    "No closely related prior work was retrieved, so no part of the idea overlaps with known literature.";

#[derive(Debug, Deserialize)]
struct ProposedLabel {
    sentence_index: usize,
    originality: Originality,
    supporting_paper_ids: BTreeSet<String>,
    explanation: String,
}

#[derive(Debug, Deserialize)]
struct Synthesis {
    sentence_labels: Vec<ProposedLabel>,
    overall_rationale: String,
}

/// Keeps only labels that point at a real sentence once, cite at least one
/// analyzed finding with some overlap, and claim no less originality than
/// that evidence allows. Result is ordered by sentence index.
fn reconcile_labels(
    proposed: Vec<ProposedLabel>,
    findings: &[Finding],
    sentence_count: usize,
) -> Vec<SentenceLabel> {
    let overlapping = findings
        .iter()
        .filter(|finding| finding.severity > Severity::None)
        .map(|finding| finding.paper_id.as_str())
        .collect::<HashSet<_>>();

    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for label in proposed {
        if label.sentence_index >= sentence_count || !seen.insert(label.sentence_index) {
            debug!(sentence_index = label.sentence_index, "dropping out-of-range or repeated label");
            continue;
        }

        let supporting_paper_ids = label
            .supporting_paper_ids
            .into_iter()
            .filter(|id| overlapping.contains(id.as_str()))
            .collect::<BTreeSet<_>>();
        if supporting_paper_ids.is_empty() {
            continue;
        }

        let mut label = SentenceLabel {
            sentence_index: label.sentence_index,
            originality: label.originality,
            supporting_paper_ids,
            explanation: label.explanation.trim().to_string(),
        };
        label.originality = clamp_originality(&label, findings);
        labels.push(label);
    }

    labels.sort_by_key(|label| label.sentence_index);
    labels
}

fn summaries(findings: &[Finding]) -> Vec<PaperSummary> {
    findings
        .iter()
        .map(|finding| PaperSummary {
            paper_id: finding.paper_id.clone(),
            severity: finding.severity,
            excerpt: finding.cited_excerpt.clone(),
        })
        .collect()
}

fn interpret_synthesis(
    value: Value,
    findings: &[Finding],
    sentence_count: usize,
) -> Result<(Vec<SentenceLabel>, String), StageError> {
    let synthesis: Synthesis = serde_json::from_value(value)?;
    Ok((
        reconcile_labels(synthesis.sentence_labels, findings, sentence_count),
        synthesis.overall_rationale.trim().to_string(),
    ))
}

/// Synthesizes all findings, given in relevance-rank order, into the report.
/// With no findings the report is produced without a synthesis call.
pub async fn aggregate<G>(
    generator: &G,
    idea: &Idea,
    findings: &[Finding],
    context: &StageContext<'_>,
) -> Result<OriginalityReport, PipelineError>
where
    G: Generator + ?Sized,
{
    let sentences = idea.sentences();
    if findings.is_empty() {
        info!(score = 100, "no findings to aggregate");
        return Ok(OriginalityReport {
            score: score(findings, &[], sentences.len()),
            sentence_labels: Vec::new(),
            paper_summaries: Vec::new(),
            overall_rationale: NO_EVIDENCE_RATIONALE.to_string(),
        });
    }

    let request = context.request(
        SYNTHESIZER_SYSTEM,
        synthesizer_prompt(&sentences, findings),
        synthesis_schema(sentences.len()),
    );
    let (sentence_labels, overall_rationale) =
        generate_structured(generator, Stage::Aggregation, context, &request, |value| {
            interpret_synthesis(value, findings, sentences.len())
        })
        .await?;

    let report = OriginalityReport {
        score: score(findings, &sentence_labels, sentences.len()),
        sentence_labels,
        paper_summaries: summaries(findings),
        overall_rationale,
    };
    info!(
        score = report.score,
        labels = report.sentence_labels.len(),
        papers = report.paper_summaries.len(),
        "report aggregated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, ScriptedGenerator};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn finding(paper_id: &str, severity: Severity) -> Finding {
        Finding {
            paper_id: paper_id.to_string(),
            overlap_dimensions: BTreeSet::new(),
            severity,
            cited_excerpt: format!("excerpt from {paper_id}"),
            rationale: "overlap".to_string(),
        }
    }

    fn proposed(index: usize, originality: Originality, ids: &[&str]) -> ProposedLabel {
        ProposedLabel {
            sentence_index: index,
            originality,
            supporting_paper_ids: ids.iter().map(|id| id.to_string()).collect(),
            explanation: " explained ".to_string(),
        }
    }

    #[test]
    fn labels_are_reconciled_against_findings() {
        let findings = vec![finding("a", Severity::High), finding("b", Severity::Low), finding("c", Severity::None)];
        let labels = reconcile_labels(
            vec![
                proposed(2, Originality::Low, &["b", "ghost"]),
                proposed(0, Originality::Low, &["a"]),
                proposed(0, Originality::High, &["a"]),
                proposed(1, Originality::Low, &["c"]),
                proposed(7, Originality::Low, &["a"]),
            ],
            &findings,
            3,
        );

        assert_eq!(labels.len(), 2);
        assert_eq!(labels[0].sentence_index, 0);
        assert_eq!(labels[0].originality, Originality::Low);
        assert_eq!(labels[1].sentence_index, 2);
        assert_eq!(labels[1].originality, Originality::Medium);
        assert_eq!(labels[1].supporting_paper_ids, BTreeSet::from(["b".to_string()]));
        assert_eq!(labels[1].explanation, "explained");
    }

    #[tokio::test]
    async fn no_findings_skip_synthesis() {
        let generator = ScriptedGenerator::default();
        let cancel = CancellationToken::new();
        let idea = Idea::new("Bees fold proteins. They do it at night.").expect("valid idea");

        let report = aggregate(&generator, &idea, &[], &context_with(&cancel, 2))
            .await
            .expect("no evidence is not an error");

        assert_eq!(report.score, 100);
        assert!(report.sentence_labels.is_empty());
        assert_eq!(generator.calls(SYNTHESIZER_SYSTEM), 0);
    }

    #[tokio::test]
    async fn invalid_synthesis_fails_the_stage() {
        let generator = ScriptedGenerator::default();
        for _ in 0..3 {
            generator.push(SYNTHESIZER_SYSTEM, Ok(json!({ "overall_rationale": "missing labels" })));
        }
        let cancel = CancellationToken::new();
        let idea = Idea::new("Shelf stocking with YOLO.").expect("valid idea");

        let result = aggregate(&generator, &idea, &[finding("a", Severity::High)], &context_with(&cancel, 2)).await;
        assert!(matches!(
            result,
            Err(PipelineError::Stage { stage: Stage::Aggregation, attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn summaries_follow_finding_order() {
        let generator = ScriptedGenerator::default();
        generator.push(
            SYNTHESIZER_SYSTEM,
            Ok(json!({
                "sentence_labels": [{
                    "sentence_index": 0,
                    "originality": "low",
                    "supporting_paper_ids": ["b"],
                    "explanation": "b already does this"
                }],
                "overall_rationale": "Heavily anticipated."
            })),
        );
        let cancel = CancellationToken::new();
        let idea = Idea::new("Shelf stocking with YOLO.").expect("valid idea");
        let findings = vec![finding("b", Severity::High), finding("a", Severity::Medium)];

        let report = aggregate(&generator, &idea, &findings, &context_with(&cancel, 2))
            .await
            .expect("aggregation succeeds");

        let ids = report.paper_summaries.iter().map(|summary| summary.paper_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(report.score, score(&findings, &report.sentence_labels, 1));
        assert!(report.score < 40);
    }
}
