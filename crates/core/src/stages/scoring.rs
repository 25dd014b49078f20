//! Deterministic originality score over findings and sentence labels.
//!
//! `score = round(clamp(100 - E - S, 0, 100))`, where `E` sums severity
//! weights over findings sorted from most to least severe, the i-th divided
//! by `i + 1`, and `S` is 40 times the mean label penalty over all sentences.
//! Weights are none 0, low 4, medium 10 and high 25, so one high finding whose
//! sentence is labelled low already scores 35.

use crate::models::{Finding, Originality, SentenceLabel, Severity};

pub const MAX_SCORE: u8 = 100;
const LABEL_PENALTY_SCALE: f64 = 40.0;

pub fn severity_weight(severity: Severity) -> f64 {
    match severity {
        Severity::None => 0.0,
        Severity::Low => 4.0,
        Severity::Medium => 10.0,
        Severity::High => 25.0,
    }
}

pub fn label_penalty(originality: Originality) -> f64 {
    match originality {
        Originality::Low => 1.0,
        Originality::Medium => 0.35,
        Originality::High => 0.0,
    }
}

/// Strongest severity among the findings a label cites.
pub fn strongest_support(label: &SentenceLabel, findings: &[Finding]) -> Severity {
    findings
        .iter()
        .filter(|finding| label.supporting_paper_ids.contains(&finding.paper_id))
        .map(|finding| finding.severity)
        .max()
        .unwrap_or(Severity::None)
}

/// A label may not claim less originality than its strongest supporting
/// finding justifies.
pub fn clamp_originality(label: &SentenceLabel, findings: &[Finding]) -> Originality {
    label
        .originality
        .max(strongest_support(label, findings).originality_floor())
}

fn evidence_penalty(findings: &[Finding]) -> f64 {
    let mut weights = findings
        .iter()
        .map(|finding| severity_weight(finding.severity))
        .collect::<Vec<_>>();
    weights.sort_by(|left, right| right.total_cmp(left));

    weights
        .iter()
        .enumerate()
        .map(|(position, weight)| weight / (position as f64 + 1.0))
        .sum()
}

fn sentence_penalty(labels: &[SentenceLabel], findings: &[Finding], sentence_count: usize) -> f64 {
    let total = labels
        .iter()
        .map(|label| label_penalty(clamp_originality(label, findings)))
        .sum::<f64>();
    LABEL_PENALTY_SCALE * total / sentence_count.max(1) as f64
}

pub fn score(findings: &[Finding], labels: &[SentenceLabel], sentence_count: usize) -> u8 {
    if findings.is_empty() {
        return MAX_SCORE;
    }

    let raw = f64::from(MAX_SCORE)
        - evidence_penalty(findings)
        - sentence_penalty(labels, findings, sentence_count);
    raw.clamp(0.0, f64::from(MAX_SCORE)).round() as u8
}
