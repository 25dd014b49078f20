use crate::error::PipelineError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    text: String,
}

impl Idea {
    pub fn new(text: impl Into<String>) -> Result<Self, PipelineError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidIdea("idea text is empty".to_string()));
        }
        Ok(Self {
            text: trimmed.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sentences(&self) -> Vec<String> {
        crate::sentences::split_sentences(&self.text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct QueryFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// ISO date (`YYYY-MM-DD`); results published before it are dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_after: Option<String>,
}

impl QueryFilters {
    pub fn published_after_date(&self) -> Option<NaiveDate> {
        self.published_after
            .as_deref()
            .and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Query {
    pub terms: Vec<String>,
    #[serde(default)]
    pub filters: QueryFilters,
}

impl Query {
    pub fn text(&self) -> String {
        self.terms.join(" ")
    }

    /// Lowercased, sorted term set used to detect near-duplicate queries.
    pub fn fingerprint(&self) -> Vec<String> {
        let mut terms = self
            .terms
            .iter()
            .map(|term| crate::chunking::normalize_whitespace(term).to_lowercase())
            .collect::<Vec<_>>();
        terms.sort_unstable();
        terms.dedup();
        terms
    }
}

/// A document as the evidence store indexes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceDocument {
    pub identifier: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub publication_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
}

impl EvidenceDocument {
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.abstract_text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub identifier: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub publication_date: Option<NaiveDate>,
    pub similarity_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
}

impl Candidate {
    pub fn from_document(document: EvidenceDocument, similarity_score: f64) -> Self {
        Self {
            identifier: document.identifier,
            title: document.title,
            abstract_text: document.abstract_text,
            publication_date: document.publication_date,
            similarity_score: similarity_score.clamp(0.0, 1.0),
            pdf_url: document.pdf_url,
        }
    }

    pub fn document(&self) -> EvidenceDocument {
        EvidenceDocument {
            identifier: self.identifier.clone(),
            title: self.title.clone(),
            abstract_text: self.abstract_text.clone(),
            publication_date: self.publication_date,
            pdf_url: self.pdf_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    Irrelevant,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectedPaper {
    pub candidate: Candidate,
    pub relevance_rank: u32,
    pub relevance: Relevance,
    pub relevance_justification: String,
}

impl SelectedPaper {
    pub fn paper_id(&self) -> &str {
        &self.candidate.identifier
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverlapDimension {
    Problem,
    Methodology,
    Domain,
    InnovationClaim,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn downgrade(self) -> Self {
        match self {
            Severity::High => Severity::Medium,
            Severity::Medium => Severity::Low,
            Severity::Low | Severity::None => Severity::None,
        }
    }

    /// Lowest originality a sentence may be labelled with when this is the
    /// strongest finding supporting it.
    pub fn originality_floor(self) -> Originality {
        match self {
            Severity::High => Originality::Low,
            Severity::Medium | Severity::Low => Originality::Medium,
            Severity::None => Originality::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub paper_id: String,
    pub overlap_dimensions: BTreeSet<OverlapDimension>,
    pub severity: Severity,
    pub cited_excerpt: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Originality {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentenceLabel {
    pub sentence_index: usize,
    pub originality: Originality,
    pub supporting_paper_ids: BTreeSet<String>,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaperSummary {
    pub paper_id: String,
    pub severity: Severity,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OriginalityReport {
    pub score: u8,
    pub sentence_labels: Vec<SentenceLabel>,
    pub paper_summaries: Vec<PaperSummary>,
    pub overall_rationale: String,
}

impl OriginalityReport {
    pub fn band(&self) -> Originality {
        match self.score {
            70..=u8::MAX => Originality::High,
            40..=69 => Originality::Medium,
            _ => Originality::Low,
        }
    }

    pub fn referenced_paper_ids(&self) -> BTreeSet<&str> {
        self.sentence_labels
            .iter()
            .flat_map(|label| label.supporting_paper_ids.iter().map(String::as_str))
            .chain(self.paper_summaries.iter().map(|summary| summary.paper_id.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub num_papers: usize,
    pub max_query_count: usize,
    pub candidate_pool_size: usize,
    pub per_call_timeout: Duration,
    pub retry_budget: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub temperature: f32,
    pub results_per_query: usize,
    pub store_top_n: usize,
    pub context_passages: usize,
    pub max_concurrent_assessments: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_papers: 5,
            max_query_count: 5,
            candidate_pool_size: 20,
            per_call_timeout: Duration::from_secs(60),
            retry_budget: 2,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(8),
            temperature: 0.0,
            results_per_query: 10,
            store_top_n: 20,
            context_passages: 5,
            max_concurrent_assessments: 5,
        }
    }
}

impl PipelineConfig {
    pub const MAX_TEMPERATURE: f32 = 0.2;

    pub fn validate(&self) -> Result<(), PipelineError> {
        let counts = [
            ("num_papers", self.num_papers),
            ("max_query_count", self.max_query_count),
            ("candidate_pool_size", self.candidate_pool_size),
            ("results_per_query", self.results_per_query),
            ("store_top_n", self.store_top_n),
            ("max_concurrent_assessments", self.max_concurrent_assessments),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(PipelineError::InvalidConfig(format!("{name} must be at least 1")));
        }
        if self.per_call_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "per_call_timeout must be non-zero".to_string(),
            ));
        }
        if !(0.0..=Self::MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(PipelineError::InvalidConfig(format!(
                "temperature {} outside [0, {}]",
                self.temperature,
                Self::MAX_TEMPERATURE
            )));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(PipelineError::InvalidConfig(
                "backoff_multiplier must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
