use crate::error::{ConvertError, StageError};
use crate::extractor::{RawDocument, StructuredText};
use crate::models::{Candidate, EvidenceDocument, Query};
use crate::store::StoreHit;
use crate::usage::TokenUsage;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub schema: Value,
    pub temperature: f32,
}

/// Parsed structured object plus the tokens the call consumed, when the
/// service reports them.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub value: Value,
    pub usage: TokenUsage,
}

impl From<Value> for Generation {
    fn from(value: Value) -> Self {
        Self {
            value,
            usage: TokenUsage::default(),
        }
    }
}

/// Schema-constrained text generation. Implementations return the parsed
/// structured object; the pipeline validates it against `schema` again.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, StageError>;
}

#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    /// Zero results is `Ok(vec![])`, never an error.
    async fn search(&self, query: &Query, max_results: usize) -> Result<Vec<Candidate>, StageError>;

    async fn fetch_document(&self, _candidate: &Candidate) -> Result<Option<RawDocument>, StageError> {
        Ok(None)
    }
}

#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn embed_and_index(&self, document: &EvidenceDocument) -> Result<(), StageError>;

    async fn query(&self, embedding: &[f32], top_n: usize) -> Result<Vec<StoreHit>, StageError>;
}

pub trait DocumentConverter: Send + Sync {
    fn convert(&self, raw: &RawDocument) -> Result<StructuredText, ConvertError>;
}
