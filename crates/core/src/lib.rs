pub mod chunking;
pub mod clients;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod schema;
pub mod sentences;
pub mod stages;
pub mod store;
pub mod stores;
pub mod traits;
pub mod usage;

#[cfg(test)]
mod testing;

pub use chunking::{chunk_by_paragraph, chunk_sections, normalize_whitespace, ChunkingConfig, Passage};
pub use clients::{ArxivClient, GeminiGenerator};
pub use embeddings::{cosine_similarity, CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConvertError, GroundingViolation, IndexError, PipelineError, Stage, StageError};
pub use extractor::{MediaConverter, PdfTextConverter, PlainTextConverter, RawDocument, Section, StructuredText};
pub use ingest::{index_folder, IndexReport, SkippedFile};
pub use models::{
    Candidate, EvidenceDocument, Finding, Idea, Originality, OriginalityReport, OverlapDimension,
    PaperSummary, PipelineConfig, Query, QueryFilters, Relevance, SelectedPaper, SentenceLabel,
    Severity,
};
pub use orchestrator::{Evaluation, OriginalityPipeline};
pub use progress::{NoProgress, ProgressEvent, ProgressObserver};
pub use retry::RetryPolicy;
pub use schema::SchemaViolation;
pub use sentences::split_sentences;
pub use store::StoreHit;
pub use stores::{InMemoryEvidenceStore, QdrantEvidenceStore};
pub use traits::{DocumentConverter, EvidenceStore, Generation, GenerationRequest, Generator, LiteratureSearch};
pub use usage::{RunUsage, StageUsage, TokenUsage, UsageLedger};
