pub mod memory;
pub mod qdrant;

pub use memory::InMemoryEvidenceStore;
pub use qdrant::QdrantEvidenceStore;
