use crate::models::{Candidate, EvidenceDocument};

#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub document_id: String,
    pub similarity_score: f64,
    /// Stored payload, when the index keeps one.
    pub document: Option<EvidenceDocument>,
}

impl StoreHit {
    pub fn into_candidate(self) -> Option<Candidate> {
        let score = self.similarity_score;
        self.document
            .map(|document| Candidate::from_document(document, score))
    }
}
