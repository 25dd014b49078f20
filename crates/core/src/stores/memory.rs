use crate::embeddings::{cosine_similarity, CharacterNgramEmbedder, Embedder};
use crate::error::StageError;
use crate::models::EvidenceDocument;
use crate::store::StoreHit;
use crate::traits::EvidenceStore;
use async_trait::async_trait;
use std::sync::RwLock;

struct IndexedEntry {
    document: EvidenceDocument,
    vector: Vec<f32>,
}

/// Vector index held in process memory, scoped to whoever owns it. Re-indexing
/// an identifier replaces the entry in place, keeping its original position.
pub struct InMemoryEvidenceStore<E = CharacterNgramEmbedder> {
    embedder: E,
    entries: RwLock<Vec<IndexedEntry>>,
}

impl Default for InMemoryEvidenceStore<CharacterNgramEmbedder> {
    fn default() -> Self {
        Self::new(CharacterNgramEmbedder::default())
    }
}

impl<E: Embedder> InMemoryEvidenceStore<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StageError {
    StageError::unavailable("memory-store", "index lock poisoned")
}

#[async_trait]
impl<E: Embedder + Send + Sync> EvidenceStore for InMemoryEvidenceStore<E> {
    async fn embed_and_index(&self, document: &EvidenceDocument) -> Result<(), StageError> {
        let vector = self.embedder.embed(&document.embedding_text());
        let mut entries = self.entries.write().map_err(|_| poisoned())?;

        match entries
            .iter_mut()
            .find(|entry| entry.document.identifier == document.identifier)
        {
            Some(entry) => {
                entry.document = document.clone();
                entry.vector = vector;
            }
            None => entries.push(IndexedEntry {
                document: document.clone(),
                vector,
            }),
        }
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_n: usize) -> Result<Vec<StoreHit>, StageError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;

        let mut scored = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (position, cosine_similarity(embedding, &entry.vector)))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(&right.0)));

        Ok(scored
            .into_iter()
            .take(top_n)
            .map(|(position, similarity_score)| StoreHit {
                document_id: entries[position].document.identifier.clone(),
                similarity_score,
                document: Some(entries[position].document.clone()),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(identifier: &str, title: &str, abstract_text: &str) -> EvidenceDocument {
        EvidenceDocument {
            identifier: identifier.to_string(),
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            publication_date: None,
            pdf_url: None,
        }
    }

    #[tokio::test]
    async fn query_ranks_by_similarity() {
        let store = InMemoryEvidenceStore::default();
        store
            .embed_and_index(&document("a", "Protein folding", "Molecular dynamics of proteins."))
            .await
            .expect("index a");
        store
            .embed_and_index(&document("b", "Retail shelf detection", "YOLO detects products on shelves."))
            .await
            .expect("index b");

        let query = CharacterNgramEmbedder::default().embed("YOLO retail shelf product detection");
        let hits = store.query(&query, 5).await.expect("query");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "b");
        assert!(hits[0].similarity_score >= hits[1].similarity_score);
        assert!(hits[0].document.is_some());
    }

    #[tokio::test]
    async fn reindexing_replaces_entry() {
        let store = InMemoryEvidenceStore::default();
        store.embed_and_index(&document("a", "Old", "old")).await.expect("index");
        store.embed_and_index(&document("a", "New", "new")).await.expect("reindex");

        assert_eq!(store.len(), 1);
        let hits = store
            .query(&CharacterNgramEmbedder::default().embed("new"), 1)
            .await
            .expect("query");
        assert_eq!(hits[0].document.as_ref().map(|doc| doc.title.as_str()), Some("New"));
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() {
        let store = InMemoryEvidenceStore::default();
        store.embed_and_index(&document("first", "same", "text")).await.expect("index");
        store.embed_and_index(&document("second", "same", "text")).await.expect("index");

        let hits = store
            .query(&CharacterNgramEmbedder::default().embed("same text"), 2)
            .await
            .expect("query");
        assert_eq!(hits[0].document_id, "first");
        assert_eq!(hits[1].document_id, "second");
    }
}
