use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::error::StageError;
use crate::models::EvidenceDocument;
use crate::store::StoreHit;
use crate::traits::EvidenceStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

pub struct QdrantEvidenceStore<E = CharacterNgramEmbedder> {
    endpoint: String,
    collection: String,
    client: Client,
    embedder: E,
}

impl QdrantEvidenceStore<CharacterNgramEmbedder> {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self::with_embedder(endpoint, collection, CharacterNgramEmbedder::default())
    }
}

impl<E: Embedder> QdrantEvidenceStore<E> {
    pub fn with_embedder(endpoint: impl Into<String>, collection: impl Into<String>, embedder: E) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            embedder,
        }
    }

    /// Creates the collection with cosine distance if it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), StageError> {
        let url = format!("{}/collections/{}", self.endpoint, self.collection);
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(&url)
            .json(&json!({
                "vectors": {
                    "size": self.embedder.dimensions(),
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> StageError {
    StageError::unavailable("qdrant", status)
}

pub fn point_id(document_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, document_id.as_bytes())
}

fn point_payload(document: &EvidenceDocument) -> Value {
    json!({
        "document_id": document.identifier,
        "title": document.title,
        "abstract": document.abstract_text,
        "publication_date": document.publication_date.map(|date| date.to_string()),
        "pdf_url": document.pdf_url,
    })
}

fn hit_from_point(hit: &Value) -> Option<StoreHit> {
    let document_id = hit
        .pointer("/payload/document_id")
        .and_then(Value::as_str)?
        .to_string();
    let text = |pointer: &str| {
        hit.pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let similarity_score = hit
        .pointer("/score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let document = EvidenceDocument {
        identifier: document_id.clone(),
        title: text("/payload/title"),
        abstract_text: text("/payload/abstract"),
        publication_date: hit
            .pointer("/payload/publication_date")
            .and_then(Value::as_str)
            .and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()),
        pdf_url: hit
            .pointer("/payload/pdf_url")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    Some(StoreHit {
        document_id,
        similarity_score,
        document: Some(document),
    })
}

#[async_trait]
impl<E: Embedder + Send + Sync> EvidenceStore for QdrantEvidenceStore<E> {
    async fn embed_and_index(&self, document: &EvidenceDocument) -> Result<(), StageError> {
        let vector = self.embedder.embed(&document.embedding_text());

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "points": [{
                    "id": point_id(&document.identifier).to_string(),
                    "vector": vector,
                    "payload": point_payload(document),
                }]
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }

    async fn query(&self, embedding: &[f32], top_n: usize) -> Result<Vec<StoreHit>, StageError> {
        if embedding.len() != self.embedder.dimensions() {
            return Err(StageError::unavailable(
                "qdrant",
                format!(
                    "query vector dim {} is not {}",
                    embedding.len(),
                    self.embedder.dimensions()
                ),
            ));
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": embedding,
                "limit": top_n,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|hits| hits.iter().filter_map(hit_from_point).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_per_document() {
        assert_eq!(point_id("2401.00001"), point_id("2401.00001"));
        assert_ne!(point_id("2401.00001"), point_id("2401.00002"));
    }

    #[test]
    fn search_hits_resolve_to_documents() {
        let hit = json!({
            "id": point_id("2401.00001").to_string(),
            "score": 0.82,
            "payload": {
                "document_id": "2401.00001",
                "title": "Shelf-YOLO",
                "abstract": "Detecting out-of-stock items.",
                "publication_date": "2024-01-02",
                "pdf_url": null
            }
        });

        let parsed = hit_from_point(&hit).expect("payload has a document id");
        assert_eq!(parsed.document_id, "2401.00001");
        assert!((parsed.similarity_score - 0.82).abs() < 1e-9);
        let document = parsed.document.expect("payload document");
        assert_eq!(document.title, "Shelf-YOLO");
        assert_eq!(document.publication_date, NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(document.pdf_url, None);
    }

    #[test]
    fn hits_without_document_id_are_skipped() {
        assert!(hit_from_point(&json!({ "score": 0.4, "payload": {} })).is_none());
    }

    #[test]
    fn payload_round_trips_the_date_as_iso_text() {
        let payload = point_payload(&EvidenceDocument {
            identifier: "x".to_string(),
            title: "t".to_string(),
            abstract_text: "a".to_string(),
            publication_date: NaiveDate::from_ymd_opt(2023, 5, 17),
            pdf_url: Some("https://arxiv.org/pdf/x".to_string()),
        });
        assert_eq!(payload["publication_date"], "2023-05-17");
        assert_eq!(payload["abstract"], "a");
    }
}
