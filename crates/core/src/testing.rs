//! Scripted collaborators shared by the unit tests.

use crate::error::StageError;
use crate::extractor::RawDocument;
use crate::models::{Candidate, Query};
use crate::progress::{NoProgress, ProgressEvent, ProgressObserver};
use crate::retry::RetryPolicy;
use crate::stages::StageContext;
use crate::traits::{Generation, GenerationRequest, Generator, LiteratureSearch};
use crate::usage::{TokenUsage, UsageLedger};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn candidate(identifier: &str, title: &str, abstract_text: &str) -> Candidate {
    Candidate {
        identifier: identifier.to_string(),
        title: title.to_string(),
        abstract_text: abstract_text.to_string(),
        publication_date: None,
        similarity_score: 0.0,
        pdf_url: None,
    }
}

/// Ledger for tests that do not inspect usage; tests that do pass their own.
static DISCARDED_USAGE: UsageLedger = UsageLedger::new();

pub fn context_with(cancel: &CancellationToken, retry_budget: u32) -> StageContext<'_> {
    StageContext {
        policy: RetryPolicy {
            retry_budget,
            per_call_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(4),
        },
        cancel,
        temperature: 0.0,
        usage: &DISCARDED_USAGE,
        observer: &NoProgress,
    }
}

/// Tokens every scripted generation reports.
pub const SCRIPTED_USAGE: TokenUsage = TokenUsage {
    input_tokens: 100,
    output_tokens: 20,
};

/// Collects progress events in emission order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

struct Scripted {
    system: String,
    needle: Option<String>,
    response: Result<Value, StageError>,
}

/// Replays queued responses per system instruction. A response queued with a
/// needle is only handed to a request whose prompt contains it.
#[derive(Default)]
pub struct ScriptedGenerator {
    queue: Mutex<Vec<Scripted>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn push(&self, system: &str, response: Result<Value, StageError>) {
        self.enqueue(system, None, response);
    }

    pub fn push_for(&self, system: &str, needle: &str, response: Result<Value, StageError>) {
        self.enqueue(system, Some(needle.to_string()), response);
    }

    fn enqueue(&self, system: &str, needle: Option<String>, response: Result<Value, StageError>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push(Scripted {
                system: system.to_string(),
                needle,
                response,
            });
        }
    }

    pub fn requests(&self, system: &str) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|requests| {
                requests
                    .iter()
                    .filter(|request| request.system == system)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn calls(&self, system: &str) -> usize {
        self.requests(system).len()
    }

    pub fn temperatures(&self) -> Vec<f32> {
        self.requests
            .lock()
            .map(|requests| requests.iter().map(|request| request.temperature).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, StageError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let mut queue = self
            .queue
            .lock()
            .map_err(|_| StageError::unavailable("scripted", "queue poisoned"))?;
        let position = queue.iter().position(|scripted| {
            scripted.system == request.system
                && scripted
                    .needle
                    .as_deref()
                    .map_or(true, |needle| request.prompt.contains(needle))
        });

        match position {
            Some(position) => queue.remove(position).response.map(|value| Generation {
                value,
                usage: SCRIPTED_USAGE,
            }),
            None => Err(StageError::unavailable("scripted", "no response queued")),
        }
    }
}

/// Returns the same candidates for every query and serves raw documents by
/// identifier.
#[derive(Default)]
pub struct StaticLiterature {
    candidates: Vec<Candidate>,
    documents: HashMap<String, RawDocument>,
}

impl StaticLiterature {
    pub fn with_candidates(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            documents: HashMap::new(),
        }
    }

    pub fn with_document(mut self, identifier: &str, media_type: &str, text: &str) -> Self {
        self.documents.insert(
            identifier.to_string(),
            RawDocument {
                identifier: identifier.to_string(),
                media_type: media_type.to_string(),
                bytes: text.as_bytes().to_vec(),
            },
        );
        self
    }
}

#[async_trait]
impl LiteratureSearch for StaticLiterature {
    async fn search(&self, _query: &Query, max_results: usize) -> Result<Vec<Candidate>, StageError> {
        Ok(self.candidates.iter().take(max_results).cloned().collect())
    }

    async fn fetch_document(&self, candidate: &Candidate) -> Result<Option<RawDocument>, StageError> {
        Ok(self.documents.get(&candidate.identifier).cloned())
    }
}
