use super::{generate_structured, StageContext};
use crate::embeddings::Embedder;
use crate::error::{PipelineError, Stage, StageError};
use crate::models::{Candidate, Idea, PipelineConfig, Query, Relevance, SelectedPaper};
use crate::prompts::{ranker_prompt, RANKER_SYSTEM};
use crate::retry::call_with_policy;
use crate::schema::ranking_schema;
use crate::stores::InMemoryEvidenceStore;
use crate::traits::{EvidenceStore, Generator, LiteratureSearch};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Candidate pool entry; `order` is the position at which an identifier was
/// first retrieved.
#[derive(Debug, Clone)]
struct Pooled {
    candidate: Candidate,
    order: usize,
}

#[derive(Debug, Default)]
struct CandidatePool {
    entries: Vec<Pooled>,
    index: HashMap<String, usize>,
}

impl CandidatePool {
    /// Keeps the first-seen position and the highest similarity per identifier.
    fn merge(&mut self, candidate: Candidate) {
        match self.index.get(&candidate.identifier) {
            Some(&slot) => {
                let existing = &mut self.entries[slot].candidate;
                if candidate.similarity_score > existing.similarity_score {
                    existing.similarity_score = candidate.similarity_score;
                }
            }
            None => {
                let order = self.entries.len();
                self.index.insert(candidate.identifier.clone(), order);
                self.entries.push(Pooled { candidate, order });
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// The `limit` most similar candidates, in similarity order.
    fn bounded(mut self, limit: usize) -> Vec<Pooled> {
        self.entries.sort_by(|left, right| {
            right
                .candidate
                .similarity_score
                .total_cmp(&left.candidate.similarity_score)
                .then_with(|| left.order.cmp(&right.order))
        });
        self.entries.truncate(limit);
        self.entries
    }
}

#[derive(Debug, Deserialize)]
struct RankedSelection {
    identifier: String,
    relevance: Relevance,
    justification: String,
}

#[derive(Debug, Deserialize)]
struct Ranking {
    selections: Vec<RankedSelection>,
}

/// Applies a validated ranking to the pool: unknown and repeated identifiers
/// and `irrelevant` judgments are discarded, the rest ordered by relevance,
/// similarity, then retrieval order, and cut to `num_papers`.
fn interpret_ranking(
    value: Value,
    pool: &[Pooled],
    num_papers: usize,
) -> Result<Vec<SelectedPaper>, StageError> {
    let ranking: Ranking = serde_json::from_value(value)?;
    let by_id = pool
        .iter()
        .map(|pooled| (pooled.candidate.identifier.as_str(), pooled))
        .collect::<HashMap<_, _>>();

    let mut seen = HashSet::new();
    let mut accepted = Vec::new();
    for selection in ranking.selections {
        let Some(pooled) = by_id.get(selection.identifier.as_str()) else {
            debug!(identifier = %selection.identifier, "ranking named an unknown candidate");
            continue;
        };
        if selection.relevance == Relevance::Irrelevant || !seen.insert(selection.identifier.clone()) {
            continue;
        }
        accepted.push((*pooled, selection));
    }

    accepted.sort_by(|(left, left_sel), (right, right_sel)| {
        right_sel
            .relevance
            .cmp(&left_sel.relevance)
            .then_with(|| {
                right
                    .candidate
                    .similarity_score
                    .total_cmp(&left.candidate.similarity_score)
            })
            .then_with(|| left.order.cmp(&right.order))
    });

    Ok(accepted
        .into_iter()
        .take(num_papers)
        .enumerate()
        .map(|(position, (pooled, selection))| SelectedPaper {
            candidate: pooled.candidate.clone(),
            relevance_rank: position as u32 + 1,
            relevance: selection.relevance,
            relevance_justification: selection.justification.trim().to_string(),
        })
        .collect())
}

/// Collaborators the curator retrieves through. `store` is the caller's
/// persistent evidence corpus and is only queried; candidates fetched during
/// a run are indexed into a run-local index that is dropped with the run.
pub struct Retrieval<'r, L: ?Sized, S: ?Sized, E: ?Sized> {
    pub literature: &'r L,
    pub store: &'r S,
    pub embedder: &'r E,
}

fn run_index_error(source: StageError) -> PipelineError {
    PipelineError::Stage {
        stage: Stage::Retrieval,
        attempts: 1,
        source,
    }
}

async fn retrieve<L, S, E>(
    retrieval: &Retrieval<'_, L, S, E>,
    queries: &[Query],
    config: &PipelineConfig,
    context: &StageContext<'_>,
) -> Result<CandidatePool, PipelineError>
where
    L: LiteratureSearch + ?Sized + Sync,
    S: EvidenceStore + ?Sized + Sync,
    E: Embedder + ?Sized + Sync,
{
    let mut pool = CandidatePool::default();
    let policy = &context.policy;
    let cancel = context.cancel;
    let run_index = InMemoryEvidenceStore::new(retrieval.embedder);

    for query in queries {
        let fetched = call_with_policy(Stage::Retrieval, policy, cancel, || {
            retrieval.literature.search(query, config.results_per_query)
        })
        .await?;

        for candidate in &fetched {
            run_index
                .embed_and_index(&candidate.document())
                .await
                .map_err(run_index_error)?;
        }

        let embedding = retrieval.embedder.embed(&query.text());
        let run_hits = run_index
            .query(&embedding, config.store_top_n)
            .await
            .map_err(run_index_error)?;
        let corpus_hits = call_with_policy(Stage::Retrieval, policy, cancel, || {
            retrieval.store.query(&embedding, config.store_top_n)
        })
        .await?;

        let scores = run_hits
            .iter()
            .map(|hit| (hit.document_id.as_str(), hit.similarity_score))
            .collect::<HashMap<_, _>>();

        debug!(
            query = %query.text(),
            fetched = fetched.len(),
            run_hits = run_hits.len(),
            corpus_hits = corpus_hits.len(),
            "retrieved candidates"
        );

        for candidate in fetched {
            let score = scores.get(candidate.identifier.as_str()).copied().unwrap_or(0.0);
            pool.merge(Candidate::from_document(candidate.document(), score));
        }
        for hit in run_hits.into_iter().chain(corpus_hits) {
            if let Some(candidate) = hit.into_candidate() {
                pool.merge(candidate);
            }
        }
    }

    Ok(pool)
}

/// Retrieves, deduplicates and ranks candidates for the planned queries.
/// No candidates is a valid outcome and yields an empty selection.
pub async fn curate<G, L, S, E>(
    generator: &G,
    retrieval: &Retrieval<'_, L, S, E>,
    idea: &Idea,
    queries: &[Query],
    config: &PipelineConfig,
    context: &StageContext<'_>,
) -> Result<Vec<SelectedPaper>, PipelineError>
where
    G: Generator + ?Sized,
    L: LiteratureSearch + ?Sized + Sync,
    S: EvidenceStore + ?Sized + Sync,
    E: Embedder + ?Sized + Sync,
{
    context.started(Stage::Retrieval);
    let pool = retrieve(retrieval, queries, config, context).await?;
    context.finished(Stage::Retrieval);
    let deduplicated = pool.len();
    if deduplicated == 0 {
        info!("retrieval found no candidates");
        return Ok(Vec::new());
    }

    context.started(Stage::Ranking);
    let pool = pool.bounded(config.candidate_pool_size);
    let candidates = pool.iter().map(|pooled| pooled.candidate.clone()).collect::<Vec<_>>();
    let request = context.request(
        RANKER_SYSTEM,
        ranker_prompt(idea, &candidates, config.num_papers),
        ranking_schema(pool.len()),
    );

    let selected = generate_structured(generator, Stage::Ranking, context, &request, |value| {
        interpret_ranking(value, &pool, config.num_papers)
    })
    .await?;
    context.finished(Stage::Ranking);

    info!(
        deduplicated,
        pooled = pool.len(),
        selected = selected.len(),
        "candidates curated"
    );
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::InMemoryEvidenceStore;
    use crate::testing::{candidate, context_with, ScriptedGenerator, StaticLiterature};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn pooled(identifier: &str, similarity: f64, order: usize) -> Pooled {
        let mut candidate = candidate(identifier, "Title", "Abstract");
        candidate.similarity_score = similarity;
        Pooled { candidate, order }
    }

    #[test]
    fn duplicates_keep_highest_similarity_and_first_position() {
        let mut pool = CandidatePool::default();
        let mut first = candidate("a", "A", "x");
        first.similarity_score = 0.3;
        let mut second = candidate("b", "B", "y");
        second.similarity_score = 0.5;
        let mut again = candidate("a", "A", "x");
        again.similarity_score = 0.9;

        pool.merge(first);
        pool.merge(second);
        pool.merge(again);

        assert_eq!(pool.len(), 2);
        let bounded = pool.bounded(1);
        assert_eq!(bounded[0].candidate.identifier, "a");
        assert_eq!(bounded[0].order, 0);
        assert_eq!(bounded[0].candidate.similarity_score, 0.9);
    }

    #[test]
    fn ranking_orders_by_relevance_then_similarity_then_retrieval() {
        let pool = vec![pooled("a", 0.4, 0), pooled("b", 0.8, 1), pooled("c", 0.8, 2), pooled("d", 0.9, 3)];
        let value = json!({
            "selections": [
                { "identifier": "c", "relevance": "medium", "justification": "partial" },
                { "identifier": "a", "relevance": "high", "justification": "same task" },
                { "identifier": "b", "relevance": "medium", "justification": "partial" },
                { "identifier": "ghost", "relevance": "high", "justification": "made up" },
                { "identifier": "d", "relevance": "irrelevant", "justification": "unrelated" },
                { "identifier": "a", "relevance": "low", "justification": "repeat" }
            ]
        });

        let selected = interpret_ranking(value, &pool, 5).expect("ranking interprets");
        let ids = selected.iter().map(SelectedPaper::paper_id).collect::<Vec<_>>();
        let ranks = selected.iter().map(|paper| paper.relevance_rank).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn ranking_is_cut_to_num_papers() {
        let pool = (0..4).map(|i| pooled(&format!("p{i}"), 0.5, i)).collect::<Vec<_>>();
        let selections = pool
            .iter()
            .map(|p| json!({ "identifier": p.candidate.identifier, "relevance": "high", "justification": "" }))
            .collect::<Vec<_>>();

        let selected = interpret_ranking(json!({ "selections": selections }), &pool, 2)
            .expect("ranking interprets");
        assert_eq!(selected.len(), 2);
    }

    #[tokio::test]
    async fn zero_candidates_skip_ranking() {
        let generator = ScriptedGenerator::default();
        let literature = StaticLiterature::default();
        let store = InMemoryEvidenceStore::default();
        let embedder = CharacterNgramEmbedder::default();
        let retrieval = Retrieval {
            literature: &literature,
            store: &store,
            embedder: &embedder,
        };
        let cancel = CancellationToken::new();
        let idea = Idea::new("Quantum origami for bees.").expect("valid idea");
        let queries = vec![Query {
            terms: vec!["quantum origami".to_string()],
            filters: Default::default(),
        }];

        let selected = curate(
            &generator,
            &retrieval,
            &idea,
            &queries,
            &PipelineConfig::default(),
            &context_with(&cancel, 2),
        )
        .await
        .expect("no evidence is not an error");

        assert!(selected.is_empty());
        assert_eq!(generator.calls(RANKER_SYSTEM), 0);
    }

    #[tokio::test]
    async fn pool_is_bounded_before_ranking() {
        let generator = ScriptedGenerator::default();
        generator.push(RANKER_SYSTEM, Ok(json!({ "selections": [] })));

        let literature = StaticLiterature::with_candidates(
            (0..6)
                .map(|i| candidate(&format!("2401.0000{i}"), &format!("Shelf detection {i}"), "Retail shelf product detection."))
                .collect(),
        );
        let store = InMemoryEvidenceStore::default();
        let embedder = CharacterNgramEmbedder::default();
        let retrieval = Retrieval {
            literature: &literature,
            store: &store,
            embedder: &embedder,
        };
        let config = PipelineConfig {
            candidate_pool_size: 3,
            ..PipelineConfig::default()
        };
        let cancel = CancellationToken::new();
        let idea = Idea::new("Shelf monitoring.").expect("valid idea");
        let queries = vec![Query {
            terms: vec!["retail shelf detection".to_string()],
            filters: Default::default(),
        }];

        let selected = curate(&generator, &retrieval, &idea, &queries, &config, &context_with(&cancel, 0))
            .await
            .expect("curation succeeds");

        assert!(selected.is_empty());
        let requests = generator.requests(RANKER_SYSTEM);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].schema["properties"]["selections"]["maxItems"], 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn corpus_documents_join_the_pool() {
        let generator = ScriptedGenerator::default();
        generator.push(RANKER_SYSTEM, Ok(json!({ "selections": [] })));
        let literature = StaticLiterature::default();
        let store = InMemoryEvidenceStore::default();
        store
            .embed_and_index(&candidate("corpus-1", "Shelf audits", "Retail shelf audits with cameras.").document())
            .await
            .expect("indexing succeeds");
        let embedder = CharacterNgramEmbedder::default();
        let retrieval = Retrieval {
            literature: &literature,
            store: &store,
            embedder: &embedder,
        };
        let cancel = CancellationToken::new();
        let idea = Idea::new("Shelf monitoring.").expect("valid idea");
        let queries = vec![Query {
            terms: vec!["retail shelf audits".to_string()],
            filters: Default::default(),
        }];

        curate(&generator, &retrieval, &idea, &queries, &PipelineConfig::default(), &context_with(&cancel, 0))
            .await
            .expect("curation succeeds");

        let requests = generator.requests(RANKER_SYSTEM);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].prompt.contains("corpus-1"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn papers_fetched_for_one_run_do_not_reach_the_next() {
        let generator = ScriptedGenerator::default();
        generator.push(RANKER_SYSTEM, Ok(json!({ "selections": [] })));
        generator.push(RANKER_SYSTEM, Ok(json!({ "selections": [] })));
        let store = InMemoryEvidenceStore::default();
        let embedder = CharacterNgramEmbedder::default();
        let cancel = CancellationToken::new();
        let queries = vec![Query {
            terms: vec!["retail shelf detection".to_string()],
            filters: Default::default(),
        }];

        let first_literature = StaticLiterature::with_candidates(vec![candidate(
            "2401.11111",
            "Shelf detection",
            "Retail shelf product detection.",
        )]);
        let first = Retrieval {
            literature: &first_literature,
            store: &store,
            embedder: &embedder,
        };
        let idea = Idea::new("Shelf monitoring.").expect("valid idea");
        curate(&generator, &first, &idea, &queries, &PipelineConfig::default(), &context_with(&cancel, 0))
            .await
            .expect("first curation succeeds");

        let second_literature = StaticLiterature::with_candidates(vec![candidate(
            "2402.22222",
            "Shelf gap detection",
            "Retail shelf gap detection.",
        )]);
        let second = Retrieval {
            literature: &second_literature,
            store: &store,
            embedder: &embedder,
        };
        curate(&generator, &second, &idea, &queries, &PipelineConfig::default(), &context_with(&cancel, 0))
            .await
            .expect("second curation succeeds");

        let requests = generator.requests(RANKER_SYSTEM);
        assert_eq!(requests.len(), 2);
        assert!(requests[0].prompt.contains("2401.11111"));
        assert!(requests[1].prompt.contains("2402.22222"));
        assert!(!requests[1].prompt.contains("2401.11111"));
    }
}
