use super::{generate_structured, StageContext};
use crate::chunking::normalize_whitespace;
use crate::error::{PipelineError, Stage, StageError};
use crate::models::{Idea, Query, QueryFilters};
use crate::prompts::{planner_prompt, PLANNER_SYSTEM};
use crate::schema::query_plan_schema;
use crate::traits::Generator;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
enum Facet {
    Broad,
    Problem,
    Method,
    Domain,
}

#[derive(Debug, Deserialize)]
struct PlannedQuery {
    facet: Facet,
    terms: Vec<String>,
    #[serde(default)]
    filters: Option<QueryFilters>,
}

#[derive(Debug, Deserialize)]
struct QueryPlan {
    queries: Vec<PlannedQuery>,
}

fn clean_filters(filters: Option<QueryFilters>) -> QueryFilters {
    let nonblank = |value: Option<String>| {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    let filters = filters.unwrap_or_default();
    QueryFilters {
        category: nonblank(filters.category),
        published_after: nonblank(filters.published_after),
    }
}

/// Turns a validated plan into the ordered query list: blank terms dropped,
/// near-duplicates removed, broad facets first, at most `max_queries`.
fn interpret_plan(value: Value, max_queries: usize) -> Result<Vec<Query>, StageError> {
    let plan: QueryPlan = serde_json::from_value(value)?;

    let mut planned = plan
        .queries
        .into_iter()
        .filter_map(|query| {
            let terms = query
                .terms
                .iter()
                .map(|term| normalize_whitespace(term))
                .filter(|term| !term.is_empty())
                .collect::<Vec<_>>();
            (!terms.is_empty()).then(|| {
                (
                    query.facet,
                    Query {
                        terms,
                        filters: clean_filters(query.filters),
                    },
                )
            })
        })
        .collect::<Vec<_>>();

    let mut seen = HashSet::new();
    planned.retain(|(_, query)| seen.insert(query.fingerprint()));
    planned.sort_by_key(|(facet, _)| *facet);

    let queries = planned
        .into_iter()
        .map(|(_, query)| query)
        .take(max_queries)
        .collect::<Vec<_>>();

    if queries.is_empty() {
        return Err(StageError::Schema("query plan contained no usable query".to_string()));
    }
    Ok(queries)
}

pub async fn plan<G>(
    generator: &G,
    idea: &Idea,
    max_queries: usize,
    context: &StageContext<'_>,
) -> Result<Vec<Query>, PipelineError>
where
    G: Generator + ?Sized,
{
    let request = context.request(
        PLANNER_SYSTEM,
        planner_prompt(idea, max_queries),
        query_plan_schema(max_queries),
    );

    let queries = generate_structured(generator, Stage::Planning, context, &request, |value| {
        interpret_plan(value, max_queries)
    })
    .await?;

    info!(
        queries = queries.len(),
        first = %queries.first().map(Query::text).unwrap_or_default(),
        "query plan ready"
    );
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, ScriptedGenerator};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn plan_is_deduplicated_and_broad_first() {
        let value = json!({
            "queries": [
                { "facet": "method", "terms": ["YOLO", "single-stage detector"] },
                { "facet": "domain", "terms": ["retail shelf", "inventory monitoring"] },
                { "facet": "method", "terms": ["single-stage  detector", "yolo"] },
                { "facet": "broad", "terms": ["object detection"] },
                { "facet": "problem", "terms": ["  ", ""] }
            ]
        });

        let queries = interpret_plan(value, 5).expect("plan interprets");
        let texts = queries.iter().map(Query::text).collect::<Vec<_>>();
        assert_eq!(
            texts,
            vec![
                "object detection",
                "YOLO single-stage detector",
                "retail shelf inventory monitoring"
            ]
        );
    }

    #[test]
    fn blank_filters_are_dropped() {
        let value = json!({
            "queries": [{
                "facet": "broad",
                "terms": ["federated learning"],
                "filters": { "category": " cs.LG ", "published_after": "" }
            }]
        });
        let queries = interpret_plan(value, 5).expect("plan interprets");
        assert_eq!(queries[0].filters.category.as_deref(), Some("cs.LG"));
        assert_eq!(queries[0].filters.published_after, None);
    }

    #[tokio::test]
    async fn unusable_plan_is_retried_then_fatal() {
        let generator = ScriptedGenerator::default();
        let empty = json!({ "queries": [{ "facet": "broad", "terms": [" "] }] });
        for _ in 0..3 {
            generator.push(PLANNER_SYSTEM, Ok(empty.clone()));
        }

        let cancel = CancellationToken::new();
        let idea = Idea::new("Edge inference for drones.").expect("valid idea");
        let result = plan(&generator, &idea, 5, &context_with(&cancel, 2)).await;

        match result {
            Err(PipelineError::Stage { stage, attempts, source }) => {
                assert_eq!(stage, Stage::Planning);
                assert_eq!(attempts, 3);
                assert!(matches!(source, StageError::Schema(_)));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(generator.calls(PLANNER_SYSTEM), 3);
    }

    #[tokio::test]
    async fn free_text_then_valid_plan_succeeds() {
        let generator = ScriptedGenerator::default();
        generator.push(PLANNER_SYSTEM, Ok(json!("object detection, retail")));
        generator.push(
            PLANNER_SYSTEM,
            Ok(json!({ "queries": [{ "facet": "problem", "terms": ["shelf auditing"] }] })),
        );

        let cancel = CancellationToken::new();
        let idea = Idea::new("Detect empty shelves.").expect("valid idea");
        let queries = plan(&generator, &idea, 5, &context_with(&cancel, 2))
            .await
            .expect("second attempt is valid");

        assert_eq!(queries.len(), 1);
        assert_eq!(generator.temperatures(), vec![0.0, 0.0]);
    }
}
