//! System instructions and prompt builders for the four judgment stages.
//! Each stage is identified by its system instruction.

use crate::chunking::Passage;
use crate::models::{Candidate, Finding, Idea};
use serde_json::json;

pub const PLANNER_SYSTEM: &str = r#"You are an academic search specialist preparing an arXiv literature review.

Decompose the research idea into orthogonal search facets:
- "problem": the research problem or task being addressed
- "method": the proposed technique, model family or architecture
- "domain": the application area
- "broad": the general research field the idea belongs to

Rules:
- Translate the idea into established academic terminology used in paper titles and abstracts. Do not copy phrases from the idea verbatim.
- Each query has 1 to 4 terms; each term is 1 to 4 words.
- Do not repeat a facet with near-identical terms.
- Put broader queries first.
- Only add filters when the idea names a specific arXiv category or time frame.

Return JSON only, matching the response schema."#;

pub const RANKER_SYSTEM: &str = r#"You are a research paper relevance selector.

Judge each candidate paper against the user's research idea:
- "high": shares the core problem and approach
- "medium": shares the problem or the approach, not both
- "low": related field only
- "irrelevant": no meaningful conceptual overlap

Prioritize conceptual alignment over superficial keyword matches. Use only identifiers from the candidate list. Give a one-sentence justification per selection, ordered from most to least relevant.

Return JSON only, matching the response schema."#;

pub const ASSESSOR_SYSTEM: &str = r#"You are an academic originality assessor, similar to a grant reviewer.

You receive a user's research idea and the content of ONE paper. Judge only this paper; do not speculate about other work.

Report which dimensions overlap:
- "problem": same research problem or question
- "methodology": same technique or approach
- "domain": same application domain
- "innovation_claim": the paper already claims the contribution the idea claims

Pick one severity:
- "none": no meaningful overlap
- "low": related but clearly distinct
- "medium": substantial overlap on some dimensions
- "high": the paper largely anticipates the idea

"cited_excerpt" must be copied verbatim from the paper content you were given (a sentence or phrase that shows the overlap). Use an empty string when severity is "none".

Return JSON only, matching the response schema."#;

pub const SYNTHESIZER_SYSTEM: &str = r#"You are a research originality summarizer.

You receive the numbered sentences of a research idea and independent per-paper findings. For each sentence that overlaps with a finding, emit a label:
- "low": a paper already covers what the sentence proposes
- "medium": partial overlap
- "high": overlap is marginal

Cite the supporting paper identifiers for every label, using only identifiers that appear in the findings. Skip sentences with no overlap. Finish with a 1-2 sentence overall rationale naming the main areas of overlap and of originality.

Return JSON only, matching the response schema."#;

pub const GROUNDING_RETRY_NOTE: &str = "Your previous cited_excerpt does not appear in the paper content. Quote the paper exactly, or use an empty string.";

const CANDIDATE_ABSTRACT_CHARS: usize = 1_200;

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

pub fn planner_prompt(idea: &Idea, max_queries: usize) -> String {
    format!(
        "Research idea:\n{}\n\nProduce at most {max_queries} queries.",
        idea.text()
    )
}

pub fn ranker_prompt(idea: &Idea, pool: &[Candidate], max_selections: usize) -> String {
    let candidates = pool
        .iter()
        .map(|candidate| {
            json!({
                "identifier": candidate.identifier,
                "title": candidate.title,
                "abstract": clip(&candidate.abstract_text, CANDIDATE_ABSTRACT_CHARS),
                "published": candidate.publication_date.map(|date| date.to_string()),
            })
        })
        .collect::<Vec<_>>();

    format!(
        "Research idea:\n{}\n\nCandidates:\n{}\n\nSelect at most {max_selections} papers.",
        idea.text(),
        serde_json::Value::Array(candidates)
    )
}

pub fn assessor_prompt(idea: &Idea, candidate: &Candidate, passages: &[Passage]) -> String {
    let mut prompt = format!(
        "Research idea:\n{}\n\nPaper identifier: {}\nTitle: {}\n\nAbstract:\n{}\n",
        idea.text(),
        candidate.identifier,
        candidate.title,
        candidate.abstract_text
    );

    for passage in passages {
        prompt.push_str(&format!("\n[{}]\n{}\n", passage.heading, passage.text));
    }
    prompt
}

pub fn synthesizer_prompt(sentences: &[String], findings: &[Finding]) -> String {
    let numbered = sentences
        .iter()
        .enumerate()
        .map(|(index, sentence)| format!("{index}: {sentence}"))
        .collect::<Vec<_>>()
        .join("\n");

    let findings = serde_json::to_string_pretty(findings).unwrap_or_else(|_| "[]".to_string());

    format!("Idea sentences:\n{numbered}\n\nFindings:\n{findings}")
}
