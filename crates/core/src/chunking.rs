use crate::embeddings::{cosine_similarity, Embedder};
use crate::extractor::StructuredText;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_200,
            overlap_chars: 120,
            min_chars: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub heading: String,
    pub text: String,
    pub position: usize,
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Paragraph-first packing: paragraphs are joined up to `max_chars`, and any
/// single paragraph longer than that is cut into overlapping windows.
pub fn chunk_by_paragraph(text: &str, config: ChunkingConfig) -> Vec<String> {
    let paragraphs = text
        .split("\n\n")
        .map(normalize_whitespace)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut packed = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if current.is_empty() {
            current = paragraph;
            continue;
        }

        if current.len() + paragraph.len() + 1 <= config.max_chars {
            current.push(' ');
            current.push_str(&paragraph);
        } else {
            packed.push(std::mem::take(&mut current));
            current = paragraph;
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }

    let mut chunks = Vec::new();
    for chunk in packed {
        let chars: Vec<char> = chunk.chars().collect();
        if chars.len() <= config.max_chars {
            chunks.push(chunk);
            continue;
        }

        let step = config.max_chars.saturating_sub(config.overlap_chars).max(1);
        let mut start = 0;
        while start < chars.len() {
            let end = (start + config.max_chars).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    let has_substantial = chunks.iter().any(|chunk| chunk.chars().count() >= config.min_chars);
    if has_substantial {
        chunks.retain(|chunk| chunk.chars().count() >= config.min_chars);
    }
    chunks
}

pub fn chunk_sections(text: &StructuredText, config: ChunkingConfig) -> Vec<Passage> {
    let mut passages = Vec::new();
    for section in &text.sections {
        for chunk in chunk_by_paragraph(&section.body, config) {
            passages.push(Passage {
                heading: section.heading.clone(),
                text: chunk,
                position: passages.len(),
            });
        }
    }
    passages
}

/// Top `limit` passages by similarity to `anchor`; ties keep document order,
/// and the selection is returned in document order.
pub fn select_passages<E: Embedder + ?Sized>(
    embedder: &E,
    anchor: &str,
    passages: &[Passage],
    limit: usize,
) -> Vec<Passage> {
    if limit == 0 || passages.is_empty() {
        return Vec::new();
    }

    let anchor_vector = embedder.embed(anchor);
    let mut scored = passages
        .iter()
        .map(|passage| (cosine_similarity(&anchor_vector, &embedder.embed(&passage.text)), passage))
        .collect::<Vec<_>>();

    scored.sort_by(|left, right| {
        right
            .0
            .total_cmp(&left.0)
            .then_with(|| left.1.position.cmp(&right.1.position))
    });

    let mut selected = scored
        .into_iter()
        .take(limit)
        .map(|(_, passage)| passage.clone())
        .collect::<Vec<_>>();
    selected.sort_by_key(|passage| passage.position);
    selected
}
