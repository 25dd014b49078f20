use crate::error::GroundingViolation;
use crate::models::Severity;
use std::collections::HashSet;

/// Share of an excerpt's word bigrams that must occur in the source when the
/// excerpt is not a verbatim substring (PDF extraction mangles hyphenation
/// and line breaks).
pub const MIN_BIGRAM_COVERAGE: f64 = 0.9;

/// Lowercased alphanumeric words; punctuation and whitespace runs become a
/// single separator.
fn words(text: &str) -> Vec<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn bigrams(words: &[String]) -> Vec<(&str, &str)> {
    words
        .windows(2)
        .map(|pair| (pair[0].as_str(), pair[1].as_str()))
        .collect()
}

/// Checks that `excerpt` can be found in `source`. An empty excerpt cites
/// nothing and passes here; whether citing nothing is acceptable depends on
/// the claim, see [`check_finding`].
pub fn check_grounding(paper_id: &str, excerpt: &str, source: &str) -> Result<(), GroundingViolation> {
    let excerpt_words = words(excerpt);
    if excerpt_words.is_empty() {
        return Ok(());
    }

    let source_words = words(source);
    let violation = || GroundingViolation {
        paper_id: paper_id.to_string(),
        excerpt: excerpt.to_string(),
    };

    let needle = excerpt_words.join(" ");
    let haystack = format!(" {} ", source_words.join(" "));
    if haystack.contains(&format!(" {needle} ")) {
        return Ok(());
    }

    let excerpt_bigrams = bigrams(&excerpt_words);
    if excerpt_bigrams.is_empty() {
        return Err(violation());
    }

    let source_bigrams = bigrams(&source_words).into_iter().collect::<HashSet<_>>();
    let covered = excerpt_bigrams
        .iter()
        .filter(|bigram| source_bigrams.contains(*bigram))
        .count();

    if covered as f64 / excerpt_bigrams.len() as f64 >= MIN_BIGRAM_COVERAGE {
        Ok(())
    } else {
        Err(violation())
    }
}

/// Grounding rule for a whole finding: any overlap above `none` must cite an
/// excerpt, and that excerpt must be found in `source`.
pub fn check_finding(
    paper_id: &str,
    severity: Severity,
    excerpt: &str,
    source: &str,
) -> Result<(), GroundingViolation> {
    if severity > Severity::None && words(excerpt).is_empty() {
        return Err(GroundingViolation {
            paper_id: paper_id.to_string(),
            excerpt: excerpt.to_string(),
        });
    }
    check_grounding(paper_id, excerpt, source)
}
