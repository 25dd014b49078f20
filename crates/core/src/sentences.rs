const ABBREVIATIONS: [&str; 8] = ["e.g.", "i.e.", "et al.", "vs.", "etc.", "cf.", "fig.", "eq."];

/// Splits idea text into sentences. A boundary is `.`, `!` or `?` followed by
/// whitespace and an uppercase letter or digit. Every non-empty sentence is
/// kept so that indices stay aligned with the submitted text.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        current.push(ch);

        if matches!(ch, '.' | '!' | '?') && is_boundary(&chars, index) && !ends_with_abbreviation(&current) {
            push_sentence(&mut sentences, &current);
            current.clear();
        }
        index += 1;
    }
    push_sentence(&mut sentences, &current);

    sentences
}

fn is_boundary(chars: &[char], index: usize) -> bool {
    let mut cursor = index + 1;
    if cursor >= chars.len() || !chars[cursor].is_whitespace() {
        return false;
    }
    while cursor < chars.len() && chars[cursor].is_whitespace() {
        cursor += 1;
    }
    chars
        .get(cursor)
        .is_some_and(|next| next.is_uppercase() || next.is_ascii_digit())
}

fn ends_with_abbreviation(current: &str) -> bool {
    let lowered = current.to_lowercase();
    ABBREVIATIONS.iter().any(|abbreviation| {
        lowered.ends_with(abbreviation)
            && lowered[..lowered.len() - abbreviation.len()]
                .chars()
                .last()
                .map_or(true, |before| !before.is_alphanumeric())
    })
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let sentence = crate::chunking::normalize_whitespace(raw);
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
}

#[cfg(test)]
mod tests {
    use super::split_sentences;

    #[test]
    fn splits_on_terminal_punctuation_before_capitals() {
        let sentences = split_sentences(
            "We detect products on shelves. The detector is YOLO-based! Does it scale? 3 stores tested.",
        );
        assert_eq!(
            sentences,
            vec![
                "We detect products on shelves.",
                "The detector is YOLO-based!",
                "Does it scale?",
                "3 stores tested.",
            ]
        );
    }

    #[test]
    fn does_not_split_decimals_or_lowercase_continuations() {
        let sentences = split_sentences("Accuracy rose to 0.93 on v1.2 data. results improved.");
        assert_eq!(sentences.len(), 1);
    }

    #[test]
    fn abbreviations_are_not_boundaries() {
        let sentences = split_sentences("Prior work, e.g. Smith et al. Uses graphs. Ours does not.");
        assert_eq!(
            sentences,
            vec!["Prior work, e.g. Smith et al. Uses graphs.", "Ours does not."]
        );
    }

    #[test]
    fn single_unterminated_sentence_is_kept() {
        assert_eq!(split_sentences("  federated learning for annotation "), vec!["federated learning for annotation"]);
        assert!(split_sentences("   ").is_empty());
    }
}
