//! Sentence boundary detection.
//!
//! English-oriented rule: a sentence ends at a run of terminal punctuation
//! (`.`, `!`, `?`) followed by whitespace. Unterminated trailing text is its
//! own sentence. No abbreviation dictionary; over-splitting is harmless to
//! the chunker because overlap is sentence-based.

/// Split text into trimmed, non-empty sentences.
#[must_use]
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut after_terminal = false;

    for ch in text.chars() {
        if ch.is_whitespace() && after_terminal {
            push_sentence(&mut sentences, &mut current);
            after_terminal = false;
            continue;
        }
        if !ch.is_whitespace() {
            after_terminal = matches!(ch, '.' | '!' | '?');
        }
        current.push(ch);
    }
    push_sentence(&mut sentences, &mut current);

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}
