//! Canonical production identifiers
//!
//! Ids follow `{TOPIC}-{SUBTOPIC}-{D}-{T}-{NNN}`: a topic abbreviation (at
//! most 10 chars), a subtopic code (at most 8), the difficulty initial, a
//! single-letter type code, and a zero-padded per-group sequence. Sequence
//! assignment lives in the importer; this module only derives the base.

const MAX_TOPIC_CODE: usize = 10;
const MAX_SUBTOPIC_CODE: usize = 8;

const STOPWORDS: &[&str] = &["the", "and", "of", "for", "to", "in", "on", "at", "by"];

/// Base id without the sequence suffix, e.g. `DCF-WACC-B-G`
pub fn canonical_base(topic: &str, subtopic: &str, difficulty: &str, qtype: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        topic_code(topic),
        subtopic_code(subtopic),
        difficulty_code(difficulty),
        type_code(qtype)
    )
}

/// Full canonical id with a three-digit (wider if needed) sequence
pub fn canonical_id(base: &str, sequence: u32) -> String {
    format!("{}-{:03}", base, sequence)
}

/// Topic abbreviation: a parenthetical alias when one fits, otherwise
/// initials of the significant words (single significant word truncates).
pub fn topic_code(topic: &str) -> String {
    if let Some(alias) = parenthetical_alias(topic) {
        return alias;
    }

    let cleaned = strip_parentheticals(topic);
    let words: Vec<&str> = cleaned
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let significant: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.to_lowercase().as_str()))
        .collect();
    let words = if significant.is_empty() {
        words
    } else {
        significant
    };

    if words.is_empty() {
        return "GEN".to_string();
    }
    if words.len() == 1 {
        return truncate_upper(words[0], MAX_TOPIC_CODE);
    }

    let initials: String = words
        .iter()
        .take(4)
        .filter_map(|w| w.chars().next())
        .flat_map(|c| c.to_uppercase())
        .collect();
    if initials.chars().count() < 3 {
        return truncate_upper(words[0], 4.min(MAX_TOPIC_CODE));
    }
    initials.chars().take(MAX_TOPIC_CODE).collect()
}

/// Subtopic code: single word as-is, else the first embedded all-caps
/// abbreviation, else word initials, else first-word-plus-initials.
pub fn subtopic_code(subtopic: &str) -> String {
    let words: Vec<&str> = subtopic
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    if words.is_empty() {
        return "UNKNOWN".to_string();
    }
    if words.len() == 1 {
        return truncate_upper(words[0], MAX_SUBTOPIC_CODE);
    }

    if let Some(abbrev) = words
        .iter()
        .find(|w| w.len() > 1 && w.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()))
    {
        return abbrev.chars().take(MAX_SUBTOPIC_CODE).collect();
    }

    let initials: String = words
        .iter()
        .filter_map(|w| w.chars().next())
        .flat_map(|c| c.to_uppercase())
        .collect();
    if initials.chars().count() <= MAX_SUBTOPIC_CODE {
        return initials;
    }

    if words[0].chars().count() <= 4 {
        let rest: String = words[1..]
            .iter()
            .filter_map(|w| w.chars().next())
            .flat_map(|c| c.to_uppercase())
            .collect();
        let combined = format!("{}{}", words[0].to_uppercase(), rest);
        return combined.chars().take(MAX_SUBTOPIC_CODE).collect();
    }

    truncate_upper(words[0], MAX_SUBTOPIC_CODE)
}

fn difficulty_code(difficulty: &str) -> char {
    match difficulty.chars().next() {
        Some(c) => c.to_ascii_uppercase(),
        None => 'B',
    }
}

fn type_code(qtype: &str) -> char {
    match qtype {
        "GenConcept" => 'G',
        "Problem" => 'P',
        "Definition" => 'D',
        "Calculation" => 'C',
        "Analysis" => 'A',
        "Question" => 'Q',
        _ => 'G',
    }
}

fn parenthetical_alias(topic: &str) -> Option<String> {
    let start = topic.find('(')?;
    let rest = &topic[start + 1..];
    let end = rest.find(')')?;
    let alias: String = rest[..end]
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_uppercase())
        .collect();
    let len = alias.chars().count();
    if len == 0 || len > MAX_TOPIC_CODE {
        return None;
    }
    Some(alias)
}

fn strip_parentheticals(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len());
    let mut depth = 0usize;
    for c in topic.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn truncate_upper(word: &str, max: usize) -> String {
    word.chars().take(max).flat_map(|c| c.to_uppercase()).collect()
}
