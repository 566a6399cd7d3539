//! Trigram text similarity
//!
//! Word-padded trigram sets compared with the Sørensen–Dice coefficient.
//! Each lowercased word is padded with two leading spaces and one trailing
//! space before its 3-grams are collected, so word boundaries weigh in and
//! single-character words still contribute a trigram.

use std::collections::HashSet;

/// Precomputed trigram set for one text
#[derive(Debug, Clone, Default)]
pub struct TrigramSet {
    grams: HashSet<[char; 3]>,
}

impl TrigramSet {
    pub fn new(text: &str) -> Self {
        let mut grams = HashSet::new();
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let padded: Vec<char> = std::iter::repeat(' ')
                .take(2)
                .chain(word.chars())
                .chain(std::iter::once(' '))
                .collect();
            for window in padded.windows(3) {
                grams.insert([window[0], window[1], window[2]]);
            }
        }
        Self { grams }
    }

    pub fn is_empty(&self) -> bool {
        self.grams.is_empty()
    }

    /// Dice coefficient against another set: 2|A∩B| / (|A|+|B|).
    /// Two empty sets count as identical.
    pub fn dice(&self, other: &TrigramSet) -> f64 {
        if self.grams.is_empty() && other.grams.is_empty() {
            return 1.0;
        }
        if self.grams.is_empty() || other.grams.is_empty() {
            return 0.0;
        }
        let shared = self.grams.intersection(&other.grams).count();
        (2 * shared) as f64 / (self.grams.len() + other.grams.len()) as f64
    }
}

/// Similarity of two texts in [0, 1]
pub fn score(a: &str, b: &str) -> f64 {
    TrigramSet::new(a).dice(&TrigramSet::new(b))
}
