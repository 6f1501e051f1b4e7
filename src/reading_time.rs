//! Estimates how long a post takes to read from the words in its content.

use crate::post::{PostDetail, Section};

/// The assumed reading speed.
pub const WORDS_PER_MINUTE: usize = 200;

/// Counts the whitespace-delimited tokens in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Sums the words of every section heading and every body block.
pub fn total_words(content: &[Section]) -> usize {
    content
        .iter()
        .map(|section| {
            word_count(&section.heading)
                + section
                    .body
                    .iter()
                    .map(|block| word_count(&block.text))
                    .sum::<usize>()
        })
        .sum()
}

/// Returns the estimated reading time in whole minutes, rounded up.
pub fn estimate_minutes(content: &[Section]) -> usize {
    let words = total_words(content);
    (words + WORDS_PER_MINUTE - 1) / WORDS_PER_MINUTE
}

impl PostDetail {
    /// The estimated reading time in minutes. Always derived from the
    /// current content.
    pub fn reading_time(&self) -> usize {
        estimate_minutes(&self.content)
    }
}
