// src/matching/ngram.rs

use std::collections::{HashMap, HashSet};

use crate::matching::UNCERTAIN;

/// Scan-scoped inverted index for one n-gram field group: n-gram to
/// posting list of record indices, plus each record's n-gram set size.
/// Owned by the orchestrator and rebuilt fresh for every run; it must
/// never outlive the scan that built it.
#[derive(Debug, Default)]
pub struct NGramIndex {
    postings: HashMap<String, Vec<usize>>,
    set_sizes: Vec<usize>,
}

impl NGramIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, rec_idx: usize, ngrams: &HashSet<String>) {
        if self.set_sizes.len() <= rec_idx {
            self.set_sizes.resize(rec_idx + 1, 0);
        }
        self.set_sizes[rec_idx] = ngrams.len();
        for gram in ngrams {
            self.postings.entry(gram.clone()).or_default().push(rec_idx);
        }
    }

    fn set_size(&self, rec_idx: usize) -> usize {
        self.set_sizes.get(rec_idx).copied().unwrap_or(0)
    }
}

/// Per-record n-gram matcher state. The n-gram set only lives until
/// `prescan` has mined it for candidates; the memoized Dice ratios and
/// the set size survive for the compare phase.
#[derive(Debug)]
pub struct NGramState {
    ngrams: Option<HashSet<String>>,
    ngram_count: usize,
    matches: HashMap<usize, f64>,
}

impl NGramState {
    /// Tokenizes the configured field values: uppercase, split on
    /// whitespace, skip the literal `UNKNOWN` token, pad each word with
    /// one leading and trailing space, and collect every overlapping
    /// window of `n` characters into a set.
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a str>, n: usize) -> Self {
        let mut ngrams = HashSet::new();
        for value in values {
            for word in value.to_uppercase().split_whitespace() {
                if word == "UNKNOWN" {
                    continue;
                }
                let padded: Vec<char> = std::iter::once(' ')
                    .chain(word.chars())
                    .chain(std::iter::once(' '))
                    .collect();
                if n == 0 || padded.len() < n {
                    continue;
                }
                for window in padded.windows(n) {
                    ngrams.insert(window.iter().collect::<String>());
                }
            }
        }
        let ngram_count = ngrams.len();
        Self {
            ngrams: Some(ngrams),
            ngram_count,
            matches: HashMap::new(),
        }
    }

    pub fn ngram_count(&self) -> usize {
        self.ngram_count
    }

    pub fn add_to_index(&self, rec_idx: usize, index: &mut NGramIndex) {
        if let Some(ngrams) = &self.ngrams {
            index.add(rec_idx, ngrams);
        }
    }

    /// Walks the postings for every record sharing at least one n-gram and
    /// memoizes the Dice ratio `2|A∩B| / (|A|+|B|)` for those above the
    /// uncertain threshold. The n-gram set is dropped afterwards to bound
    /// memory; the postings stay live for the rest of the scan.
    pub fn prescan(&mut self, rec_idx: usize, index: &NGramIndex) -> &HashMap<usize, f64> {
        let mut shared: HashMap<usize, usize> = HashMap::new();
        if let Some(ngrams) = self.ngrams.take() {
            for gram in &ngrams {
                if let Some(posting) = index.postings.get(gram) {
                    for &other in posting {
                        if other != rec_idx {
                            *shared.entry(other).or_insert(0) += 2;
                        }
                    }
                }
            }
        }
        for (other, count) in shared {
            let ratio = count as f64 / (self.ngram_count + index.set_size(other)) as f64;
            if ratio > UNCERTAIN {
                self.matches.insert(other, ratio);
            }
        }
        &self.matches
    }

    /// Memoized ratio, `0.0` when the pair was seen but fell below the
    /// threshold, or indeterminate when either side produced no n-grams.
    pub fn similarity(&self, other: &NGramState, other_idx: usize) -> Option<f64> {
        if self.ngram_count == 0 || other.ngram_count == 0 {
            return None;
        }
        Some(self.matches.get(&other_idx).copied().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states(values: &[&[&str]]) -> Vec<NGramState> {
        let mut index = NGramIndex::new();
        let mut states: Vec<NGramState> = values
            .iter()
            .map(|vals| NGramState::from_values(vals.iter().copied(), 3))
            .collect();
        for (i, state) in states.iter().enumerate() {
            state.add_to_index(i, &mut index);
        }
        for (i, state) in states.iter_mut().enumerate() {
            state.prescan(i, &index);
        }
        states
    }

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("similarity should be defined");
        assert!(
            (actual - expected).abs() < 0.01,
            "got {actual}, want {expected}"
        );
        assert!((0.0..=1.0).contains(&actual));
    }

    #[test]
    fn name_matching() {
        let s = states(&[
            &["Smith"],
            &["Smithe"],
            &["Smith", "Smith"],
            &["Jane", "Smith"],
            &["Jane", "Clark"],
        ]);
        assert_close(s[0].similarity(&s[1], 1), 0.73);
        assert_close(s[1].similarity(&s[0], 0), 0.73);
        assert_close(s[0].similarity(&s[2], 2), 1.00);
        assert_close(s[0].similarity(&s[3], 3), 0.71);
        assert_close(s[3].similarity(&s[0], 0), 0.71);
        assert_close(s[0].similarity(&s[4], 4), 0.00);
        assert_close(s[4].similarity(&s[0], 0), 0.00);
    }

    #[test]
    fn phone_number_matching() {
        let s = states(&[
            &["1234-5678"],
            &["1234-5678", "1234-1234"],
            &["1234-5678", "4321-0982"],
            &["12312123", "4321-0982"],
        ]);
        assert_close(s[0].similarity(&s[1], 1), 0.86);
        assert_close(s[0].similarity(&s[2], 2), 0.67);
        assert_close(s[0].similarity(&s[3], 3), 0.00);
    }

    #[test]
    fn empty_values_are_indeterminate() {
        let s = states(&[&["Smith"], &[]]);
        assert!(s[0].similarity(&s[1], 1).is_none());
        assert!(s[1].similarity(&s[0], 0).is_none());
    }

    #[test]
    fn unknown_token_is_ignored() {
        let s = states(&[&["UNKNOWN"], &["unknown"]]);
        assert_eq!(s[0].ngram_count(), 0);
        assert!(s[0].similarity(&s[1], 1).is_none());
    }

    #[test]
    fn duplicate_tokens_collapse() {
        let once = NGramState::from_values(["Smith"], 3);
        let twice = NGramState::from_values(["Smith", "Smith"], 3);
        assert_eq!(once.ngram_count(), twice.ngram_count());
    }
}
