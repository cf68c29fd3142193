// src/matching/record.rs

use std::collections::BTreeSet;

use chrono::NaiveDateTime;

use crate::matching::{MatcherSpec, MatcherState, NGramIndex, UNCERTAIN};
use crate::models::PersonRecord;

/// Scan-scoped bundle of one person's matcher states plus the candidate
/// set discovered during blocking. Never persisted; dropped with the
/// orchestrator at scan end. The candidate set is ordered so scans over
/// identical input visit pairs in the same order.
#[derive(Debug)]
pub struct Record {
    pub key: i64,
    pub last_update: Option<NaiveDateTime>,
    states: Vec<MatcherState>,
    pub likely: BTreeSet<usize>,
}

impl Record {
    pub fn new(person: &PersonRecord, specs: &[MatcherSpec]) -> Self {
        Self {
            key: person.id,
            last_update: person.last_update,
            states: specs
                .iter()
                .map(|spec| MatcherState::from_person(spec, person))
                .collect(),
            likely: BTreeSet::new(),
        }
    }

    pub fn add_to_index(&self, rec_idx: usize, indexes: &mut [NGramIndex]) {
        for (state, index) in self.states.iter().zip(indexes) {
            state.add_to_index(rec_idx, index);
        }
    }

    /// Blocking step: the union of every matcher's candidates becomes this
    /// record's likely set. Only pairs appearing in some record's likely
    /// set are ever scored by the default compare phase.
    pub fn prescan(&mut self, rec_idx: usize, indexes: &[NGramIndex]) {
        for (state, index) in self.states.iter_mut().zip(indexes) {
            if let Some(candidates) = state.prescan(rec_idx, index) {
                self.likely.extend(candidates);
            }
        }
    }

    /// Weighted composite similarity in [0, 1]; indeterminate matchers
    /// contribute the uncertain sentinel. Symmetric because every
    /// matcher's similarity is.
    pub fn score(&self, other: &Record, other_idx: usize, specs: &[MatcherSpec]) -> f64 {
        let mut score = 0.0;
        for ((a, b), spec) in self.states.iter().zip(&other.states).zip(specs) {
            let s = a.similarity(b, other_idx).unwrap_or(UNCERTAIN);
            score += s * spec.relweight;
        }
        score
    }

    /// Per-group percentage breakdown for the explain tool.
    pub fn describe_match(&self, other: &Record, other_idx: usize, specs: &[MatcherSpec]) -> String {
        let mut parts = vec![format!("{}:{}", self.key, other.key)];
        let mut score = 0.0;
        for ((a, b), spec) in self.states.iter().zip(&other.states).zip(specs) {
            let s = a.similarity(b, other_idx).unwrap_or(UNCERTAIN);
            score += s * spec.relweight;
            parts.push(format!("{}:{:.0}%", spec.label, s * 100.0));
        }
        parts.push(format!("TOTAL:{:.0}%", score * 100.0));
        parts.join(", ")
    }

    pub fn ngram_count(&self) -> usize {
        self.states.iter().map(|s| s.ngram_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatcherConfig;
    use crate::matching::compile_matchers;

    fn person(id: i64, surname: &str, given: &str) -> PersonRecord {
        PersonRecord::new(id)
            .with_value("surname", surname)
            .with_value("given_names", given)
    }

    fn prescanned(a: PersonRecord, b: PersonRecord, specs: &[MatcherSpec]) -> (Record, Record) {
        let mut indexes: Vec<NGramIndex> = specs.iter().map(|_| NGramIndex::new()).collect();
        let mut rec_a = Record::new(&a, specs);
        let mut rec_b = Record::new(&b, specs);
        rec_a.add_to_index(0, &mut indexes);
        rec_b.add_to_index(1, &mut indexes);
        rec_a.prescan(0, &indexes);
        rec_b.prescan(1, &indexes);
        (rec_a, rec_b)
    }

    #[test]
    fn composite_score_substitutes_uncertain() {
        let specs = compile_matchers(&MatcherConfig::default());
        let (a, b) = prescanned(person(1, "Smith", "John"), person(2, "Smith", "John"), &specs);
        // names match fully, the five other groups are all indeterminate
        let expected = (1.0 + 0.5 * 5.0) / 6.0;
        assert!((a.score(&b, 1, &specs) - expected).abs() < 1e-9);
    }

    #[test]
    fn score_is_symmetric() {
        let specs = compile_matchers(&MatcherConfig::default());
        let (a, b) = prescanned(person(1, "Smith", "John"), person(2, "Smithe", "Jon"), &specs);
        assert!((a.score(&b, 1, &specs) - b.score(&a, 0, &specs)).abs() < 1e-12);
    }

    #[test]
    fn prescan_collects_likely_candidates() {
        let specs = compile_matchers(&MatcherConfig::default());
        let (a, b) = prescanned(person(1, "Smith", "John"), person(2, "Smith", "John"), &specs);
        assert_eq!(a.likely.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(b.likely.iter().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn describe_match_breaks_down_groups() {
        let specs = compile_matchers(&MatcherConfig::default());
        let (a, b) = prescanned(person(1, "Smith", "John"), person(2, "Smith", "John"), &specs);
        let desc = a.describe_match(&b, 1, &specs);
        assert!(desc.starts_with("1:2, "), "{desc}");
        assert!(desc.contains("Names:100%"), "{desc}");
        assert!(desc.contains("Sex:50%"), "{desc}");
        assert!(desc.ends_with("TOTAL:58%"), "{desc}");
    }
}
