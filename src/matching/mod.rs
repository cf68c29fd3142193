// src/matching/mod.rs

pub mod age;
pub mod ngram;
pub mod record;
pub mod sex;

pub use ngram::{NGramIndex, NGramState};
pub use record::Record;

use age::AgeState;
use sex::SexState;

use crate::config::{MatcherConfig, MatcherKind};
use crate::models::PersonRecord;

/// Sentinel similarity substituted whenever a matcher cannot tell.
pub const UNCERTAIN: f64 = 0.5;

/// Compiled form of one enabled field group: the matcher variant it
/// dispatches to plus its weight relative to the other enabled groups.
#[derive(Debug, Clone)]
pub struct MatcherSpec {
    pub label: String,
    pub kind: MatcherKind,
    pub fields: Vec<String>,
    pub ngram_level: usize,
    pub relweight: f64,
}

/// Compiles the enabled, non-empty field groups and normalizes their
/// weights so the composite score stays in [0, 1].
pub fn compile_matchers(config: &MatcherConfig) -> Vec<MatcherSpec> {
    let active: Vec<_> = config
        .groups
        .iter()
        .filter(|g| g.enabled && !g.fields.is_empty())
        .collect();
    let total: f64 = active.iter().map(|g| g.weight).sum();
    active
        .iter()
        .map(|g| MatcherSpec {
            label: g.label.clone(),
            kind: g.kind(),
            fields: g.fields.clone(),
            ngram_level: config.ngram_level,
            relweight: g.weight / total,
        })
        .collect()
}

/// Per-record matcher state, one variant per configured group kind. All
/// variants answer through the same interface: optional indexing, an
/// optional candidate prescan, and a pairwise similarity that may be
/// indeterminate.
#[derive(Debug)]
pub enum MatcherState {
    NGram(NGramState),
    Sex(SexState),
    Age(AgeState),
}

impl MatcherState {
    pub fn from_person(spec: &MatcherSpec, person: &PersonRecord) -> Self {
        match spec.kind {
            MatcherKind::Sex => MatcherState::Sex(SexState::new(person.value("sex"))),
            MatcherKind::Age => MatcherState::Age(AgeState::new(person.dob, person.dob_prec)),
            MatcherKind::NGram => MatcherState::NGram(NGramState::from_values(
                spec.fields.iter().filter_map(|f| person.value(f)),
                spec.ngram_level,
            )),
        }
    }

    pub fn add_to_index(&self, rec_idx: usize, index: &mut NGramIndex) {
        if let MatcherState::NGram(state) = self {
            state.add_to_index(rec_idx, index);
        }
    }

    /// Returns the candidate record indices this matcher considers likely,
    /// if it indexes at all.
    pub fn prescan(&mut self, rec_idx: usize, index: &NGramIndex) -> Option<Vec<usize>> {
        match self {
            MatcherState::NGram(state) => {
                Some(state.prescan(rec_idx, index).keys().copied().collect())
            }
            _ => None,
        }
    }

    pub fn similarity(&self, other: &MatcherState, other_idx: usize) -> Option<f64> {
        match (self, other) {
            (MatcherState::NGram(a), MatcherState::NGram(b)) => a.similarity(b, other_idx),
            (MatcherState::Sex(a), MatcherState::Sex(b)) => a.similarity(b),
            (MatcherState::Age(a), MatcherState::Age(b)) => a.similarity(b),
            _ => None,
        }
    }

    pub fn ngram_count(&self) -> usize {
        match self {
            MatcherState::NGram(state) => state.ngram_count(),
            _ => 0,
        }
    }
}
