// src/models.rs

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};

/// One person row from the register, the engine's read-only input.
/// String-valued demographic fields are keyed by lowercased column name;
/// the date of birth and its approximation window are typed separately.
#[derive(Debug, Clone, Default)]
pub struct PersonRecord {
    pub id: i64,
    pub last_update: Option<NaiveDateTime>,
    pub dob: Option<NaiveDate>,
    pub dob_prec: Option<i32>,
    values: HashMap<String, String>,
}

impl PersonRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn set_value(&mut self, field: &str, value: &str) {
        self.values.insert(field.to_ascii_lowercase(), value.to_string());
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(&field.to_ascii_lowercase()).map(|v| v.as_str())
    }

    pub fn with_value(mut self, field: &str, value: &str) -> Self {
        self.set_value(field, value);
        self
    }

    pub fn with_dob(mut self, dob: NaiveDate) -> Self {
        self.dob = Some(dob);
        self
    }
}

/// Status of a persisted match pair. `Excluded` and `Conflict` are sticky
/// decisions made by other collaborators (review UI, import pipeline) and
/// survive every scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    New,
    Excluded,
    Conflict,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::New => "N",
            MatchStatus::Excluded => "E",
            MatchStatus::Conflict => "C",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "N" => Some(MatchStatus::New),
            "E" => Some(MatchStatus::Excluded),
            "C" => Some(MatchStatus::Conflict),
            _ => None,
        }
    }
}

/// A pair of person ids that are a likely match, or that have been
/// explicitly excluded or flagged as an import conflict. Mirrors one row
/// of the `dupe_persons` table; `timechecked` stays in the table and
/// defaults to the time of the write.
#[derive(Debug, Clone)]
pub struct MatchPair {
    pub low_id: i64,
    pub high_id: i64,
    pub confidence: Option<f64>,
    pub status: MatchStatus,
    pub exclude_reason: Option<String>,
}

impl MatchPair {
    pub fn new(low_id: i64, high_id: i64) -> Self {
        debug_assert!(low_id < high_id);
        Self {
            low_id,
            high_id,
            confidence: None,
            status: MatchStatus::New,
            exclude_reason: None,
        }
    }

    /// Confidence rendered as a percentage for report output.
    pub fn confidence_pc(&self) -> String {
        match self.confidence {
            Some(confidence) => format!("{:.0}%", confidence * 100.0),
            None => "n/a".to_string(),
        }
    }
}
