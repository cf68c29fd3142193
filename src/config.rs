// src/config.rs

use serde::{Deserialize, Serialize};

pub const DEFAULT_NGRAM_LEVEL: usize = 3;
pub const DEFAULT_CUTOFF: f64 = 0.5;

/// Matcher variant a field group compiles to, derived from the shape of
/// its field list: `["sex"]` selects the coded-value matcher, `["DOB"]`
/// the date-of-birth matcher, anything else generic n-gram matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    NGram,
    Sex,
    Age,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_ngram_level() -> usize {
    DEFAULT_NGRAM_LEVEL
}

fn default_cutoff() -> f64 {
    DEFAULT_CUTOFF
}

/// One group of person fields compared together, with its weight relative
/// to the other enabled groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldGroup {
    pub label: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub fields: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl FieldGroup {
    pub fn new(label: &str, weight: f64, fields: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            weight,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            enabled: true,
        }
    }

    /// Field lists that don't match the special `sex`/`DOB` shapes fall
    /// back to n-gram string matching, whatever the underlying column
    /// types are.
    pub fn kind(&self) -> MatcherKind {
        if self.fields == ["sex"] {
            MatcherKind::Sex
        } else if self.fields == ["DOB"] {
            MatcherKind::Age
        } else {
            MatcherKind::NGram
        }
    }
}

/// Matcher configuration as handed over by the owning collaborator; the
/// engine consumes it at scan start and never stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    #[serde(default = "default_ngram_level")]
    pub ngram_level: usize,
    #[serde(default = "default_cutoff")]
    pub cutoff: f64,
    pub groups: Vec<FieldGroup>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            ngram_level: DEFAULT_NGRAM_LEVEL,
            cutoff: DEFAULT_CUTOFF,
            groups: vec![
                FieldGroup::new("Names", 1.0, &["surname", "given_names"]),
                FieldGroup::new("Sex", 1.0, &["sex"]),
                FieldGroup::new("Age", 1.0, &["DOB"]),
                FieldGroup::new(
                    "Addresses",
                    1.0,
                    &[
                        "street_address",
                        "locality",
                        "state",
                        "postcode",
                        "country",
                        "alt_street_address",
                        "alt_locality",
                        "alt_state",
                        "alt_postcode",
                        "alt_country",
                        "work_street_address",
                        "work_locality",
                        "work_state",
                        "work_postcode",
                        "work_country",
                    ],
                ),
                FieldGroup::new(
                    "Phone",
                    1.0,
                    &["home_phone", "work_phone", "mobile_phone", "fax_phone", "e_mail"],
                ),
                FieldGroup::new(
                    "Passport",
                    1.0,
                    &[
                        "passport_number",
                        "passport_country",
                        "passport_number_2",
                        "passport_country_2",
                    ],
                ),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_resolution() {
        assert_eq!(FieldGroup::new("Sex", 1.0, &["sex"]).kind(), MatcherKind::Sex);
        assert_eq!(FieldGroup::new("Age", 1.0, &["DOB"]).kind(), MatcherKind::Age);
        assert_eq!(
            FieldGroup::new("Names", 1.0, &["surname", "given_names"]).kind(),
            MatcherKind::NGram
        );
        // A near-miss shape silently falls back to n-gram matching.
        assert_eq!(FieldGroup::new("Odd", 1.0, &["sex", "DOB"]).kind(), MatcherKind::NGram);
    }

    #[test]
    fn default_config() {
        let config = MatcherConfig::default();
        assert_eq!(config.ngram_level, 3);
        assert!((config.cutoff - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.groups.len(), 6);
        assert!(config.groups.iter().all(|g| g.enabled));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let parsed: MatcherConfig =
            serde_json::from_str(r#"{"groups": [{"label": "Names", "fields": ["surname"]}]}"#)
                .unwrap();
        assert_eq!(parsed.ngram_level, 3);
        assert!((parsed.cutoff - 0.5).abs() < f64::EPSILON);
        assert_eq!(parsed.groups.len(), 1);
        assert!(parsed.groups[0].enabled);
        assert!((parsed.groups[0].weight - 1.0).abs() < f64::EPSILON);
    }
}
