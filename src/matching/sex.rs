// src/matching/sex.rs

const VALID_CODES: [&str; 2] = ["M", "F"];

/// Coded-value matcher for the sex field. Either side missing or carrying
/// an unrecognized code makes the comparison indeterminate rather than a
/// mismatch.
#[derive(Debug)]
pub struct SexState {
    code: Option<String>,
}

impl SexState {
    pub fn new(code: Option<&str>) -> Self {
        Self {
            code: code.map(|c| c.to_string()),
        }
    }

    fn valid(&self) -> Option<&str> {
        self.code.as_deref().filter(|c| VALID_CODES.contains(c))
    }

    pub fn similarity(&self, other: &SexState) -> Option<f64> {
        match (self.valid(), other.valid()) {
            (Some(a), Some(b)) => Some(if a == b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_valid_codes_match() {
        assert_eq!(SexState::new(Some("M")).similarity(&SexState::new(Some("M"))), Some(1.0));
        assert_eq!(SexState::new(Some("F")).similarity(&SexState::new(Some("F"))), Some(1.0));
        assert_eq!(SexState::new(Some("M")).similarity(&SexState::new(Some("F"))), Some(0.0));
    }

    #[test]
    fn missing_or_invalid_codes_are_indeterminate() {
        assert_eq!(SexState::new(None).similarity(&SexState::new(Some("M"))), None);
        assert_eq!(SexState::new(Some("M")).similarity(&SexState::new(None)), None);
        assert_eq!(SexState::new(Some("U")).similarity(&SexState::new(Some("M"))), None);
    }
}
