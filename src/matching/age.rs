// src/matching/age.rs

use chrono::NaiveDate;

/// Date-of-birth matcher with a per-record approximation window in days.
/// Similarity decays quadratically with the day gap, scaled by the wider
/// of the two windows.
#[derive(Debug)]
pub struct AgeState {
    dob: Option<NaiveDate>,
    prec: i64,
}

impl AgeState {
    pub fn new(dob: Option<NaiveDate>, prec: Option<i32>) -> Self {
        // Zero or missing precision means an exact date.
        let prec = prec.map(i64::from).filter(|p| *p >= 1).unwrap_or(1);
        Self { dob, prec }
    }

    pub fn similarity(&self, other: &AgeState) -> Option<f64> {
        let (a, b) = (self.dob?, other.dob?);
        let delta = (a - b).num_days().abs() as f64;
        let prec = self.prec.max(other.prec) as f64;
        Some(1.0 / (delta / prec + 1.0).powi(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn identical_dates_score_full() {
        let a = AgeState::new(Some(date(1960, 5, 5)), None);
        let b = AgeState::new(Some(date(1960, 5, 5)), Some(1));
        assert_eq!(a.similarity(&b), Some(1.0));
    }

    #[test]
    fn similarity_decays_with_day_gap() {
        let base = AgeState::new(Some(date(1960, 5, 5)), None);
        let mut last = 1.0;
        for gap in [1, 7, 30, 365] {
            let other = AgeState::new(Some(date(1960, 5, 5) + Duration::days(gap)), None);
            let s = base.similarity(&other).unwrap();
            assert!(s < last, "gap {gap} should score below gap before it");
            assert!(s > 0.0);
            last = s;
        }
        // one day apart at exact precision: 1 / (1 + 1)^2
        let next_day = AgeState::new(Some(date(1960, 5, 6)), None);
        assert!((base.similarity(&next_day).unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn wider_precision_softens_the_gap() {
        let a = AgeState::new(Some(date(1960, 1, 1)), Some(30));
        let b = AgeState::new(Some(date(1960, 1, 31)), Some(1));
        // a 30-day gap under a 30-day window scores like a 1-day gap at
        // exact precision
        assert!((a.similarity(&b).unwrap() - 0.25).abs() < 1e-12);
        assert_eq!(a.similarity(&b), b.similarity(&a));
    }

    #[test]
    fn missing_dob_is_indeterminate() {
        let a = AgeState::new(None, None);
        let b = AgeState::new(Some(date(1960, 5, 5)), None);
        assert!(a.similarity(&b).is_none());
        assert!(b.similarity(&a).is_none());
    }

    #[test]
    fn zero_precision_is_treated_as_exact() {
        let a = AgeState::new(Some(date(1960, 5, 5)), Some(0));
        let b = AgeState::new(Some(date(1960, 5, 5)), Some(0));
        assert_eq!(a.similarity(&b), Some(1.0));
    }
}
