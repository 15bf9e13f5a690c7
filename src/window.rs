//! Feature/response date boundaries relative to an anchor date.

use chrono::{Days, NaiveDate};
use thiserror::Error;

pub const DEFAULT_FEATURE_DURATION_DAYS: i64 = 365;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("{field} must be >= 0, got {value}")]
    NegativeDuration { field: &'static str, value: i64 },
    #[error("date arithmetic out of range: {date} - {days} days")]
    DateOutOfRange { date: NaiveDate, days: i64 },
    #[error("invalid window spec: {0}")]
    InvalidSpec(String),
}

/// Immutable set of boundaries every feature and label query is parameterized by.
///
/// All windows follow the `(start, end]` convention. The feature window ends
/// exactly where the response window begins, so `feature_end` belongs to the
/// feature window and never to the response window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindowConfig {
    anchor_date: NaiveDate,
    feature_duration_days: i64,
    response_duration_days: i64,
    additional_offset_days: i64,
    feature_start: NaiveDate,
    feature_end: NaiveDate,
    response_start: NaiveDate,
    response_end: NaiveDate,
}

impl DateWindowConfig {
    pub fn new(
        anchor_date: NaiveDate,
        feature_duration_days: i64,
        response_duration_days: i64,
        additional_offset_days: i64,
    ) -> Result<Self, WindowError> {
        check_non_negative("feature_duration_days", feature_duration_days)?;
        check_non_negative("response_duration_days", response_duration_days)?;
        check_non_negative("additional_offset_days", additional_offset_days)?;

        let response_end = days_before(anchor_date, additional_offset_days)?;
        let feature_end = days_before(response_end, response_duration_days)?;
        let response_start = feature_end;
        let feature_start = days_before(feature_end, feature_duration_days)?;

        Ok(Self {
            anchor_date,
            feature_duration_days,
            response_duration_days,
            additional_offset_days,
            feature_start,
            feature_end,
            response_start,
            response_end,
        })
    }

    /// A year of features, no response window and no backtest offset.
    pub fn with_defaults(anchor_date: NaiveDate) -> Result<Self, WindowError> {
        Self::new(anchor_date, DEFAULT_FEATURE_DURATION_DAYS, 0, 0)
    }

    pub fn anchor_date(&self) -> NaiveDate {
        self.anchor_date
    }

    pub fn feature_duration_days(&self) -> i64 {
        self.feature_duration_days
    }

    pub fn response_duration_days(&self) -> i64 {
        self.response_duration_days
    }

    pub fn additional_offset_days(&self) -> i64 {
        self.additional_offset_days
    }

    pub fn feature_start(&self) -> NaiveDate {
        self.feature_start
    }

    pub fn feature_end(&self) -> NaiveDate {
        self.feature_end
    }

    pub fn response_start(&self) -> NaiveDate {
        self.response_start
    }

    pub fn response_end(&self) -> NaiveDate {
        self.response_end
    }
}

pub(crate) fn days_before(date: NaiveDate, days: i64) -> Result<NaiveDate, WindowError> {
    let magnitude = u64::try_from(days).map_err(|_| WindowError::DateOutOfRange { date, days })?;
    date.checked_sub_days(Days::new(magnitude))
        .ok_or(WindowError::DateOutOfRange { date, days })
}

fn check_non_negative(field: &'static str, value: i64) -> Result<(), WindowError> {
    if value < 0 {
        return Err(WindowError::NegativeDuration { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn derives_boundaries_in_documented_order() {
        let cfg = DateWindowConfig::new(date(2020, 9, 22), 365, 30, 30).unwrap();

        assert_eq!(cfg.response_end(), date(2020, 8, 23));
        assert_eq!(cfg.feature_end(), date(2020, 7, 24));
        assert_eq!(cfg.response_start(), cfg.feature_end());
        assert_eq!(cfg.feature_start(), date(2019, 7, 25));
    }

    #[test]
    fn defaults_collapse_response_window_onto_anchor() {
        let cfg = DateWindowConfig::with_defaults(date(2020, 9, 22)).unwrap();

        assert_eq!(cfg.feature_duration_days(), 365);
        assert_eq!(cfg.response_end(), date(2020, 9, 22));
        assert_eq!(cfg.feature_end(), date(2020, 9, 22));
        assert_eq!(cfg.response_start(), date(2020, 9, 22));
        assert_eq!(cfg.feature_start(), date(2019, 9, 23));
    }

    #[test]
    fn ordering_invariant_holds_for_non_negative_inputs() {
        let anchor = date(2020, 9, 22);
        for feature in [0, 1, 7, 365] {
            for response in [0, 1, 30] {
                for offset in [0, 3, 30] {
                    let cfg = DateWindowConfig::new(anchor, feature, response, offset).unwrap();
                    assert!(cfg.feature_start() <= cfg.feature_end());
                    assert_eq!(cfg.feature_end(), cfg.response_start());
                    assert!(cfg.response_start() <= cfg.response_end());
                    assert!(cfg.response_end() <= cfg.anchor_date());
                }
            }
        }
    }

    #[test]
    fn negative_durations_are_rejected() {
        let err = DateWindowConfig::new(date(2020, 9, 22), 365, -1, 0).unwrap_err();
        assert_eq!(
            err,
            WindowError::NegativeDuration {
                field: "response_duration_days",
                value: -1
            }
        );
    }

    #[test]
    fn underflow_is_reported() {
        let err = DateWindowConfig::new(NaiveDate::MIN, 1, 0, 0).unwrap_err();
        assert!(matches!(err, WindowError::DateOutOfRange { .. }));
    }
}
