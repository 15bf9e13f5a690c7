//! Per-window aggregate fragments.
//!
//! A fragment is built as structured descriptors first and rendered to SQL
//! text for a [`Dialect`] afterwards, so the window arithmetic stays the same
//! no matter which engine executes the query.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::window::{days_before, WindowError};

/// Converts stored prices into the reporting currency unit.
pub const CURRENCY_MULTIPLIER: i64 = 590;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Sqlite,
    DuckDb,
}

impl Dialect {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::Sqlite),
            "duckdb" => Some(Self::DuckDb),
            _ => None,
        }
    }

    pub fn date_literal(self, date: NaiveDate) -> String {
        match self {
            Self::Sqlite => format!("'{}'", date.format("%Y-%m-%d")),
            Self::DuckDb => format!("DATE '{}'", date.format("%Y-%m-%d")),
        }
    }

    /// Whole days from `anchor` to `expr`; negative when `expr` is earlier.
    pub fn days_between(self, expr: &str, anchor: NaiveDate) -> String {
        match self {
            Self::Sqlite => format!(
                "CAST(julianday({expr}) - julianday({}) AS INTEGER)",
                self.date_literal(anchor)
            ),
            Self::DuckDb => format!("{expr} - {}", self.date_literal(anchor)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    One,
    Two,
}

pub const ALL_CHANNELS: [Channel; 2] = [Channel::One, Channel::Two];

impl Channel {
    pub fn id(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    fn column_segment(self) -> String {
        format!("channel_{}_", self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    TransactionCount,
    TransactionDayCount,
    Revenue,
}

pub const FRAGMENT_METRICS: [Metric; 3] = [
    Metric::TransactionCount,
    Metric::TransactionDayCount,
    Metric::Revenue,
];

impl Metric {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::TransactionCount => "t_count",
            Self::TransactionDayCount => "ti_count",
            Self::Revenue => "revenue",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub offset_length_days: i64,
    pub offset_name: String,
    pub start_index: u32,
    pub end_index: u32,
    pub channel_filter: Option<Channel>,
}

impl WindowSpec {
    /// Windows `1..=end_index` over all channels.
    pub fn recent(offset_length_days: i64, offset_name: impl Into<String>, end_index: u32) -> Self {
        Self {
            offset_length_days,
            offset_name: offset_name.into(),
            start_index: 1,
            end_index,
            channel_filter: None,
        }
    }

    pub fn starting_at(mut self, start_index: u32) -> Self {
        self.start_index = start_index;
        self
    }

    pub fn for_channel(mut self, channel: Channel) -> Self {
        self.channel_filter = Some(channel);
        self
    }

    pub fn validate(&self) -> Result<(), WindowError> {
        if self.offset_length_days <= 0 {
            return Err(WindowError::InvalidSpec(format!(
                "offset_length_days must be > 0, got {}",
                self.offset_length_days
            )));
        }
        if self.offset_name.trim().is_empty() {
            return Err(WindowError::InvalidSpec(
                "offset_name must not be empty".to_string(),
            ));
        }
        if self.start_index == 0 {
            return Err(WindowError::InvalidSpec(
                "start_index must be >= 1".to_string(),
            ));
        }
        if self.start_index > self.end_index {
            return Err(WindowError::InvalidSpec(format!(
                "start_index {} exceeds end_index {}",
                self.start_index, self.end_index
            )));
        }
        Ok(())
    }

    pub fn window_count(&self) -> usize {
        if self.start_index > self.end_index {
            0
        } else {
            (self.end_index - self.start_index + 1) as usize
        }
    }
}

/// `(lower, upper]` bounds of one window, kept both as dates and as the
/// day offsets they were derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub feature_end: NaiveDate,
    pub offset_length_days: i64,
    pub index: u32,
    pub lower_exclusive: NaiveDate,
    pub upper_inclusive: NaiveDate,
}

impl WindowBounds {
    pub fn new(
        feature_end: NaiveDate,
        offset_length_days: i64,
        index: u32,
    ) -> Result<Self, WindowError> {
        let index_days = i64::from(index);
        let span = |steps: i64| {
            offset_length_days
                .checked_mul(steps)
                .ok_or(WindowError::DateOutOfRange {
                    date: feature_end,
                    days: offset_length_days,
                })
        };
        let lower_exclusive = days_before(feature_end, span(index_days)?)?;
        let upper_inclusive = days_before(feature_end, span(index_days - 1)?)?;
        Ok(Self {
            feature_end,
            offset_length_days,
            index,
            lower_exclusive,
            upper_inclusive,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date > self.lower_exclusive && date <= self.upper_inclusive
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub bounds: WindowBounds,
    pub channel: Option<Channel>,
}

impl Predicate {
    pub fn render(&self, dialect: Dialect) -> String {
        let mut out = match dialect {
            Dialect::Sqlite => format!(
                "t.t_dat > {} AND t.t_dat <= {}",
                dialect.date_literal(self.bounds.lower_exclusive),
                dialect.date_literal(self.bounds.upper_inclusive)
            ),
            Dialect::DuckDb => {
                let end = dialect.date_literal(self.bounds.feature_end);
                let length = self.bounds.offset_length_days;
                let i = self.bounds.index;
                format!(
                    "t.t_dat > {end} - INTERVAL ({length}*{i}) DAY AND t.t_dat <= {end} - INTERVAL ({length}*({i} - 1)) DAY"
                )
            }
        };
        if let Some(channel) = self.channel {
            out.push_str(&format!(" AND t.sales_channel_id = {}", channel.id()));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateDescriptor {
    pub metric: Metric,
    pub alias: String,
    pub predicate: Predicate,
}

impl AggregateDescriptor {
    pub fn render(&self, dialect: Dialect) -> String {
        let predicate = self.predicate.render(dialect);
        let expr = match self.metric {
            Metric::TransactionCount => {
                format!("SUM(CASE WHEN {predicate} THEN 1 ELSE 0 END)")
            }
            Metric::TransactionDayCount => {
                format!("COUNT(DISTINCT CASE WHEN {predicate} THEN t.t_dat ELSE NULL END)")
            }
            Metric::Revenue => {
                format!("SUM(CASE WHEN {predicate} THEN {CURRENCY_MULTIPLIER}*price ELSE 0 END)")
            }
        };
        format!(
            "                ,{expr}\n                    as {}",
            self.alias
        )
    }
}

/// The three aggregates of one window index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub index: u32,
    pub aggregates: Vec<AggregateDescriptor>,
}

impl Fragment {
    pub fn column_names(&self) -> Vec<&str> {
        self.aggregates.iter().map(|agg| agg.alias.as_str()).collect()
    }

    pub fn render(&self, dialect: Dialect) -> String {
        let mut out = String::from("\n");
        for aggregate in &self.aggregates {
            out.push_str(&aggregate.render(dialect));
            out.push('\n');
        }
        out.push_str("        ");
        out
    }
}

pub fn column_alias(
    metric: Metric,
    offset_name: &str,
    index: u32,
    channel: Option<Channel>,
) -> String {
    let channel_segment = channel.map(Channel::column_segment).unwrap_or_default();
    format!("{}_{channel_segment}{offset_name}_{index}", metric.prefix())
}

/// One fragment per index in `start_index..=end_index`.
pub fn generate(
    offset_length_days: i64,
    offset_name: &str,
    end_index: u32,
    feature_end: NaiveDate,
    start_index: u32,
    channel_filter: Option<Channel>,
) -> Result<Vec<Fragment>, WindowError> {
    let spec = WindowSpec {
        offset_length_days,
        offset_name: offset_name.to_string(),
        start_index,
        end_index,
        channel_filter,
    };
    generate_for_spec(&spec, feature_end)
}

pub fn generate_for_spec(
    spec: &WindowSpec,
    feature_end: NaiveDate,
) -> Result<Vec<Fragment>, WindowError> {
    spec.validate()?;

    let mut fragments = Vec::with_capacity(spec.window_count());
    for index in spec.start_index..=spec.end_index {
        let bounds = WindowBounds::new(feature_end, spec.offset_length_days, index)?;
        let aggregates = FRAGMENT_METRICS
            .iter()
            .map(|metric| AggregateDescriptor {
                metric: *metric,
                alias: column_alias(*metric, &spec.offset_name, index, spec.channel_filter),
                predicate: Predicate {
                    bounds,
                    channel: spec.channel_filter,
                },
            })
            .collect();
        fragments.push(Fragment { index, aggregates });
    }
    Ok(fragments)
}

/// Renders fragments the way they are spliced into a select list.
pub fn render_fragments(fragments: &[Fragment], dialect: Dialect) -> String {
    fragments
        .iter()
        .map(|fragment| fragment.render(dialect))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn alias_includes_channel_segment_only_when_filtered() {
        assert_eq!(
            column_alias(Metric::Revenue, "week", 3, None),
            "revenue_week_3"
        );
        assert_eq!(
            column_alias(Metric::TransactionDayCount, "week", 3, Some(Channel::Two)),
            "ti_count_channel_2_week_3"
        );
    }

    #[test]
    fn bounds_follow_exclusive_start_inclusive_end() {
        let bounds = WindowBounds::new(date(2025, 1, 1), 7, 1).unwrap();
        assert_eq!(bounds.lower_exclusive, date(2024, 12, 25));
        assert_eq!(bounds.upper_inclusive, date(2025, 1, 1));
        assert!(bounds.contains(date(2025, 1, 1)));
        assert!(bounds.contains(date(2024, 12, 26)));
        assert!(!bounds.contains(date(2024, 12, 25)));
    }

    #[test]
    fn sqlite_predicate_uses_precomputed_dates() {
        let fragments = generate(7, "week", 2, date(2025, 1, 1), 2, Some(Channel::One)).unwrap();
        let rendered = fragments[0].aggregates[0].predicate.render(Dialect::Sqlite);
        assert_eq!(
            rendered,
            "t.t_dat > '2024-12-18' AND t.t_dat <= '2024-12-25' AND t.sales_channel_id = 1"
        );
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let end = date(2025, 1, 1);
        assert!(generate(0, "week", 2, end, 1, None).is_err());
        assert!(generate(7, "", 2, end, 1, None).is_err());
        assert!(generate(7, "week", 2, end, 0, None).is_err());
        assert!(generate(7, "week", 2, end, 3, None).is_err());
    }

    #[test]
    fn oversized_offsets_fail_instead_of_overflowing() {
        let end = date(2020, 1, 1);
        let err = generate(i64::MAX / 2 + 1, "w", 2, end, 2, None).unwrap_err();
        assert!(matches!(err, WindowError::DateOutOfRange { date, .. } if date == end));

        let err = WindowBounds::new(end, i64::MAX, 3).unwrap_err();
        assert!(matches!(err, WindowError::DateOutOfRange { .. }));
    }
}
