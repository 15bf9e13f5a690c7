use std::collections::HashSet;

use chrono::NaiveDate;
use propensity::{
    generate, render_fragments, Channel, DateWindowConfig, Dialect, Features, QueryComposer,
    WindowBounds, OVERLAPPING_WINDOWS,
};
use regex::Regex;

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date expected")
}

const DUCKDB_WEEK_FRAGMENTS: &str = "
                ,SUM(CASE WHEN t.t_dat > DATE '2025-01-01' - INTERVAL (7*1) DAY AND t.t_dat <= DATE '2025-01-01' - INTERVAL (7*(1 - 1)) DAY THEN 1 ELSE 0 END)
                    as t_count_week_1
                ,COUNT(DISTINCT CASE WHEN t.t_dat > DATE '2025-01-01' - INTERVAL (7*1) DAY AND t.t_dat <= DATE '2025-01-01' - INTERVAL (7*(1 - 1)) DAY THEN t.t_dat ELSE NULL END)
                    as ti_count_week_1
                ,SUM(CASE WHEN t.t_dat > DATE '2025-01-01' - INTERVAL (7*1) DAY AND t.t_dat <= DATE '2025-01-01' - INTERVAL (7*(1 - 1)) DAY THEN 590*price ELSE 0 END)
                    as revenue_week_1
        

                ,SUM(CASE WHEN t.t_dat > DATE '2025-01-01' - INTERVAL (7*2) DAY AND t.t_dat <= DATE '2025-01-01' - INTERVAL (7*(2 - 1)) DAY THEN 1 ELSE 0 END)
                    as t_count_week_2
                ,COUNT(DISTINCT CASE WHEN t.t_dat > DATE '2025-01-01' - INTERVAL (7*2) DAY AND t.t_dat <= DATE '2025-01-01' - INTERVAL (7*(2 - 1)) DAY THEN t.t_dat ELSE NULL END)
                    as ti_count_week_2
                ,SUM(CASE WHEN t.t_dat > DATE '2025-01-01' - INTERVAL (7*2) DAY AND t.t_dat <= DATE '2025-01-01' - INTERVAL (7*(2 - 1)) DAY THEN 590*price ELSE 0 END)
                    as revenue_week_2
        ";

#[test]
fn duckdb_week_fragments_match_reference_text() {
    let fragments =
        generate(7, "week", 2, date(2025, 1, 1), 1, None).expect("fragments should generate");
    let rendered = render_fragments(&fragments, Dialect::DuckDb);
    assert_eq!(rendered.trim(), DUCKDB_WEEK_FRAGMENTS.trim());
}

#[test]
fn fragment_count_and_columns_follow_index_range() {
    let fragments = generate(28, "month", 13, date(2020, 9, 15), 4, None)
        .expect("fragments should generate");
    assert_eq!(fragments.len(), 10);
    assert_eq!(fragments[0].index, 4);
    assert_eq!(fragments[9].index, 13);
    for fragment in &fragments {
        let i = fragment.index;
        assert_eq!(
            fragment.column_names(),
            vec![
                format!("t_count_month_{i}"),
                format!("ti_count_month_{i}"),
                format!("revenue_month_{i}"),
            ]
        );
    }
}

#[test]
fn consecutive_windows_tile_without_gaps_or_overlap() {
    let end = date(2020, 9, 15);
    for (days, _, count) in OVERLAPPING_WINDOWS {
        let bounds: Vec<WindowBounds> = (1..=count)
            .map(|i| WindowBounds::new(end, days, i).expect("bounds should compute"))
            .collect();
        assert_eq!(bounds[0].upper_inclusive, end);
        for pair in bounds.windows(2) {
            assert_eq!(pair[1].upper_inclusive, pair[0].lower_exclusive);
        }

        // Each day in the covered span belongs to exactly one window.
        let oldest = bounds[bounds.len() - 1].lower_exclusive;
        let mut day = oldest.succ_opt().expect("next day");
        while day <= end {
            let hits = bounds.iter().filter(|b| b.contains(day)).count();
            assert_eq!(hits, 1, "day {day} for {days}-day windows");
            day = day.succ_opt().expect("next day");
        }
    }
}

#[test]
fn sqlite_boundaries_round_trip_through_rendered_text() {
    let end = date(2020, 9, 15);
    let fragments = generate(14, "two_week", 4, end, 1, None).expect("fragments should generate");
    let sql = render_fragments(&fragments, Dialect::Sqlite);
    let re = Regex::new(
        r"t\.t_dat > '(\d{4}-\d{2}-\d{2})' AND t\.t_dat <= '(\d{4}-\d{2}-\d{2})' THEN 1 ELSE 0 END\)\n\s+as t_count_two_week_(\d+)",
    )
    .expect("regex should compile");

    let mut seen = 0;
    for caps in re.captures_iter(&sql) {
        let lower = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").expect("lower date");
        let upper = NaiveDate::parse_from_str(&caps[2], "%Y-%m-%d").expect("upper date");
        let index: i64 = caps[3].parse().expect("index");
        assert_eq!((end - lower).num_days(), 14 * index);
        assert_eq!((end - upper).num_days(), 14 * (index - 1));
        seen += 1;
    }
    assert_eq!(seen, 4);
}

#[test]
fn full_battery_has_no_column_collisions() {
    let window = DateWindowConfig::new(date(2020, 9, 22), 365, 7, 0).expect("window");
    let features = Features::new(window);
    let composer = QueryComposer::new(Dialect::Sqlite);
    let alias_re = Regex::new(r"(?i)\bas (\w+)").expect("regex should compile");

    let mut columns = HashSet::new();
    for set in features.feature_sets() {
        let sql = features
            .feature_query(&composer, set)
            .expect("query should compose");
        for caps in alias_re.captures_iter(&sql) {
            let alias = caps[1].to_string();
            assert!(columns.insert(alias.clone()), "duplicate column {alias}");
        }
    }

    assert!(columns.contains("revenue_channel_1_year_1"));
    assert!(columns.contains("revenue_channel_2_year_1"));
    assert!(columns.contains("t_count_quarter_1"));
    assert!(columns.contains("days_since_last"));
}

#[test]
fn channel_filter_reaches_every_predicate() {
    let fragments = generate(7, "week", 4, date(2025, 1, 1), 1, Some(Channel::Two))
        .expect("fragments should generate");
    let sql = render_fragments(&fragments, Dialect::DuckDb);
    assert_eq!(sql.matches("AND t.sales_channel_id = 2 THEN").count(), 12);
    assert!(!sql.contains("sales_channel_id = 1"));
}
