//! Run settings shared by the binaries, overridable through `PROPENSITY_*` variables.

use std::env;
use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

use crate::dataset::DatasetConfig;
use crate::window::{DateWindowConfig, WindowError, DEFAULT_FEATURE_DURATION_DAYS};
use crate::window_sql::Dialect;

/// Last transaction date in the competition data.
pub const DEFAULT_ANCHOR_DATE: (i32, u32, u32) = (2020, 9, 22);
pub const DEFAULT_RESPONSE_DURATION_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}={value} is not a valid {expected}")]
    InvalidVar {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("window error: {0}")]
    Window(#[from] WindowError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub dataset: DatasetConfig,
    pub anchor_date: NaiveDate,
    pub feature_duration_days: i64,
    pub response_duration_days: i64,
    pub additional_offset_days: i64,
    pub dialect: Dialect,
    pub output_path: PathBuf,
    /// `label,probability` CSV; `None` evaluates the built-in demo arrays.
    pub predictions_path: Option<PathBuf>,
    pub plot_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        let (year, month, day) = DEFAULT_ANCHOR_DATE;
        let dataset = DatasetConfig::default();
        let output_path = dataset.data_root.join("training.csv");
        let plot_dir = dataset.data_root.join("plots");
        Self {
            dataset,
            anchor_date: NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default(),
            feature_duration_days: DEFAULT_FEATURE_DURATION_DAYS,
            response_duration_days: DEFAULT_RESPONSE_DURATION_DAYS,
            additional_offset_days: 0,
            dialect: Dialect::Sqlite,
            output_path,
            predictions_path: None,
            plot_dir,
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(root) = non_empty_var("PROPENSITY_DATA_ROOT") {
            config.dataset.data_root = PathBuf::from(root);
            config.output_path = config.dataset.data_root.join("training.csv");
            config.plot_dir = config.dataset.data_root.join("plots");
        }

        if let Some(raw) = non_empty_var("PROPENSITY_ANCHOR_DATE") {
            config.anchor_date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                ConfigError::InvalidVar {
                    name: "PROPENSITY_ANCHOR_DATE",
                    value: raw.clone(),
                    expected: "YYYY-MM-DD date",
                }
            })?;
        }

        if let Some(days) = parse_days("PROPENSITY_FEATURE_DAYS")? {
            config.feature_duration_days = days;
        }
        if let Some(days) = parse_days("PROPENSITY_RESPONSE_DAYS")? {
            config.response_duration_days = days;
        }
        if let Some(days) = parse_days("PROPENSITY_OFFSET_DAYS")? {
            config.additional_offset_days = days;
        }

        if let Some(raw) = non_empty_var("PROPENSITY_SQL_DIALECT") {
            config.dialect = Dialect::parse(&raw).ok_or(ConfigError::InvalidVar {
                name: "PROPENSITY_SQL_DIALECT",
                value: raw.clone(),
                expected: "dialect (sqlite or duckdb)",
            })?;
        }

        if let Some(path) = non_empty_var("PROPENSITY_OUTPUT_PATH") {
            config.output_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_var("PROPENSITY_PREDICTIONS_PATH") {
            config.predictions_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_var("PROPENSITY_PLOT_DIR") {
            config.plot_dir = PathBuf::from(path);
        }

        Ok(config)
    }

    pub fn window(&self) -> Result<DateWindowConfig, ConfigError> {
        Ok(DateWindowConfig::new(
            self.anchor_date,
            self.feature_duration_days,
            self.response_duration_days,
            self.additional_offset_days,
        )?)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_days(name: &'static str) -> Result<Option<i64>, ConfigError> {
    non_empty_var(name)
        .map(|raw| {
            raw.parse::<i64>().map_err(|_| ConfigError::InvalidVar {
                name,
                value: raw.clone(),
                expected: "whole number of days",
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const VARS: [&str; 9] = [
        "PROPENSITY_DATA_ROOT",
        "PROPENSITY_ANCHOR_DATE",
        "PROPENSITY_FEATURE_DAYS",
        "PROPENSITY_RESPONSE_DAYS",
        "PROPENSITY_OFFSET_DAYS",
        "PROPENSITY_SQL_DIALECT",
        "PROPENSITY_OUTPUT_PATH",
        "PROPENSITY_PREDICTIONS_PATH",
        "PROPENSITY_PLOT_DIR",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_run_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        for key in VARS {
            env::remove_var(key);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
        let output = f();
        for key in VARS {
            env::remove_var(key);
        }
        output
    }

    #[test]
    fn defaults_anchor_on_last_competition_day() {
        let cfg = with_run_env(&[], RunConfig::from_env).expect("defaults should parse");
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.anchor_date, NaiveDate::from_ymd_opt(2020, 9, 22).unwrap());
        assert_eq!(cfg.output_path, PathBuf::from("data/training.csv"));
    }

    #[test]
    fn reads_window_and_paths_from_env() {
        let cfg = with_run_env(
            &[
                ("PROPENSITY_DATA_ROOT", "/tmp/hm"),
                ("PROPENSITY_ANCHOR_DATE", "2020-08-01"),
                ("PROPENSITY_FEATURE_DAYS", "180"),
                ("PROPENSITY_RESPONSE_DAYS", "14"),
                ("PROPENSITY_OFFSET_DAYS", "3"),
                ("PROPENSITY_SQL_DIALECT", "duckdb"),
                ("PROPENSITY_PREDICTIONS_PATH", "preds.csv"),
            ],
            RunConfig::from_env,
        )
        .expect("overrides should parse");

        assert_eq!(cfg.dataset.data_root, PathBuf::from("/tmp/hm"));
        assert_eq!(cfg.output_path, PathBuf::from("/tmp/hm/training.csv"));
        assert_eq!(cfg.plot_dir, PathBuf::from("/tmp/hm/plots"));
        assert_eq!(cfg.dialect, Dialect::DuckDb);
        assert_eq!(cfg.predictions_path, Some(PathBuf::from("preds.csv")));

        let window = cfg.window().expect("window should build");
        assert_eq!(window.response_end(), NaiveDate::from_ymd_opt(2020, 7, 29).unwrap());
        assert_eq!(window.feature_end(), NaiveDate::from_ymd_opt(2020, 7, 15).unwrap());
    }

    #[test]
    fn rejects_malformed_values() {
        let err = with_run_env(&[("PROPENSITY_FEATURE_DAYS", "a year")], RunConfig::from_env)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar {
                name: "PROPENSITY_FEATURE_DAYS",
                ..
            }
        ));

        let err = with_run_env(&[("PROPENSITY_SQL_DIALECT", "oracle")], RunConfig::from_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { .. }));
    }

    #[test]
    fn negative_duration_surfaces_as_window_error() {
        let cfg = with_run_env(&[("PROPENSITY_OFFSET_DAYS", "-1")], RunConfig::from_env)
            .expect("negative numbers parse");
        assert!(matches!(cfg.window(), Err(ConfigError::Window(_))));
    }
}
