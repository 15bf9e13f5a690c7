//! Propensity core crate.
//!
//! Current implemented scope:
//! - Step 1: feature/response date windows
//! - Step 2: per-window SQL fragments and full feature/label queries
//! - Step 3: SQLite execution and per-customer feature-table assembly
//! - Step 4: competition data download and CSV loading
//! - Step 5: classifier evaluation (threshold, AUC, F1, report, plots)

mod config;
mod dataset;
mod evaluate;
mod executor;
mod features;
mod observability;
mod query;
mod window;
mod window_sql;

pub use config::{ConfigError, RunConfig, DEFAULT_ANCHOR_DATE, DEFAULT_RESPONSE_DURATION_DAYS};
pub use dataset::{
    competition_file_url, default_schema_overrides, format_preview, load_credentials,
    read_csv_table, run_query_display_results, table_name_for, unzip_all, ColumnOverride,
    CsvDataset, DatasetConfig, DatasetError, KaggleCredentials, KaggleDataset, LocalFile,
    LocalFileSource, COMPETITION_FILES, DEFAULT_COMPETITION,
};
pub use evaluate::{
    classification_report, f1_score, optimal_f1_threshold, precision_recall_curve,
    roc_auc_score, roc_curve, round_to, ConfusionMatrix, EvaluateError, Evaluator,
    PrecisionRecallCurve, Probabilities, RocCurve,
};
pub use executor::{ExecutorError, QueryExecutor, SqliteExecutor, Table, Value};
pub use features::{
    default_feature_sets, FeatureError, FeatureSet, FeatureSetKind, Features, CUSTOMER_KEY,
    LABEL_COLUMN, OVERLAPPING_WINDOWS,
};
pub use observability::{
    init_logging, log_app_finish, log_app_start, log_source_selected, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use query::{query_fingerprint, QueryComposer};
pub use window::{DateWindowConfig, WindowError, DEFAULT_FEATURE_DURATION_DAYS};
pub use window_sql::{
    column_alias, generate, generate_for_spec, render_fragments, AggregateDescriptor, Channel,
    Dialect, Fragment, Metric, Predicate, WindowBounds, WindowSpec, ALL_CHANNELS,
    CURRENCY_MULTIPLIER, FRAGMENT_METRICS,
};
