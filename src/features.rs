//! Feature-set battery and training-table assembly.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::executor::{ExecutorError, QueryExecutor, Table};
use crate::query::{query_fingerprint, QueryComposer};
use crate::window::{DateWindowConfig, WindowError};
use crate::window_sql::{generate_for_spec, Channel, WindowSpec, ALL_CHANNELS};

pub const CUSTOMER_KEY: &str = "customer_id";
pub const LABEL_COLUMN: &str = "label";

/// Granularities computed per sales channel: (days, name, windows).
pub const OVERLAPPING_WINDOWS: [(i64, &str, u32); 7] = [
    (7, "week", 4),
    (14, "two_week", 4),
    (28, "month", 3),
    (56, "two_month", 3),
    (84, "quarter", 4),
    (182, "half", 2),
    (364, "year", 1),
];

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("window error: {0}")]
    Window(#[from] WindowError),
    #[error("query for feature set '{feature_set}' failed: {source}")]
    Query {
        feature_set: String,
        #[source]
        source: ExecutorError,
    },
    #[error("join failed: {0}")]
    Join(#[from] ExecutorError),
    #[error("no feature sets configured")]
    NoFeatureSets,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureSetKind {
    /// Fragment windows, optionally restricted to one sales channel.
    Windows {
        specs: Vec<WindowSpec>,
        channel: Option<Channel>,
    },
    CustomerAttributes,
    BaseAggregates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    pub name: String,
    pub kind: FeatureSetKind,
}

impl FeatureSet {
    pub fn windows(name: impl Into<String>, specs: Vec<WindowSpec>, channel: Option<Channel>) -> Self {
        Self {
            name: name.into(),
            kind: FeatureSetKind::Windows { specs, channel },
        }
    }

    /// Every overlapping granularity, filtered to `channel`.
    pub fn overlapping(channel: Channel) -> Self {
        let specs = OVERLAPPING_WINDOWS
            .iter()
            .map(|(days, name, count)| WindowSpec::recent(*days, *name, *count).for_channel(channel))
            .collect();
        Self::windows(format!("overlap_channel_{}", channel.id()), specs, Some(channel))
    }

    /// Four back-to-back quarters plus the month just before them.
    pub fn non_overlapping() -> Self {
        Self::windows(
            "no_overlap",
            vec![
                WindowSpec::recent(84, "quarter", 4),
                WindowSpec::recent(28, "month", 13).starting_at(13),
            ],
            None,
        )
    }

    pub fn customer_attributes() -> Self {
        Self {
            name: "customer".to_string(),
            kind: FeatureSetKind::CustomerAttributes,
        }
    }

    pub fn base_aggregates() -> Self {
        Self {
            name: "base".to_string(),
            kind: FeatureSetKind::BaseAggregates,
        }
    }
}

/// The fixed battery, in join order.
pub fn default_feature_sets() -> Vec<FeatureSet> {
    let mut sets: Vec<FeatureSet> = ALL_CHANNELS
        .iter()
        .map(|channel| FeatureSet::overlapping(*channel))
        .collect();
    sets.push(FeatureSet::non_overlapping());
    sets.push(FeatureSet::customer_attributes());
    sets.push(FeatureSet::base_aggregates());
    sets
}

/// Runs feature-set queries against one executor and joins them per customer.
#[derive(Debug, Clone)]
pub struct Features {
    window: DateWindowConfig,
    feature_sets: Vec<FeatureSet>,
}

impl Features {
    pub fn new(window: DateWindowConfig) -> Self {
        Self::with_feature_sets(window, default_feature_sets())
    }

    pub fn with_feature_sets(window: DateWindowConfig, feature_sets: Vec<FeatureSet>) -> Self {
        Self {
            window,
            feature_sets,
        }
    }

    pub fn window(&self) -> &DateWindowConfig {
        &self.window
    }

    pub fn feature_sets(&self) -> &[FeatureSet] {
        &self.feature_sets
    }

    pub fn feature_query(
        &self,
        composer: &QueryComposer,
        set: &FeatureSet,
    ) -> Result<String, FeatureError> {
        let start = self.window.feature_start();
        let end = self.window.feature_end();
        let sql = match &set.kind {
            FeatureSetKind::Windows { specs, channel } => {
                let mut fragments = Vec::new();
                for spec in specs {
                    fragments.extend(generate_for_spec(spec, end)?);
                }
                composer.compose_feature_query_for_channel(&fragments, start, end, *channel)
            }
            FeatureSetKind::CustomerAttributes => {
                composer.compose_aggregate_query(&composer.customer_attribute_sql(), start, end, None)
            }
            FeatureSetKind::BaseAggregates => composer.compose_aggregate_query(
                &composer.base_aggregate_sql(end),
                start,
                end,
                None,
            ),
        };
        Ok(sql)
    }

    pub fn response_query(&self, composer: &QueryComposer) -> String {
        composer.compose_response_query(self.window.response_start(), self.window.response_end())
    }

    pub fn feature_set_table(
        &self,
        executor: &dyn QueryExecutor,
        set: &FeatureSet,
    ) -> Result<Table, FeatureError> {
        let composer = QueryComposer::new(executor.dialect());
        let sql = self.feature_query(&composer, set)?;
        run_query(executor, &set.name, &sql)
    }

    pub fn response_label(&self, executor: &dyn QueryExecutor) -> Result<Table, FeatureError> {
        let composer = QueryComposer::new(executor.dialect());
        run_query(executor, LABEL_COLUMN, &self.response_query(&composer))
    }

    pub fn time_sliced_no_overlap(&self, executor: &dyn QueryExecutor) -> Result<Table, FeatureError> {
        self.feature_set_table(executor, &FeatureSet::non_overlapping())
    }

    pub fn time_sliced_overlap(
        &self,
        executor: &dyn QueryExecutor,
        channel: Channel,
    ) -> Result<Table, FeatureError> {
        self.feature_set_table(executor, &FeatureSet::overlapping(channel))
    }

    pub fn customer_features(&self, executor: &dyn QueryExecutor) -> Result<Table, FeatureError> {
        self.feature_set_table(executor, &FeatureSet::customer_attributes())
    }

    pub fn base_features(&self, executor: &dyn QueryExecutor) -> Result<Table, FeatureError> {
        self.feature_set_table(executor, &FeatureSet::base_aggregates())
    }

    /// Inner join of every configured feature set on `customer_id`.
    pub fn build_feature_table(&self, executor: &dyn QueryExecutor) -> Result<Table, FeatureError> {
        info!(
            component = "features",
            event = "features.build.start",
            feature_start = %self.window.feature_start(),
            feature_end = %self.window.feature_end(),
            feature_sets = self.feature_sets.len()
        );

        let mut joined: Option<Table> = None;
        for set in &self.feature_sets {
            let table = self.feature_set_table(executor, set)?;
            joined = Some(match joined {
                None => table,
                Some(left) => {
                    let before = left.len();
                    let next = left.inner_join(&table, CUSTOMER_KEY)?;
                    info!(
                        component = "features",
                        event = "features.join.finish",
                        feature_set = %set.name,
                        left_rows = before,
                        right_rows = table.len(),
                        joined_rows = next.len()
                    );
                    next
                }
            });
        }

        let table = joined.ok_or(FeatureError::NoFeatureSets)?;
        info!(
            component = "features",
            event = "features.build.finish",
            rows = table.len(),
            columns = table.columns.len()
        );
        Ok(table)
    }

    pub fn build_training_table(&self, executor: &dyn QueryExecutor) -> Result<Table, FeatureError> {
        let features = self.build_feature_table(executor)?;
        let labels = self.response_label(executor)?;
        let training = features.inner_join(&labels, CUSTOMER_KEY)?;

        info!(
            component = "features",
            event = "features.training.finish",
            response_start = %self.window.response_start(),
            response_end = %self.window.response_end(),
            feature_rows = features.len(),
            label_rows = labels.len(),
            training_rows = training.len()
        );
        Ok(training)
    }
}

fn run_query(executor: &dyn QueryExecutor, feature_set: &str, sql: &str) -> Result<Table, FeatureError> {
    let fingerprint = query_fingerprint(sql);
    info!(
        component = "features",
        event = "features.query.start",
        feature_set,
        fingerprint = %fingerprint
    );

    let table = executor.execute(sql).map_err(|source| FeatureError::Query {
        feature_set: feature_set.to_string(),
        source,
    })?;

    info!(
        component = "features",
        event = "features.query.finish",
        feature_set,
        rows = table.len(),
        columns = table.columns.len()
    );
    Ok(table)
}
