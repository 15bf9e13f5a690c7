//! Full feature and response-label queries around rendered fragments.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::window_sql::{render_fragments, Channel, Dialect, Fragment, CURRENCY_MULTIPLIER};

/// Builds complete queries for one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryComposer {
    dialect: Dialect,
}

impl QueryComposer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn compose_feature_query(
        &self,
        fragments: &[Fragment],
        feature_start: NaiveDate,
        feature_end: NaiveDate,
    ) -> String {
        self.compose_feature_query_for_channel(fragments, feature_start, feature_end, None)
    }

    /// Same template, with the row domain optionally narrowed to one sales
    /// channel. A customer without any transaction in that channel during the
    /// feature window gets no row.
    pub fn compose_feature_query_for_channel(
        &self,
        fragments: &[Fragment],
        feature_start: NaiveDate,
        feature_end: NaiveDate,
        channel: Option<Channel>,
    ) -> String {
        let feature_sql = render_fragments(fragments, self.dialect);
        self.compose_aggregate_query(&feature_sql, feature_start, feature_end, channel)
    }

    /// Wraps a raw `,expr as alias` block in the feature template.
    pub fn compose_aggregate_query(
        &self,
        feature_sql: &str,
        feature_start: NaiveDate,
        feature_end: NaiveDate,
        channel: Option<Channel>,
    ) -> String {
        let channel_filter = channel
            .map(|channel| format!(" AND t.sales_channel_id = {}", channel.id()))
            .unwrap_or_default();
        format!(
            "
        SELECT
            t.customer_id
            {feature_sql}
        FROM transactions t
        INNER JOIN customers c ON t.customer_id = c.customer_id
        WHERE t.t_dat > {start} AND t.t_dat <= {end}{channel_filter}
        GROUP BY t.customer_id
    ",
            start = self.dialect.date_literal(feature_start),
            end = self.dialect.date_literal(feature_end),
        )
    }

    pub fn compose_response_query(
        &self,
        response_start: NaiveDate,
        response_end: NaiveDate,
    ) -> String {
        format!(
            "
                SELECT
                    t.customer_id,
                    MAX(
                        CASE
                            WHEN t.t_dat > {start} AND t.t_dat <= {end} THEN 1
                            ELSE 0
                        END
                    ) AS label
                FROM transactions t
                INNER JOIN customers c ON c.customer_id = t.customer_id
                GROUP BY t.customer_id
        ",
            start = self.dialect.date_literal(response_start),
            end = self.dialect.date_literal(response_end),
        )
    }

    pub fn customer_attribute_sql(&self) -> String {
        format!(
            "
            ,ROUND(ROUND({CURRENCY_MULTIPLIER}*SUM(price))/COUNT(DISTINCT t.t_dat)) as aov
            ,MAX(CASE WHEN COALESCE(c.active,0) = 1 THEN 1 ELSE 0 END) AS customer_active
            ,MAX(CASE WHEN COALESCE(c.fashion_news_frequency, 'Empty') in ('Monthly','Regularly') THEN 1 ELSE 0 END) AS customer_fashion_news_frequency
            ,MAX(CASE WHEN COALESCE(c.FN,0) = 1 THEN 1 ELSE 0 END) AS customer_fn
            ,ROUND(1.0*SUM(CASE WHEN t.sales_channel_id = 1 THEN 1 ELSE 0 END)/COUNT(1),0) AS primary_sales_channel_01
            ,ROUND(1.0*SUM(CASE WHEN t.sales_channel_id = 2 THEN 1 ELSE 0 END)/COUNT(1),0) AS primary_sales_channel_02
            ,MAX(COALESCE(c.age,-1)) as age
        "
        )
    }

    pub fn base_aggregate_sql(&self, feature_end: NaiveDate) -> String {
        format!(
            "
            ,COUNT(1) as total_transaction_items
            ,ROUND({CURRENCY_MULTIPLIER}*SUM(price)) as total_revenue
            ,COUNT(DISTINCT t.t_dat) as total_transactions
            ,{days_since_last} as days_since_last
            ,SUM(CASE WHEN t.sales_channel_id = 1 THEN 1 ELSE 0 END) AS sales_channel_01
            ,SUM(CASE WHEN t.sales_channel_id = 2 THEN 1 ELSE 0 END) AS sales_channel_02
        ",
            days_since_last = self.dialect.days_between("MAX(t.t_dat)", feature_end),
        )
    }
}

/// SHA-256 of the exact query text; equal inputs always hash equal.
pub fn query_fingerprint(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hex::encode(hasher.finalize())
}
