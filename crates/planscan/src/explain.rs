//! Query plan evaluation.
//!
//! Runs `EXPLAIN` on a literal statement and reads two things off the plan
//! text: whether it contains a full table scan, and the top-level estimated
//! cost (the upper bound of the first `cost=<low>..<high>` token).
//!
//! The markers follow Postgres' text `EXPLAIN` format.

use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use tracing::Instrument;

use crate::{Config, ConfigError, Connection, Error, Result, config};

static COST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cost=\d+(?:\.\d+)?\.\.(\d+(?:\.\d+)?)").expect("valid regex"));

/// Postgres' sequential scan operator.
pub const SEQ_SCAN: &str = "Seq Scan";

/// The outcome of explaining one literal statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanVerdict {
    /// The statement that was explained.
    pub sql: String,

    /// The plan contains the full scan marker.
    pub has_full_scan: bool,

    /// Upper bound of the top-level cost estimate.
    pub estimated_cost: Decimal,
}

/// Plan text markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainOptions {
    /// Substring identifying a full table scan in the plan text.
    pub full_scan_marker: String,
}

impl Default for ExplainOptions {
    fn default() -> Self {
        Self {
            full_scan_marker: SEQ_SCAN.to_owned(),
        }
    }
}

impl ExplainOptions {
    pub fn from_config(config: &Config) -> Self {
        match &config.full_scan_marker {
            Some(marker) => Self {
                full_scan_marker: marker.clone(),
            },
            None => Self::default(),
        }
    }
}

/// Explain `sql` on `conn` and judge the plan.
pub async fn explain(
    conn: &dyn Connection,
    sql: &str,
    options: &ExplainOptions,
) -> Result<PlanVerdict> {
    let explain_sql = format!("EXPLAIN {sql}");
    let span = tracing::debug_span!("db.explain", sql = %sql, rows = tracing::field::Empty);
    let rows = conn
        .query(&explain_sql, &[])
        .instrument(span.clone())
        .await?;
    span.record("rows", rows.len());
    let mut plan = String::new();
    for row in &rows {
        let line: String = row.try_get(0)?;
        plan.push_str(&line);
        plan.push('\n');
    }

    parse_plan(sql, &plan, options)
}

/// Build a verdict from already fetched plan text.
pub fn parse_plan(sql: &str, plan: &str, options: &ExplainOptions) -> Result<PlanVerdict> {
    let estimated_cost = extract_cost(plan).ok_or_else(|| Error::PlanExtraction {
        sql: sql.to_owned(),
    })?;
    let verdict = PlanVerdict {
        sql: sql.to_owned(),
        has_full_scan: has_full_scan(plan, &options.full_scan_marker),
        estimated_cost,
    };
    tracing::debug!(
        full_scan = verdict.has_full_scan,
        cost = %verdict.estimated_cost,
        "explained"
    );
    Ok(verdict)
}

/// Upper bound of the first `cost=<low>..<high>` token in `plan`.
pub fn extract_cost(plan: &str) -> Option<Decimal> {
    let caps = COST.captures(plan)?;
    Decimal::from_str(&caps[1]).ok()
}

pub fn has_full_scan(plan: &str, marker: &str) -> bool {
    plan.contains(marker)
}

/// Recalculate planner statistics for the whole database.
pub async fn analyze(conn: &dyn Connection) -> Result<()> {
    conn.batch_execute("ANALYZE").await?;
    Ok(())
}

/// Explains statements on pooled connections.
///
/// Each call checks a connection out of the pool and returns it when done,
/// whether the call succeeds or not.
#[derive(Clone)]
pub struct PlanEvaluator {
    pool: deadpool_postgres::Pool,
    options: ExplainOptions,
}

impl PlanEvaluator {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self {
            pool,
            options: ExplainOptions::default(),
        }
    }

    /// Build a pool for `database_url`. Connections are opened on first use.
    pub fn from_config(config: &Config) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or(ConfigError::Missing("database_url"))?;
        let invalid = |message: String| ConfigError::Invalid {
            field: "database_url",
            message,
        };
        let pg_config: tokio_postgres::Config =
            url.parse().map_err(|e: tokio_postgres::Error| invalid(e.to_string()))?;
        let manager = deadpool_postgres::Manager::from_config(
            pg_config,
            tokio_postgres::NoTls,
            deadpool_postgres::ManagerConfig::default(),
        );
        let pool = deadpool_postgres::Pool::builder(manager)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self::new(pool).with_options(ExplainOptions::from_config(config)))
    }

    /// Configure from the `.config/planscan.styx` at or above `start`.
    pub fn discover(start: &Path) -> Result<Self> {
        Self::from_config(&config::load_or_default(start)?)
    }

    pub fn with_options(mut self, options: ExplainOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ExplainOptions {
        &self.options
    }

    pub async fn evaluate(&self, sql: &str) -> Result<PlanVerdict> {
        let conn = self.pool.get().await?;
        explain(&conn, sql, &self.options).await
    }

    pub async fn analyze(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        analyze(&conn).await
    }

    /// Get the inner pool (for cases where you need the raw pool).
    pub fn inner(&self) -> &deadpool_postgres::Pool {
        &self.pool
    }
}
