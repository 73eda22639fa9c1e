//! Scan driver: run registered queries, capture what they issue, and judge
//! the plan of the literal statement.

use std::fmt;
use std::path::Path;

use rust_decimal::Decimal;

use crate::{
    BoundExecution, CaptureSession, Config, ConfigError, Connection, Error, ExplainOptions,
    PlanVerdict, QueryDef, QueryRegistry, Result, TappedConn, config, explain,
};

/// Limits a plan must stay within.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    /// Highest acceptable top-level cost estimate.
    pub max_cost: Decimal,

    /// Whether a full table scan is acceptable.
    pub allow_full_scan: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_cost: Decimal::from(500),
            allow_full_scan: false,
        }
    }
}

impl Thresholds {
    /// Defaults overridden by whatever the config sets.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut thresholds = Self::default();
        if let Some(max_cost) = config.max_cost {
            thresholds.max_cost =
                Decimal::try_from(max_cost).map_err(|e| ConfigError::Invalid {
                    field: "max_cost",
                    message: format!("{max_cost}: {e}"),
                })?;
        }
        if let Some(allow) = config.allow_full_scan {
            thresholds.allow_full_scan = allow;
        }
        Ok(thresholds)
    }

    pub fn judge(&self, verdict: &PlanVerdict) -> Vec<Violation> {
        let mut violations = Vec::new();
        if verdict.has_full_scan && !self.allow_full_scan {
            violations.push(Violation::FullScan);
        }
        if verdict.estimated_cost > self.max_cost {
            violations.push(Violation::CostExceeded {
                cost: verdict.estimated_cost,
                max: self.max_cost,
            });
        }
        violations
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    FullScan,
    CostExceeded { cost: Decimal, max: Decimal },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::FullScan => f.write_str("plan contains a full table scan"),
            Violation::CostExceeded { cost, max } => {
                write!(f, "estimated cost {cost} exceeds {max}")
            }
        }
    }
}

/// Result of scanning one query.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub name: &'static str,
    pub execution: BoundExecution,
    pub verdict: PlanVerdict,
    pub violations: Vec<Violation>,
}

impl ScanOutcome {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Outcomes of a scan run, in scan order.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub outcomes: Vec<ScanOutcome>,
}

impl ScanReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(ScanOutcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScanOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Runs query definitions against one connection and judges their plans.
///
/// Every scan records into a [`CaptureSession`] of its own, so scans may run
/// concurrently on one scanner. `EXPLAIN` goes straight to the connection and
/// is never captured.
pub struct Scanner<'c> {
    conn: &'c dyn Connection,
    options: ExplainOptions,
    thresholds: Thresholds,
}

impl<'c> Scanner<'c> {
    pub fn new(conn: &'c dyn Connection) -> Self {
        Self {
            conn,
            options: ExplainOptions::default(),
            thresholds: Thresholds::default(),
        }
    }

    pub fn from_config(conn: &'c dyn Connection, config: &Config) -> Result<Self> {
        Ok(Self::new(conn)
            .with_thresholds(Thresholds::from_config(config)?)
            .with_options(ExplainOptions::from_config(config)))
    }

    /// Configure from the `.config/planscan.styx` at or above `start`, or
    /// from the defaults when there is none.
    pub fn discover(conn: &'c dyn Connection, start: &Path) -> Result<Self> {
        Self::from_config(conn, &config::load_or_default(start)?)
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_options(mut self, options: ExplainOptions) -> Self {
        self.options = options;
        self
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn options(&self) -> &ExplainOptions {
        &self.options
    }

    /// Run `def` once through a tapped connection and pair the one statement
    /// it issued with its bound arguments.
    pub async fn capture(&self, def: &QueryDef) -> Result<BoundExecution> {
        let parameters = def.bind();
        let session = CaptureSession::new();

        let statement = {
            let window = session.window();
            let conn = TappedConn::new(self.conn, &session);
            (def.executor)(&conn, &parameters)
                .await
                .map_err(Error::Execution)?;
            window.take_single()?
        };

        Ok(BoundExecution::new(statement, parameters))
    }

    /// Scan a single definition.
    pub async fn scan(&self, def: &QueryDef) -> Result<ScanOutcome> {
        let execution = self.capture(def).await?;
        let sql = execution.literal()?;
        let verdict = explain(self.conn, &sql, &self.options).await?;
        let violations = self.thresholds.judge(&verdict);

        tracing::info!(
            query = def.name,
            full_scan = verdict.has_full_scan,
            cost = %verdict.estimated_cost,
            passed = violations.is_empty(),
            "scanned"
        );

        Ok(ScanOutcome {
            name: def.name,
            execution,
            verdict,
            violations,
        })
    }

    /// Scan every definition in `registry`, stopping at the first error.
    pub async fn scan_all(&self, registry: &QueryRegistry<'_>) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        for def in registry.iter() {
            report.outcomes.push(self.scan(def).await?);
        }
        Ok(report)
    }
}
