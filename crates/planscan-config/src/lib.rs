//! Facet types for the planscan configuration schema.
//!
//! The configuration lives in `.config/planscan.styx` at (or above) the
//! directory a scan is started from. Every field is optional; absent fields
//! fall back to the defaults documented below.

use facet::Facet;

/// Configuration for a plan scan.
#[derive(Debug, Clone, Default, Facet)]
pub struct Config {
    /// Postgres connection string for `PlanEvaluator::from_config`.
    #[facet(default)]
    pub database_url: Option<String>,

    /// Highest acceptable top-level plan cost. Defaults to 500.
    #[facet(default)]
    pub max_cost: Option<f64>,

    /// Accept plans containing a full table scan. Defaults to false.
    #[facet(default)]
    pub allow_full_scan: Option<bool>,

    /// Plan text marking a full table scan. Defaults to `Seq Scan`.
    #[facet(default)]
    pub full_scan_marker: Option<String>,
}
