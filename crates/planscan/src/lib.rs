//! Query plan checks for Postgres.
//!
//! This crate provides:
//! - A statement tap that records every statement sent through a connection
//! - Parameter recording for named-parameter query templates
//! - Placeholder substitution, turning issued statements into literal SQL
//! - Plan evaluation: full scan detection and cost extraction from `EXPLAIN`
//!
//! # Scanning
//!
//! Queries are registered with [`inventory`] and scanned against a live
//! connection:
//!
//! ```ignore
//! let scanner = Scanner::new(&client);
//! let report = scanner.scan_all(&QueryRegistry::collect()).await?;
//! println!("{report}");
//! assert!(report.passed());
//! ```
//!
//! Each scan binds the definition's arguments, runs its executor through a
//! [`TappedConn`], pairs the single captured statement with the bound
//! values, substitutes the placeholders and explains the literal statement.
//!
//! # Building blocks
//!
//! The pieces are usable on their own:
//!
//! ```ignore
//! let session = CaptureSession::new();
//! let window = session.window();
//! client.tapped(&session).query(sql, &[&SqlParam(&value)]).await?;
//!
//! let execution = BoundExecution::new(window.take_single()?, record_parameters(template, args));
//! let verdict = explain(&client, &execution.literal()?, &ExplainOptions::default()).await?;
//! ```

mod bind;
mod capture;
pub mod config;
mod error;
mod explain;
mod params;
mod registry;
mod report;
mod scan;
mod substitute;
mod traced;
mod value;

pub use bind::SqlParam;
pub use capture::{CaptureSession, CaptureWindow, CapturedStatement};
pub use config::{Config, ConfigError};
pub use error::Error;
pub use explain::{
    ExplainOptions, PlanEvaluator, PlanVerdict, SEQ_SCAN, analyze, explain, extract_cost,
    has_full_scan, parse_plan,
};
pub use params::{BoundExecution, Parameters, QueryDefinition, record_parameters};
pub use registry::{ArgumentsFn, QueryDef, QueryFn, QueryFuture, QueryRegistry};
pub use scan::{ScanOutcome, ScanReport, Scanner, Thresholds, Violation};
pub use substitute::{Shape, substitute, to_camel_case};
pub use traced::{Connection, ConnectionExt, TappedConn};
pub use value::{Literal, Value};

// Re-export for `inventory::submit!` in downstream crates.
pub use inventory;

pub type Result<T> = std::result::Result<T, Error>;
