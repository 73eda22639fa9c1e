use thiserror::Error;

use crate::config::ConfigError;
use crate::substitute::Shape;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no value for column '{column}' (also tried its camelCase form)")]
    MissingParameter { column: String },

    #[error("{shape} on column '{column}' requires {expected}")]
    UnsupportedValueShape {
        shape: Shape,
        column: String,
        expected: &'static str,
    },

    #[error("could not extract cost from plan of: {sql}")]
    PlanExtraction { sql: String },

    #[error("postgres error: {0}")]
    PlanExecution(#[from] tokio_postgres::Error),

    #[error("query execution failed: {0}")]
    Execution(#[source] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("expected {expected} captured statement(s), got {actual}")]
    CaptureMismatch { expected: usize, actual: usize },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
