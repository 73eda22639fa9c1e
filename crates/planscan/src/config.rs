//! Configuration file handling for planscan.
//!
//! Settings live in `.config/planscan.styx`, found by walking up from a start
//! directory. [`Scanner::discover`](crate::Scanner::discover) and
//! [`PlanEvaluator::discover`](crate::PlanEvaluator::discover) load it this way.

pub use planscan_config::Config;

use std::path::{Path, PathBuf};

use thiserror::Error;

const CONFIG_FILE: &str = ".config/planscan.styx";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no {} found in {} or any parent directory", CONFIG_FILE, .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {}", CONFIG_FILE, .0)]
    Parse(String),

    #[error("'{0}' is not set")]
    Missing(&'static str),

    #[error("invalid '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Find `.config/planscan.styx` at or above `start` and parse it.
///
/// Returns the config along with the path it was read from.
pub fn load_from(start: &Path) -> Result<(Config, PathBuf), ConfigError> {
    let path = find_config_file(start)?;
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config = parse(&content)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok((config, path))
}

/// Like [`load_from`], but a missing file yields the defaults.
pub fn load_or_default(start: &Path) -> Result<Config, ConfigError> {
    match load_from(start) {
        Ok((config, _)) => Ok(config),
        Err(ConfigError::NotFound(_)) => Ok(Config::default()),
        Err(e) => Err(e),
    }
}

/// Parse configuration source text.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    facet_styx::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
}

fn find_config_file(start: &Path) -> Result<PathBuf, ConfigError> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ConfigError::NotFound(start.to_path_buf()))
}
