// ==============================================================================
// error.rs - Fine-mapping Results Error Types
// ==============================================================================
// Description: Error taxonomy shared by aggregation and conditional analysis
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Not errors:
//   - Tool exits 0 without a selection file -> empty selection
//   - Inner join drops variants the tool did not report -> logged narrowing
// ==============================================================================

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the aggregation and conditional-analysis engines
#[derive(Error, Debug)]
pub enum FinemapError {
    /// No shard files matched an aggregation pattern
    #[error("No shard files match pattern: {pattern}")]
    NotFound { pattern: String },

    /// External tool exited non-zero, could not be spawned, or left
    /// missing/malformed output
    #[error("External tool '{tool}' failed: {reason}")]
    ExternalToolFailure { tool: String, reason: String },

    /// External tool exceeded the execution context timeout
    #[error("External tool '{tool}' timed out after {timeout:?}")]
    ExternalToolTimeout { tool: String, timeout: Duration },

    /// Required columns are missing from a table
    #[error("Schema mismatch in {source_name}: missing columns {missing:?}")]
    SchemaMismatch {
        source_name: String,
        missing: Vec<String>,
    },

    /// Caller supplied unusable input (e.g. an empty locus)
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Configuration values out of range or unreadable
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid shard pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// Type alias for Results using FinemapError
pub type Result<T> = std::result::Result<T, FinemapError>;

impl FinemapError {
    pub fn not_found(pattern: impl Into<String>) -> Self {
        Self::NotFound {
            pattern: pattern.into(),
        }
    }

    pub fn tool_failure(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalToolFailure {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn schema_mismatch(source_name: impl Into<String>, missing: Vec<String>) -> Self {
        Self::SchemaMismatch {
            source_name: source_name.into(),
            missing,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures scoped to a single locus (batch drivers continue)
    pub fn is_locus_scoped(&self) -> bool {
        matches!(
            self,
            FinemapError::ExternalToolFailure { .. }
                | FinemapError::ExternalToolTimeout { .. }
                | FinemapError::InvalidInput { .. }
                | FinemapError::SchemaMismatch { .. }
        )
    }
}
