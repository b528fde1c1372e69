//! cfgedit - Safe in-place editor for executable configuration scripts
//!
//! cfgedit reads a config script (`name = value;` assignments mixed with
//! comments and conditional branches), finds the one assignment that
//! actually produces a variable's value under the current execution
//! context, and rewrites only that assignment. Every edit is checked by
//! re-running the script before and after and comparing the resulting
//! variable bindings, and the file is backed up before it is touched.

pub mod cli;
pub mod config;
pub mod editor;
pub mod engine;
pub mod logging;

pub use config::{BackupRecord, ExecutionConfig, Platform, ScriptFile};
pub use editor::{ConfigEditor, LiveAssignment};
pub use engine::{EngineError, ScriptEngine, ScriptRuntime, Value, Workspace};

use std::path::PathBuf;

/// Result type alias for cfgedit operations
pub type Result<T> = std::result::Result<T, CfgEditError>;

/// Error types specific to cfgedit operations
#[derive(thiserror::Error, Debug)]
pub enum CfgEditError {
    #[error("Config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Value cannot be evaluated: {expression}: {source}")]
    InvalidValueExpression {
        expression: String,
        #[source]
        source: EngineError,
    },

    #[error("Variable not found: '{0}' is not bound after running the script")]
    VariableNotFound(String),

    #[error("Variable '{0}' is not assigned in script")]
    VariableNotAssigned(String),

    #[error("Script failed ({stage}): {source}")]
    ScriptExecutionFailed {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("Not all assignments correctly identified: {0}")]
    InstrumentationInconsistent(String),

    #[error("Config file can not be properly updated: {0}")]
    VerificationFailed(String),

    #[error("Permission error on {}: {message}", path.display())]
    PermissionError { path: PathBuf, message: String },

    #[error(
        "{original}; restoring {} from backup {} also failed ({reason}). \
         Recover manually by copying the backup over the file.",
        target.display(),
        backup.display()
    )]
    RollbackFailed {
        original: Box<CfgEditError>,
        target: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CfgEditError {
    pub(crate) fn permission(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        CfgEditError::PermissionError {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
