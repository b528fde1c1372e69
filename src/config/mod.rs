//! Execution settings and on-disk handling of config scripts

pub mod persistence;
pub mod settings;

pub use persistence::{list_backups, next_sequence, restore, BackupRecord, ScriptFile};
pub use settings::{ExecutionConfig, Platform};
