//! Config script editing
//!
//! `ConfigEditor` drives a single edit through a fixed sequence of gates:
//! read the file, sanitize, locate the assignments, instrument, verify,
//! back up, write. A failure at any gate leaves the file as it was.

pub mod instrument;
pub mod locator;
pub mod sanitizer;
pub mod verifier;

pub use locator::AssignmentOccurrence;
pub use verifier::Verified;

use crate::config::{self, BackupRecord, ScriptFile};
use crate::engine::parser::is_identifier;
use crate::engine::{ScriptEngine, ScriptRuntime, Value, Workspace};
use crate::{trace_performance, CfgEditError, Result};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stages of a single `set_value` call, logged as it progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Reading,
    Sanitizing,
    Locating,
    Instrumenting,
    Verifying,
    BackingUp,
    Writing,
    Done,
    Aborted,
}

impl fmt::Display for EditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EditState::Reading => "reading",
            EditState::Sanitizing => "sanitizing",
            EditState::Locating => "locating",
            EditState::Instrumenting => "instrumenting",
            EditState::Verifying => "verifying",
            EditState::BackingUp => "backing-up",
            EditState::Writing => "writing",
            EditState::Done => "done",
            EditState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// One textual assignment as reported by `locate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccurrenceReport {
    pub sequence_id: usize,
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub text: String,
}

/// Every assignment to a variable and the one that runs last.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveAssignment {
    pub name: String,
    pub occurrences: Vec<OccurrenceReport>,
    pub live: usize,
}

impl LiveAssignment {
    pub fn live_occurrence(&self) -> Option<&OccurrenceReport> {
        self.occurrences.iter().find(|o| o.sequence_id == self.live)
    }
}

/// Reads and edits config scripts through a [`ScriptEngine`].
pub struct ConfigEditor<E: ScriptEngine = ScriptRuntime> {
    engine: E,
}

impl Default for ConfigEditor<ScriptRuntime> {
    fn default() -> Self {
        Self::new(ScriptRuntime::default())
    }
}

impl<E: ScriptEngine> ConfigEditor<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Runs the unmodified script and returns the value bound to `name`.
    pub fn get(&self, path: impl AsRef<Path>, name: &str) -> Result<Value> {
        validate_identifier(name)?;
        let workspace = self.show(path)?;
        workspace
            .get(name)
            .cloned()
            .ok_or_else(|| CfgEditError::VariableNotFound(name.to_string()))
    }

    /// Runs the unmodified script and returns every final binding.
    pub fn show(&self, path: impl AsRef<Path>) -> Result<Workspace> {
        let file = ScriptFile::read(path)?;
        self.engine
            .execute(file.content())
            .map_err(|source| CfgEditError::ScriptExecutionFailed {
                stage: "original",
                source,
            })
    }

    /// Reports every assignment to `name` and which one is live. Never writes.
    pub fn locate(&self, path: impl AsRef<Path>, name: &str) -> Result<LiveAssignment> {
        validate_identifier(name)?;
        let file = ScriptFile::read(path)?;
        let script = file.content();
        instrument::check_instrumentable(script)?;

        let masked = sanitizer::sanitize(script);
        let occurrences = locator::find_assignments(&masked, name)?;
        let instrumented = instrument::instrument(&masked, &occurrences);
        let live = verifier::resolve_live(&self.engine, &instrumented, occurrences.len())?;

        Ok(LiveAssignment {
            name: name.to_string(),
            occurrences: occurrences
                .iter()
                .map(|o| OccurrenceReport {
                    sequence_id: o.sequence_id,
                    start: o.start,
                    end: o.end,
                    line: o.line(script),
                    text: o.text(script).to_string(),
                })
                .collect(),
            live,
        })
    }

    /// Rewrites the live assignment of `name` to `value_text`.
    ///
    /// With `backup` set, the file content as read is first copied to the
    /// next numbered backup, whose record is returned.
    pub fn set_value(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        value_text: &str,
        backup: bool,
    ) -> Result<Option<BackupRecord>> {
        let mut taken = None;
        self.apply(path.as_ref(), name, value_text, backup, &mut taken)?;
        Ok(taken)
    }

    /// Applies several edits in order.
    ///
    /// Only the first edit takes a backup. If any edit fails, that backup
    /// is copied back over the file before the error is returned.
    pub fn set<N, V>(
        &self,
        path: impl AsRef<Path>,
        assignments: &[(N, V)],
    ) -> Result<Option<BackupRecord>>
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let path = path.as_ref();
        let mut first_backup = None;

        for (index, (name, value)) in assignments.iter().enumerate() {
            let outcome = self.apply(
                path,
                name.as_ref(),
                value.as_ref(),
                index == 0,
                &mut first_backup,
            );
            if let Err(error) = outcome {
                return Err(rollback(path, first_backup.as_ref(), error));
            }
        }

        info!(path = %path.display(), edits = assignments.len(), "Applied edits");
        Ok(first_backup)
    }

    pub fn backups(&self, path: impl AsRef<Path>) -> Result<Vec<BackupRecord>> {
        config::list_backups(path.as_ref())
    }

    /// Copies a backup over the file: the one numbered `sequence`, or the
    /// most recent one.
    pub fn restore(&self, path: impl AsRef<Path>, sequence: Option<u32>) -> Result<BackupRecord> {
        let path = path.as_ref();
        let backups = config::list_backups(path)?;
        let chosen = match sequence {
            Some(sequence) => backups.into_iter().find(|r| r.sequence == sequence),
            None => backups.into_iter().last(),
        };
        let Some(record) = chosen else {
            let expected = config::persistence::backup_path(path, sequence.unwrap_or(1))?;
            return Err(CfgEditError::FileNotFound(expected));
        };
        config::restore(path, &record.path)?;
        Ok(record)
    }

    fn apply(
        &self,
        path: &Path,
        name: &str,
        value_text: &str,
        backup: bool,
        taken: &mut Option<BackupRecord>,
    ) -> Result<()> {
        let mut state = EditState::Reading;
        let result = self.run_edit(path, name, value_text, backup, taken, &mut state);
        match &result {
            Ok(()) => debug!(variable = %name, state = %EditState::Done, "Edit complete"),
            Err(error) => warn!(
                variable = %name,
                failed_at = %state,
                state = %EditState::Aborted,
                error = %error,
                "Edit aborted"
            ),
        }
        result
    }

    fn run_edit(
        &self,
        path: &Path,
        name: &str,
        value_text: &str,
        backup: bool,
        taken: &mut Option<BackupRecord>,
        state: &mut EditState,
    ) -> Result<()> {
        let mut enter = |next: EditState| {
            *state = next;
            debug!(variable = %name, state = %next, "Edit state");
        };

        enter(EditState::Reading);
        validate_identifier(name)?;
        let file = ScriptFile::open(path)?;
        let script = file.content();
        instrument::check_instrumentable(script)?;

        enter(EditState::Sanitizing);
        let masked = sanitizer::sanitize(script);

        enter(EditState::Locating);
        let occurrences = locator::find_assignments(&masked, name)?;

        enter(EditState::Instrumenting);
        let instrumented = instrument::instrument(&masked, &occurrences);

        enter(EditState::Verifying);
        let verified = trace_performance!("verify_edit", {
            verifier::verify(&self.engine, script, name, &occurrences, &instrumented, value_text)
        })?;

        if backup {
            enter(EditState::BackingUp);
            *taken = Some(file.backup()?);
        }

        enter(EditState::Writing);
        file.write(&verified.candidate)?;

        enter(EditState::Done);
        info!(
            path = %path.display(),
            variable = %name,
            occurrence = verified.live,
            value = %verified.value,
            "Updated assignment"
        );
        Ok(())
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(CfgEditError::InvalidIdentifier(name.to_string()))
    }
}

/// Restores the pre-batch content after a failed edit and hands back the
/// error to report.
fn rollback(path: &Path, backup: Option<&BackupRecord>, error: CfgEditError) -> CfgEditError {
    let Some(backup) = backup else {
        return error;
    };
    warn!(
        path = %path.display(),
        backup = %backup.path.display(),
        "Edit failed, restoring pre-batch content"
    );
    match config::restore(path, &backup.path) {
        Ok(()) => error,
        Err(reason) => CfgEditError::RollbackFailed {
            original: Box::new(error),
            target: PathBuf::from(path),
            backup: backup.path.clone(),
            reason: reason.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockScriptEngine;
    use crate::logging::init_test_logging;
    use std::fs;
    use tempfile::TempDir;

    fn script(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("rig.m");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_invalid_identifier_is_rejected_before_reading() {
        let editor = ConfigEditor::new(MockScriptEngine::new());
        let missing = Path::new("/definitely/not/here.m");
        for name in ["2a", "a-b", "end", ""] {
            assert!(matches!(
                editor.set_value(missing, name, "1", true),
                Err(CfgEditError::InvalidIdentifier(_))
            ));
        }
    }

    #[test]
    fn test_not_assigned_never_runs_the_engine() {
        let temp_dir = TempDir::new().unwrap();
        let path = script(&temp_dir, "b = 1;\n");
        // no expectations: any engine call would panic
        let editor = ConfigEditor::new(MockScriptEngine::new());
        assert!(matches!(
            editor.set_value(&path, "a", "2", true),
            Err(CfgEditError::VariableNotAssigned(_))
        ));
        assert!(editor.backups(&path).unwrap().is_empty());
    }

    #[test]
    fn test_verification_failure_leaves_file_and_takes_no_backup() {
        init_test_logging();
        let temp_dir = TempDir::new().unwrap();
        let path = script(&temp_dir, "a = 1;\nb = a;\n");

        let mut engine = MockScriptEngine::new();
        engine.expect_execute().returning(|text| {
            let a = if text.contains("a = 9") { 9.0 } else { 1.0 };
            Ok([
                ("a".to_string(), Value::Num(a)),
                ("b".to_string(), Value::Num(a)),
                (instrument::ACCUMULATOR.to_string(), Value::Num(1.0)),
            ]
            .into_iter()
            .collect())
        });
        engine.expect_evaluate().returning(|_| Ok(Value::Num(9.0)));

        let editor = ConfigEditor::new(engine);
        let err = editor.set_value(&path, "a", "9", true).unwrap_err();
        assert!(matches!(err, CfgEditError::VerificationFailed(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), "a = 1;\nb = a;\n");
        assert!(editor.backups(&path).unwrap().is_empty());
    }

    #[test]
    fn test_rollback_without_backup_returns_original_error() {
        let error = CfgEditError::VariableNotFound("a".into());
        let out = rollback(Path::new("x.m"), None, error);
        assert!(matches!(out, CfgEditError::VariableNotFound(_)));
    }

    #[test]
    fn test_failed_restore_reports_manual_recovery() {
        let temp_dir = TempDir::new().unwrap();
        let path = script(&temp_dir, "a = 1;\n");
        let gone = BackupRecord {
            path: temp_dir.path().join("rig.bak001"),
            sequence: 1,
        };
        let out = rollback(&path, Some(&gone), CfgEditError::VariableNotFound("a".into()));
        match out {
            CfgEditError::RollbackFailed { original, backup, .. } => {
                assert!(matches!(*original, CfgEditError::VariableNotFound(_)));
                assert_eq!(backup, gone.path);
            }
            other => panic!("expected RollbackFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_edit_state_names() {
        assert_eq!(EditState::BackingUp.to_string(), "backing-up");
        assert_eq!(EditState::Aborted.to_string(), "aborted");
    }
}
