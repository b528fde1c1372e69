use super::instrument::live_occurrence;
use super::locator::AssignmentOccurrence;
use crate::engine::{ScriptEngine, Value, Workspace};
use crate::{CfgEditError, Result};
use tracing::debug;

/// A candidate edit that passed the before/after comparison.
#[derive(Debug, Clone)]
pub struct Verified {
    /// Sequence id of the occurrence that was rewritten.
    pub live: usize,
    pub value: Value,
    pub candidate: String,
}

/// Runs the instrumented script and returns the live occurrence id.
pub fn resolve_live<E: ScriptEngine + ?Sized>(
    engine: &E,
    instrumented: &str,
    count: usize,
) -> Result<usize> {
    let traced = engine
        .execute(instrumented)
        .map_err(|source| CfgEditError::ScriptExecutionFailed {
            stage: "instrumented",
            source,
        })?;
    live_occurrence(&traced, count)
}

/// Normalizes caller-supplied value text: surrounding whitespace and a
/// trailing `;` are dropped.
pub fn normalize_value_text(value_text: &str) -> &str {
    let trimmed = value_text.trim();
    trimmed.strip_suffix(';').unwrap_or(trimmed).trim_end()
}

/// Replaces the right-hand side of `occurrence` in the original script.
///
/// The left-hand side (name, whitespace, `=` and the whitespace after it) is
/// kept byte for byte.
pub fn splice(script: &str, occurrence: &AssignmentOccurrence, value_text: &str) -> String {
    let text = occurrence.text(script);
    let lhs = match text.find('=') {
        Some(equals) => {
            let rest = &text[equals + 1..];
            equals + 1 + (rest.len() - rest.trim_start_matches([' ', '\t']).len())
        }
        None => text.len(),
    };
    let mut candidate = String::with_capacity(script.len() + value_text.len());
    candidate.push_str(&script[..occurrence.start + lhs]);
    candidate.push_str(normalize_value_text(value_text));
    candidate.push(';');
    candidate.push_str(&script[occurrence.end..]);
    candidate
}

/// Checks that `after` differs from `before` only in `name`, which must now
/// hold `expected`.
pub fn compare_workspaces(
    before: &Workspace,
    after: &Workspace,
    name: &str,
    expected: &Value,
) -> Result<()> {
    for (variable, old) in before.iter() {
        if variable == name {
            continue;
        }
        match after.get(variable) {
            Some(new) if old.equivalent(new) => {}
            Some(new) => {
                return Err(CfgEditError::VerificationFailed(format!(
                    "'{}' would change from {} to {}",
                    variable, old, new
                )))
            }
            None => {
                return Err(CfgEditError::VerificationFailed(format!(
                    "'{}' would no longer be defined",
                    variable
                )))
            }
        }
    }
    match after.get(name) {
        Some(actual) if actual.equivalent(expected) => Ok(()),
        Some(actual) => Err(CfgEditError::VerificationFailed(format!(
            "'{}' would be {} instead of {}",
            name, actual, expected
        ))),
        None => Err(CfgEditError::VerificationFailed(format!(
            "'{}' would not be defined",
            name
        ))),
    }
}

/// Proves that rewriting the live assignment of `name` to `value_text`
/// changes nothing else in the script's final bindings.
pub fn verify<E: ScriptEngine + ?Sized>(
    engine: &E,
    script: &str,
    name: &str,
    occurrences: &[AssignmentOccurrence],
    instrumented: &str,
    value_text: &str,
) -> Result<Verified> {
    let live = resolve_live(engine, instrumented, occurrences.len())?;
    debug!(variable = %name, live, candidates = occurrences.len(), "Resolved live assignment");

    let expression = normalize_value_text(value_text);
    let value = engine
        .evaluate(expression)
        .map_err(|source| CfgEditError::InvalidValueExpression {
            expression: expression.to_string(),
            source,
        })?;

    let before = engine
        .execute(script)
        .map_err(|source| CfgEditError::ScriptExecutionFailed {
            stage: "original",
            source,
        })?;

    let occurrence = occurrences
        .iter()
        .find(|o| o.sequence_id == live)
        .ok_or_else(|| {
            CfgEditError::InstrumentationInconsistent(format!("no occurrence with id {}", live))
        })?;
    let candidate = splice(script, occurrence, value_text);

    let after = engine
        .execute(&candidate)
        .map_err(|source| CfgEditError::ScriptExecutionFailed {
            stage: "edited",
            source,
        })?;

    compare_workspaces(&before, &after, name, &value)?;
    Ok(Verified {
        live,
        value,
        candidate,
    })
}
