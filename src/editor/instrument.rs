//! Instrumented copies of a script that record which assignment ran last.

use super::locator::AssignmentOccurrence;
use super::sanitizer::{unmask, SENTINEL};
use crate::engine::{Value, Workspace};
use crate::{CfgEditError, Result};

/// Variable the instrumented script appends occurrence ids to.
pub const ACCUMULATOR: &str = "cfgedit_trace__";

/// Rejects scripts that would collide with the instrumentation.
pub fn check_instrumentable(script: &str) -> Result<()> {
    if script.as_bytes().contains(&SENTINEL) {
        return Err(CfgEditError::InstrumentationInconsistent(
            "script contains a reserved control character".to_string(),
        ));
    }
    if script.contains(ACCUMULATOR) {
        return Err(CfgEditError::InstrumentationInconsistent(format!(
            "script already uses the reserved name '{}'",
            ACCUMULATOR
        )));
    }
    Ok(())
}

/// Replaces every occurrence in `masked` with an accumulator append.
pub fn instrument(masked: &str, occurrences: &[AssignmentOccurrence]) -> String {
    let mut text = masked.to_string();
    for occurrence in occurrences.iter().rev() {
        let marker = format!(
            "{acc} = [{acc}, {id}];",
            acc = ACCUMULATOR,
            id = occurrence.sequence_id
        );
        text.replace_range(occurrence.start..occurrence.end, &marker);
    }
    format!("{} = [];\n{}", ACCUMULATOR, unmask(&text))
}

/// Reads the live occurrence id out of an instrumented run.
///
/// The accumulator has to be a non-empty row of ids, each naming one of the
/// `count` occurrences. The last id is the assignment that ran last.
pub fn live_occurrence(workspace: &Workspace, count: usize) -> Result<usize> {
    let inconsistent = CfgEditError::InstrumentationInconsistent;
    let ids = match workspace.get(ACCUMULATOR) {
        Some(Value::Num(id)) => vec![*id],
        Some(Value::Matrix(m)) if m.rows == 1 && !m.is_empty() => m.data.clone(),
        Some(Value::Matrix(m)) if m.is_empty() => {
            return Err(inconsistent("no matched assignment was executed".to_string()))
        }
        Some(other) => {
            return Err(inconsistent(format!(
                "trace recorded a {} value",
                other.type_name()
            )))
        }
        None => return Err(inconsistent("trace variable was not bound".to_string())),
    };

    let mut live = 0;
    for id in ids {
        if id.fract() != 0.0 || id < 1.0 || id > count as f64 {
            return Err(inconsistent(format!(
                "trace recorded id {} outside 1..={}",
                id, count
            )));
        }
        live = id as usize;
    }
    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::locator::find_assignments;
    use crate::editor::sanitizer::sanitize;
    use crate::engine::Matrix;

    fn trace(value: Value) -> Workspace {
        [(ACCUMULATOR.to_string(), value)].into_iter().collect()
    }

    #[test]
    fn test_instrumented_text() {
        let script = "a = 1;\nb = 'p;q';\na = [1;2];\n";
        let masked = sanitize(script);
        let occurrences = find_assignments(&masked, "a").unwrap();
        assert_eq!(
            instrument(&masked, &occurrences),
            "cfgedit_trace__ = [];\n\
             cfgedit_trace__ = [cfgedit_trace__, 1];\n\
             b = 'p;q';\n\
             cfgedit_trace__ = [cfgedit_trace__, 2];\n"
        );
    }

    #[test]
    fn test_reserved_text_is_rejected() {
        assert!(check_instrumentable("a = 1;").is_ok());
        assert!(check_instrumentable("cfgedit_trace__ = 1;").is_err());
        assert!(check_instrumentable("a = '\u{1}';").is_err());
    }

    #[test]
    fn test_last_id_wins() {
        let ws = trace(Value::Matrix(Matrix::row(vec![1.0, 3.0, 2.0])));
        assert_eq!(live_occurrence(&ws, 3).unwrap(), 2);
        assert_eq!(live_occurrence(&trace(Value::Num(1.0)), 1).unwrap(), 1);
    }

    #[test]
    fn test_malformed_trace_is_inconsistent() {
        let cases = vec![
            trace(Value::empty()),
            trace(Value::Num(4.0)),
            trace(Value::Num(1.5)),
            trace(Value::Str("1".into())),
            trace(Value::Matrix(Matrix::new(2, 1, vec![1.0, 2.0]))),
            Workspace::default(),
        ];
        for ws in cases {
            assert!(matches!(
                live_occurrence(&ws, 3),
                Err(CfgEditError::InstrumentationInconsistent(_))
            ));
        }
    }
}
