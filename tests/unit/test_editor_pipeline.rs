//! Unit tests for the edit pipeline stages
//!
//! Drives sanitize, locate, instrument and verify by hand against the real
//! runtime, checking what each stage hands to the next.

use cfgedit::editor::instrument::{check_instrumentable, instrument, ACCUMULATOR};
use cfgedit::editor::locator::find_assignments;
use cfgedit::editor::sanitizer::{sanitize, unmask, SENTINEL};
use cfgedit::editor::verifier::{resolve_live, splice, verify};
use cfgedit::editor::AssignmentOccurrence;
use cfgedit::{CfgEditError, ExecutionConfig, Platform, ScriptEngine, ScriptRuntime, Value};

/// Masks, locates and instruments `script` the way the editor does.
fn prepare(script: &str, name: &str) -> (Vec<AssignmentOccurrence>, String) {
    check_instrumentable(script).unwrap();
    let masked = sanitize(script);
    let occurrences = find_assignments(&masked, name).unwrap();
    let instrumented = instrument(&masked, &occurrences);
    (occurrences, instrumented)
}

fn texts<'a>(script: &'a str, occurrences: &[AssignmentOccurrence]) -> Vec<&'a str> {
    occurrences.iter().map(|o| o.text(script)).collect()
}

#[test]
fn test_masking_preserves_offsets() {
    let script = "a = 'x;y'; % c;d\nb = [1;2]; c = 3 + ...\n  4;\n";
    let masked = sanitize(script);

    assert_eq!(masked.len(), script.len());
    assert_eq!(masked.bytes().filter(|b| *b == SENTINEL).count(), 3);
    assert_eq!(masked.lines().count(), script.lines().count() - 1);
    assert_eq!(unmask(&masked).matches(';').count(), 6);
}

#[test]
fn test_located_spans_index_the_original_text() {
    let script = "gain = 1; % first\nif false\n    gain = [1;2];\nend\nlabel = 'gain';\n";
    let masked = sanitize(script);
    let occurrences = find_assignments(&masked, "gain").unwrap();

    assert_eq!(texts(script, &occurrences), vec!["gain = 1;", "gain = [1;2];"]);
    assert_eq!(occurrences[1].line(script), 3);
    assert_eq!(
        occurrences.iter().map(|o| o.sequence_id).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[test]
fn test_similar_names_are_not_matched() {
    let script = "gain2 = 1;\nmy_gain = 2;\nopts.gain = 3;\nok = gain2 == 1;\ngain = 4;\n";
    let occurrences = find_assignments(&sanitize(script), "gain").unwrap();
    assert_eq!(texts(script, &occurrences), vec!["gain = 4;"]);
}

#[test]
fn test_instrumented_script_runs_and_names_the_live_occurrence() {
    let script = "mode = 2;\nif mode == 1\n  gain = 1;\n\
                  elseif mode == 2\n  gain = 2;\nelse\n  gain = 3;\nend\n";
    let (occurrences, instrumented) = prepare(script, "gain");

    assert!(instrumented.starts_with(&format!("{} = [];\n", ACCUMULATOR)));
    assert!(!instrumented.contains("gain = 2;"));
    assert!(!instrumented.contains(SENTINEL as char));

    let runtime = ScriptRuntime::default();
    let traced = runtime.execute(&instrumented).unwrap();
    assert!(!traced.contains("gain"));
    assert_eq!(resolve_live(&runtime, &instrumented, occurrences.len()).unwrap(), 2);
}

#[test]
fn test_live_occurrence_follows_execution_settings() {
    let script = "root = '/data';\nif ispc\n  root = 'C:\\data';\nend\n";
    let (occurrences, instrumented) = prepare(script, "root");

    let linux = ScriptRuntime::new(ExecutionConfig {
        platform: Platform::Linux,
        ..ExecutionConfig::default()
    })
    .unwrap();
    let windows = ScriptRuntime::new(ExecutionConfig {
        platform: Platform::Windows,
        ..ExecutionConfig::default()
    })
    .unwrap();

    assert_eq!(resolve_live(&linux, &instrumented, occurrences.len()).unwrap(), 1);
    assert_eq!(resolve_live(&windows, &instrumented, occurrences.len()).unwrap(), 2);
}

#[test]
fn test_unexecuted_assignment_is_inconsistent() {
    let script = "if false\n  gain = 1;\nend\n";
    let (occurrences, instrumented) = prepare(script, "gain");

    let err =
        resolve_live(&ScriptRuntime::default(), &instrumented, occurrences.len()).unwrap_err();
    assert!(matches!(err, CfgEditError::InstrumentationInconsistent(_)));
}

#[test]
fn test_splice_keeps_everything_outside_the_value() {
    let script = "x = 0;\ngain  =\t1 + ... old\n  2;   % dB\ny = 1;\n";
    let occurrences = find_assignments(&sanitize(script), "gain").unwrap();

    let candidate = splice(script, &occurrences[0], " 7 ; ");
    assert_eq!(candidate, "x = 0;\ngain  =\t7;   % dB\ny = 1;\n");
}

#[test]
fn test_verify_accepts_a_surgical_edit() {
    let script = "a = 1;\nb = 'keep;me';\nc = [1;2];\na = 5;\n";
    let (occurrences, instrumented) = prepare(script, "a");

    let verified = verify(
        &ScriptRuntime::default(),
        script,
        "a",
        &occurrences,
        &instrumented,
        "{'x', 2}",
    )
    .unwrap();

    assert_eq!(verified.live, 2);
    assert_eq!(
        verified.value,
        Value::Cell(vec![Value::Str("x".into()), Value::Num(2.0)])
    );
    assert_eq!(verified.candidate, "a = 1;\nb = 'keep;me';\nc = [1;2];\na = {'x', 2};\n");
}

#[test]
fn test_verify_rejects_values_that_cannot_stand_alone() {
    let script = "a = 1;\nb = 2;\na = 3;\n";
    let (occurrences, instrumented) = prepare(script, "a");
    let runtime = ScriptRuntime::default();

    let err = verify(&runtime, script, "a", &occurrences, &instrumented, "b").unwrap_err();
    assert!(matches!(err, CfgEditError::InvalidValueExpression { .. }));

    let err =
        verify(&runtime, script, "a", &occurrences, &instrumented, "error('no')").unwrap_err();
    assert!(matches!(err, CfgEditError::InvalidValueExpression { .. }));
}

#[test]
fn test_verify_catches_a_later_override() {
    // the transpose makes the scanner see a string, hiding the second
    // statement on that line
    let script = "a = 5;\nv = [1 2]'; a = 1;\n";
    let (occurrences, instrumented) = prepare(script, "a");
    assert_eq!(occurrences.len(), 1);

    let err = verify(
        &ScriptRuntime::default(),
        script,
        "a",
        &occurrences,
        &instrumented,
        "7",
    )
    .unwrap_err();
    match err {
        CfgEditError::VerificationFailed(message) => {
            assert_eq!(message, "'a' would be 1 instead of 7")
        }
        other => panic!("expected verification failure, got {:?}", other),
    }
}

#[test]
fn test_double_quoted_terminator_stays_inside_the_statement() {
    let script = "a = \"x;y\";\nb = 'say \"hi\"; ok';\na = \"p\"\"q;\";\n";
    let (occurrences, instrumented) = prepare(script, "a");
    assert_eq!(texts(script, &occurrences), vec!["a = \"x;y\";", "a = \"p\"\"q;\";"]);

    let runtime = ScriptRuntime::default();
    assert_eq!(resolve_live(&runtime, &instrumented, occurrences.len()).unwrap(), 2);
}

#[test]
fn test_reserved_content_is_refused() {
    assert!(matches!(
        check_instrumentable("a = 1;\x01"),
        Err(CfgEditError::InstrumentationInconsistent(_))
    ));
    assert!(matches!(
        check_instrumentable(&format!("{} = 1;\n", ACCUMULATOR)),
        Err(CfgEditError::InstrumentationInconsistent(_))
    ));
}
