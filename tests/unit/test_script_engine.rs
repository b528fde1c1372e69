//! Unit tests for the script runtime
//!
//! Exercises the public engine API the editor relies on: running whole
//! config scripts, evaluating stand-alone value expressions, and the
//! execution settings that steer platform and environment checks.

use cfgedit::engine::Matrix;
use cfgedit::{
    EngineError, ExecutionConfig, Platform, ScriptEngine, ScriptRuntime, Value, Workspace,
};
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

const RIG_SCRIPT: &str = r#"% acquisition rig settings
rig_name = 'bench-2';   % shown in the GUI
sample_rate = 20e3;
channels = [1 2 3 4];
gain = 2.5;

if ispc
    data_root = 'D:\acq';
elseif ismac
    data_root = '/Users/Shared/acq';
else
    data_root = '/srv/acq';
end

opts.filter.order = 4;
opts.filter.cutoff = sample_rate / 4;
out_dir = fullfile(data_root, rig_name);
"#;

fn run_on(platform: Platform, script: &str) -> Workspace {
    let config = ExecutionConfig {
        platform,
        ..ExecutionConfig::default()
    };
    ScriptRuntime::new(config).unwrap().execute(script).unwrap()
}

fn string(value: &str) -> Value {
    Value::Str(value.to_string())
}

#[test]
fn test_rig_script_on_each_platform() {
    let linux = run_on(Platform::Linux, RIG_SCRIPT);
    assert_eq!(linux.get("out_dir"), Some(&string("/srv/acq/bench-2")));
    assert_eq!(linux.get("sample_rate"), Some(&Value::Num(20000.0)));
    assert_eq!(
        linux.get("channels"),
        Some(&Value::Matrix(Matrix::row(vec![1.0, 2.0, 3.0, 4.0])))
    );

    let windows = run_on(Platform::Windows, RIG_SCRIPT);
    assert_eq!(windows.get("out_dir"), Some(&string("D:\\acq\\bench-2")));

    let mac = run_on(Platform::Macos, RIG_SCRIPT);
    assert_eq!(mac.get("data_root"), Some(&string("/Users/Shared/acq")));
}

#[test]
fn test_nested_struct_fields() {
    let ws = run_on(Platform::Linux, RIG_SCRIPT);
    let Some(Value::Struct(opts)) = ws.get("opts") else {
        panic!("opts should be a struct: {:?}", ws.get("opts"));
    };
    let Some(Value::Struct(filter)) = opts.get("filter") else {
        panic!("opts.filter should be a struct");
    };
    assert_eq!(filter.get("order"), Some(&Value::Num(4.0)));
    assert_eq!(filter.get("cutoff"), Some(&Value::Num(5000.0)));
}

#[test]
fn test_workspace_lists_every_binding_in_name_order() {
    let ws = ScriptRuntime::default()
        .execute("zeta = 1;\nalpha = 'a';\nmid = true;")
        .unwrap();
    let names: Vec<&str> = ws.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    assert!(ws.contains("mid"));
    assert_eq!(ws.len(), 3);
}

#[test]
fn test_workspace_serializes_as_a_flat_object() {
    let ws = ScriptRuntime::default()
        .execute("gain = 2;\nname = 'amp';\nenabled = false;")
        .unwrap();
    let json = serde_json::to_value(&ws).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "enabled": false, "gain": 2.0, "name": "amp" })
    );
}

#[test]
fn test_semicolons_inside_strings_and_brackets() {
    let ws = ScriptRuntime::default()
        .execute("msg = 'a;b';\nm = [1;2];\nq = \"c;d\";")
        .unwrap();
    assert_eq!(ws.get("msg"), Some(&string("a;b")));
    assert_eq!(ws.get("q"), Some(&string("c;d")));
    assert_eq!(
        ws.get("m"),
        Some(&Value::Matrix(Matrix::new(2, 1, vec![1.0, 2.0])))
    );
}

#[test]
fn test_continuation_and_comments() {
    let ws = ScriptRuntime::default()
        .execute("total = 1 + ... first\n    2 + ... second\n    3;  % sum\n% a = 99;\n")
        .unwrap();
    assert_eq!(ws.get("total"), Some(&Value::Num(6.0)));
    assert!(!ws.contains("a"));
}

#[test]
fn test_display_text_evaluates_back() {
    let mut fields = BTreeMap::new();
    fields.insert("gain".to_string(), Value::Num(2.0));
    fields.insert("label".to_string(), string("it's"));

    let values = vec![
        Value::Num(0.1),
        Value::Num(-3.0),
        Value::Num(f64::INFINITY),
        Value::Bool(false),
        string("semi;colon 'quoted'"),
        string("first\nsecond"),
        string("tab\there\r\n"),
        Value::Matrix(Matrix::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])),
        Value::Matrix(Matrix::row(vec![f64::NAN, 0.5])),
        Value::Matrix(Matrix::empty()),
        Value::Cell(vec![string("a"), Value::Num(1.0)]),
        Value::Struct(fields),
    ];

    let runtime = ScriptRuntime::default();
    for value in values {
        let text = value.to_string();
        let back = runtime
            .evaluate(&text)
            .unwrap_or_else(|e| panic!("'{}' failed to evaluate: {}", text, e));
        assert!(back.equivalent(&value), "{} evaluated to {:?}", text, back);
    }
}

#[test]
fn test_evaluate_sees_no_script_variables() {
    let mut config = ExecutionConfig::default();
    config.variables.insert("rig".into(), "'B'".into());
    let runtime = ScriptRuntime::new(config).unwrap();

    assert_eq!(runtime.execute("x = rig;").unwrap().get("x"), Some(&string("B")));
    assert!(matches!(runtime.evaluate("rig"), Err(EngineError::Runtime { .. })));
    assert_eq!(runtime.evaluate("getenv('CFGEDIT_SURELY_UNSET') ").unwrap(), string(""));
}

#[test]
fn test_configured_environment() {
    let mut config = ExecutionConfig::default();
    config.environment.insert("ACQ_SITE".into(), "north".into());
    config.inherit_environment = false;
    let runtime = ScriptRuntime::new(config).unwrap();

    let ws = runtime
        .execute("site = getenv('ACQ_SITE');\nhome = getenv('PATH');")
        .unwrap();
    assert_eq!(ws.get("site"), Some(&string("north")));
    assert_eq!(ws.get("home"), Some(&string("")));
}

#[test]
fn test_context_file_drives_runtime() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("context.toml");
    fs::write(
        &path,
        r#"
platform = "windows"
inherit_environment = false

[environment]
LAB = "west"

[variables]
rig = "'B'"
"#,
    )
    .unwrap();

    let config = ExecutionConfig::load(&path).unwrap();
    assert_eq!(config.platform, Platform::Windows);

    let ws = ScriptRuntime::new(config)
        .unwrap()
        .execute("if ispc && strcmp(rig, 'B')\n  where = getenv('LAB');\nend")
        .unwrap();
    assert_eq!(ws.get("where"), Some(&string("west")));
}

#[test]
fn test_syntax_errors() {
    let runtime = ScriptRuntime::default();
    for script in ["a = [1 2;", "a = 'open;", "if true\n a = 1;\n", "a = = 2;"] {
        assert!(
            matches!(runtime.execute(script), Err(EngineError::Syntax { .. })),
            "expected a syntax error for {:?}",
            script
        );
    }
}

#[test]
fn test_loops_are_rejected() {
    let err = ScriptRuntime::default()
        .execute("for i = 1:3\n  a = i;\nend")
        .unwrap_err();
    assert!(err.to_string().contains("not supported"));
}

#[test]
fn test_runtime_error_reports_line() {
    let err = ScriptRuntime::default()
        .execute("a = 1;\n\nb = undefined_name;")
        .unwrap_err();
    match err {
        EngineError::Runtime { line, .. } => assert_eq!(line, 3),
        other => panic!("expected runtime error, got {:?}", other),
    }
}

#[test]
fn test_error_builtin_aborts_the_script() {
    let err = ScriptRuntime::default()
        .execute("if isempty(getenv('CFGEDIT_SURELY_UNSET'))\n  error('rig not configured');\nend")
        .unwrap_err();
    assert!(err.to_string().contains("rig not configured"));
}
