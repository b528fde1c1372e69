//! Command-line interface for cfgedit
//!
//! Results go to stdout (plain source text, or JSON with `--json`); logs
//! and error reports go to stderr.

use crate::config::ExecutionConfig;
use crate::editor::{ConfigEditor, LiveAssignment};
use crate::engine::{ScriptEngine, ScriptRuntime};
use crate::logging::{init_logging, LogConfig};
use crate::CfgEditError;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};

/// cfgedit command-line interface
#[derive(Parser, Debug)]
#[command(name = "cfgedit")]
#[command(about = "Read and safely rewrite assignments in executable config scripts")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct CfgEditCli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable JSON output for machine-readable results
    #[arg(long, global = true)]
    pub json: bool,

    /// Execution settings file (platform, environment, pre-bound variables)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub context: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the value a variable has after running the script
    Get {
        file: PathBuf,
        name: String,
    },

    /// Rewrite the live assignment of one or more variables
    Set {
        file: PathBuf,
        name: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
        /// Further NAME VALUE pairs, applied in order
        #[arg(allow_hyphen_values = true, value_name = "NAME VALUE")]
        more: Vec<String>,
    },

    /// Print every variable the script defines
    Show {
        file: PathBuf,
    },

    /// List every assignment to a variable and mark the live one
    Locate {
        file: PathBuf,
        name: String,
    },

    /// List numbered backups of a script
    Backups {
        file: PathBuf,
    },

    /// Copy a backup back over the script
    Restore {
        file: PathBuf,
        /// Backup number to restore (latest when omitted)
        #[arg(short, long)]
        sequence: Option<u32>,
    },
}

/// CLI command executor
pub struct CliExecutor<E: ScriptEngine> {
    editor: ConfigEditor<E>,
    json_output: bool,
}

impl<E: ScriptEngine> CliExecutor<E> {
    pub fn new(editor: ConfigEditor<E>, json_output: bool) -> Self {
        Self {
            editor,
            json_output,
        }
    }

    /// Execute a CLI command, writing its result to `out`
    pub fn execute(&self, command: Commands, out: &mut impl Write) -> anyhow::Result<()> {
        match command {
            Commands::Get { file, name } => {
                let value = self.editor.get(&file, &name)?;
                if self.json_output {
                    let body = serde_json::json!({ "name": name, "value": value });
                    writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
                } else {
                    writeln!(out, "{}", value)?;
                }
            }
            Commands::Set {
                file,
                name,
                value,
                more,
            } => {
                let assignments = pair_up(name, value, more)?;
                let backup = self.editor.set(&file, &assignments)?;
                if self.json_output {
                    let body = serde_json::json!({
                        "file": file,
                        "updated": assignments.iter().map(|(n, _)| n).collect::<Vec<_>>(),
                        "backup": backup,
                    });
                    writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
                } else if let Some(backup) = backup {
                    writeln!(out, "{}", backup.path.display())?;
                }
            }
            Commands::Show { file } => {
                let workspace = self.editor.show(&file)?;
                if self.json_output {
                    writeln!(out, "{}", serde_json::to_string_pretty(&workspace)?)?;
                } else {
                    for (name, value) in workspace.iter() {
                        writeln!(out, "{} = {};", name, value)?;
                    }
                }
            }
            Commands::Locate { file, name } => {
                let report = self.editor.locate(&file, &name)?;
                if self.json_output {
                    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
                } else {
                    write_locate_report(&report, out)?;
                }
            }
            Commands::Backups { file } => {
                let backups = self.editor.backups(&file)?;
                if self.json_output {
                    writeln!(out, "{}", serde_json::to_string_pretty(&backups)?)?;
                } else {
                    for backup in &backups {
                        writeln!(out, "{:03}\t{}", backup.sequence, backup.path.display())?;
                    }
                }
            }
            Commands::Restore { file, sequence } => {
                let record = self.editor.restore(&file, sequence)?;
                if self.json_output {
                    let body = serde_json::json!({ "file": file, "restored_from": record });
                    writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
                } else {
                    writeln!(out, "{}", record.path.display())?;
                }
            }
        }
        Ok(())
    }
}

fn pair_up(
    name: String,
    value: String,
    more: Vec<String>,
) -> anyhow::Result<Vec<(String, String)>> {
    if more.len() % 2 != 0 {
        bail!("set expects NAME VALUE pairs; '{}' has no value", more[more.len() - 1]);
    }
    let mut assignments = vec![(name, value)];
    let mut rest = more.into_iter();
    while let (Some(name), Some(value)) = (rest.next(), rest.next()) {
        assignments.push((name, value));
    }
    Ok(assignments)
}

fn write_locate_report(report: &LiveAssignment, out: &mut impl Write) -> std::io::Result<()> {
    for occurrence in &report.occurrences {
        let marker = if occurrence.sequence_id == report.live { '*' } else { ' ' };
        let first_line = occurrence.text.lines().next().unwrap_or_default();
        writeln!(
            out,
            "{} [{}] line {}: {}",
            marker, occurrence.sequence_id, occurrence.line, first_line
        )?;
    }
    Ok(())
}

/// Builds the script runtime from the execution settings named on the
/// command line (or the default settings file).
pub fn build_runtime(context: Option<&std::path::Path>) -> anyhow::Result<ScriptRuntime> {
    let config = ExecutionConfig::resolve(context)?;
    let runtime = ScriptRuntime::new(config)
        .map_err(|e| CfgEditError::Configuration(format!("invalid pre-bound variable: {}", e)))
        .context("cannot prepare the script runtime")?;
    Ok(runtime)
}

/// Run the CLI interface
pub fn run(cli: CfgEditCli) -> ExitCode {
    let log_config = if cli.verbose {
        LogConfig::verbose().with_env()
    } else {
        LogConfig::from_env()
    };
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    debug!(command = ?cli.command, "Starting cfgedit");

    let json = cli.json;
    let result = build_runtime(cli.context.as_deref()).and_then(|runtime| {
        let executor = CliExecutor::new(ConfigEditor::new(runtime), json);
        executor.execute(cli.command, &mut std::io::stdout().lock())
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {:#}", e);
            if json {
                let error_json = serde_json::json!({
                    "error": true,
                    "message": format!("{:#}", e),
                });
                println!("{}", error_json);
            } else {
                eprintln!("error: {:#}", e);
            }
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn run_to_string(executor: &CliExecutor<ScriptRuntime>, command: Commands) -> String {
        let mut out = Vec::new();
        executor.execute(command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_cli_parsing() {
        let cli = CfgEditCli::try_parse_from(["cfgedit", "get", "rig.m", "gain"]).unwrap();
        match cli.command {
            Commands::Get { file, name } => {
                assert_eq!(file, PathBuf::from("rig.m"));
                assert_eq!(name, "gain");
            }
            other => panic!("Expected Get command, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = CfgEditCli::try_parse_from([
            "cfgedit",
            "show",
            "rig.m",
            "--verbose",
            "--json",
            "--context",
            "ctx.toml",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.json);
        assert_eq!(cli.context, Some(PathBuf::from("ctx.toml")));
    }

    #[test]
    fn test_set_accepts_pairs_and_negative_values() {
        let cli = CfgEditCli::try_parse_from(["cfgedit", "set", "rig.m", "a", "-5", "b", "'x'"])
            .unwrap();
        match cli.command {
            Commands::Set {
                name, value, more, ..
            } => {
                let pairs = pair_up(name, value, more).unwrap();
                assert_eq!(
                    pairs,
                    vec![("a".to_string(), "-5".to_string()), ("b".to_string(), "'x'".to_string())]
                );
            }
            other => panic!("Expected Set command, got {:?}", other),
        }
        assert!(pair_up("a".into(), "1".into(), vec!["b".into()]).is_err());
    }

    #[test]
    fn test_restore_sequence_flag() {
        let cli = CfgEditCli::try_parse_from(["cfgedit", "restore", "rig.m", "--sequence", "3"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Restore { sequence: Some(3), .. }));
    }

    #[test]
    fn test_execute_get_set_and_show() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("rig.m");
        fs::write(&file, "gain = 2;\nname = 'amp';\n").unwrap();
        let executor = CliExecutor::new(ConfigEditor::default(), false);

        let out = run_to_string(
            &executor,
            Commands::Get {
                file: file.clone(),
                name: "name".into(),
            },
        );
        assert_eq!(out, "'amp'\n");

        let out = run_to_string(
            &executor,
            Commands::Set {
                file: file.clone(),
                name: "gain".into(),
                value: "[1 2]".into(),
                more: vec![],
            },
        );
        assert!(out.trim_end().ends_with("rig.bak001"));

        let out = run_to_string(&executor, Commands::Show { file });
        assert_eq!(out, "gain = [1, 2];\nname = 'amp';\n");
    }

    #[test]
    fn test_execute_locate_marks_live_occurrence() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("rig.m");
        fs::write(&file, "a = 1;\nif false\n  a = 2;\nend\n").unwrap();
        let executor = CliExecutor::new(ConfigEditor::default(), false);

        let out = run_to_string(
            &executor,
            Commands::Locate {
                file,
                name: "a".into(),
            },
        );
        assert_eq!(out, "* [1] line 1: a = 1;\n  [2] line 3: a = 2;\n");
    }

    #[test]
    fn test_json_output_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("rig.m");
        fs::write(&file, "gain = 2;\n").unwrap();
        let executor = CliExecutor::new(ConfigEditor::default(), true);

        let out = run_to_string(
            &executor,
            Commands::Get {
                file,
                name: "gain".into(),
            },
        );
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["name"], "gain");
        assert_eq!(parsed["value"], 2.0);
    }

    #[test]
    fn test_missing_context_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("ctx.toml");
        assert!(build_runtime(Some(&missing)).is_err());
    }
}
