//! Execution context for config scripts
//!
//! Runs script text to completion and reports the resulting variable
//! bindings. The editor only ever consumes final bindings; it never looks
//! at how execution branched.

pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use interpreter::ScriptRuntime;
pub use value::{Matrix, Value};

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("runtime error on line {line}: {message}")]
    Runtime { line: usize, message: String },
}

/// Something that can run config scripts and evaluate free-standing
/// expressions.
#[cfg_attr(test, mockall::automock)]
pub trait ScriptEngine {
    /// Runs `script` to completion and returns its final bindings.
    fn execute(&self, script: &str) -> Result<Workspace, EngineError>;

    /// Evaluates a single expression with no variables in scope.
    fn evaluate(&self, expression: &str) -> Result<Value, EngineError>;
}

/// Final variable bindings of a completed script run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Workspace {
    bindings: BTreeMap<String, Value>,
}

impl Workspace {
    pub fn new(bindings: BTreeMap<String, Value>) -> Self {
        Self { bindings }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.bindings.iter()
    }
}

impl FromIterator<(String, Value)> for Workspace {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
