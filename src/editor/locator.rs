use crate::{CfgEditError, Result};
use regex::Regex;
use serde::Serialize;

/// One textual `name = ...;` statement, as byte offsets into the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssignmentOccurrence {
    pub start: usize,
    pub end: usize,
    /// 1-based position among the matches, in document order.
    pub sequence_id: usize,
}

impl AssignmentOccurrence {
    pub fn text<'a>(&self, script: &'a str) -> &'a str {
        &script[self.start..self.end]
    }

    /// 1-based line the statement starts on.
    pub fn line(&self, script: &str) -> usize {
        script.as_bytes()[..self.start]
            .iter()
            .filter(|b| **b == b'\n')
            .count()
            + 1
    }
}

/// Finds every top-level assignment to `name` in sanitized text.
pub fn find_assignments(masked: &str, name: &str) -> Result<Vec<AssignmentOccurrence>> {
    let pattern = format!(r"\b{}[ \t]*=[^;\n]*;", regex::escape(name));
    let regex =
        Regex::new(&pattern).map_err(|_| CfgEditError::InvalidIdentifier(name.to_string()))?;
    let bytes = masked.as_bytes();

    let mut occurrences = Vec::new();
    let mut position = 0;
    while let Some(m) = regex.find_at(masked, position) {
        let equals = m.start()
            + name.len()
            + masked[m.start() + name.len()..]
                .bytes()
                .take_while(|b| *b == b' ' || *b == b'\t')
                .count();
        let comparison = bytes.get(equals + 1) == Some(&b'=');
        let field = m.start() > 0 && bytes[m.start() - 1] == b'.';
        if comparison || field {
            position = m.start() + name.len();
            continue;
        }
        occurrences.push(AssignmentOccurrence {
            start: m.start(),
            end: m.end(),
            sequence_id: occurrences.len() + 1,
        });
        position = m.end();
    }

    if occurrences.is_empty() {
        return Err(CfgEditError::VariableNotAssigned(name.to_string()));
    }
    Ok(occurrences)
}
