//! Sanitizing tokenizer.
//!
//! One left-to-right pass over the script bytes decides which `;` are not
//! statement boundaries (inside a string, brackets or a comment) and which
//! bytes belong to a `...` continuation tail. Masking replaces bytes
//! one-for-one, so offsets into the masked text are offsets into the
//! original script.

/// Stand-in for a protected `;`. Never valid in a script.
pub const SENTINEL: u8 = 0x01;

/// Scanner state, reset at every newline that does not end a continuation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenState {
    pub in_comment: bool,
    /// Delimiter of the open string literal, `'` or `"`.
    pub in_string: Option<u8>,
    pub bracket_depth: i32,
    pub in_line_continuation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskPlan {
    /// `;` that must be hidden from the boundary regex.
    pub protect: Vec<bool>,
    /// Continuation bytes, replaced by spaces for good.
    pub blank: Vec<bool>,
}

impl MaskPlan {
    pub fn scan(script: &str) -> Self {
        let bytes = script.as_bytes();
        let mut protect = vec![false; bytes.len()];
        let mut blank = vec![false; bytes.len()];
        let mut state = TokenState::default();

        for (i, &c) in bytes.iter().enumerate() {
            if state.in_line_continuation {
                blank[i] = true;
            }
            let quoted = state.in_string.is_some();
            if c == b';' && (quoted || state.bracket_depth > 0 || state.in_comment) {
                protect[i] = true;
            }
            if (c == b'\'' || c == b'"') && !state.in_comment {
                state.in_string = match state.in_string {
                    None => Some(c),
                    Some(open) if open == c => None,
                    other => other,
                };
            }
            if c == b'\n' {
                if !state.in_line_continuation {
                    state.bracket_depth = 0;
                }
                state.in_comment = false;
                state.in_string = None;
                state.in_line_continuation = false;
            }
            let code = state.in_string.is_none() && !state.in_comment;
            match c {
                b'(' | b'[' | b'{' if code => state.bracket_depth += 1,
                b')' | b']' | b'}' if code => state.bracket_depth -= 1,
                b'%' if state.in_string.is_none() => state.in_comment = true,
                b'.' if code && i >= 2 && bytes[i - 2..i] == *b".." => {
                    state.in_line_continuation = true;
                    state.in_comment = true;
                    blank[i - 2..=i].iter_mut().for_each(|b| *b = true);
                }
                _ => {}
            }
        }

        Self { protect, blank }
    }

    /// Applies the plan to the script it was scanned from.
    pub fn apply(&self, script: &str) -> String {
        let masked: Vec<u8> = script
            .bytes()
            .enumerate()
            .map(|(i, c)| {
                if self.blank[i] {
                    b' '
                } else if self.protect[i] {
                    SENTINEL
                } else {
                    c
                }
            })
            .collect();
        // blanking covers whole continuation tails, so multi-byte
        // characters are either kept intact or fully replaced
        String::from_utf8_lossy(&masked).into_owned()
    }

    pub fn protected_count(&self) -> usize {
        self.protect.iter().filter(|p| **p).count()
    }
}

pub fn sanitize(script: &str) -> String {
    MaskPlan::scan(script).apply(script)
}

/// Turns protected terminators back into `;`.
pub fn unmask(text: &str) -> String {
    text.replace(SENTINEL as char, ";")
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: char = SENTINEL as char;

    #[test]
    fn test_terminator_in_string_is_protected() {
        assert_eq!(sanitize("a = 'x;y';"), format!("a = 'x{}y';", S));
    }

    #[test]
    fn test_terminator_in_double_quoted_string_is_protected() {
        assert_eq!(sanitize("a = \"x;y\";"), format!("a = \"x{}y\";", S));
        assert_eq!(sanitize("a = \"it's;\"; b = 1;"), format!("a = \"it's{}\"; b = 1;", S));
        assert_eq!(sanitize("a = 'say \"hi\";'; b = 1;"), format!("a = 'say \"hi\"{}'; b = 1;", S));
        assert_eq!(sanitize("a = \"p\"\"q;\";"), format!("a = \"p\"\"q{}\";", S));
    }

    #[test]
    fn test_terminator_in_brackets_is_protected() {
        assert_eq!(sanitize("a = [1;2;3];"), format!("a = [1{s}2{s}3];", s = S));
        assert_eq!(sanitize("f(g(1);2);"), format!("f(g(1){s}2);", s = S));
    }

    #[test]
    fn test_terminator_in_comment_is_protected() {
        assert_eq!(sanitize("% a = 1;\nb = 2;"), format!("% a = 1{}\nb = 2;", S));
    }

    #[test]
    fn test_quote_inside_comment_does_not_open_string() {
        assert_eq!(sanitize("% it's\nb = 2;"), "% it's\nb = 2;");
    }

    #[test]
    fn test_newline_resets_state() {
        // unbalanced bracket on one line does not leak into the next
        assert_eq!(sanitize("a = [1\nb = 2;"), "a = [1\nb = 2;");
        assert_eq!(sanitize("s = 'open\nb = 2;"), "s = 'open\nb = 2;");
    }

    #[test]
    fn test_continuation_tail_is_blanked() {
        let script = "a = 1 + ... tail; words\n 2;";
        let masked = sanitize(script);
        assert_eq!(masked.len(), script.len());
        assert_eq!(masked, format!("a = 1 +{} 2;", " ".repeat(17)));
        assert!(!masked.contains("tail"));
    }

    #[test]
    fn test_continuation_keeps_bracket_depth() {
        let masked = sanitize("a = [1; ...\n 2; 3];");
        assert_eq!(masked, format!("a = [1{s}      2{s} 3];", s = S));
    }

    #[test]
    fn test_dots_inside_string_are_not_a_continuation() {
        assert_eq!(sanitize("s = 'wait...';"), "s = 'wait...';");
    }

    #[test]
    fn test_multibyte_text_is_preserved() {
        let script = "s = 'µs;';\nt = 1; ... é\n";
        let masked = sanitize(script);
        assert_eq!(masked.len(), script.len());
        assert!(masked.starts_with("s = 'µs"));
        assert!(!masked.contains('é'));
        assert_eq!(unmask(&masked).matches(';').count(), 3);
    }

    #[test]
    fn test_protected_terminator_in_tail_stays_blank() {
        let masked = sanitize("a = 1 + ... x;y\n 2;");
        assert!(!masked.contains(S));
        assert_eq!(unmask(&masked).matches(';').count(), 1);
    }

    #[test]
    fn test_unmask_restores_terminators() {
        let script = "a = {'p;q', [1;2]};";
        assert_eq!(unmask(&sanitize(script)), script);
    }

    #[test]
    fn test_plan_state_counts() {
        let plan = MaskPlan::scan("a = [1;2]; % x;y\n");
        assert_eq!(plan.protected_count(), 2);
        assert_eq!(plan.blank.iter().filter(|b| **b).count(), 0);
    }
}
