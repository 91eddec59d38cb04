//! REPL syntax highlighting: colors statement keywords so a `require`
//! block reads distinctly from the script body around it.
//!
//! A `rustyline::Helper` that colors keywords by keyword set, built with
//! `rustyline-derive`'s combinator macros rather than hand-written no-op
//! trait impls.

use std::borrow::Cow;

use rustyline::highlight::Highlighter;
use rustyline_derive::{Completer, Helper, Hinter, Validator};

const COLOR_KEYWORD: &str = "\x1b[1;35m";
const COLOR_PERMISSION: &str = "\x1b[36m";
const COLOR_RESET: &str = "\x1b[0m";

const KEYWORDS: &[&str] =
    &["const", "require", "drop", "import", "if", "else", "for", "in", "switch", "case", "match", "return", "break", "continue", "fn", "sr"];

const PERMISSION_WORDS: &[&str] = &["allow", "forbid", "use", "limits"];

#[derive(Helper, Completer, Hinter, Validator)]
pub struct ReplHelper;

impl ReplHelper {
    pub fn new() -> Self {
        ReplHelper
    }
}

impl Default for ReplHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl Highlighter for ReplHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let colored = colorize(line);
        if colored == line {
            Cow::Borrowed(line)
        } else {
            Cow::Owned(colored)
        }
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: rustyline::highlight::CmdKind) -> bool {
        true
    }
}

fn colorize(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for word in split_preserving_whitespace(line) {
        if KEYWORDS.contains(&word) {
            out.push_str(COLOR_KEYWORD);
            out.push_str(word);
            out.push_str(COLOR_RESET);
        } else if PERMISSION_WORDS.contains(&word) {
            out.push_str(COLOR_PERMISSION);
            out.push_str(word);
            out.push_str(COLOR_RESET);
        } else {
            out.push_str(word);
        }
    }
    out
}

fn split_preserving_whitespace(line: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = line.as_bytes();
    let mut in_word = false;
    for (i, c) in line.char_indices() {
        let is_word_char = c.is_alphanumeric() || c == '_';
        if is_word_char && !in_word {
            if start < i {
                out.push(&line[start..i]);
            }
            start = i;
            in_word = true;
        } else if !is_word_char && in_word {
            out.push(&line[start..i]);
            start = i;
            in_word = false;
        }
    }
    let _ = bytes;
    if start < line.len() {
        out.push(&line[start..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colorizes_known_keyword() {
        let out = colorize("require { allow: {} }");
        assert!(out.contains(COLOR_KEYWORD));
        assert!(out.contains(COLOR_PERMISSION));
    }

    #[test]
    fn leaves_unknown_identifiers_untouched() {
        let out = colorize("my_var");
        assert_eq!(out, "my_var");
    }
}
