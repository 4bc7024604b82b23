//! Assembly syntax validator
//! Date: 18/10/2026
//!
//! Checks program text line by line before it is handed to the simulator.
//! Blank lines are skipped, mnemonics and registers are case-insensitive.

use regex::Regex;
use thiserror::Error;

const REGISTER: &str = r"(?:AC|AX|BX|CX|DX)";
const NUMBER: &str = r"[+-]?\d+";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Syntax error on line {line}: {content}")]
    Syntax { line: usize, content: String },

    #[error("Invalid grammar: {0}")]
    Grammar(String),
}

pub use Error as SyntaxError;

pub struct Validator {
    rules: Vec<Regex>,
}

impl Validator {
    pub fn new() -> Result<Self, Error> {
        let r = REGISTER;
        let n = NUMBER;

        let rules = [
            format!(r"^MOV\s+{r}\s*,\s*(?:{r}|{n})$"),
            format!(r"^(?:LOAD|STORE|ADD|SUB|PUSH|POP)\s+{r}$"),
            format!(r"^(?:INC|DEC)(?:\s+{r})?$"),
            format!(r"^(?:SWAP|CMP)\s+{r}\s*,\s*{r}$"),
            format!(r"^(?:JE|JNE|JMP)\s+{n}$"),
            format!(r"^PARAM\s+{n}(?:\s*,\s*{n}){{0,2}}$"),
            r"^INT\s+_(?:08|09|10|20|21)H$".to_string(),
        ]
        .iter()
        .map(|rule| Regex::new(&format!("(?i){rule}")))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Grammar(e.to_string()))?;

        Ok(Self { rules })
    }

    pub fn is_valid_line(&self, line: &str) -> bool {
        let line = line.trim();
        line.is_empty() || self.rules.iter().any(|rule| rule.is_match(line))
    }

    /// Returns the first offending line, numbered from 1.
    pub fn validate(&self, text: &str) -> Result<(), Error> {
        match text
            .lines()
            .enumerate()
            .find(|(_, line)| !self.is_valid_line(line))
        {
            Some((index, line)) => Err(Error::Syntax {
                line: index + 1,
                content: line.trim().to_string(),
            }),
            None => Ok(()),
        }
    }
}

pub fn validate(text: &str) -> Result<(), Error> {
    Validator::new()?.validate(text)
}

/// Non-blank lines of `text`, trimmed, in order.
pub fn instructions(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}
