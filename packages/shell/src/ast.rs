use std::fmt;

use serde::{Deserialize, Serialize};

use crate::token::{parse_redirections, DirectiveError, RedirectDirective};

/// One stage of a pipeline: the command words plus the raw redirection
/// tokens that followed them, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub tokens: Vec<String>,
    pub redirections: Vec<String>,
}

impl Statement {
    pub fn new(tokens: Vec<String>, redirections: Vec<String>) -> Self {
        Statement {
            tokens,
            redirections,
        }
    }

    /// A statement with command words and no redirections.
    pub fn command(words: &[&str]) -> Self {
        Statement {
            tokens: words.iter().map(|w| w.to_string()).collect(),
            redirections: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// The command name, if any.
    pub fn name(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    pub fn directives(&self) -> Result<Vec<RedirectDirective>, DirectiveError> {
        parse_redirections(&self.redirections)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for word in self.tokens.iter().chain(&self.redirections) {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(word)?;
            first = false;
        }
        Ok(())
    }
}
