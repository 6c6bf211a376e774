use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Descriptor that receives stdout when a directive names none.
pub const DEFAULT_OUTPUT_FD: usize = 1;
/// Descriptor that receives stdin when a directive names none.
pub const DEFAULT_INPUT_FD: usize = 0;

/// Errors produced while tokenizing redirection directives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("unrecognized redirection '{0}'")]
    Unrecognized(String),
    #[error("'{0}' is not a valid file descriptor")]
    BadDescriptor(String),
    #[error("redirection '{0}' is missing its target")]
    MissingTarget(String),
}

/// Descriptor selected by an output directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFd {
    /// `n>` or plain `>`
    Fd(usize),
    /// `&>`: stdout and stderr together
    Both,
}

/// A redirection operator without its target word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `[n]>`, `[n]>>`, `&>`, `&>>`
    Output { fd: OutputFd, append: bool },
    /// `[n]>&m`
    Duplicate { fd: usize, source: usize },
    /// `[n]<`, `[n]<>`
    Input { fd: usize, writable: bool },
}

impl Operator {
    /// Whether the operator consumes the following word as a file name.
    pub fn takes_target(&self) -> bool {
        !matches!(self, Operator::Duplicate { .. })
    }
}

/// A fully parsed redirection directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectDirective {
    /// > file, >> file, 2> file, &> file
    Output {
        fd: OutputFd,
        append: bool,
        target: String,
    },
    /// 2>&1, >&2
    Duplicate { fd: usize, source: usize },
    /// < file, 3< file, <> file
    Input {
        fd: usize,
        writable: bool,
        target: String,
    },
}

/// Parse the operator part of a redirection (`2>>`, `>&2`, `<>`, ...).
pub fn parse_operator(text: &str) -> Result<Operator, DirectiveError> {
    let unrecognized = || DirectiveError::Unrecognized(text.to_string());
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut pos = 0;

    // Leading descriptor number or `&`
    while pos < len && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    let explicit_fd = if pos > 0 {
        Some(parse_fd(&chars[..pos])?)
    } else {
        None
    };
    let both = explicit_fd.is_none() && pos < len && chars[pos] == '&';
    if both {
        pos += 1;
    }

    if pos >= len {
        return Err(unrecognized());
    }

    match chars[pos] {
        '>' => {
            pos += 1;
            // >>, &>>
            if pos < len && chars[pos] == '>' {
                if pos + 1 != len {
                    return Err(unrecognized());
                }
                return Ok(Operator::Output {
                    fd: output_fd(explicit_fd, both),
                    append: true,
                });
            }
            // >&m
            if pos < len && chars[pos] == '&' {
                if both || pos + 1 >= len || !chars[pos + 1..].iter().all(|c| c.is_ascii_digit())
                {
                    return Err(unrecognized());
                }
                return Ok(Operator::Duplicate {
                    fd: explicit_fd.unwrap_or(DEFAULT_OUTPUT_FD),
                    source: parse_fd(&chars[pos + 1..])?,
                });
            }
            if pos != len {
                return Err(unrecognized());
            }
            Ok(Operator::Output {
                fd: output_fd(explicit_fd, both),
                append: false,
            })
        }
        '<' if !both => {
            pos += 1;
            let writable = pos < len && chars[pos] == '>';
            if writable {
                pos += 1;
            }
            if pos != len {
                return Err(unrecognized());
            }
            Ok(Operator::Input {
                fd: explicit_fd.unwrap_or(DEFAULT_INPUT_FD),
                writable,
            })
        }
        _ => Err(unrecognized()),
    }
}

/// Whether `word` is one of the recognized redirection operators.
pub fn is_directive(word: &str) -> bool {
    parse_operator(word).is_ok()
}

/// Turn raw redirection tokens into directives. Operators that take a file
/// consume the token that follows them.
pub fn parse_redirections(tokens: &[String]) -> Result<Vec<RedirectDirective>, DirectiveError> {
    let mut directives = Vec::with_capacity(tokens.len());
    let mut iter = tokens.iter();
    while let Some(token) = iter.next() {
        let directive = match parse_operator(token)? {
            Operator::Output { fd, append } => RedirectDirective::Output {
                fd,
                append,
                target: next_target(token, iter.next())?,
            },
            Operator::Duplicate { fd, source } => RedirectDirective::Duplicate { fd, source },
            Operator::Input { fd, writable } => RedirectDirective::Input {
                fd,
                writable,
                target: next_target(token, iter.next())?,
            },
        };
        directives.push(directive);
    }
    Ok(directives)
}

fn next_target(operator: &str, target: Option<&String>) -> Result<String, DirectiveError> {
    target
        .cloned()
        .ok_or_else(|| DirectiveError::MissingTarget(operator.to_string()))
}

fn output_fd(explicit: Option<usize>, both: bool) -> OutputFd {
    match explicit {
        Some(fd) => OutputFd::Fd(fd),
        None if both => OutputFd::Both,
        None => OutputFd::Fd(DEFAULT_OUTPUT_FD),
    }
}

fn parse_fd(digits: &[char]) -> Result<usize, DirectiveError> {
    let text: String = digits.iter().collect();
    text.parse()
        .map_err(|_| DirectiveError::BadDescriptor(text.clone()))
}
