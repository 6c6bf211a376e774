use std::io;
use std::path::PathBuf;

use relay_shell::token::DirectiveError;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Invalid descriptor/mode combinations and malformed directives. These are
/// detected before the command runs and abort the stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("file descriptor {0} is out of range")]
    BadDescriptor(usize),
    #[error("file descriptor {0} is not open")]
    ClosedDescriptor(usize),
    #[error("should specify read and/or write")]
    NoAccessMode,
    #[error("channel is not readable")]
    ChannelNotReadable,
    #[error("channel is not writable")]
    ChannelNotWritable,
    #[error("{} is not readable", fd_name(*.0))]
    DescriptorNotReadable(usize),
    #[error("{} is not writable", fd_name(*.0))]
    DescriptorNotWritable(usize),
    #[error("cannot do multios with read/write streams (descriptor {0})")]
    ReadWriteMultios(usize),
}

fn fd_name(fd: usize) -> String {
    match fd {
        0 => "stdin".to_string(),
        1 => "stdout".to_string(),
        2 => "stderr".to_string(),
        n => format!("descriptor {n}"),
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("{0}: command not found")]
    CommandNotFound(String),
    #[error("{0}")]
    Command(String),
}

impl From<DirectiveError> for ExecError {
    fn from(e: DirectiveError) -> Self {
        ExecError::Config(ConfigError::Directive(e))
    }
}

impl ExecError {
    /// Short class name used in the diagnostic line written to stderr.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "ConfigError",
            Self::Io(e) if e.kind() == io::ErrorKind::Interrupted => "Interrupted",
            Self::Open { .. } | Self::Io(_) => "IoError",
            Self::CommandNotFound(_) => "CommandNotFound",
            Self::Command(_) => "CommandError",
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// A stage error plus any errors hit while reporting it.
#[derive(Debug)]
pub struct StageFailure {
    pub error: ExecError,
    pub suppressed: Vec<io::Error>,
}

impl StageFailure {
    pub fn new(error: ExecError) -> Self {
        Self {
            error,
            suppressed: Vec::new(),
        }
    }
}

/// Outcome of one pipeline stage. Exactly one of value, failure or code.
#[derive(Debug)]
pub enum StageResult {
    /// The command returned; the value may be null.
    Value(Value),
    /// Setup or the command failed with an error.
    Failed(StageFailure),
    /// The command signalled a numeric status through `context::error`.
    Code(i32),
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Value(_) => true,
            Self::Failed(_) => false,
            Self::Code(code) => *code == 0,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Value(_) => 0,
            Self::Failed(_) => 1,
            Self::Code(code) => *code,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            Self::Failed(f) => Some(f),
            _ => None,
        }
    }

    pub fn report(&self) -> StageReport {
        StageReport {
            exit_code: self.exit_code(),
            value: self.value().filter(|v| !v.is_null()).cloned(),
            error: self.failure().map(|f| f.error.to_string()),
        }
    }
}

/// Serializable summary of a [`StageResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
