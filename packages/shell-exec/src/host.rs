use std::path::PathBuf;
use std::sync::Arc;

use relay_shell::ast::Statement;
use serde_json::Value;

use crate::channel::Channel;
use crate::context::StageContext;
use crate::control::ExecError;
use crate::job::Job;
use crate::stdio::StageIo;

// ---------------------------------------------------------------------------
// Session: shell-wide state a stage reads but does not own
// ---------------------------------------------------------------------------

pub trait Session: Send + Sync {
    /// Directory redirection targets are resolved against.
    fn current_dir(&self) -> PathBuf;

    /// Look up a session variable.
    fn get(&self, name: &str) -> Option<Value>;

    /// Render a command result for printing.
    fn format(&self, value: &Value) -> String;

    /// Bind the stage's streams for the calling thread.
    fn set_streams(&self, io: StageIo);

    /// Release the binding made by the matching `set_streams`.
    fn close_streams(&self);

    fn current_job(&self) -> Option<Arc<Job>>;

    /// The session's stdin, stdout and stderr channels.
    fn terminal_channels(&self) -> Vec<Channel>;
}

// ---------------------------------------------------------------------------
// CommandDispatcher: resolves and runs the command of a statement
// ---------------------------------------------------------------------------

pub trait CommandDispatcher: Send + Sync {
    fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        statement: &Statement,
    ) -> Result<Value, ExecError>;
}
