//! Runs one pipeline stage: applies its redirections, dispatches its command
//! with the resulting streams and reports what happened.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use relay_shell::ast::Statement;
use serde_json::Value;
use tracing::{debug, debug_span, warn};

use crate::channel::{pipe, Channel};
use crate::config::ExecConfig;
use crate::context::{CurrentStageGuard, StageContext, StageHandle};
use crate::control::{ConfigError, ExecError, StageFailure, StageResult};
use crate::host::{CommandDispatcher, Session};
use crate::job::JobControlGate;
use crate::multi::Stream;
use crate::redirect::RedirectionProcessor;
use crate::stdio::{copy_to_stream, StageIo, StreamReader};
use crate::streams::StreamTable;

/// One stage of a pipeline together with the streams it was handed. Entries
/// the caller marks as owned (pipe ends, typically) are closed when the
/// stage finishes; inherited entries are left open.
pub struct Pipe {
    session: Arc<dyn Session>,
    dispatcher: Arc<dyn CommandDispatcher>,
    statement: Statement,
    streams: StreamTable,
    config: ExecConfig,
}

/// Bookkeeping shared between the run and its failure/cleanup paths.
struct RunState {
    /// Where diagnostics go. Starts as the inherited stderr and follows any
    /// redirection of descriptor 2 once redirections succeed.
    error_stream: Option<Stream>,
    bound: bool,
}

impl Pipe {
    pub fn new(
        session: Arc<dyn Session>,
        dispatcher: Arc<dyn CommandDispatcher>,
        statement: Statement,
        streams: StreamTable,
    ) -> Self {
        Pipe {
            session,
            dispatcher,
            statement,
            streams,
            config: ExecConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecConfig) -> Self {
        self.config = config;
        self
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn streams(&self) -> &StreamTable {
        &self.streams
    }

    /// Run the stage on its own thread, named after the statement.
    pub fn spawn(self) -> io::Result<JoinHandle<StageResult>> {
        let name = format!("pipe-{}", self.statement).replace('\0', " ");
        thread::Builder::new().name(name).spawn(move || self.run())
    }

    /// Run the stage to completion on the calling thread.
    pub fn run(mut self) -> StageResult {
        let span = debug_span!("pipe", statement = %self.statement);
        let _enter = span.enter();

        let end_of_pipe = !self.streams.is_owned(1);
        let gate = Arc::new(JobControlGate::new(
            self.session.current_job(),
            self.session.terminal_channels(),
        ));
        let mut state = RunState {
            error_stream: self.streams.get(2).cloned(),
            bound: false,
        };
        debug!(end_of_pipe, "stage started");

        let result = match self.execute(&gate, end_of_pipe, &mut state) {
            Ok(result) => result,
            Err(error) => self.fail(error, state.error_stream.as_ref()),
        };
        self.cleanup(state.bound);
        debug!(exit_code = result.exit_code(), "stage finished");
        result
    }

    fn execute(
        &mut self,
        gate: &Arc<JobControlGate>,
        end_of_pipe: bool,
        state: &mut RunState,
    ) -> Result<StageResult, ExecError> {
        let directives = self.statement.directives()?;
        let cwd = self.session.current_dir();
        RedirectionProcessor::new(&cwd, gate, self.config.multios)
            .apply(&mut self.streams, &directives)?;

        self.streams.wrap_all(gate);
        state.error_stream = self.streams.get(2).cloned();

        let io = StageIo {
            stdin: self.streams.require(0)?.clone(),
            stdout: self.streams.require(1)?.clone(),
            stderr: self.streams.require(2)?.clone(),
        };
        self.session.set_streams(io.clone());
        state.bound = true;

        let handle = Arc::new(StageHandle::new(self.streams.owned_flags()));
        let value = {
            let _current = CurrentStageGuard::enter(handle.clone());
            if self.statement.is_empty() && self.streams.is_owned(0) {
                let mut stdin = StreamReader(io.stdin.clone());
                let copied = copy_to_stream(&mut stdin, &io.stdout, self.config.copy_buffer_size)?;
                debug!(copied, "copied stdin to stdout");
                Value::Null
            } else {
                let mut ctx = StageContext::new(self.session.as_ref(), io.clone(), handle.clone());
                self.dispatcher.execute(&mut ctx, &self.statement)?
            }
        };

        let code = handle.error();
        if code != 0 {
            return Ok(StageResult::Code(code));
        }
        if !value.is_null() && !end_of_pipe && self.format_pipe() {
            let mut text = self.session.format(&value);
            text.push('\n');
            io.stdout.write_all(text.as_bytes())?;
        }
        Ok(StageResult::Value(value))
    }

    fn format_pipe(&self) -> bool {
        self.session.get(&self.config.format_pipe_var) != Some(Value::Bool(false))
    }

    fn fail(&self, error: ExecError, error_stream: Option<&Stream>) -> StageResult {
        debug!(kind = error.kind(), %error, "stage failed");
        let mut failure = StageFailure::new(error);
        let line = format!(
            "{}: {}: {}\n",
            self.config.shell_name,
            failure.error.kind(),
            failure.error
        );
        if let Some(stream) = error_stream {
            if let Err(e) = stream.write_all(line.as_bytes()) {
                failure.suppressed.push(e);
            }
        }
        StageResult::Failed(failure)
    }

    fn cleanup(&self, bound: bool) {
        for fd in [1, 2] {
            if let Some(stream) = self.streams.get(fd) {
                if let Err(e) = stream.flush() {
                    warn!(fd, error = %e, "flush failed");
                }
            }
        }
        if bound {
            self.session.close_streams();
        }
        // failures are logged by the table
        let _ = self.streams.close_owned();
    }
}

/// Build the stages of `a | b | c`. Adjacent stages are joined by a bounded
/// pipe of `config.pipe_capacity` bytes whose ends the stages own; the first
/// stage's stdin, the last stage's stdout and every stderr come from `base`,
/// inherited.
pub fn pipeline(
    session: &Arc<dyn Session>,
    dispatcher: &Arc<dyn CommandDispatcher>,
    statements: Vec<Statement>,
    base: &StreamTable,
    config: &ExecConfig,
) -> Result<Vec<Pipe>, ConfigError> {
    let count = statements.len();
    let mut stages = Vec::with_capacity(count);
    let mut upstream: Option<Channel> = None;
    for (index, statement) in statements.into_iter().enumerate() {
        let mut streams = base.inherit();
        if let Some(reader) = upstream.take() {
            streams.set(0, Stream::Single(reader), true)?;
        }
        if index + 1 < count {
            let (reader, writer) = pipe(config.pipe_capacity);
            streams.set(1, Stream::Single(writer), true)?;
            upstream = Some(reader);
        }
        stages.push(
            Pipe::new(session.clone(), dispatcher.clone(), statement, streams)
                .with_config(config.clone()),
        );
    }
    debug!(stages = count, capacity = config.pipe_capacity, "pipeline built");
    Ok(stages)
}

/// Run every stage on its own thread and wait for all of them. Results are
/// in stage order.
pub fn run_pipeline(stages: Vec<Pipe>) -> io::Result<Vec<StageResult>> {
    let handles = stages
        .into_iter()
        .map(Pipe::spawn)
        .collect::<io::Result<Vec<_>>>()?;
    handles
        .into_iter()
        .map(|handle| {
            handle
                .join()
                .map_err(|_| io::Error::other("pipeline stage panicked"))
        })
        .collect()
}

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe<{}> out=", self.statement)?;
        match self.streams.get(1) {
            Some(stream) => write!(f, "{stream}"),
            None => f.write_str("closed"),
        }
    }
}
