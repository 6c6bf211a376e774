use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::channel::{Channel, StdChannel};
use crate::config::DEFAULT_DESCRIPTORS;
use crate::host::Session;
use crate::job::Job;
use crate::stdio::{StageIo, ThreadIo};
use crate::streams::StreamTable;

/// Minimal session: a working directory, a variable store, an optional job
/// and the terminal channels every top-level stage inherits.
pub struct ShellState {
    cwd: RwLock<PathBuf>,
    vars: RwLock<HashMap<String, Value>>,
    job: RwLock<Option<Arc<Job>>>,
    terminals: [Channel; 3],
    stdio: ThreadIo,
}

impl ShellState {
    pub fn new(cwd: PathBuf, terminals: [Channel; 3]) -> Self {
        ShellState {
            cwd: RwLock::new(cwd),
            vars: RwLock::new(HashMap::new()),
            job: RwLock::new(None),
            terminals,
            stdio: ThreadIo,
        }
    }

    /// A session attached to the process's own stdin, stdout and stderr.
    pub fn with_std_terminals(cwd: PathBuf) -> Self {
        Self::new(cwd, StdChannel::terminals())
    }

    pub fn set_var(&self, name: &str, value: Value) {
        self.vars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    pub fn set_cwd(&self, cwd: PathBuf) {
        *self.cwd.write().unwrap_or_else(PoisonError::into_inner) = cwd;
    }

    pub fn set_job(&self, job: Option<Arc<Job>>) {
        *self.job.write().unwrap_or_else(PoisonError::into_inner) = job;
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir().join(path)
        }
    }

    /// Stream table for a top-level stage: the terminals, none of them owned.
    pub fn terminal_table(&self) -> StreamTable {
        self.terminal_table_with(DEFAULT_DESCRIPTORS)
    }

    pub fn terminal_table_with(&self, descriptors: usize) -> StreamTable {
        let [stdin, stdout, stderr] = self.terminals.clone();
        StreamTable::with_descriptors(descriptors, stdin, stdout, stderr).inherit()
    }

    /// Streams bound on the calling thread by the stage running there.
    pub fn current_streams(&self) -> Option<StageIo> {
        self.stdio.current()
    }
}

impl Session for ShellState {
    fn current_dir(&self) -> PathBuf {
        self.cwd.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.vars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn format(&self, value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn set_streams(&self, io: StageIo) {
        self.stdio.set_streams(io);
    }

    fn close_streams(&self) {
        self.stdio.close();
    }

    fn current_job(&self) -> Option<Arc<Job>> {
        self.job.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn terminal_channels(&self) -> Vec<Channel> {
        self.terminals.to_vec()
    }
}
