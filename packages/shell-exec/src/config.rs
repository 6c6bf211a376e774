use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Number of descriptors in a stage's stream table.
pub const DEFAULT_DESCRIPTORS: usize = 10;

/// Session variable that, when set to `false`, suppresses printing of
/// command results in the middle of a pipeline.
pub const FORMAT_PIPE_VAR: &str = ".FormatPipe";

/// Executor settings. Every field has a default so partial JSON is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Prefix of diagnostic lines written to stderr.
    pub shell_name: String,
    /// Redirecting a descriptor twice adds a destination instead of replacing it.
    pub multios: bool,
    pub descriptors: usize,
    pub format_pipe_var: String,
    pub copy_buffer_size: usize,
    pub pipe_capacity: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            shell_name: "relay".into(),
            multios: true,
            descriptors: DEFAULT_DESCRIPTORS,
            format_pipe_var: FORMAT_PIPE_VAR.into(),
            copy_buffer_size: 1024,
            pipe_capacity: 4096,
        }
    }
}

impl ExecConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.descriptors < 3 {
            anyhow::bail!("descriptors must be at least 3, got {}", self.descriptors);
        }
        if self.copy_buffer_size == 0 || self.pipe_capacity == 0 {
            anyhow::bail!("buffer sizes must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ExecConfig::from_json(r#"{"multios": false, "shell_name": "sh"}"#).unwrap();
        assert!(!config.multios);
        assert_eq!(config.shell_name, "sh");
        assert_eq!(config.descriptors, DEFAULT_DESCRIPTORS);
        assert_eq!(config.format_pipe_var, FORMAT_PIPE_VAR);
    }

    #[test]
    fn load_rejects_too_few_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        fs::write(&path, r#"{"descriptors": 2}"#).unwrap();
        let err = ExecConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("at least 3"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.json");
        fs::write(&path, r#"{"copy_buffer_size": 16}"#).unwrap();
        let config = ExecConfig::load(&path).unwrap();
        assert_eq!(config.copy_buffer_size, 16);
        assert!(config.multios);
    }
}
