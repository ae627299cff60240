use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Tuning for the stream pumps attached to every launched process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PumpConfig {
    /// Longest line (in bytes) handed to listeners; the rest of the line is dropped
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Initial capacity of the read buffer of each output pump
    #[serde(default = "default_read_buffer_capacity")]
    pub read_buffer_capacity: usize,

    /// How long pumps may keep draining after the process exited (in milliseconds)
    ///
    /// A grandchild that inherited the pipes can keep them open after the
    /// direct child is gone. Pumps still running when this expires are cancelled.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
            read_buffer_capacity: default_read_buffer_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl PumpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_line_length == 0 {
            return Err(anyhow::anyhow!("max_line_length must be greater than zero"));
        }

        if self.read_buffer_capacity == 0 {
            return Err(anyhow::anyhow!(
                "read_buffer_capacity must be greater than zero"
            ));
        }

        if self.drain_timeout_ms == 0 {
            return Err(anyhow::anyhow!("drain_timeout_ms must be greater than zero"));
        }

        Ok(())
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Everything needed to launch a command: tokens, working directory and environment
#[derive(Default, Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
#[serde(rename_all = "camelCase")]
pub struct CommandConfig {
    /// Executable followed by its arguments
    #[builder(setter(custom))]
    pub command: Vec<String>,
    /// `None` runs the command in the working directory of the current process
    #[builder(default)]
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// `None` inherits the current environment, an empty map clears it
    #[builder(default, setter(custom))]
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[builder(default)]
    #[serde(default)]
    pub pump: PumpConfig,
}

impl CommandConfig {
    pub fn builder() -> CommandConfigBuilder {
        CommandConfigBuilder::default()
    }

    /// Shorthand for a command inheriting directory and environment
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(command: I) -> Self {
        Self {
            command: command.into_iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }
}

impl CommandConfigBuilder {
    pub fn command<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let command: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.command = Some(command);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self
            .env
            .get_or_insert_with(|| Some(HashMap::new()))
            .get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let map = self
            .env
            .get_or_insert_with(|| Some(HashMap::new()))
            .get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            map.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Run the command with no environment variables at all
    pub fn clear_env(&mut self) -> &mut Self {
        self.env = Some(Some(HashMap::new()));
        self
    }

    fn validate(&self) -> Result<(), String> {
        match &self.pump {
            Some(pump) => pump.validate().map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }
}

fn default_max_line_length() -> usize {
    1024 * 1024
}
fn default_read_buffer_capacity() -> usize {
    8 * 1024
}
fn default_drain_timeout_ms() -> u64 {
    5_000
}
