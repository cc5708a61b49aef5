//! Configuration for the writing assistant
//!
//! Layered as defaults, then an optional TOML file, then `SCRIBE_*` environment
//! variables. Command-line flags in the `scribe` binary are applied last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, ScribeError};
use crate::pair::RepairMode;

pub const ENV_MODEL: &str = "SCRIBE_MODEL";
pub const ENV_TEMPERATURE: &str = "SCRIBE_TEMPERATURE";
pub const ENV_MAX_TURNS: &str = "SCRIBE_MAX_TURNS";
pub const ENV_REPAIR_PASSES: &str = "SCRIBE_REPAIR_PASSES";
pub const ENV_STREAM: &str = "SCRIBE_STREAM";
pub const ENV_DB: &str = "SCRIBE_DB";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    /// Chat model used by every participant
    pub model: String,

    pub temperature: f32,

    pub max_tokens: Option<u32>,

    /// Turn cap per submitted task, including the task itself
    pub max_turns: usize,

    pub repair_mode: RepairMode,

    /// Model repair passes before the final local repair (model mode only)
    pub max_repair_passes: usize,

    /// Stream tokens to the console while a turn is produced
    pub stream: bool,

    /// SQLite file holding session logs
    pub database: PathBuf,

    /// Session resumed when none is named
    pub session: String,
}

impl Default for ScribeConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: None,
            max_turns: 10,
            repair_mode: RepairMode::Local,
            max_repair_passes: 1,
            stream: false,
            database: PathBuf::from("scribe.db"),
            session: "default".to_string(),
        }
    }
}

impl ScribeConfig {
    /// Load a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    pub fn with_env(self) -> Result<Self> {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Apply `SCRIBE_*` overrides read through `lookup`.
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(model) = lookup(ENV_MODEL) {
            self.model = model;
        }
        if let Some(v) = lookup(ENV_TEMPERATURE) {
            self.temperature = parse_var(ENV_TEMPERATURE, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_TURNS) {
            self.max_turns = parse_var(ENV_MAX_TURNS, &v)?;
        }
        if let Some(v) = lookup(ENV_REPAIR_PASSES) {
            self.max_repair_passes = parse_var(ENV_REPAIR_PASSES, &v)?;
            if self.max_repair_passes > 0 {
                self.repair_mode = RepairMode::Model;
            }
        }
        if let Some(v) = lookup(ENV_STREAM) {
            self.stream = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(db) = lookup(ENV_DB) {
            self.database = PathBuf::from(db);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ScribeError::config("model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ScribeError::config(format!(
                "temperature {} outside 0.0..=2.0",
                self.temperature
            )));
        }
        if self.max_turns == 0 {
            return Err(ScribeError::config("max_turns must be at least 1"));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ScribeError::config(format!("{}: cannot parse {:?}", key, value)))
}

/// Configuration builder
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: ScribeConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.temperature = temp;
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.config.max_tokens = Some(tokens);
        self
    }

    pub fn max_turns(mut self, turns: usize) -> Self {
        self.config.max_turns = turns;
        self
    }

    pub fn repair_mode(mut self, mode: RepairMode) -> Self {
        self.config.repair_mode = mode;
        self
    }

    pub fn max_repair_passes(mut self, passes: usize) -> Self {
        self.config.max_repair_passes = passes;
        self
    }

    pub fn stream(mut self, enabled: bool) -> Self {
        self.config.stream = enabled;
        self
    }

    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database = path.into();
        self
    }

    pub fn session(mut self, id: impl Into<String>) -> Self {
        self.config.session = id.into();
        self
    }

    pub fn build(self) -> Result<ScribeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
