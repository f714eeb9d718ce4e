//! Configuration loading from TOML.
//!
//! Reads `csc.toml` and deserializes into strongly-typed structs. Every
//! section is optional; a missing section takes its defaults.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::CscError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    /// Keep a decision trace of every rule evaluation.
    #[serde(default)]
    pub trace: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    #[serde(default = "default_spec_path")]
    pub spec_path: PathBuf,
    #[serde(default = "default_bankroll")]
    pub bankroll: f64,
    /// Scripted dice totals, replayed in order.
    #[serde(default)]
    pub rolls: Vec<u8>,
    /// Optional dice pairs; when present they must match `rolls` one for one.
    #[serde(default)]
    pub dice: Vec<[u8; 2]>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            spec_path: default_spec_path(),
            bankroll: default_bankroll(),
            rolls: Vec::new(),
            dice: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
    /// JSON log lines; `CSC_LOG_JSON` also turns this on.
    #[serde(default)]
    pub json: bool,
}

fn default_spec_path() -> PathBuf {
    PathBuf::from("strategy.yaml")
}

fn default_bankroll() -> f64 {
    1000.0
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.replay.check()?;
        Ok(config)
    }
}

impl ReplayConfig {
    fn check(&self) -> Result<(), CscError> {
        if let Some(bad) = self.rolls.iter().find(|t| !(2..=12).contains(*t)) {
            return Err(CscError::Config(format!("replay.rolls contains {bad}; totals are 2..=12")));
        }
        if !self.dice.is_empty() && self.dice.len() != self.rolls.len() {
            return Err(CscError::Config(format!(
                "replay.dice has {} pairs for {} rolls",
                self.dice.len(),
                self.rolls.len()
            )));
        }
        Ok(())
    }

    /// Totals paired with their dice, when given.
    pub fn schedule(&self) -> Vec<(u8, Option<(u8, u8)>)> {
        self.rolls
            .iter()
            .enumerate()
            .map(|(i, total)| (*total, self.dice.get(i).map(|[a, b]| (*a, *b))))
            .collect()
    }
}
