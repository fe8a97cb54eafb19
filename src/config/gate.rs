//! Gate behaviour: action scoping, dedupe modes, logging switches.
//!
//! ```toml
//! include = [{ pattern = "^cart/" }, "form/submit"]
//! skip_dedupe = ["cart/poll"]
//! debug_mode = true
//!
//! [dedupe]
//! in_flight_mode = "share"
//! quick_repeat_mode = "block"
//! threshold_millis = 800
//! ```

use crate::error::{Error, Result};
use crate::matcher::{Matcher, any_match};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How the gate answers a call whose dedupe key is already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupeMode {
    /// Hand back the pending result of the original call.
    Share,
    /// Resolve immediately with no result.
    Drop,
    /// Log and execute anyway.
    Warn,
    /// Reject with a blocked-duplicate error.
    Block,
}

impl DedupeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupeMode::Share => "share",
            DedupeMode::Drop => "drop",
            DedupeMode::Warn => "warn",
            DedupeMode::Block => "block",
        }
    }
}

impl std::fmt::Display for DedupeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DedupeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "share" => Ok(DedupeMode::Share),
            "drop" => Ok(DedupeMode::Drop),
            "warn" => Ok(DedupeMode::Warn),
            "block" => Ok(DedupeMode::Block),
            other => Err(Error::Config(format!("unknown dedupe mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub in_flight_mode: DedupeMode,
    pub quick_repeat_mode: DedupeMode,
    pub threshold_millis: u64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            in_flight_mode: DedupeMode::Share,
            quick_repeat_mode: DedupeMode::Warn,
            threshold_millis: 500,
        }
    }
}

impl DedupeConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// When non-empty, only matching action keys are managed.
    pub include: Vec<Matcher>,
    /// Matching action keys are never managed.
    pub exclude: Vec<Matcher>,
    /// Matching action keys skip dedupe but stay mutually exclusive.
    pub skip_dedupe: Vec<Matcher>,
    /// Suppresses dedupe logging.
    pub production_mode: bool,
    /// Per-call lifecycle logging and health snapshots.
    pub debug_mode: bool,
    /// Minimum gap between identical log lines for one (phase, key).
    pub log_throttle_millis: u64,
    /// Idle period after the last open call before a health snapshot.
    pub health_idle_millis: u64,
    pub dedupe: DedupeConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            skip_dedupe: Vec::new(),
            production_mode: false,
            debug_mode: false,
            log_throttle_millis: 1000,
            health_idle_millis: 1000,
            dedupe: DedupeConfig::default(),
        }
    }
}

impl GateConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad gate config: {e}")))
    }

    /// Load a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read gate config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn include(mut self, matcher: Matcher) -> Self {
        self.include.push(matcher);
        self
    }

    pub fn exclude(mut self, matcher: Matcher) -> Self {
        self.exclude.push(matcher);
        self
    }

    pub fn skip_dedupe(mut self, matcher: Matcher) -> Self {
        self.skip_dedupe.push(matcher);
        self
    }

    pub fn in_flight_mode(mut self, mode: DedupeMode) -> Self {
        self.dedupe.in_flight_mode = mode;
        self
    }

    pub fn quick_repeat_mode(mut self, mode: DedupeMode) -> Self {
        self.dedupe.quick_repeat_mode = mode;
        self
    }

    pub fn threshold_millis(mut self, millis: u64) -> Self {
        self.dedupe.threshold_millis = millis;
        self
    }

    pub fn debug_mode(mut self, on: bool) -> Self {
        self.debug_mode = on;
        self
    }

    pub fn production_mode(mut self, on: bool) -> Self {
        self.production_mode = on;
        self
    }

    /// Whether the gate manages this action key at all.
    pub fn in_scope(&self, full_key: &str) -> bool {
        if !self.include.is_empty() && !any_match(&self.include, full_key) {
            return false;
        }
        !any_match(&self.exclude, full_key)
    }

    pub fn skips_dedupe(&self, full_key: &str) -> bool {
        any_match(&self.skip_dedupe, full_key)
    }

    pub fn log_throttle(&self) -> Duration {
        Duration::from_millis(self.log_throttle_millis)
    }

    pub fn health_idle(&self) -> Duration {
        Duration::from_millis(self.health_idle_millis)
    }
}
