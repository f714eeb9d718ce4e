//! User variable store and active mode for one run.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::spec::StrategySpec;
use crate::types::{Value, VarMap};

const DEFAULT_MODE: &str = "Main";

#[derive(Debug, Clone, Default)]
pub struct VarStore {
    vars: VarMap,
    mode: String,
    modes: BTreeSet<String>,
}

impl VarStore {
    /// Seed from the spec's variables. A string `mode` variable picks the
    /// starting mode; otherwise `Main` when defined, else the first mode by
    /// name. The `mode` entry itself is consumed, so lookups of `mode` always
    /// see the live active mode.
    pub fn new(mut initial: VarMap, modes: impl IntoIterator<Item = String>) -> Self {
        let modes: BTreeSet<String> = modes.into_iter().collect();

        let requested = match initial.remove("mode") {
            Some(Value::Str(m)) if modes.contains(&m) => Some(m),
            Some(other) => {
                warn!(mode = %other, "Initial mode variable does not name a mode; ignored");
                None
            }
            None => None,
        };

        let mode = requested
            .or_else(|| modes.get(DEFAULT_MODE).cloned())
            .or_else(|| modes.iter().next().cloned())
            .unwrap_or_default();

        debug!(mode = %mode, vars = initial.len(), "Variable store seeded");
        Self {
            vars: initial,
            mode,
            modes,
        }
    }

    pub fn from_spec(spec: &StrategySpec) -> Self {
        Self::new(spec.variables.clone(), spec.modes.keys().cloned())
    }

    pub fn vars(&self) -> &VarMap {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut VarMap {
        &mut self.vars
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn has_mode(&self, mode: &str) -> bool {
        self.modes.contains(mode)
    }

    /// Make `mode` active. Returns whether the active mode changed; unknown
    /// modes are refused.
    pub fn switch_mode(&mut self, mode: &str) -> bool {
        if !self.has_mode(mode) || self.mode == mode {
            return false;
        }
        debug!(from = %self.mode, to = %mode, "Mode switched");
        self.mode = mode.to_string();
        true
    }
}
