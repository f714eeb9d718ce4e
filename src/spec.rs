//! Strategy spec: serde model, file loading and structural validation.
//!
//! A spec is parsed into a generic JSON document first so the validator can
//! report every structural problem at once as an itemized list. Only a
//! document that validates is converted into the typed [`StrategySpec`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::Path;

use crate::engine::rules::Guard;
use crate::expr;
use crate::strategy::legalize::{OddsPolicy, TableRules};
use crate::types::{CscError, EventKind, Value, VarMap};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySpec {
    pub table: TableSpec,
    #[serde(default)]
    pub variables: VarMap,
    pub modes: BTreeMap<String, ModeSpec>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    #[serde(default)]
    pub bubble: bool,
    #[serde(default = "default_level")]
    pub level: f64,
    #[serde(default)]
    pub odds_policy: Option<Value>,
}

fn default_level() -> f64 {
    10.0
}

impl TableSpec {
    pub fn rules(&self) -> TableRules {
        TableRules {
            bubble: self.bubble,
            level: if self.level.is_finite() && self.level > 0.0 {
                self.level as i64
            } else {
                0
            },
            odds: OddsPolicy::parse(self.odds_policy.as_ref()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeSpec {
    #[serde(default)]
    pub template: Template,
}

/// Bet key → amount entry for one mode.
pub type Template = BTreeMap<String, TemplateEntry>;

/// A literal amount or an expression in the wide dialect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Expr(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetailedEntry {
    pub amount: Amount,
    #[serde(default)]
    pub working: Option<bool>,
    #[serde(default)]
    pub odds: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateEntry {
    Amount(Amount),
    Detailed(DetailedEntry),
    /// `place: {6: ...}` or `odds: {pass: ...}`.
    Nested(BTreeMap<String, TemplateEntry>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Roll,
    Hand,
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub event: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub on: Option<Trigger>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default, rename = "do")]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub then: Option<ThenSpec>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub cooldown: u32,
    #[serde(default)]
    pub once: bool,
}

/// One "do" step: `"press place_6 6"`, `"units += 5"` or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    Text(String),
    Object(StepObject),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepObject {
    #[serde(default, alias = "verb")]
    pub action: Option<String>,
    #[serde(default, alias = "bet")]
    pub bet_type: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub var: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Single-step form: `then: {verb: "press", args: {bet: "place_6", amount: 6}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThenSpec {
    pub verb: String,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Json,
    Yaml,
    Toml,
}

impl SpecFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "json" => Some(SpecFormat::Json),
            "yaml" | "yml" => Some(SpecFormat::Yaml),
            "toml" => Some(SpecFormat::Toml),
            _ => None,
        }
    }
}

/// Parse text into a generic document without interpreting it.
pub fn parse_document(text: &str, format: SpecFormat) -> Result<Json> {
    let doc = match format {
        SpecFormat::Json => serde_json::from_str(text).context("Failed to parse spec as JSON")?,
        SpecFormat::Yaml => serde_yaml::from_str(text).context("Failed to parse spec as YAML")?,
        SpecFormat::Toml => toml::from_str(text).context("Failed to parse spec as TOML")?,
    };
    Ok(doc)
}

/// Validate a document and convert it into a typed spec.
pub fn from_document(doc: Json) -> Result<StrategySpec> {
    let report = validate(&doc);
    for warning in &report.warnings {
        tracing::warn!(warning = %warning, "Spec warning");
    }
    report.into_result()?;
    serde_json::from_value(doc).context("Spec passed validation but could not be decoded")
}

pub fn from_str(text: &str, format: SpecFormat) -> Result<StrategySpec> {
    from_document(parse_document(text, format)?)
}

/// Load, validate and decode a spec file. The format follows the extension.
pub fn load(path: impl AsRef<Path>) -> Result<StrategySpec> {
    let path = path.as_ref();
    let format = SpecFormat::from_path(path).with_context(|| {
        format!(
            "Unsupported spec extension for {} (expected .json, .yaml, .yml or .toml)",
            path.display()
        )
    })?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec file: {}", path.display()))?;
    from_str(&text, format).with_context(|| format!("Invalid spec: {}", path.display()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<String>, CscError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(CscError::InvalidSpec(self.errors))
        }
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

const REQUIRED_SECTIONS: &[&str] = &["table", "variables", "modes", "rules"];
const KNOWN_VERBS: &[&str] = &[
    "set",
    "clear",
    "press",
    "reduce",
    "switch_mode",
    "switch_profile",
    "setvar",
];

/// Structural check of a spec document. Never fails; collects every problem.
pub fn validate(doc: &Json) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Some(root) = doc.as_object() else {
        report.error("spec must be a mapping at the top level");
        return report;
    };

    for section in REQUIRED_SECTIONS {
        if !root.contains_key(*section) {
            report.error(format!("missing required section '{section}'"));
        }
    }

    if let Some(table) = root.get("table") {
        validate_table(table, &mut report);
    }
    if let Some(vars) = root.get("variables") {
        match vars.as_object() {
            Some(map) if !map.contains_key("units") => {
                report.warn("variables.units is not defined; templates usually size from it")
            }
            Some(_) => {}
            None => report.error("variables must be a mapping"),
        }
    }
    if let Some(modes) = root.get("modes") {
        validate_modes(modes, &mut report);
    }
    if let Some(rules) = root.get("rules") {
        match rules.as_array() {
            Some(list) => {
                for (idx, rule) in list.iter().enumerate() {
                    validate_rule(idx, rule, &mut report);
                }
            }
            None => report.error("rules must be a list"),
        }
    }
    report
}

fn validate_table(table: &Json, report: &mut ValidationReport) {
    let Some(table) = table.as_object() else {
        report.error("table must be a mapping");
        return;
    };
    if let Some(bubble) = table.get("bubble") {
        if !bubble.is_boolean() {
            report.error("table.bubble must be a boolean");
        }
    }
    match table.get("level") {
        Some(level) => match level.as_f64() {
            Some(l) if l <= 0.0 => report.warn(format!("table.level is {l}; expected a positive minimum")),
            Some(_) => {}
            None => report.error("table.level must be a number"),
        },
        None => report.warn("table.level not set; defaulting to 10"),
    }
    if let Some(policy) = table.get("odds_policy") {
        let parsed = serde_json::from_value::<Value>(policy.clone())
            .ok()
            .and_then(|v| OddsPolicy::try_parse(&v));
        if parsed.is_none() {
            report.warn(format!(
                "table.odds_policy {policy} not recognised; using 3-4-5x"
            ));
        }
    }
}

fn validate_modes(modes: &Json, report: &mut ValidationReport) {
    let Some(modes) = modes.as_object() else {
        report.error("modes must be a mapping");
        return;
    };
    if modes.is_empty() {
        report.error("modes must define at least one mode");
    }
    for (name, mode) in modes {
        let Some(mode) = mode.as_object() else {
            report.error(format!("modes.{name} must be a mapping"));
            continue;
        };
        let Some(template) = mode.get("template") else {
            report.warn(format!("modes.{name} has no template"));
            continue;
        };
        let Some(template) = template.as_object() else {
            report.error(format!("modes.{name}.template must be a mapping"));
            continue;
        };
        for (bet, entry) in template {
            validate_entry(&format!("modes.{name}.template.{bet}"), entry, true, report);
        }
    }
}

fn validate_entry(path: &str, entry: &Json, allow_nested: bool, report: &mut ValidationReport) {
    match entry {
        Json::Number(_) => {}
        Json::String(text) => validate_amount_expr(path, text, report),
        Json::Object(map) if map.contains_key("amount") => {
            if let Some(amount) = map.get("amount") {
                validate_entry(&format!("{path}.amount"), amount, false, report);
            }
            if let Some(odds) = map.get("odds") {
                validate_entry(&format!("{path}.odds"), odds, false, report);
            }
            if let Some(working) = map.get("working") {
                if !working.is_boolean() {
                    report.error(format!("{path}.working must be a boolean"));
                }
            }
            for key in map.keys() {
                if !matches!(key.as_str(), "amount" | "odds" | "working") {
                    report.error(format!("{path}: unknown field '{key}'"));
                }
            }
        }
        Json::Object(map) if allow_nested => {
            for (key, inner) in map {
                validate_entry(&format!("{path}.{key}"), inner, false, report);
            }
        }
        _ => report.error(format!(
            "{path}: expected a number, an expression string or a mapping with 'amount'"
        )),
    }
}

fn validate_amount_expr(path: &str, text: &str, report: &mut ValidationReport) {
    if let Err(e) = expr::compile_script(text) {
        report.error(format!("{path}: {e}"));
    }
}

fn validate_rule(idx: usize, rule: &Json, report: &mut ValidationReport) {
    let label = format!("rules[{idx}]");
    let Some(rule) = rule.as_object() else {
        report.error(format!("{label} must be a mapping"));
        return;
    };

    match rule.get("on").and_then(|on| on.get("event")).and_then(Json::as_str) {
        Some(event) if event.parse::<EventKind>().is_err() => {
            report.error(format!("{label}.on.event '{event}' is not a known event type"))
        }
        Some(_) => {}
        None => report.error(format!("{label}: missing 'on.event'")),
    }

    if !rule.contains_key("do") && !rule.contains_key("then") {
        report.error(format!("{label}: missing 'do' or 'then'"));
    }

    if let Some(when) = rule.get("when") {
        match when.as_str() {
            Some(text) => {
                if let Err(e) = Guard::compile(text) {
                    report.error(format!("{label}.when: {e}"));
                }
            }
            None => report.error(format!("{label}.when must be a string")),
        }
    }

    if let Some(steps) = rule.get("do") {
        match steps.as_array() {
            Some(list) => {
                for (i, step) in list.iter().enumerate() {
                    validate_step(&format!("{label}.do[{i}]"), step, report);
                }
            }
            None => report.error(format!("{label}.do must be a list")),
        }
    }

    if let Some(then) = rule.get("then") {
        if then.get("verb").and_then(Json::as_str).is_none() {
            report.error(format!("{label}.then: missing 'verb'"));
        }
    }

    if let Some(scope) = rule.get("scope") {
        if !matches!(scope.as_str(), Some("roll" | "hand" | "session")) {
            report.error(format!("{label}.scope must be one of roll, hand, session"));
        }
    }
    if let Some(cooldown) = rule.get("cooldown") {
        if cooldown.as_u64().is_none() {
            report.error(format!("{label}.cooldown must be a non-negative integer"));
        }
    }
    if let Some(once) = rule.get("once") {
        if !once.is_boolean() {
            report.error(format!("{label}.once must be a boolean"));
        }
    }
}

fn validate_step(path: &str, step: &Json, report: &mut ValidationReport) {
    match step {
        Json::String(text) => {
            let verb = text.split_whitespace().next().unwrap_or_default();
            if !KNOWN_VERBS.contains(&verb.to_lowercase().as_str())
                && expr::compile_script(text).is_err()
            {
                report.warn(format!("{path}: '{text}' is neither a known verb nor a statement; it will be skipped"));
            }
        }
        Json::Object(map) => {
            let verb = map
                .get("action")
                .or_else(|| map.get("verb"))
                .and_then(Json::as_str);
            match verb {
                Some(v) if KNOWN_VERBS.contains(&v.to_lowercase().as_str()) => {}
                Some(v) => report.warn(format!("{path}: unknown verb '{v}' will be skipped")),
                None => report.error(format!("{path}: missing 'action'")),
            }
        }
        _ => report.error(format!("{path} must be a string or a mapping")),
    }
}
