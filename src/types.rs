//! Shared types for the control engine.
//!
//! These types form the data model used across all modules: the dynamic
//! [`Value`] the expression language computes with, the read-only
//! [`Snapshot`] handed to rules and templates, and the [`ActionEnvelope`]
//! records the engine emits. They are kept free of engine logic so that the
//! expression, strategy and engine modules can depend on them without cycles.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::expr::{ExprError, Lookup};

/// User variables, keyed by name. Ordered so iteration is deterministic.
pub type VarMap = BTreeMap<String, Value>;

/// Bet amounts keyed by canonical bet type (`pass_line`, `place_6`, ...).
pub type BetMap = BTreeMap<String, i64>;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Dynamic value produced by expressions and stored in variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    None,
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

impl Value {
    /// Truthiness: empty, zero and `None` are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::None => false,
        }
    }

    /// Numeric view. Booleans count as 0/1; everything else is not a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::None => "none",
        }
    }

    /// Equality with numeric promotion (`1 == 1.0`, `True == 1`).
    /// Values of unrelated types are simply unequal.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => a.as_f64() == b.as_f64(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => false,
        }
    }

    /// Ordering between comparable values; `None` on a type mismatch.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (a, b) if a.is_number() && b.is_number() => a.as_f64()?.partial_cmp(&b.as_f64()?),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::None => write!(f, "none"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::None)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Canonical event types produced by the event deriver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Comeout,
    Roll,
    PointEstablished,
    PointMade,
    SevenOut,
    BetResolved,
}

impl EventKind {
    pub const ALL: &'static [EventKind] = &[
        EventKind::Comeout,
        EventKind::Roll,
        EventKind::PointEstablished,
        EventKind::PointMade,
        EventKind::SevenOut,
        EventKind::BetResolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Comeout => "comeout",
            EventKind::Roll => "roll",
            EventKind::PointEstablished => "point_established",
            EventKind::PointMade => "point_made",
            EventKind::SevenOut => "seven_out",
            EventKind::BetResolved => "bet_resolved",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| anyhow::anyhow!("Unknown event type: {s}"))
    }
}

/// Running table counters maintained by the event deriver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableCounters {
    pub points_established: u64,
    pub points_made: u64,
    pub seven_outs: u64,
    /// Seven-outs on the first roll after the point was established.
    pub pso_count: u64,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Read-only view of table and session state for one event pass.
///
/// Built fresh by the controller before rules run and discarded afterwards.
/// The expression engine reads it exclusively through [`Snapshot::lookup`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub event: EventKind,
    pub bankroll: f64,
    pub point: Option<u8>,
    pub on_comeout: bool,
    pub hand_id: u64,
    pub roll_in_hand: u32,
    pub roll_index: u64,
    pub rolls_since_point: u32,
    pub last_roll: Option<u8>,
    pub dice: Option<(u8, u8)>,
    pub mode: String,
    pub bubble: bool,
    pub table_level: i64,
    pub counters: TableCounters,
    /// Bet resolved by the current event, when it is a `bet_resolved`.
    pub resolved_bet: Option<String>,
    pub resolved_result: Option<String>,
    pub bets: BetMap,
    pub vars: VarMap,
}

impl Snapshot {
    /// Resolve a dotted path such as `point`, `bets.6` or `vars.units`.
    ///
    /// User variables shadow system fields at the first segment. Every
    /// segment must exist; a missing one is an error, never a default.
    pub fn lookup(&self, path: &str) -> Result<Value, ExprError> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();
        let rest: Vec<&str> = segments.collect();

        let nested = !rest.is_empty();
        let missing = || {
            if !nested {
                ExprError::UnknownVariable { name: path.to_string() }
            } else {
                ExprError::UnknownPath { path: path.to_string() }
            }
        };

        if head == "bets" && rest.len() == 1 && !self.vars.contains_key("bets") {
            return self.bet_amount(rest[0]).map(Value::Int).ok_or_else(missing);
        }

        let mut current = self.root(head).ok_or_else(missing)?;
        for segment in rest {
            current = match current {
                Value::Map(mut map) => map.remove(segment).ok_or_else(missing)?,
                Value::List(mut items) => {
                    let index: usize = segment.parse().map_err(|_| missing())?;
                    if index >= items.len() {
                        return Err(missing());
                    }
                    items.swap_remove(index)
                }
                _ => return Err(missing()),
            };
        }
        Ok(current)
    }

    /// Amount of a bet by exact key, or `place_<n>` when given a bare number.
    pub fn bet_amount(&self, key: &str) -> Option<i64> {
        if let Some(amount) = self.bets.get(key) {
            return Some(*amount);
        }
        if key.chars().all(|c| c.is_ascii_digit()) {
            return self.bets.get(&format!("place_{key}")).copied();
        }
        None
    }

    /// System fields merged under the user variables (user wins).
    /// This is the namespace template amounts are evaluated against.
    pub fn merged_variables(&self) -> VarMap {
        let mut out: VarMap = SYSTEM_FIELDS
            .iter()
            .filter_map(|name| self.system_field(name).map(|v| (name.to_string(), v)))
            .collect();
        out.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    fn root(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.get(name) {
            return Some(v.clone());
        }
        self.system_field(name)
    }

    fn system_field(&self, name: &str) -> Option<Value> {
        let v = match name {
            "event" | "event_type" => Value::from(self.event.as_str()),
            "bankroll" => Value::Float(self.bankroll),
            "point" => Value::from(self.point.map(i64::from)),
            "point_on" => Value::Bool(self.point.is_some()),
            "on_comeout" | "comeout" => Value::Bool(self.on_comeout),
            "hand_id" => Value::Int(self.hand_id as i64),
            "roll_in_hand" => Value::Int(i64::from(self.roll_in_hand)),
            "roll_index" => Value::Int(self.roll_index as i64),
            "rolls_since_point" => Value::Int(i64::from(self.rolls_since_point)),
            "roll" | "total" | "last_roll_total" => Value::from(self.last_roll.map(i64::from)),
            "dice" => match self.dice {
                Some((a, b)) => Value::List(vec![Value::Int(a.into()), Value::Int(b.into())]),
                None => Value::None,
            },
            "mode" => Value::from(self.mode.as_str()),
            "bubble" => Value::Bool(self.bubble),
            "table_level" => Value::Int(self.table_level),
            "points_established" => Value::Int(self.counters.points_established as i64),
            "points_made" => Value::Int(self.counters.points_made as i64),
            "seven_outs" => Value::Int(self.counters.seven_outs as i64),
            "pso_count" => Value::Int(self.counters.pso_count as i64),
            "bet_type" => Value::from(self.resolved_bet.clone()),
            "result" => Value::from(self.resolved_result.clone()),
            "bets" => Value::Map(
                self.bets
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::Int(*v)))
                    .collect(),
            ),
            "vars" => Value::Map(self.vars.clone()),
            _ => return None,
        };
        Some(v)
    }
}

/// Names [`Snapshot`] exposes besides user variables.
const SYSTEM_FIELDS: &[&str] = &[
    "event",
    "bankroll",
    "point",
    "point_on",
    "on_comeout",
    "hand_id",
    "roll_in_hand",
    "roll_index",
    "rolls_since_point",
    "roll",
    "total",
    "last_roll_total",
    "dice",
    "mode",
    "bubble",
    "table_level",
    "points_established",
    "points_made",
    "seven_outs",
    "pso_count",
    "bet_type",
    "result",
];

impl Lookup for Snapshot {
    fn lookup(&self, path: &str) -> Result<Value, ExprError> {
        Snapshot::lookup(self, path)
    }
}

// ---------------------------------------------------------------------------
// Action envelope
// ---------------------------------------------------------------------------

/// Producer of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Template,
    Rule,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Template => write!(f, "template"),
            Source::Rule => write!(f, "rule"),
        }
    }
}

/// What an action does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Set,
    Clear,
    Press,
    Reduce,
    SwitchMode,
    Setvar,
}

impl ActionKind {
    /// Whether the action changes money on the layout.
    pub fn mutates_bets(&self) -> bool {
        matches!(
            self,
            ActionKind::Set | ActionKind::Clear | ActionKind::Press | ActionKind::Reduce
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Set => "set",
            ActionKind::Clear => "clear",
            ActionKind::Press => "press",
            ActionKind::Reduce => "reduce",
            ActionKind::SwitchMode => "switch_mode",
            ActionKind::Setvar => "setvar",
        };
        f.write_str(s)
    }
}

/// Actions that carry both a bet type and an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wager {
    Set,
    Press,
    Reduce,
}

impl From<Wager> for ActionKind {
    fn from(w: Wager) -> Self {
        match w {
            Wager::Set => ActionKind::Set,
            Wager::Press => ActionKind::Press,
            Wager::Reduce => ActionKind::Reduce,
        }
    }
}

/// Uniform output record describing one bet mutation and its rationale.
///
/// Build through the constructors: they guarantee that `amount` is `None`
/// exactly for clear/switch_mode/setvar and `bet_type` is `None` exactly for
/// switch_mode/setvar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub source: Source,
    pub id: String,
    pub action: ActionKind,
    pub bet_type: Option<String>,
    pub amount: Option<f64>,
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working: Option<bool>,
}

impl ActionEnvelope {
    fn base(source: Source, id: impl Into<String>, action: ActionKind) -> Self {
        Self {
            source,
            id: id.into(),
            action,
            bet_type: None,
            amount: None,
            notes: String::new(),
            seq: None,
            var: None,
            value: None,
            working: None,
        }
    }

    /// `set`, `press` or `reduce` a bet by an amount.
    pub fn wager(
        source: Source,
        id: impl Into<String>,
        wager: Wager,
        bet_type: impl Into<String>,
        amount: f64,
    ) -> Self {
        Self {
            bet_type: Some(bet_type.into()),
            amount: Some(amount),
            ..Self::base(source, id, wager.into())
        }
    }

    pub fn clear(source: Source, id: impl Into<String>, bet_type: impl Into<String>) -> Self {
        Self {
            bet_type: Some(bet_type.into()),
            ..Self::base(source, id, ActionKind::Clear)
        }
    }

    /// Mode switches carry the target mode in `notes`.
    pub fn switch_mode(source: Source, id: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            notes: mode.into(),
            ..Self::base(source, id, ActionKind::SwitchMode)
        }
    }

    pub fn setvar(source: Source, id: impl Into<String>, var: impl Into<String>, value: Value) -> Self {
        let var = var.into();
        Self {
            notes: format!("{var} = {value}"),
            var: Some(var),
            value: Some(value),
            ..Self::base(source, id, ActionKind::Setvar)
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_working(mut self, working: bool) -> Self {
        self.working = Some(working);
        self
    }
}

impl fmt::Display for ActionEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.action)?;
        if let Some(ref bet) = self.bet_type {
            write!(f, " {bet}")?;
        }
        if let Some(amount) = self.amount {
            write!(f, " ${amount:.0}")?;
        }
        if !self.notes.is_empty() {
            write!(f, " ({})", self.notes)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Engine-level errors. Expression failures are wrapped, not flattened, so
/// callers can still match on the expression error kind.
#[derive(Debug, thiserror::Error)]
pub enum CscError {
    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error("Timing violation: {action} not allowed during {window}")]
    TimingViolation { action: String, window: String },

    #[error("Malformed rule {rule}: {message}")]
    MalformedRule { rule: String, message: String },

    #[error("Spec validation failed:{}", itemize(.0))]
    InvalidSpec(Vec<String>),

    #[error("Invalid roll total {0} (expected 2..=12)")]
    InvalidRoll(u8),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn itemize(items: &[String]) -> String {
    items.iter().map(|e| format!("\n- {e}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
