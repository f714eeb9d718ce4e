//! Rule steps and the per-run verb registry.
//!
//! Steps are parsed once when a rule is compiled. Verbs are resolved at run
//! time against a [`VerbRegistry`] owned by the controller, so an unknown
//! verb costs one dropped step rather than a failed load.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::varstore::VarStore;
use crate::expr::interp::{self, Overlay};
use crate::expr::{self, ExprError, Script};
use crate::spec::{StepObject, StepSpec, ThenSpec};
use crate::strategy::template::canonical_bet;
use crate::types::{ActionEnvelope, ActionKind, CscError, EventKind, Snapshot, Source, Value, Wager};

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum StepAmount {
    Literal(f64),
    Expr(String),
    /// Present in the spec but neither a number nor an expression.
    Invalid(String),
}

impl StepAmount {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Int(i) => StepAmount::Literal(*i as f64),
            Value::Float(f) => StepAmount::Literal(*f),
            Value::Str(s) => StepAmount::parse(s),
            other => StepAmount::Invalid(other.to_string()),
        }
    }

    fn parse(text: &str) -> Self {
        let text = text.trim();
        match text.parse::<f64>() {
            Ok(n) => StepAmount::Literal(n),
            Err(_) => StepAmount::Expr(text.to_string()),
        }
    }
}

impl fmt::Display for StepAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAmount::Literal(n) => write!(f, "{n}"),
            StepAmount::Expr(s) | StepAmount::Invalid(s) => f.write_str(s),
        }
    }
}

/// A verb invocation with whichever arguments the step supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerbCall {
    pub verb: String,
    pub bet_type: Option<String>,
    pub amount: Option<StepAmount>,
    pub notes: Option<String>,
    pub mode: Option<String>,
    pub var: Option<String>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum Step {
    Call(VerbCall),
    /// Assignment statements such as `units += 5`.
    Statement { source: String, script: Arc<Script> },
}

impl Step {
    pub fn from_spec(spec: &StepSpec) -> Option<Step> {
        match spec {
            StepSpec::Text(text) => Step::parse_text(text),
            StepSpec::Object(obj) => Some(Step::from_object(obj)),
        }
    }

    /// Parse `"verb bet amount-expr"`, `"switch_mode Name"`,
    /// `"setvar name expr"` or an assignment statement. Blank text is no step.
    pub fn parse_text(text: &str) -> Option<Step> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Ok(script) = expr::compile_script(text) {
            if script.has_assignments() {
                return Some(Step::Statement {
                    source: text.to_string(),
                    script,
                });
            }
        }

        let mut words = text.split_whitespace();
        let verb = words.next().unwrap_or_default().to_lowercase();
        let rest: Vec<&str> = words.collect();
        let mut call = VerbCall {
            verb,
            ..Default::default()
        };

        match call.verb.as_str() {
            "switch_mode" | "switch_profile" => {
                call.mode = (!rest.is_empty()).then(|| rest.join(" "));
            }
            "setvar" => {
                call.var = rest.first().map(|v| v.to_string());
                if rest.len() > 1 {
                    call.amount = Some(StepAmount::parse(&rest[1..].join(" ")));
                }
            }
            _ => {
                call.bet_type = rest.first().map(|b| canonical_bet(b));
                if rest.len() > 1 {
                    call.amount = Some(StepAmount::parse(&rest[1..].join(" ")));
                }
            }
        }
        Some(Step::Call(call))
    }

    pub fn from_object(obj: &StepObject) -> Step {
        Step::Call(VerbCall {
            verb: obj.action.clone().unwrap_or_default().to_lowercase(),
            bet_type: obj.bet_type.as_deref().map(canonical_bet),
            amount: obj.amount.as_ref().map(StepAmount::from_value),
            notes: obj.notes.clone(),
            mode: obj.mode.clone(),
            var: obj.var.clone(),
            value: obj.value.clone(),
        })
    }

    /// `then: {verb, args}`. Args use the object-step field names, with
    /// `bet` accepted for `bet_type`.
    pub fn from_then(then: &ThenSpec) -> Step {
        let text = |key: &str| match then.args.get(key) {
            Some(Value::Str(s)) => Some(s.clone()),
            Some(Value::None) | None => None,
            Some(other) => Some(other.to_string()),
        };
        Step::Call(VerbCall {
            verb: then.verb.trim().to_lowercase(),
            bet_type: text("bet_type").or_else(|| text("bet")).map(|b| canonical_bet(&b)),
            amount: then.args.get("amount").map(StepAmount::from_value),
            notes: text("notes"),
            mode: text("mode"),
            var: text("var"),
            value: then.args.get("value").cloned(),
        })
    }

    pub fn describe(&self) -> String {
        match self {
            Step::Statement { source, .. } => source.clone(),
            Step::Call(call) => {
                let mut out = call.verb.clone();
                for part in [&call.bet_type, &call.mode, &call.var].into_iter().flatten() {
                    out.push(' ');
                    out.push_str(part);
                }
                if let Some(ref amount) = call.amount {
                    out.push_str(&format!(" {amount}"));
                }
                out
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a step produced no envelope. Always recoverable: the step is dropped.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("unknown verb '{0}'")]
    UnknownVerb(String),

    #[error("{verb}: missing {field}")]
    Missing { verb: ActionKind, field: &'static str },

    #[error("{verb} {bet}: amount {amount} is not a positive number")]
    InvalidAmount {
        verb: ActionKind,
        bet: String,
        amount: String,
    },

    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    #[error(transparent)]
    Engine(#[from] CscError),
}

impl From<ExprError> for StepError {
    fn from(e: ExprError) -> Self {
        StepError::Engine(CscError::Expr(e))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// What a step sees while it runs.
pub struct StepContext<'a> {
    pub rule_id: &'a str,
    pub snapshot: &'a Snapshot,
    pub vars: &'a mut VarStore,
}

/// Verb name → action kind. Built per controller; never global.
#[derive(Debug, Clone)]
pub struct VerbRegistry {
    verbs: HashMap<String, ActionKind>,
}

impl Default for VerbRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl VerbRegistry {
    pub fn empty() -> Self {
        Self {
            verbs: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for kind in [
            ActionKind::Set,
            ActionKind::Clear,
            ActionKind::Press,
            ActionKind::Reduce,
            ActionKind::SwitchMode,
            ActionKind::Setvar,
        ] {
            registry.register(&kind.to_string(), kind);
        }
        registry.register("switch_profile", ActionKind::SwitchMode);
        registry
    }

    pub fn register(&mut self, name: &str, kind: ActionKind) {
        self.verbs.insert(name.to_lowercase(), kind);
    }

    pub fn resolve(&self, name: &str) -> Option<ActionKind> {
        self.verbs.get(&name.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.verbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    /// Run one step. Statements and `setvar` write into the variable store
    /// before returning; everything else only produces envelopes.
    pub fn run(&self, step: &Step, ctx: &mut StepContext<'_>) -> Result<Vec<ActionEnvelope>, StepError> {
        match step {
            Step::Statement { script, .. } => {
                let outcome = interp::exec(script, ctx.vars.vars_mut(), ctx.snapshot)?;
                Ok(outcome
                    .assigned
                    .into_iter()
                    .map(|(var, value)| ActionEnvelope::setvar(Source::Rule, ctx.rule_id, var, value))
                    .collect())
            }
            Step::Call(call) => self.run_call(call, ctx).map(|env| vec![env]),
        }
    }

    fn run_call(&self, call: &VerbCall, ctx: &mut StepContext<'_>) -> Result<ActionEnvelope, StepError> {
        let kind = self
            .resolve(&call.verb)
            .ok_or_else(|| StepError::UnknownVerb(call.verb.clone()))?;

        if kind.mutates_bets() && ctx.snapshot.event == EventKind::BetResolved {
            return Err(CscError::TimingViolation {
                action: kind.to_string(),
                window: EventKind::BetResolved.to_string(),
            }
            .into());
        }

        let id = ctx.rule_id;
        let env = match kind {
            ActionKind::Set | ActionKind::Press | ActionKind::Reduce => {
                let bet = call
                    .bet_type
                    .as_deref()
                    .ok_or(StepError::Missing { verb: kind, field: "bet_type" })?;
                let amount = call
                    .amount
                    .as_ref()
                    .ok_or(StepError::Missing { verb: kind, field: "amount" })?;
                let value = self.eval_amount(kind, bet, amount, ctx)?;
                let wager = match kind {
                    ActionKind::Press => Wager::Press,
                    ActionKind::Reduce => Wager::Reduce,
                    _ => Wager::Set,
                };
                ActionEnvelope::wager(Source::Rule, id, wager, bet, value)
            }
            ActionKind::Clear => {
                let bet = call
                    .bet_type
                    .as_deref()
                    .ok_or(StepError::Missing { verb: kind, field: "bet_type" })?;
                ActionEnvelope::clear(Source::Rule, id, bet)
            }
            ActionKind::SwitchMode => {
                let mode = call
                    .mode
                    .as_deref()
                    .or(call.notes.as_deref())
                    .map(str::trim)
                    .ok_or(StepError::Missing { verb: kind, field: "mode" })?;
                if !ctx.vars.has_mode(mode) {
                    return Err(StepError::UnknownMode(mode.to_string()));
                }
                // Target mode lives in notes; explicit notes are not kept.
                return Ok(ActionEnvelope::switch_mode(Source::Rule, id, mode));
            }
            ActionKind::Setvar => {
                let var = call
                    .var
                    .as_deref()
                    .ok_or(StepError::Missing { verb: kind, field: "var" })?;
                let value = match (&call.value, &call.amount) {
                    (Some(v), _) => v.clone(),
                    (None, Some(StepAmount::Literal(n))) => literal_value(*n),
                    (None, Some(StepAmount::Expr(text))) => {
                        let scope = Overlay {
                            vars: ctx.vars.vars(),
                            base: ctx.snapshot,
                        };
                        expr::eval_value(text, &scope)?
                    }
                    _ => return Err(StepError::Missing { verb: kind, field: "value" }),
                };
                ctx.vars.set(var, value.clone());
                return Ok(ActionEnvelope::setvar(Source::Rule, id, var, value));
            }
        };

        Ok(match call.notes {
            Some(ref notes) => env.with_notes(notes.clone()),
            None => env,
        })
    }

    fn eval_amount(
        &self,
        kind: ActionKind,
        bet: &str,
        amount: &StepAmount,
        ctx: &StepContext<'_>,
    ) -> Result<f64, StepError> {
        let value = match amount {
            StepAmount::Literal(n) => *n,
            StepAmount::Expr(text) => {
                let scope = Overlay {
                    vars: ctx.vars.vars(),
                    base: ctx.snapshot,
                };
                expr::eval_num(text, &scope)?
            }
            StepAmount::Invalid(_) => f64::NAN,
        };
        if value.is_finite() && value > 0.0 {
            Ok(value)
        } else {
            debug!(verb = %kind, bet = %bet, amount = %amount, "Step amount rejected");
            Err(StepError::InvalidAmount {
                verb: kind,
                bet: bet.to_string(),
                amount: amount.to_string(),
            })
        }
    }
}

/// Integral literals are stored as integers, like spec variables.
fn literal_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
