//! Rule compilation and firing semantics.
//!
//! A [`RuleEngine`] owns the per-rule state (cooldown, scope lock, once)
//! and decides which rules fire for a snapshot. Turning the fired rules'
//! steps into envelopes is the controller's job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::verbs::Step;
use crate::expr::{self, Condition, ExprError, Lookup, Script};
use crate::spec::{RuleSpec, Scope};
use crate::types::{CscError, EventKind, Snapshot};

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Compiled `when` clause.
#[derive(Debug, Clone)]
pub enum Guard {
    Condition(Arc<Condition>),
    /// Guards outside the condition grammar, such as `point in (6, 8)`.
    Script(Arc<Script>),
}

impl Guard {
    /// Condition dialect first, wide dialect as the fallback. When both
    /// reject the text, the condition dialect's error is reported.
    pub fn compile(text: &str) -> Result<Guard, ExprError> {
        match expr::compile(text) {
            Ok(cond) => Ok(Guard::Condition(cond)),
            Err(cond_err) => match expr::compile_script(text) {
                Ok(script) if script.as_expression().is_some() => Ok(Guard::Script(script)),
                _ => Err(cond_err),
            },
        }
    }

    pub fn test(&self, scope: &dyn Lookup) -> Result<bool, ExprError> {
        let value = match self {
            Guard::Condition(cond) => expr::evaluate(cond, scope)?,
            Guard::Script(script) => expr::eval_compiled(script, scope)?,
        };
        Ok(value.truthy())
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    /// `None` when the spec gave no `on.event`; such a rule never fires.
    pub trigger: Option<EventKind>,
    pub guard: Option<Guard>,
    pub guard_text: String,
    pub steps: Vec<Step>,
    pub scope: Scope,
    pub cooldown: u32,
    pub once: bool,
}

impl Rule {
    /// Compile the rule at declaration position `index` (0-based).
    pub fn compile(index: usize, spec: &RuleSpec) -> Result<Rule, CscError> {
        let id = match (&spec.name, &spec.id) {
            (Some(name), _) if !name.trim().is_empty() => format!("rule:{}", name.trim()),
            (_, Some(id)) if !id.trim().is_empty() => format!("rule:{}", id.trim()),
            _ => format!("rule:#{}", index + 1),
        };
        let malformed = |message: String| CscError::MalformedRule {
            rule: id.clone(),
            message,
        };

        let trigger = match spec.on {
            Some(ref on) => Some(
                on.event
                    .parse::<EventKind>()
                    .map_err(|e| malformed(e.to_string()))?,
            ),
            None => None,
        };

        let guard_text = spec.when.clone().unwrap_or_default();
        let guard = if guard_text.trim().is_empty() {
            None
        } else {
            Some(Guard::compile(&guard_text).map_err(|e| malformed(format!("when: {e}")))?)
        };

        let mut steps: Vec<Step> = spec.steps.iter().filter_map(Step::from_spec).collect();
        if let Some(ref then) = spec.then {
            steps.push(Step::from_then(then));
        }
        if spec.steps.is_empty() && spec.then.is_none() {
            return Err(malformed("missing 'do' or 'then'".into()));
        }

        Ok(Rule {
            id,
            trigger,
            guard,
            guard_text,
            steps,
            scope: spec.scope,
            cooldown: spec.cooldown,
            once: spec.once,
        })
    }
}

// ---------------------------------------------------------------------------
// Rule state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScopeKey {
    Hand(u64),
    Session,
}

impl ScopeKey {
    fn for_scope(scope: Scope, snapshot: &Snapshot) -> Option<ScopeKey> {
        match scope {
            Scope::Roll => None,
            Scope::Hand => Some(ScopeKey::Hand(snapshot.hand_id)),
            Scope::Session => Some(ScopeKey::Session),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleState {
    pub cooldown_remaining: u32,
    pub scope_lock: Option<ScopeKey>,
    pub disabled: bool,
    pub last_fired_roll: Option<u64>,
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Fired,
    GuardFalse,
    GuardError,
    Cooldown,
    ScopeLocked,
    /// A step of a fired rule was dropped.
    StepDropped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceRecord {
    pub run_id: Uuid,
    pub rule_id: String,
    pub event: EventKind,
    pub when: String,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub roll_index: u64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    states: Vec<RuleState>,
    run_id: Uuid,
    trace_enabled: bool,
    trace: Vec<TraceRecord>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        let states = vec![RuleState::default(); rules.len()];
        Self {
            rules,
            states,
            run_id: Uuid::new_v4(),
            trace_enabled: false,
            trace: Vec::new(),
        }
    }

    /// Compile every rule in declaration order. The first malformed rule
    /// aborts the load.
    pub fn from_specs(specs: &[RuleSpec]) -> Result<Self, CscError> {
        let rules = specs
            .iter()
            .enumerate()
            .map(|(idx, spec)| Rule::compile(idx, spec))
            .collect::<Result<Vec<_>, _>>()?;
        info!(rules = rules.len(), "Rules compiled");
        Ok(Self::new(rules))
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, idx: usize) -> Option<&Rule> {
        self.rules.get(idx)
    }

    pub fn state(&self, idx: usize) -> Option<&RuleState> {
        self.states.get(idx)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    pub fn take_trace(&mut self) -> Vec<TraceRecord> {
        std::mem::take(&mut self.trace)
    }

    /// Once per event pass, before [`RuleEngine::evaluate`].
    pub fn tick(&mut self) {
        for state in &mut self.states {
            state.cooldown_remaining = state.cooldown_remaining.saturating_sub(1);
        }
    }

    /// Indices of the rules that fire for `snapshot`, in declaration order.
    /// Firing updates cooldown, scope lock and once state immediately.
    pub fn evaluate(&mut self, snapshot: &Snapshot) -> Vec<usize> {
        let mut fired = Vec::new();

        for idx in 0..self.rules.len() {
            let rule = &self.rules[idx];
            let state = &mut self.states[idx];
            if state.disabled || rule.trigger != Some(snapshot.event) {
                continue;
            }

            let key = ScopeKey::for_scope(rule.scope, snapshot);
            if let Some(key) = key {
                match state.scope_lock {
                    Some(lock) if lock == key => {
                        let rule_id = rule.id.clone();
                        self.record(&rule_id, snapshot, Verdict::ScopeLocked, None);
                        continue;
                    }
                    Some(_) => state.scope_lock = None,
                    None => {}
                }
            }

            if state.cooldown_remaining > 0 {
                let detail = format!("{} events remaining", state.cooldown_remaining);
                let rule_id = rule.id.clone();
                self.record(&rule_id, snapshot, Verdict::Cooldown, Some(detail));
                continue;
            }

            let outcome = match rule.guard {
                Some(ref guard) => guard.test(snapshot),
                None => Ok(true),
            };

            match outcome {
                Ok(true) => {
                    if rule.cooldown > 0 {
                        state.cooldown_remaining = rule.cooldown + 1;
                    }
                    if key.is_some() {
                        state.scope_lock = key;
                    }
                    if rule.once {
                        state.disabled = true;
                    }
                    state.last_fired_roll = Some(snapshot.roll_index);
                    debug!(rule_id = %rule.id, event = %snapshot.event, roll_index = snapshot.roll_index, "Rule fired");
                    let rule_id = rule.id.clone();
                    self.record(&rule_id, snapshot, Verdict::Fired, None);
                    fired.push(idx);
                }
                Ok(false) => {
                    let rule_id = rule.id.clone();
                    self.record(&rule_id, snapshot, Verdict::GuardFalse, None);
                }
                Err(e) => {
                    warn!(rule_id = %rule.id, when = %rule.guard_text, error = %e, "Rule guard failed; not fired");
                    let rule_id = rule.id.clone();
                    self.record(&rule_id, snapshot, Verdict::GuardError, Some(e.to_string()));
                }
            }
        }

        fired
    }

    /// Note a step of `rule_id` that produced nothing.
    pub fn record_dropped(&mut self, rule_id: &str, snapshot: &Snapshot, reason: String) {
        self.record(rule_id, snapshot, Verdict::StepDropped, Some(reason));
    }

    fn record(&mut self, rule_id: &str, snapshot: &Snapshot, verdict: Verdict, detail: Option<String>) {
        if !self.trace_enabled {
            return;
        }
        let when = self
            .rules
            .iter()
            .find(|r| r.id == rule_id)
            .map(|r| r.guard_text.clone())
            .unwrap_or_default();
        self.trace.push(TraceRecord {
            run_id: self.run_id,
            rule_id: rule_id.to_string(),
            event: snapshot.event,
            when,
            verdict,
            detail,
            roll_index: snapshot.roll_index,
            timestamp: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{StepSpec, Trigger};
    use crate::types::Value;

    // ---- helpers ----

    fn rule_spec(name: &str, event: &str, when: &str) -> RuleSpec {
        RuleSpec {
            name: Some(name.into()),
            on: Some(Trigger { event: event.into() }),
            when: Some(when.into()),
            steps: vec![StepSpec::Text("press place_6 6".into())],
            ..Default::default()
        }
    }

    fn snapshot(event: EventKind, hand_id: u64, roll_index: u64) -> Snapshot {
        Snapshot {
            event,
            hand_id,
            roll_index,
            point: Some(6),
            rolls_since_point: 3,
            ..Default::default()
        }
    }

    /// Run `n` passes of `event` and return the pass numbers (1-based) that fired.
    fn fire_pattern(engine: &mut RuleEngine, n: u64, hand_of: impl Fn(u64) -> u64) -> Vec<u64> {
        (1..=n)
            .filter(|k| {
                engine.tick();
                !engine.evaluate(&snapshot(EventKind::Roll, hand_of(*k), *k)).is_empty()
            })
            .collect()
    }

    // ---- guard ----

    #[test]
    fn test_guard_falls_back_to_wide_dialect() {
        let guard = Guard::compile("point in (6, 8)").unwrap();
        assert!(matches!(guard, Guard::Script(_)));
        assert!(guard.test(&snapshot(EventKind::Roll, 1, 1)).unwrap());

        let simple = Guard::compile("rolls_since_point == 3").unwrap();
        assert!(matches!(simple, Guard::Condition(_)));
    }

    #[test]
    fn test_guard_rejected_by_both_dialects() {
        assert!(Guard::compile("point ==").is_err());
        assert!(Guard::compile("x = 1").is_err());
    }

    // ---- compilation ----

    #[test]
    fn test_rule_ids() {
        let named = Rule::compile(0, &rule_spec("regress", "roll", "")).unwrap();
        assert_eq!(named.id, "rule:regress");
        let anon = RuleSpec {
            name: None,
            ..rule_spec("", "roll", "")
        };
        assert_eq!(Rule::compile(2, &anon).unwrap().id, "rule:#3");
        let by_id = RuleSpec {
            name: None,
            id: Some("r7".into()),
            ..rule_spec("", "roll", "")
        };
        assert_eq!(Rule::compile(0, &by_id).unwrap().id, "rule:r7");
    }

    #[test]
    fn test_malformed_rules() {
        let bad_event = rule_spec("x", "tuesday", "");
        assert!(matches!(Rule::compile(0, &bad_event), Err(CscError::MalformedRule { .. })));

        let bad_guard = rule_spec("x", "roll", "point >");
        assert!(matches!(Rule::compile(0, &bad_guard), Err(CscError::MalformedRule { .. })));

        let no_steps = RuleSpec {
            steps: vec![],
            ..rule_spec("x", "roll", "")
        };
        assert!(matches!(Rule::compile(0, &no_steps), Err(CscError::MalformedRule { .. })));
    }

    // ---- firing ----

    #[test]
    fn test_trigger_must_match_event() {
        let mut engine = RuleEngine::from_specs(&[rule_spec("r", "seven_out", "")]).unwrap();
        engine.tick();
        assert!(engine.evaluate(&snapshot(EventKind::Roll, 1, 1)).is_empty());
        engine.tick();
        assert_eq!(engine.evaluate(&snapshot(EventKind::SevenOut, 1, 2)), vec![0]);
    }

    #[test]
    fn test_cooldown_enforced() {
        let spec = RuleSpec {
            cooldown: 2,
            ..rule_spec("r", "roll", "")
        };
        let mut engine = RuleEngine::from_specs(&[spec]).unwrap();
        assert_eq!(fire_pattern(&mut engine, 7, |_| 1), vec![1, 4, 7]);
    }

    #[test]
    fn test_zero_cooldown_fires_every_pass() {
        let mut engine = RuleEngine::from_specs(&[rule_spec("r", "roll", "")]).unwrap();
        assert_eq!(fire_pattern(&mut engine, 3, |_| 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_hand_scope_fires_once_per_hand() {
        let spec = RuleSpec {
            scope: Scope::Hand,
            ..rule_spec("r", "roll", "")
        };
        let mut engine = RuleEngine::from_specs(&[spec]).unwrap();
        let hands = |k: u64| if k <= 3 { 1 } else { 2 };
        assert_eq!(fire_pattern(&mut engine, 6, hands), vec![1, 4]);
    }

    #[test]
    fn test_session_scope_and_once() {
        let session = RuleSpec {
            scope: Scope::Session,
            ..rule_spec("s", "roll", "")
        };
        let once = RuleSpec {
            once: true,
            ..rule_spec("o", "roll", "")
        };
        let mut engine = RuleEngine::from_specs(&[session]).unwrap();
        assert_eq!(fire_pattern(&mut engine, 4, |k| k), vec![1]);

        let mut engine = RuleEngine::from_specs(&[once]).unwrap();
        assert_eq!(fire_pattern(&mut engine, 4, |k| k), vec![1]);
        assert!(engine.state(0).unwrap().disabled);
    }

    #[test]
    fn test_guard_error_does_not_fire() {
        let mut engine = RuleEngine::from_specs(&[rule_spec("r", "roll", "missing_var > 3")])
            .unwrap()
            .with_trace(true);
        engine.tick();
        assert!(engine.evaluate(&snapshot(EventKind::Roll, 1, 1)).is_empty());
        let trace = engine.trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].verdict, Verdict::GuardError);
        assert!(trace[0].detail.as_deref().unwrap().contains("missing_var"));
        assert_eq!(trace[0].when, "missing_var > 3");
    }

    #[test]
    fn test_declaration_order_and_trace() {
        let mut engine = RuleEngine::from_specs(&[
            rule_spec("first", "roll", "rolls_since_point == 3"),
            rule_spec("second", "roll", "point == 8"),
            rule_spec("third", "roll", "TRUE"),
        ])
        .unwrap()
        .with_trace(true);
        engine.tick();
        assert_eq!(engine.evaluate(&snapshot(EventKind::Roll, 1, 1)), vec![0, 2]);
        let verdicts: Vec<_> = engine.take_trace().into_iter().map(|t| t.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Fired, Verdict::GuardFalse, Verdict::Fired]);
        assert!(engine.trace().is_empty());
        assert_eq!(engine.state(0).unwrap().last_fired_roll, Some(1));
    }

    #[test]
    fn test_guard_sees_user_variables() {
        let mut engine = RuleEngine::from_specs(&[rule_spec("r", "roll", "units >= 10")]).unwrap();
        let mut snap = snapshot(EventKind::Roll, 1, 1);
        snap.vars.insert("units".into(), Value::Int(10));
        engine.tick();
        assert_eq!(engine.evaluate(&snap), vec![0]);
    }

    #[test]
    fn test_bare_variable_guard_uses_truthiness() {
        let mut engine = RuleEngine::from_specs(&[rule_spec("r", "roll", "armed")]).unwrap();
        let mut snap = snapshot(EventKind::Roll, 1, 1);
        snap.vars.insert("armed".into(), Value::Int(0));
        engine.tick();
        assert!(engine.evaluate(&snap).is_empty());
        snap.vars.insert("armed".into(), Value::Int(3));
        engine.tick();
        assert_eq!(engine.evaluate(&snap), vec![0]);
    }

    #[test]
    fn test_trace_record_serializes_run_id() {
        let mut engine = RuleEngine::from_specs(&[rule_spec("r", "roll", "TRUE")])
            .unwrap()
            .with_trace(true);
        engine.tick();
        engine.evaluate(&snapshot(EventKind::Roll, 1, 1));
        let json = serde_json::to_value(&engine.trace()[0]).unwrap();
        assert_eq!(json["run_id"], engine.run_id().to_string());
        assert_eq!(json["rule_id"], "rule:r");
    }
}
