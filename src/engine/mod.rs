//! Decision engine: derived events in, action envelopes out.
//!
//! [`Controller`] runs one pass per event: snapshot → rules → mode switch →
//! template diff → envelopes → adapter → observers. Everything a pass
//! needs is owned by the controller, so separate controllers never share
//! state.

pub mod accountant;
pub mod events;
pub mod executor;
pub mod rules;
pub mod varstore;
pub mod verbs;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::spec::{ModeSpec, StrategySpec};
use crate::strategy::TemplatePlanner;
use crate::types::{ActionEnvelope, ActionKind, CscError, EventKind, Snapshot, VarMap};
use events::{Event, EventDeriver};
use executor::{BetAdapter, PaperTable};
use rules::{RuleEngine, TraceRecord};
use varstore::VarStore;
use verbs::{StepContext, StepError, VerbRegistry};

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Sees every pass after its envelopes are final, in registration order.
#[cfg_attr(test, mockall::automock)]
pub trait Observer {
    fn on_pass(&mut self, event: &Event, snapshot: &Snapshot, actions: &[ActionEnvelope]);
}

/// Lets a caller keep a handle on an observer it registered.
impl<T: Observer> Observer for Arc<Mutex<T>> {
    fn on_pass(&mut self, event: &Event, snapshot: &Snapshot, actions: &[ActionEnvelope]) {
        let mut inner = self.lock().unwrap_or_else(|e| e.into_inner());
        inner.on_pass(event, snapshot, actions);
    }
}

// ---------------------------------------------------------------------------
// Pass
// ---------------------------------------------------------------------------

/// One handled event and the envelopes it produced.
#[derive(Debug, Clone)]
pub struct Pass {
    pub seq: u64,
    pub event: Event,
    pub actions: Vec<ActionEnvelope>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller<A: BetAdapter = PaperTable> {
    modes: BTreeMap<String, ModeSpec>,
    planner: TemplatePlanner,
    deriver: EventDeriver,
    rules: RuleEngine,
    verbs: VerbRegistry,
    vars: VarStore,
    adapter: A,
    observers: Vec<Box<dyn Observer>>,
    seq: u64,
}

impl<A: BetAdapter> Controller<A> {
    pub fn new(spec: &StrategySpec, adapter: A) -> Result<Self, CscError> {
        if spec.modes.is_empty() {
            return Err(CscError::InvalidSpec(vec![
                "modes must define at least one mode".into(),
            ]));
        }
        let rules = RuleEngine::from_specs(&spec.rules)?;
        let vars = VarStore::from_spec(spec);
        let table = spec.table.rules();

        info!(
            modes = spec.modes.len(),
            rules = rules.rules().len(),
            mode = %vars.mode(),
            level = table.level,
            bubble = table.bubble,
            odds = %table.odds,
            run_id = %rules.run_id(),
            "Controller ready"
        );

        Ok(Self {
            modes: spec.modes.clone(),
            planner: TemplatePlanner::new(table),
            deriver: EventDeriver::new(),
            rules,
            verbs: VerbRegistry::standard(),
            vars,
            adapter,
            observers: Vec::new(),
            seq: 0,
        })
    }

    /// Record a decision trace entry for every rule evaluation.
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.rules = self.rules.with_trace(enabled);
        self
    }

    pub fn with_verbs(mut self, verbs: VerbRegistry) -> Self {
        self.verbs = verbs;
        self
    }

    pub fn register_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    // -- Driving -------------------------------------------------------------

    /// Derive the events for one roll and run a pass for each.
    pub fn roll(&mut self, total: u8, dice: Option<(u8, u8)>) -> Result<Vec<Pass>, CscError> {
        let events = self.deriver.roll(total, dice)?;
        Ok(events.into_iter().map(|event| self.run_pass(event)).collect())
    }

    /// Feed an externally settled bet through the rules as `bet_resolved`.
    pub fn resolve(&mut self, bet_type: &str, result: &str, payout: Option<f64>) -> Pass {
        let event = self.deriver.resolve(bet_type, result, payout);
        self.run_pass(event)
    }

    /// Start the table over. Rule state, variables and mode carry on.
    pub fn reset_table(&mut self) {
        info!(roll_index = self.deriver.roll_index(), "Table reset");
        self.deriver.reset();
    }

    fn run_pass(&mut self, event: Event) -> Pass {
        let actions = self.handle_event(&event);
        Pass {
            seq: self.seq,
            event,
            actions,
        }
    }

    /// One full pass for an already derived event.
    pub fn handle_event(&mut self, event: &Event) -> Vec<ActionEnvelope> {
        self.seq += 1;
        let seq = self.seq;
        self.rules.tick();

        let snapshot = self.snapshot(event);
        let fired = self.rules.evaluate(&snapshot);

        let mut switches = Vec::new();
        let mut others = Vec::new();
        let mut mode_switched = false;

        for idx in fired {
            let Some(rule) = self.rules.rule(idx) else {
                continue;
            };
            let rule_id = rule.id.clone();
            let steps = rule.steps.clone();

            for step in &steps {
                let mut ctx = StepContext {
                    rule_id: &rule_id,
                    snapshot: &snapshot,
                    vars: &mut self.vars,
                };
                match self.verbs.run(step, &mut ctx) {
                    Ok(envelopes) => {
                        for env in envelopes {
                            if env.action == ActionKind::SwitchMode {
                                mode_switched |= self.vars.switch_mode(&env.notes);
                                switches.push(env);
                            } else {
                                others.push(env);
                            }
                        }
                    }
                    Err(e) => {
                        if matches!(e, StepError::Engine(CscError::TimingViolation { .. })) {
                            warn!(rule_id = %rule_id, step = %step.describe(), error = %e, "Step refused");
                        } else {
                            debug!(rule_id = %rule_id, step = %step.describe(), error = %e, "Step dropped");
                        }
                        self.rules.record_dropped(&rule_id, &snapshot, e.to_string());
                    }
                }
            }
        }

        let template = if event.kind == EventKind::PointEstablished || mode_switched {
            self.template_actions(&snapshot)
        } else {
            Vec::new()
        };

        let actions: Vec<ActionEnvelope> = switches
            .into_iter()
            .chain(template)
            .chain(others)
            .map(|env| env.with_seq(seq))
            .collect();

        debug!(
            seq,
            event = %event.kind,
            roll_index = event.roll_index,
            actions = actions.len(),
            mode = %self.vars.mode(),
            "Pass complete"
        );

        if !actions.is_empty() {
            self.adapter.apply(&actions);
        }
        for observer in &mut self.observers {
            observer.on_pass(event, &snapshot, &actions);
        }
        actions
    }

    fn template_actions(&self, snapshot: &Snapshot) -> Vec<ActionEnvelope> {
        let mode = self.vars.mode();
        let Some(spec) = self.modes.get(mode) else {
            warn!(mode = %mode, "Active mode has no template");
            return Vec::new();
        };
        let planning = Snapshot {
            mode: mode.to_string(),
            vars: self.vars.vars().clone(),
            ..snapshot.clone()
        };
        self.planner.plan(mode, &spec.template, &planning).actions
    }

    /// Snapshot for `event`, built from the event, the adapter's layout and
    /// the current variables.
    pub fn snapshot(&self, event: &Event) -> Snapshot {
        let table = self.planner.table();
        let resolution = event.resolution.as_ref();
        Snapshot {
            event: event.kind,
            bankroll: self.adapter.bankroll(),
            point: if event.on_comeout { None } else { event.point },
            on_comeout: event.on_comeout,
            hand_id: event.hand_id,
            roll_in_hand: event.roll_in_hand,
            roll_index: event.roll_index,
            rolls_since_point: event.rolls_since_point,
            last_roll: event.total,
            dice: event.dice,
            mode: self.vars.mode().to_string(),
            bubble: table.bubble,
            table_level: table.level,
            counters: event.counters,
            resolved_bet: resolution.map(|r| r.bet_type.clone()),
            resolved_result: resolution.map(|r| r.result.clone()),
            bets: self.adapter.bets(),
            vars: self.vars.vars().clone(),
        }
    }

    // -- Accessors -----------------------------------------------------------

    pub fn mode(&self) -> &str {
        self.vars.mode()
    }

    pub fn vars(&self) -> &VarMap {
        self.vars.vars()
    }

    pub fn deriver(&self) -> &EventDeriver {
        &self.deriver
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn trace(&self) -> &[TraceRecord] {
        self.rules.trace()
    }

    pub fn take_trace(&mut self) -> Vec<TraceRecord> {
        self.rules.take_trace()
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
