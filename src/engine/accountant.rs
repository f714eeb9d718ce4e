//! Session ledger: per-pass tallies collected through the observer seam.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::events::Event;
use super::Observer;
use crate::types::{ActionEnvelope, ActionKind, EventKind, Snapshot, Source};

// ---------------------------------------------------------------------------
// Per-bet tallies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BetTally {
    pub sets: u64,
    pub presses: u64,
    pub reduces: u64,
    pub clears: u64,
    /// Sum of amounts across set/press/reduce envelopes.
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// Session summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub passes: u64,
    pub rolls: u64,
    pub hands: u64,
    pub events: BTreeMap<String, u64>,
    pub rules_fired: BTreeMap<String, u64>,
    pub template_actions: u64,
    pub rule_actions: u64,
    pub mode_switches: Vec<String>,
    pub setvars: u64,
    pub points_seen: BTreeMap<u8, u64>,
    pub bets: BTreeMap<String, BetTally>,
    pub final_mode: String,
    pub final_bankroll: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionLedger {
    passes: u64,
    last_roll_index: u64,
    last_hand_id: u64,
    events: BTreeMap<String, u64>,
    rules_fired: BTreeMap<String, u64>,
    template_actions: u64,
    rule_actions: u64,
    mode_switches: Vec<String>,
    setvars: u64,
    points_seen: BTreeMap<u8, u64>,
    bets: BTreeMap<String, BetTally>,
    last_mode: String,
    last_bankroll: f64,
    started_at: DateTime<Utc>,
}

impl Default for SessionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLedger {
    pub fn new() -> Self {
        Self {
            passes: 0,
            last_roll_index: 0,
            last_hand_id: 0,
            events: BTreeMap::new(),
            rules_fired: BTreeMap::new(),
            template_actions: 0,
            rule_actions: 0,
            mode_switches: Vec::new(),
            setvars: 0,
            points_seen: BTreeMap::new(),
            bets: BTreeMap::new(),
            last_mode: String::new(),
            last_bankroll: 0.0,
            started_at: Utc::now(),
        }
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn event_count(&self, kind: EventKind) -> u64 {
        self.events.get(kind.as_str()).copied().unwrap_or(0)
    }

    pub fn rule_fired_count(&self, rule_id: &str) -> u64 {
        self.rules_fired.get(rule_id).copied().unwrap_or(0)
    }

    pub fn bet(&self, bet_type: &str) -> Option<&BetTally> {
        self.bets.get(bet_type)
    }

    pub fn mode_switches(&self) -> &[String] {
        &self.mode_switches
    }

    pub fn summary(&self) -> SessionSummary {
        let summary = SessionSummary {
            passes: self.passes,
            rolls: self.last_roll_index,
            hands: self.last_hand_id,
            events: self.events.clone(),
            rules_fired: self.rules_fired.clone(),
            template_actions: self.template_actions,
            rule_actions: self.rule_actions,
            mode_switches: self.mode_switches.clone(),
            setvars: self.setvars,
            points_seen: self.points_seen.clone(),
            bets: self.bets.clone(),
            final_mode: self.last_mode.clone(),
            final_bankroll: self.last_bankroll,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        info!(
            passes = summary.passes,
            rolls = summary.rolls,
            hands = summary.hands,
            template_actions = summary.template_actions,
            rule_actions = summary.rule_actions,
            switches = summary.mode_switches.len(),
            mode = %summary.final_mode,
            bankroll = format!("${:.2}", summary.final_bankroll),
            "Session reconciled"
        );
        summary
    }

    fn record_action(&mut self, env: &ActionEnvelope) {
        match env.source {
            Source::Template => self.template_actions += 1,
            Source::Rule => self.rule_actions += 1,
        }
        match env.action {
            ActionKind::SwitchMode => self.mode_switches.push(env.notes.clone()),
            ActionKind::Setvar => self.setvars += 1,
            kind => {
                let Some(ref bet) = env.bet_type else { return };
                let tally = self.bets.entry(bet.clone()).or_default();
                match kind {
                    ActionKind::Set => tally.sets += 1,
                    ActionKind::Press => tally.presses += 1,
                    ActionKind::Reduce => tally.reduces += 1,
                    _ => tally.clears += 1,
                }
                tally.volume += env.amount.unwrap_or(0.0);
            }
        }
    }
}

impl Observer for SessionLedger {
    fn on_pass(&mut self, event: &Event, snapshot: &Snapshot, actions: &[ActionEnvelope]) {
        self.passes += 1;
        self.last_roll_index = self.last_roll_index.max(event.roll_index);
        self.last_hand_id = self.last_hand_id.max(event.hand_id);
        *self.events.entry(event.kind.as_str().to_string()).or_default() += 1;

        if event.kind == EventKind::PointEstablished {
            if let Some(point) = event.point {
                *self.points_seen.entry(point).or_default() += 1;
            }
        }

        // One count per rule per pass, however many envelopes it produced.
        let fired: BTreeSet<&str> = actions
            .iter()
            .filter(|a| a.source == Source::Rule)
            .map(|a| a.id.as_str())
            .collect();
        for id in fired {
            *self.rules_fired.entry(id.to_string()).or_default() += 1;
        }

        for env in actions {
            self.record_action(env);
        }

        self.last_mode = actions
            .iter()
            .rev()
            .find(|a| a.action == ActionKind::SwitchMode)
            .map(|a| a.notes.clone())
            .unwrap_or_else(|| snapshot.mode.clone());
        self.last_bankroll = snapshot.bankroll;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
