//! Mock bet adapter for integration testing.
//!
//! Provides a deterministic `BetAdapter` that records every batch it is
//! handed and keeps a layout test code can inspect and rearrange, all
//! in-memory behind shared handles.

use std::sync::{Arc, Mutex};

use csc_engine::engine::executor::{AppliedAction, ApplyReport, BetAdapter};
use csc_engine::types::{ActionEnvelope, ActionKind, BetMap};

/// A recording adapter. Clones share state, so a test can keep one clone
/// while the controller owns another.
#[derive(Clone, Default)]
pub struct MockAdapter {
    layout: Arc<Mutex<BetMap>>,
    bankroll: Arc<Mutex<f64>>,
    batches: Arc<Mutex<Vec<Vec<ActionEnvelope>>>>,
}

impl MockAdapter {
    pub fn new(bankroll: f64) -> Self {
        Self {
            bankroll: Arc::new(Mutex::new(bankroll)),
            ..Default::default()
        }
    }

    pub fn layout(&self) -> BetMap {
        self.layout.lock().unwrap().clone()
    }

    /// Every non-empty batch applied so far, in order.
    pub fn batches(&self) -> Vec<Vec<ActionEnvelope>> {
        self.batches.lock().unwrap().clone()
    }

    /// Take every bet down, as a seven-out would.
    pub fn lose_all(&self) {
        self.layout.lock().unwrap().clear();
    }

    pub fn put(&self, bet: &str, amount: i64) {
        self.layout.lock().unwrap().insert(bet.to_string(), amount);
    }
}

impl BetAdapter for MockAdapter {
    fn bets(&self) -> BetMap {
        self.layout()
    }

    fn bankroll(&self) -> f64 {
        *self.bankroll.lock().unwrap()
    }

    fn apply(&mut self, actions: &[ActionEnvelope]) -> ApplyReport {
        self.batches.lock().unwrap().push(actions.to_vec());
        let mut report = ApplyReport::default();
        let mut layout = self.layout.lock().unwrap();
        for env in actions {
            let Some(ref bet) = env.bet_type else { continue };
            let current = layout.get(bet).copied().unwrap_or(0);
            let amount = env.amount.unwrap_or(0.0) as i64;
            let after = match env.action {
                ActionKind::Set => amount,
                ActionKind::Press => current + amount,
                ActionKind::Reduce => (current - amount).max(0),
                _ => 0,
            };
            if after > 0 {
                layout.insert(bet.clone(), after);
            } else {
                layout.remove(bet);
            }
            report.applied.push(AppliedAction {
                id: env.id.clone(),
                action: env.action,
                bet_type: bet.clone(),
                amount_after: after,
            });
        }
        report
    }
}
