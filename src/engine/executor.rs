//! Bet adapter seam and the in-memory paper table.
//!
//! The engine never places money itself. Each pass it reads the current
//! layout from a [`BetAdapter`] and hands back the envelopes to materialize.
//! [`PaperTable`] is the dry-run adapter used by the replay binary and tests.

use tracing::{debug, info, warn};

use crate::types::{ActionEnvelope, ActionKind, BetMap};

// ---------------------------------------------------------------------------
// Apply report
// ---------------------------------------------------------------------------

/// Result of materializing one pass's envelopes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub applied: Vec<AppliedAction>,
    pub skipped: Vec<SkippedAction>,
    /// Net money moved onto the layout (negative when bets came down).
    pub net_committed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAction {
    pub id: String,
    pub action: ActionKind,
    pub bet_type: String,
    pub amount_after: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedAction {
    pub id: String,
    pub action: ActionKind,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

pub trait BetAdapter {
    /// Bets currently on the layout, keyed like template output.
    fn bets(&self) -> BetMap;

    fn bankroll(&self) -> f64;

    /// Materialize envelopes in order. Non-bet actions are ignored.
    fn apply(&mut self, actions: &[ActionEnvelope]) -> ApplyReport;
}

// ---------------------------------------------------------------------------
// Paper table
// ---------------------------------------------------------------------------

/// Layout ledger with no dice and no payouts: it only moves money between
/// the bankroll and the bets the engine asks for.
#[derive(Debug, Clone, Default)]
pub struct PaperTable {
    bets: BetMap,
    bankroll: f64,
}

impl PaperTable {
    pub fn new(bankroll: f64) -> Self {
        Self {
            bets: BetMap::new(),
            bankroll,
        }
    }

    pub fn with_bets(mut self, bets: BetMap) -> Self {
        self.bets = bets;
        self
    }

    /// Money on the layout.
    pub fn exposure(&self) -> i64 {
        self.bets.values().sum()
    }

    /// Take a bet down without an envelope, e.g. after it lost.
    pub fn remove(&mut self, bet_type: &str) -> Option<i64> {
        self.bets.remove(bet_type)
    }

    fn move_to(&mut self, bet_type: &str, amount: i64) -> f64 {
        let before = self.bets.get(bet_type).copied().unwrap_or(0);
        if amount > 0 {
            self.bets.insert(bet_type.to_string(), amount);
        } else {
            self.bets.remove(bet_type);
        }
        let delta = (amount - before) as f64;
        self.bankroll -= delta;
        delta
    }
}

impl BetAdapter for PaperTable {
    fn bets(&self) -> BetMap {
        self.bets.clone()
    }

    fn bankroll(&self) -> f64 {
        self.bankroll
    }

    fn apply(&mut self, actions: &[ActionEnvelope]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for env in actions {
            if !env.action.mutates_bets() {
                continue;
            }
            let Some(ref bet) = env.bet_type else {
                report.skipped.push(SkippedAction {
                    id: env.id.clone(),
                    action: env.action,
                    reason: "no bet type".into(),
                });
                continue;
            };

            let current = self.bets.get(bet).copied().unwrap_or(0);
            // Fractional amounts are whole dollars on the felt.
            let amount = env.amount.map(|a| a.round() as i64).unwrap_or(0);
            let target = match env.action {
                ActionKind::Set => amount,
                ActionKind::Press => current + amount,
                ActionKind::Reduce => (current - amount).max(0),
                _ => 0,
            };

            if env.action == ActionKind::Clear && current == 0 {
                debug!(id = %env.id, bet = %bet, "Clear of an absent bet");
            }

            let delta = self.move_to(bet, target);
            report.net_committed += delta;
            report.applied.push(AppliedAction {
                id: env.id.clone(),
                action: env.action,
                bet_type: bet.clone(),
                amount_after: target,
            });
        }

        if self.bankroll < 0.0 {
            warn!(bankroll = format!("${:.2}", self.bankroll), "Paper bankroll overdrawn");
        }
        if !report.applied.is_empty() {
            info!(
                applied = report.applied.len(),
                skipped = report.skipped.len(),
                committed = format!("${:.2}", report.net_committed),
                exposure = self.exposure(),
                "[PAPER] Layout updated"
            );
        }
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
