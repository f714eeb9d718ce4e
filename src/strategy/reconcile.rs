//! Desired-vs-current bet reconciliation.
//!
//! Amounts never change in place: a changed bet is cleared and set again so
//! the downstream adapter only needs to support whole-bet placement.

use std::collections::BTreeSet;

use crate::types::{ActionEnvelope, BetMap, Source, Wager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BetChange {
    Clear { bet_type: String },
    Set { bet_type: String, amount: i64 },
}

impl BetChange {
    pub fn bet_type(&self) -> &str {
        match self {
            BetChange::Clear { bet_type } | BetChange::Set { bet_type, .. } => bet_type,
        }
    }
}

/// Ordered changes that turn `current` into `desired`.
///
/// All clears come first, then all sets, each group alphabetical by bet
/// type. Entries ≤ 0 on either side count as absent, so `diff(x, x)` is
/// always empty.
pub fn diff(current: &BetMap, desired: &BetMap) -> Vec<BetChange> {
    let live = |map: &BetMap, key: &str| map.get(key).copied().filter(|a| *a > 0);

    let clears = current
        .iter()
        .filter(|(_, amount)| **amount > 0)
        .filter(|(bet, amount)| live(desired, bet.as_str()) != Some(**amount))
        .map(|(bet, _)| BetChange::Clear {
            bet_type: bet.clone(),
        });

    let sets = desired
        .iter()
        .filter(|(_, amount)| **amount > 0)
        .filter(|(bet, amount)| live(current, bet.as_str()) != Some(**amount))
        .map(|(bet, amount)| BetChange::Set {
            bet_type: bet.clone(),
            amount: *amount,
        });

    // BTreeMap iteration is already sorted by key.
    clears.chain(sets).collect()
}

/// Stamp changes as template envelopes for `mode`.
pub fn template_envelopes(
    changes: &[BetChange],
    mode: &str,
    working: &BTreeSet<String>,
) -> Vec<ActionEnvelope> {
    let id = format!("template:{mode}");
    changes
        .iter()
        .map(|change| match change {
            BetChange::Clear { bet_type } => {
                ActionEnvelope::clear(Source::Template, &id, bet_type).with_notes("template diff")
            }
            BetChange::Set { bet_type, amount } => {
                let env = ActionEnvelope::wager(Source::Template, &id, Wager::Set, bet_type, *amount as f64)
                    .with_notes("template diff");
                if working.contains(bet_type) {
                    env.with_working(true)
                } else {
                    env
                }
            }
        })
        .collect()
}
