//! Template rendering: amount expressions → legal desired bets.

use std::collections::BTreeSet;

use tracing::debug;

use super::legalize::{lay_odds, legalize_bet, pass_odds, TableRules};
use crate::expr;
use crate::spec::{Amount, Template, TemplateEntry};
use crate::types::{BetMap, Snapshot, VarMap};

/// Desired bets for one pass, plus the odds keys flagged as working.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub bets: BetMap,
    pub working: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Pass,
    Dont,
}

impl Side {
    fn parse(key: &str) -> Option<Self> {
        match canonical_bet(key).as_str() {
            "pass_line" => Some(Side::Pass),
            "dont_pass" => Some(Side::Dont),
            _ => None,
        }
    }

    fn line_bet(&self) -> &'static str {
        match self {
            Side::Pass => "pass_line",
            Side::Dont => "dont_pass",
        }
    }

    fn odds_key(&self, point: u8) -> String {
        match self {
            Side::Pass => format!("odds_{point}_pass"),
            Side::Dont => format!("odds_{point}_dont"),
        }
    }
}

struct OddsRequest {
    side: Side,
    raw: f64,
    working: bool,
}

/// Canonical bet key: `pass` → `pass_line`, `dont` → `dont_pass`, `place6` → `place_6`.
pub fn canonical_bet(key: &str) -> String {
    let key = key.trim().to_lowercase().replace('\'', "");
    match key.as_str() {
        "pass" | "passline" => "pass_line".to_string(),
        "dont" | "dontpass" => "dont_pass".to_string(),
        "dontcome" => "dont_come".to_string(),
        other => match other.strip_prefix("place") {
            Some(n) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => {
                format!("place_{n}")
            }
            _ => other.to_string(),
        },
    }
}

/// Evaluate every template entry against system ⊕ user variables and
/// legalize the result. Entries that fail to evaluate or come out ≤ 0 are
/// absent from the output.
pub fn render(template: &Template, snapshot: &Snapshot, table: &TableRules) -> RenderedTemplate {
    let scope = snapshot.merged_variables();
    let mut out = RenderedTemplate::default();
    let mut odds = Vec::new();

    for (key, entry) in template {
        match (canonical_bet(key).as_str(), entry) {
            ("place", TemplateEntry::Nested(numbers)) => {
                for (number, inner) in numbers {
                    let bet = canonical_bet(&format!("place_{number}"));
                    if let Some(raw) = entry_amount(&bet, inner, &scope) {
                        insert_legal(&mut out.bets, &bet, raw, table);
                    }
                }
            }
            ("odds", TemplateEntry::Nested(sides)) => {
                for (side_key, inner) in sides {
                    let Some(side) = Side::parse(side_key) else {
                        debug!(side = %side_key, "Unknown odds side ignored");
                        continue;
                    };
                    if let Some(raw) = entry_amount(side_key, inner, &scope) {
                        odds.push(OddsRequest {
                            side,
                            raw,
                            working: entry_working(inner),
                        });
                    }
                }
            }
            (bet, TemplateEntry::Nested(_)) => {
                debug!(bet = %bet, "Nested template entry ignored");
            }
            (bet, entry) => {
                if let Some(raw) = entry_amount(bet, entry, &scope) {
                    insert_legal(&mut out.bets, bet, raw, table);
                }
                if let (TemplateEntry::Detailed(detail), Some(side)) = (entry, Side::parse(bet)) {
                    let raw = detail
                        .odds
                        .as_ref()
                        .and_then(|amount| eval_amount(bet, amount, &scope));
                    if let Some(raw) = raw {
                        odds.push(OddsRequest {
                            side,
                            raw,
                            working: detail.working.unwrap_or(false),
                        });
                    }
                }
            }
        }
    }

    if let Some(point) = snapshot.point {
        for req in odds {
            let base = out.bets.get(req.side.line_bet()).copied().unwrap_or(0);
            if base <= 0 {
                continue;
            }
            let amount = match req.side {
                Side::Pass => pass_odds(point, base, req.raw, table),
                Side::Dont => lay_odds(point, base, req.raw, table),
            };
            if amount > 0 {
                let key = req.side.odds_key(point);
                if req.working {
                    out.working.insert(key.clone());
                }
                out.bets.insert(key, amount);
            }
        }
    }

    debug!(
        mode = %snapshot.mode,
        bets = out.bets.len(),
        "Template rendered"
    );
    out
}

fn insert_legal(bets: &mut BetMap, bet: &str, raw: f64, table: &TableRules) {
    let amount = legalize_bet(bet, raw, table);
    if amount > 0 {
        bets.insert(bet.to_string(), amount);
    }
}

fn entry_amount(bet: &str, entry: &TemplateEntry, scope: &VarMap) -> Option<f64> {
    match entry {
        TemplateEntry::Amount(amount) => eval_amount(bet, amount, scope),
        TemplateEntry::Detailed(detail) => eval_amount(bet, &detail.amount, scope),
        TemplateEntry::Nested(_) => None,
    }
}

fn entry_working(entry: &TemplateEntry) -> bool {
    matches!(entry, TemplateEntry::Detailed(d) if d.working == Some(true))
}

fn eval_amount(bet: &str, amount: &Amount, scope: &VarMap) -> Option<f64> {
    let raw = match amount {
        Amount::Number(n) => *n,
        Amount::Expr(text) => match expr::eval_num(text, scope) {
            Ok(v) => v,
            Err(e) => {
                debug!(bet = %bet, expr = %text, error = %e, "Template amount failed to evaluate");
                return None;
            }
        },
    };
    (raw.is_finite() && raw > 0.0).then_some(raw)
}
