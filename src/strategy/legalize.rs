//! Amount legalization against table minimums and odds limits.
//!
//! Every function here is pure and total: malformed input (NaN, negatives,
//! non-point numbers) degrades to `0` rather than failing, and for fixed
//! table parameters the result never decreases as the raw amount grows.

use serde::Serialize;
use std::fmt;

use crate::types::Value;

/// Point numbers a shooter can establish.
pub const POINTS: [u8; 6] = [4, 5, 6, 8, 9, 10];

pub fn is_point(n: u8) -> bool {
    POINTS.contains(&n)
}

// ---------------------------------------------------------------------------
// Odds policy
// ---------------------------------------------------------------------------

/// Maximum odds as a multiple of the line bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OddsPolicy {
    /// 3x on 4/10, 4x on 5/9, 5x on 6/8.
    #[default]
    ThreeFourFive,
    /// The same multiple on every point.
    Uniform(u32),
}

impl OddsPolicy {
    /// Strict parse: `"3-4-5x"` (also `345x`, `3_4_5x`), `"Nx"`, `"N"` or an
    /// integer. Returns `None` for anything else.
    pub fn try_parse(raw: &Value) -> Option<Self> {
        match raw {
            Value::Int(n) => u32::try_from(*n).ok().map(OddsPolicy::Uniform),
            Value::Str(s) => {
                let text: String = s
                    .trim()
                    .to_lowercase()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                let text = text.strip_suffix('x').unwrap_or(&text);
                match text {
                    "3-4-5" | "345" | "3_4_5" => Some(OddsPolicy::ThreeFourFive),
                    n => n.parse::<u32>().ok().map(OddsPolicy::Uniform),
                }
            }
            _ => None,
        }
    }

    /// Lenient parse used at run time; unknown input means 3-4-5x.
    pub fn parse(raw: Option<&Value>) -> Self {
        raw.and_then(Self::try_parse).unwrap_or_default()
    }

    /// Multiple for a point; `0` when `point` is not a point number.
    pub fn multiple(&self, point: u8) -> i64 {
        if !is_point(point) {
            return 0;
        }
        match self {
            OddsPolicy::ThreeFourFive => match point {
                4 | 10 => 3,
                5 | 9 => 4,
                _ => 5,
            },
            OddsPolicy::Uniform(n) => i64::from(*n),
        }
    }
}

impl fmt::Display for OddsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OddsPolicy::ThreeFourFive => write!(f, "3-4-5x"),
            OddsPolicy::Uniform(n) => write!(f, "{n}x"),
        }
    }
}

// ---------------------------------------------------------------------------
// Table rules
// ---------------------------------------------------------------------------

/// Table parameters every legalization depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableRules {
    pub bubble: bool,
    /// Table minimum in whole dollars.
    pub level: i64,
    pub odds: OddsPolicy,
}

impl Default for TableRules {
    fn default() -> Self {
        Self {
            bubble: false,
            level: 10,
            odds: OddsPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Whole-dollar part of a raw amount. NaN and non-positive are 0; large
/// amounts, `+inf` included, saturate at `i64::MAX`.
fn whole(raw: f64) -> i64 {
    if raw.is_nan() || raw <= 0.0 {
        return 0;
    }
    raw.trunc().min(i64::MAX as f64) as i64
}

fn round_up(amount: i64, step: i64) -> i64 {
    if step <= 1 {
        return amount;
    }
    match amount % step {
        0 => amount,
        r => amount.saturating_add(step - r),
    }
}

fn round_down(amount: i64, step: i64) -> i64 {
    if step <= 1 {
        return amount;
    }
    amount - amount % step
}

// ---------------------------------------------------------------------------
// Flat and place bets
// ---------------------------------------------------------------------------

/// Legalize a flat (`number == None`) or place bet amount.
///
/// The amount is first floored at the table level, then rounded up to the
/// increment: $6 on 6/8, $5 on 4/5/9/10, the table level for flat bets, or
/// $1 on a bubble table. Place bets take the level floor too, so $6 on the
/// six at a $10 table becomes $12.
pub fn legalize_amount(number: Option<u8>, raw: f64, table: &TableRules) -> i64 {
    let amount = whole(raw);
    if amount == 0 {
        return 0;
    }
    let amount = amount.max(table.level);
    let step = if table.bubble {
        1
    } else {
        match number {
            Some(6 | 8) => 6,
            Some(4 | 5 | 9 | 10) => 5,
            _ => table.level.max(1),
        }
    };
    round_up(amount, step)
}

/// Place number encoded in a `place_<n>` key.
pub fn place_number(bet_type: &str) -> Option<u8> {
    bet_type
        .strip_prefix("place_")
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| is_point(*n))
}

/// Legalize any non-odds bet by key.
pub fn legalize_bet(bet_type: &str, raw: f64, table: &TableRules) -> i64 {
    legalize_amount(place_number(bet_type), raw, table)
}

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

/// Take-odds behind a pass/come bet of `base`.
///
/// Capped at `multiple × base`, then rounded down to a payout-clean step:
/// $1 on 4/10, $2 on 5/9, $5 on 6/8 ($1 on a bubble table).
pub fn pass_odds(point: u8, base: i64, raw: f64, table: &TableRules) -> i64 {
    let cap = table.odds.multiple(point).saturating_mul(base.max(0));
    let amount = whole(raw).min(cap);
    let step = if table.bubble {
        1
    } else {
        match point {
            5 | 9 => 2,
            6 | 8 => 5,
            _ => 1,
        }
    };
    round_down(amount, step)
}

/// Lay-odds behind a don't-pass/don't-come bet of `base`.
///
/// The win cap `multiple × base` is converted to the lay amount that wins it
/// (×2 on 4/10, ×3/2 on 5/9, ×6/5 on 6/8, floored), the desired amount is
/// capped there and rounded down to $2/$3/$6 ($1 on a bubble table).
pub fn lay_odds(point: u8, base: i64, raw: f64, table: &TableRules) -> i64 {
    let win_cap = table.odds.multiple(point).saturating_mul(base.max(0));
    let (lay_cap, step) = match point {
        4 | 10 => (win_cap.saturating_mul(2), 2),
        5 | 9 => (win_cap.saturating_mul(3) / 2, 3),
        6 | 8 => (win_cap.saturating_mul(6) / 5, 6),
        _ => return 0,
    };
    let amount = whole(raw).min(lay_cap);
    round_down(amount, if table.bubble { 1 } else { step })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- helpers ----

    fn table(bubble: bool, level: i64) -> TableRules {
        TableRules {
            bubble,
            level,
            odds: OddsPolicy::ThreeFourFive,
        }
    }

    // ---- flat / place ----

    #[test]
    fn test_place_six_rounds_up_to_six_dollar_step() {
        // units = 5, "units*2" -> raw 10 at a $10 table.
        assert_eq!(legalize_amount(Some(6), 10.0, &table(false, 10)), 12);
    }

    #[test]
    fn test_place_five_step() {
        assert_eq!(legalize_amount(Some(5), 11.0, &table(false, 5)), 15);
        assert_eq!(legalize_bet("place_9", 10.0, &table(false, 5)), 10);
    }

    #[test]
    fn test_flat_floored_at_table_level() {
        assert_eq!(legalize_amount(None, 3.0, &table(false, 10)), 10);
        assert_eq!(legalize_amount(None, 15.0, &table(false, 10)), 20);
        assert_eq!(legalize_bet("pass_line", 7.9, &table(false, 5)), 10);
    }

    #[test]
    fn test_bubble_uses_one_dollar_steps() {
        assert_eq!(legalize_amount(Some(6), 7.0, &table(true, 5)), 7);
        assert_eq!(legalize_amount(None, 7.0, &table(true, 5)), 7);
        assert_eq!(legalize_amount(None, 3.0, &table(true, 5)), 5);
    }

    #[test]
    fn test_degenerate_input_is_zero() {
        let t = table(false, 10);
        assert_eq!(legalize_amount(Some(6), 0.0, &t), 0);
        assert_eq!(legalize_amount(Some(6), -4.0, &t), 0);
        assert_eq!(legalize_amount(Some(6), f64::NAN, &t), 0);
        assert_eq!(legalize_amount(None, f64::NEG_INFINITY, &t), 0);
    }

    #[test]
    fn test_infinite_amount_saturates() {
        let t = table(false, 10);
        let huge = legalize_amount(None, 1e300, &t);
        let inf = legalize_amount(None, f64::INFINITY, &t);
        assert_eq!(inf, i64::MAX);
        assert!(inf >= huge);
        assert!(legalize_amount(Some(6), f64::INFINITY, &t) >= legalize_amount(Some(6), 1e300, &t));
        assert_eq!(pass_odds(6, 10, f64::INFINITY, &t), 50);
    }

    #[test]
    fn test_place_floored_at_table_level() {
        assert_eq!(legalize_amount(Some(6), 6.0, &table(false, 10)), 12);
        assert_eq!(legalize_amount(Some(4), 5.0, &table(false, 10)), 10);
        assert_eq!(legalize_amount(Some(6), 6.0, &table(false, 5)), 6);
    }

    #[test]
    fn test_legalization_is_monotonic() {
        for bubble in [false, true] {
            for level in [0, 5, 10, 15, 25] {
                let t = table(bubble, level);
                for number in [None, Some(4), Some(5), Some(6), Some(8), Some(9), Some(10)] {
                    let mut prev = i64::MIN;
                    for tenths in -20..800 {
                        let got = legalize_amount(number, f64::from(tenths) / 10.0, &t);
                        assert!(got >= prev, "{number:?} bubble={bubble} level={level} at {tenths}");
                        prev = got;
                    }
                }
            }
        }
    }

    #[test]
    fn test_place_number_parsing() {
        assert_eq!(place_number("place_6"), Some(6));
        assert_eq!(place_number("place_7"), None);
        assert_eq!(place_number("pass_line"), None);
    }

    // ---- odds ----

    #[test]
    fn test_pass_odds_345_caps_and_rounds_down() {
        let t = table(false, 10);
        assert_eq!(pass_odds(6, 10, 1000.0, &t), 50);
        assert_eq!(pass_odds(5, 10, 1000.0, &t), 40);
        assert_eq!(pass_odds(4, 10, 1000.0, &t), 30);
        assert_eq!(pass_odds(6, 10, 23.0, &t), 20);
        assert_eq!(pass_odds(5, 10, 23.0, &t), 22);
        assert_eq!(pass_odds(7, 10, 100.0, &t), 0);
    }

    #[test]
    fn test_pass_odds_uniform_policy() {
        let t = TableRules {
            odds: OddsPolicy::Uniform(2),
            ..table(false, 10)
        };
        assert_eq!(pass_odds(6, 10, 100.0, &t), 20);
        assert_eq!(pass_odds(9, 15, 100.0, &t), 30);
    }

    #[test]
    fn test_lay_odds_converts_win_cap() {
        let t = table(false, 10);
        // 4/10: win cap 30 -> lay cap 60
        assert_eq!(lay_odds(4, 10, 1000.0, &t), 60);
        // 5/9: win cap 40 -> lay cap 60
        assert_eq!(lay_odds(9, 10, 1000.0, &t), 60);
        // 6/8: win cap 50 -> lay cap 60
        assert_eq!(lay_odds(8, 10, 1000.0, &t), 60);
        assert_eq!(lay_odds(6, 10, 17.0, &t), 12);
        assert_eq!(lay_odds(5, 10, 17.0, &t), 15);
        assert_eq!(lay_odds(6, 10, 17.0, &table(true, 10)), 17);
        assert_eq!(lay_odds(2, 10, 17.0, &t), 0);
    }

    #[test]
    fn test_odds_monotonic_in_raw() {
        let t = table(false, 10);
        for point in POINTS {
            let (mut p, mut l) = (0, 0);
            for raw in 0..200 {
                let np = pass_odds(point, 10, f64::from(raw), &t);
                let nl = lay_odds(point, 10, f64::from(raw), &t);
                assert!(np >= p && nl >= l);
                (p, l) = (np, nl);
            }
        }
    }

    // ---- policy parsing ----

    #[test]
    fn test_odds_policy_parse() {
        for text in ["3-4-5x", "345x", "3_4_5x", "3-4-5", " 3-4-5X "] {
            assert_eq!(
                OddsPolicy::try_parse(&Value::Str(text.into())),
                Some(OddsPolicy::ThreeFourFive),
                "{text}"
            );
        }
        assert_eq!(OddsPolicy::try_parse(&Value::Str("2x".into())), Some(OddsPolicy::Uniform(2)));
        assert_eq!(OddsPolicy::try_parse(&Value::Str("10".into())), Some(OddsPolicy::Uniform(10)));
        assert_eq!(OddsPolicy::try_parse(&Value::Int(5)), Some(OddsPolicy::Uniform(5)));
        assert_eq!(OddsPolicy::try_parse(&Value::Str("lots".into())), None);
        assert_eq!(OddsPolicy::parse(Some(&Value::Bool(true))), OddsPolicy::ThreeFourFive);
        assert_eq!(OddsPolicy::parse(None), OddsPolicy::ThreeFourFive);
    }

    #[test]
    fn test_odds_policy_display() {
        assert_eq!(OddsPolicy::ThreeFourFive.to_string(), "3-4-5x");
        assert_eq!(OddsPolicy::Uniform(2).to_string(), "2x");
    }
}
