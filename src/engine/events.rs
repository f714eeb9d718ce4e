//! Event deriver: raw dice totals → canonical table events.
//!
//! One call to [`EventDeriver::roll`] yields at most two events: a
//! `comeout` marker when a new hand starts, then exactly one prioritized
//! event for the roll itself
//! (`seven_out` > `point_established` > `point_made` > `bet_resolved` > `roll`).

use serde::Serialize;
use tracing::debug;

use crate::strategy::legalize::is_point;
use crate::types::{CscError, EventKind, TableCounters};

// ---------------------------------------------------------------------------
// Table state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableState {
    #[default]
    OnComeout,
    PointOn(u8),
}

impl TableState {
    pub fn point(&self) -> Option<u8> {
        match self {
            TableState::OnComeout => None,
            TableState::PointOn(p) => Some(*p),
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A bet outcome attached to a `bet_resolved` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub bet_type: String,
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<f64>,
}

/// Canonical event. Table fields describe the state once the event has
/// happened, except `point`, which names the point the event is about
/// (the point just made or sevened out, for those kinds). A `comeout`
/// marker therefore carries the state from before its roll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub total: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dice: Option<(u8, u8)>,
    pub point: Option<u8>,
    pub on_comeout: bool,
    pub roll_index: u64,
    pub hand_id: u64,
    pub roll_in_hand: u32,
    pub rolls_since_point: u32,
    pub counters: TableCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

// ---------------------------------------------------------------------------
// Deriver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventDeriver {
    state: TableState,
    roll_index: u64,
    hand_id: u64,
    roll_in_hand: u32,
    rolls_since_point: u32,
    last_roll: Option<u8>,
    dice: Option<(u8, u8)>,
    counters: TableCounters,
    comeout_pending: bool,
}

impl Default for EventDeriver {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDeriver {
    pub fn new() -> Self {
        Self {
            state: TableState::OnComeout,
            roll_index: 0,
            hand_id: 0,
            roll_in_hand: 0,
            rolls_since_point: 0,
            last_roll: None,
            dice: None,
            counters: TableCounters::default(),
            comeout_pending: true,
        }
    }

    /// Feed one roll. Totals outside 2..=12, or dice that do not add up to
    /// the total, are rejected without touching any state.
    pub fn roll(&mut self, total: u8, dice: Option<(u8, u8)>) -> Result<Vec<Event>, CscError> {
        if !(2..=12).contains(&total) {
            return Err(CscError::InvalidRoll(total));
        }
        if let Some((a, b)) = dice {
            if !(1..=6).contains(&a) || !(1..=6).contains(&b) || a + b != total {
                return Err(CscError::InvalidRoll(total));
            }
        }

        self.roll_index += 1;
        let mut events = Vec::with_capacity(2);

        if self.comeout_pending {
            self.comeout_pending = false;
            self.hand_id += 1;
            self.roll_in_hand = 0;
            events.push(self.event(EventKind::Comeout, None, None, None));
        }

        self.roll_in_hand += 1;
        self.last_roll = Some(total);
        self.dice = dice;

        let event = match self.state {
            TableState::OnComeout if is_point(total) => {
                self.state = TableState::PointOn(total);
                self.rolls_since_point = 0;
                self.counters.points_established += 1;
                self.event(EventKind::PointEstablished, Some(total), Some(total), None)
            }
            TableState::OnComeout => {
                // Naturals win the line, craps lose it.
                let result = if matches!(total, 7 | 11) { "win" } else { "loss" };
                let resolution = Resolution {
                    bet_type: "pass_line".into(),
                    result: result.into(),
                    payout: None,
                };
                self.event(EventKind::BetResolved, Some(total), None, Some(resolution))
            }
            TableState::PointOn(point) if total == 7 => {
                if self.rolls_since_point == 0 {
                    self.counters.pso_count += 1;
                }
                self.counters.seven_outs += 1;
                self.state = TableState::OnComeout;
                self.rolls_since_point = 0;
                self.comeout_pending = true;
                self.event(EventKind::SevenOut, Some(total), Some(point), None)
            }
            TableState::PointOn(point) if total == point => {
                self.counters.points_made += 1;
                self.state = TableState::OnComeout;
                self.rolls_since_point = 0;
                self.event(EventKind::PointMade, Some(total), Some(point), None)
            }
            TableState::PointOn(point) => {
                self.rolls_since_point += 1;
                self.event(EventKind::Roll, Some(total), Some(point), None)
            }
        };

        debug!(
            roll_index = self.roll_index,
            total,
            event = %event.kind,
            point = ?self.state.point(),
            "Event derived"
        );
        events.push(event);
        Ok(events)
    }

    /// Record an externally settled bet as a `bet_resolved` event.
    pub fn resolve(&mut self, bet_type: &str, result: &str, payout: Option<f64>) -> Event {
        let resolution = Resolution {
            bet_type: bet_type.to_string(),
            result: result.to_string(),
            payout,
        };
        self.event(EventKind::BetResolved, self.last_roll, self.state.point(), Some(resolution))
    }

    /// Back to a fresh table: no point, no rolls, zeroed counters.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn event(
        &self,
        kind: EventKind,
        total: Option<u8>,
        point: Option<u8>,
        resolution: Option<Resolution>,
    ) -> Event {
        Event {
            kind,
            total,
            dice: if total.is_some() { self.dice } else { None },
            point,
            on_comeout: self.on_comeout(),
            roll_index: self.roll_index,
            hand_id: self.hand_id,
            roll_in_hand: self.roll_in_hand,
            rolls_since_point: self.rolls_since_point,
            counters: self.counters,
            resolution,
        }
    }

    // -- Accessors -----------------------------------------------------------

    pub fn state(&self) -> TableState {
        self.state
    }

    pub fn point(&self) -> Option<u8> {
        self.state.point()
    }

    pub fn on_comeout(&self) -> bool {
        self.state == TableState::OnComeout
    }

    pub fn roll_index(&self) -> u64 {
        self.roll_index
    }

    pub fn hand_id(&self) -> u64 {
        self.hand_id
    }

    pub fn roll_in_hand(&self) -> u32 {
        self.roll_in_hand
    }

    pub fn rolls_since_point(&self) -> u32 {
        self.rolls_since_point
    }

    pub fn last_roll(&self) -> Option<u8> {
        self.last_roll
    }

    pub fn dice(&self) -> Option<(u8, u8)> {
        self.dice
    }

    pub fn counters(&self) -> TableCounters {
        self.counters
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
