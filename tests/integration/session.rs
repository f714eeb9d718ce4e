//! Full-session scenarios: dice in, envelopes out, through the public API.

use std::sync::{Arc, Mutex};

use serde_json::json;

use csc_engine::engine::accountant::SessionLedger;
use csc_engine::engine::executor::{BetAdapter, PaperTable};
use csc_engine::engine::{Controller, Pass};
use csc_engine::spec::{self, StrategySpec};
use csc_engine::types::{ActionEnvelope, ActionKind, EventKind, Source, Value};

use crate::mock_adapter::MockAdapter;

// ---- helpers ----

fn strategy(doc: serde_json::Value) -> StrategySpec {
    spec::from_document(doc).expect("valid strategy")
}

fn base_doc() -> serde_json::Value {
    json!({
        "table": {"bubble": false, "level": 10},
        "variables": {"units": 6},
        "modes": {
            "Main": {"template": {"pass": 10, "place": {"6": "units*2", "8": "units*2"}}},
            "Recovery": {"template": {"pass": 10}}
        },
        "rules": [
            {"name": "regress", "on": {"event": "roll"}, "when": "rolls_since_point == 3",
             "do": ["clear place_6", "clear place_8"]}
        ]
    })
}

fn roll_all(c: &mut Controller<MockAdapter>, totals: &[u8]) -> Vec<Pass> {
    totals
        .iter()
        .flat_map(|t| c.roll(*t, None).expect("legal roll"))
        .collect()
}

fn shape(actions: &[ActionEnvelope]) -> Vec<(ActionKind, String)> {
    actions
        .iter()
        .map(|a| (a.action, a.bet_type.clone().unwrap_or_else(|| a.notes.clone())))
        .collect()
}

// ---- concrete examples ----

#[test]
fn test_place_six_renders_twelve() {
    let adapter = MockAdapter::new(500.0);
    let mut c = Controller::new(&strategy(base_doc()), adapter.clone()).unwrap();
    roll_all(&mut c, &[6]);
    assert_eq!(adapter.layout()["place_6"], 12);
    assert_eq!(adapter.layout()["place_8"], 12);
    assert_eq!(adapter.layout()["pass_line"], 10);
}

#[test]
fn test_seven_out_wins_over_everything_else() {
    let adapter = MockAdapter::new(500.0);
    let mut c = Controller::new(&strategy(base_doc()), adapter).unwrap();
    let passes = roll_all(&mut c, &[8, 7]);
    let kinds: Vec<EventKind> = passes.iter().map(|p| p.event.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Comeout, EventKind::PointEstablished, EventKind::SevenOut]
    );
    let snap = c.snapshot(&passes[2].event);
    assert!(snap.on_comeout);
    assert_eq!(snap.point, None);
}

#[test]
fn test_regression_fires_on_third_roll_only() {
    let adapter = MockAdapter::new(500.0);
    let mut c = Controller::new(&strategy(base_doc()), adapter.clone()).unwrap();
    roll_all(&mut c, &[6]);
    let regress_on: Vec<bool> = [5, 9, 4]
        .into_iter()
        .map(|t| {
            let passes = c.roll(t, None).unwrap();
            passes.iter().flat_map(|p| &p.actions).any(|a| a.id == "rule:regress")
        })
        .collect();
    assert_eq!(regress_on, vec![false, false, true]);
    assert!(!adapter.layout().contains_key("place_6"));
    assert!(!adapter.layout().contains_key("place_8"));
    assert_eq!(adapter.layout()["pass_line"], 10);
}

#[test]
fn test_reconciliation_orders_clears_before_sets() {
    let mut doc = base_doc();
    doc["table"]["level"] = json!(5);
    doc["modes"]["Main"]["template"] = json!({"pass_line": 10, "place_6": 6});
    let adapter = MockAdapter::new(500.0);
    adapter.put("place_6", 12);
    let mut c = Controller::new(&strategy(doc), adapter).unwrap();
    let passes = roll_all(&mut c, &[9]);
    assert_eq!(
        shape(&passes[1].actions),
        vec![
            (ActionKind::Clear, "place_6".to_string()),
            (ActionKind::Set, "pass_line".to_string()),
            (ActionKind::Set, "place_6".to_string()),
        ]
    );
    assert_eq!(passes[1].actions[2].amount, Some(6.0));
}

// ---- ordering and determinism ----

#[test]
fn test_mode_switch_then_template_then_rule_actions() {
    let mut doc = base_doc();
    doc["variables"]["streak"] = json!(3);
    doc["rules"] = json!([
        {"name": "cool_off", "on": {"event": "seven_out"},
         "do": ["streak = 0", {"action": "switch_mode", "mode": "Recovery"}]}
    ]);
    let adapter = MockAdapter::new(500.0);
    let mut c = Controller::new(&strategy(doc), adapter).unwrap();
    let passes = roll_all(&mut c, &[5, 7]);
    let seven_out = passes.last().unwrap();
    assert_eq!(
        shape(&seven_out.actions),
        vec![
            (ActionKind::SwitchMode, "Recovery".to_string()),
            (ActionKind::Clear, "place_6".to_string()),
            (ActionKind::Clear, "place_8".to_string()),
            (ActionKind::Setvar, "streak = 0".to_string()),
        ]
    );
    let sources: Vec<Source> = seven_out.actions.iter().map(|a| a.source).collect();
    assert_eq!(sources, vec![Source::Rule, Source::Template, Source::Template, Source::Rule]);
    assert!(seven_out.actions.iter().all(|a| a.seq == Some(seven_out.seq)));
    assert_eq!(c.vars().get("streak"), Some(&Value::Int(0)));
}

#[test]
fn test_same_dice_same_envelopes() {
    let dice = [6, 8, 5, 9, 6, 10, 4, 7, 11, 3, 8, 8];
    let run = || {
        let mut c = Controller::new(&strategy(base_doc()), MockAdapter::new(500.0)).unwrap();
        let passes = roll_all(&mut c, &dice);
        let actions: Vec<ActionEnvelope> = passes.into_iter().flat_map(|p| p.actions).collect();
        serde_json::to_string(&actions).unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_hand_scope_and_cooldown_over_real_rolls() {
    let mut doc = base_doc();
    doc["rules"] = json!([
        {"name": "once_per_hand", "on": {"event": "roll"}, "scope": "hand",
         "do": ["press place_6 6"]},
        {"name": "every_third", "on": {"event": "roll"}, "cooldown": 2,
         "do": ["press place_8 6"]}
    ]);
    let adapter = MockAdapter::new(500.0);
    let mut c = Controller::new(&strategy(doc), adapter).unwrap();
    // Hand 1: point 4, five plain rolls, seven out. Hand 2: point 5, two plain rolls.
    let passes = roll_all(&mut c, &[4, 2, 3, 8, 9, 11, 7, 5, 6, 8]);
    let fired = |id: &str| -> Vec<u64> {
        passes
            .iter()
            .filter(|p| p.actions.iter().any(|a| a.id == id))
            .map(|p| p.event.roll_index)
            .collect()
    };
    assert_eq!(fired("rule:once_per_hand"), vec![2, 9]);
    // Cooldown counts every event pass, comeout markers included.
    assert_eq!(fired("rule:every_third"), vec![2, 5, 9]);
}

#[test]
fn test_rule_press_sizes_from_live_variables() {
    let mut doc = base_doc();
    doc["rules"] = json!([
        {"name": "bump", "on": {"event": "roll"}, "do": ["units += 6", "press place_6 units"]}
    ]);
    let adapter = MockAdapter::new(500.0);
    let mut c = Controller::new(&strategy(doc), adapter.clone()).unwrap();
    let passes = roll_all(&mut c, &[6, 9]);
    let press = passes.last().unwrap().actions.last().unwrap().clone();
    assert_eq!(press.action, ActionKind::Press);
    assert_eq!(press.amount, Some(12.0));
    assert_eq!(adapter.layout()["place_6"], 24);
}

#[test]
fn test_working_odds_flagged_on_set() {
    let mut doc = base_doc();
    doc["table"]["odds_policy"] = json!("2x");
    doc["modes"]["Main"]["template"] = json!({
        "pass_line": {"amount": 10, "odds": "units * 10", "working": true}
    });
    let adapter = MockAdapter::new(500.0);
    let mut c = Controller::new(&strategy(doc), adapter).unwrap();
    let passes = roll_all(&mut c, &[8]);
    let odds = passes[1]
        .actions
        .iter()
        .find(|a| a.bet_type.as_deref() == Some("odds_8_pass"))
        .expect("odds set");
    assert_eq!(odds.amount, Some(20.0));
    assert_eq!(odds.working, Some(true));
}

#[test]
fn test_externally_resolved_bet_reaches_rules() {
    let mut doc = base_doc();
    doc["variables"]["hits"] = json!(0);
    doc["rules"] = json!([
        {"name": "count_hits", "on": {"event": "bet_resolved"},
         "when": "bet_type == 'place_6' and result == 'win'", "do": ["hits += 1"]}
    ]);
    let mut c = Controller::new(&strategy(doc), MockAdapter::new(500.0)).unwrap();
    roll_all(&mut c, &[8, 6]);
    let pass = c.resolve("place_6", "win", Some(14.0));
    assert_eq!(pass.event.kind, EventKind::BetResolved);
    assert_eq!(pass.event.roll_index, 2);
    assert_eq!(c.vars().get("hits"), Some(&Value::Int(1)));
}

// ---- spec file replay ----

#[test]
fn test_bundled_strategy_replay() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/specs/regress.yaml");
    let strategy = spec::load(path).expect("bundled strategy loads");
    let mut c = Controller::new(&strategy, PaperTable::new(1000.0)).unwrap();
    let ledger = Arc::new(Mutex::new(SessionLedger::new()));
    c.register_observer(Box::new(Arc::clone(&ledger)));

    for total in [6, 8, 9, 5, 6, 4, 10, 7, 11, 8] {
        c.roll(total, None).unwrap();
    }

    let summary = ledger.lock().unwrap().summary();
    assert_eq!(summary.rolls, 10);
    assert_eq!(summary.hands, 2);
    assert_eq!(summary.rules_fired.get("rule:regress_after_three"), Some(&1));
    assert_eq!(summary.rules_fired.get("rule:press_on_hit"), Some(&1));
    assert_eq!(summary.rules_fired.get("rule:recover"), Some(&1));
    assert_eq!(summary.mode_switches, vec!["Recovery".to_string()]);
    assert_eq!(summary.final_mode, "Recovery");
    assert_eq!(c.vars().get("hands_lost"), Some(&Value::Int(1)));
    assert_eq!(c.adapter().bets().get("place_8"), None);
    assert_eq!(c.adapter().bets()["place_6"], 12);
}

// ---- adapter interplay ----

#[test]
fn test_template_restores_layout_after_table_takes_bets() {
    let adapter = MockAdapter::new(500.0);
    let mut c = Controller::new(&strategy(base_doc()), adapter.clone()).unwrap();
    roll_all(&mut c, &[6, 7]);
    adapter.lose_all();
    roll_all(&mut c, &[9]);

    // Seven-out and comeout passes carry nothing, so only two batches land.
    let batches = adapter.batches();
    assert_eq!(batches.len(), 2);
    let last = batches.last().unwrap();
    assert_eq!(last.len(), 3);
    assert!(last.iter().all(|a| a.action == ActionKind::Set));
    assert_eq!(adapter.layout()["place_6"], 12);
    assert_eq!(adapter.layout()["pass_line"], 10);
}
