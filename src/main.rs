//! CSC — craps control decision engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! loads and validates the strategy spec, then replays the scripted dice
//! through a controller over a paper table, printing every envelope as a
//! JSON line.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::{info, warn};

use csc_engine::config;
use csc_engine::engine::accountant::SessionLedger;
use csc_engine::engine::executor::PaperTable;
use csc_engine::engine::Controller;
use csc_engine::spec;

const BANNER: &str = r#"
  ____ ____   ____
 / ___/ ___| / ___|
| |   \___ \| |
| |___ ___) | |___
 \____|____/ \____|

  Craps control engine
  v0.1.0
"#;

fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("csc.toml")?;

    init_logging(&cfg);

    println!("{BANNER}");
    info!(
        spec = %cfg.replay.spec_path.display(),
        bankroll = cfg.replay.bankroll,
        rolls = cfg.replay.rolls.len(),
        trace = cfg.engine.trace,
        "CSC starting up"
    );

    // -- Strategy ------------------------------------------------------------

    let strategy = spec::load(&cfg.replay.spec_path)?;

    let mut controller = Controller::new(&strategy, PaperTable::new(cfg.replay.bankroll))
        .context("Failed to build controller")?
        .with_trace(cfg.engine.trace);

    let ledger = Arc::new(Mutex::new(SessionLedger::new()));
    controller.register_observer(Box::new(Arc::clone(&ledger)));

    // -- Replay --------------------------------------------------------------

    if cfg.replay.rolls.is_empty() {
        warn!("No rolls configured under [replay]; nothing to do");
    }

    for (total, dice) in cfg.replay.schedule() {
        let passes = controller
            .roll(total, dice)
            .with_context(|| format!("Roll {total} rejected"))?;
        for pass in passes {
            for action in &pass.actions {
                println!("{}", serde_json::to_string(action)?);
            }
        }
    }

    if cfg.engine.trace {
        for record in controller.take_trace() {
            println!("{}", serde_json::to_string(&record)?);
        }
    }

    // -- Summary -------------------------------------------------------------

    let summary = ledger
        .lock()
        .map_err(|_| anyhow::anyhow!("Session ledger poisoned"))?
        .summary();

    info!(
        exposure = controller.adapter().exposure(),
        points_made = controller.deriver().counters().points_made,
        seven_outs = controller.deriver().counters().seven_outs,
        "Replay finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// Initialise the tracing subscriber. `RUST_LOG` wins over the config
/// filter; `CSC_LOG_JSON` or `logging.json` switches to JSON output.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_filter = cfg.logging.filter.as_deref().unwrap_or("csc_engine=info");
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json_logging = cfg.logging.json || std::env::var("CSC_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }
}
