//! Template strategy: rendering, legalization and reconciliation.

pub mod legalize;
pub mod reconcile;
pub mod template;

use tracing::{debug, info};

use crate::spec::Template;
use crate::types::{ActionEnvelope, BetMap, Snapshot};
use legalize::TableRules;
use reconcile::BetChange;
use template::RenderedTemplate;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Outcome of one template pass, kept whole for tracing and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePlan {
    pub mode: String,
    /// Legalized desired bets; replaced wholesale every pass.
    pub desired: BetMap,
    pub changes: Vec<BetChange>,
    pub actions: Vec<ActionEnvelope>,
}

impl TemplatePlan {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

/// Pipelines template rendering → legalization → diff against the layout.
///
/// Holds only the table rules; every call is a pure function of its inputs.
#[derive(Debug, Clone)]
pub struct TemplatePlanner {
    table: TableRules,
}

impl TemplatePlanner {
    pub fn new(table: TableRules) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &TableRules {
        &self.table
    }

    /// Plan the actions that move `snapshot.bets` to the mode's template.
    pub fn plan(&self, mode: &str, template: &Template, snapshot: &Snapshot) -> TemplatePlan {
        let RenderedTemplate { bets: desired, working } =
            template::render(template, snapshot, &self.table);

        let changes = reconcile::diff(&snapshot.bets, &desired);
        let actions = reconcile::template_envelopes(&changes, mode, &working);

        if changes.is_empty() {
            debug!(mode = %mode, desired = desired.len(), "Template already satisfied");
        } else {
            info!(
                mode = %mode,
                desired = desired.len(),
                clears = changes.iter().filter(|c| matches!(c, BetChange::Clear { .. })).count(),
                sets = changes.iter().filter(|c| matches!(c, BetChange::Set { .. })).count(),
                "Template diff produced"
            );
        }

        TemplatePlan {
            mode: mode.to_string(),
            desired,
            changes,
            actions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
