//! Ledger and inventory consistency checks.
//!
//! Each check is a pure function over rows the caller loaded. The `db`
//! crate runs them per tenant and reports the findings; nothing here repairs
//! data.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_shared::types::{JournalId, MovementId, StockValuationId, TenantId};

use crate::inventory::{InventoryError, StockKey, StockMovement, StockValuation, check_non_negative};
use crate::ledger::Journal;

/// One inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "finding", rename_all = "snake_case")]
pub enum Finding {
    /// Debits and credits of a journal differ.
    UnbalancedJournal {
        /// Journal.
        journal_id: JournalId,
        /// Base debit total.
        debit: Decimal,
        /// Base credit total.
        credit: Decimal,
    },
    /// An active allocation row points at a missing or inactive movement.
    OrphanedValuation {
        /// Allocation row.
        valuation_id: StockValuationId,
        /// Movement it points at.
        movement_id: MovementId,
    },
    /// The two ends of a reversal link disagree.
    BrokenReversalLink {
        /// Journal whose link is wrong.
        journal_id: JournalId,
        /// What is wrong with it.
        detail: String,
    },
    /// Running quantity of a key drops below zero.
    NegativeStock {
        /// Lock name of the key.
        key: String,
        /// First offending movement.
        movement_id: MovementId,
        /// Running quantity after it.
        running_qty: Decimal,
    },
}

impl Finding {
    /// Stable name of the finding kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnbalancedJournal { .. } => "unbalanced_journal",
            Self::OrphanedValuation { .. } => "orphaned_valuation",
            Self::BrokenReversalLink { .. } => "broken_reversal_link",
            Self::NegativeStock { .. } => "negative_stock",
        }
    }
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Tenant checked.
    pub tenant_id: TenantId,
    /// Journals examined.
    pub journals_checked: usize,
    /// Movements examined.
    pub movements_checked: usize,
    /// Allocation rows examined.
    pub valuations_checked: usize,
    /// Everything found.
    pub findings: Vec<Finding>,
}

impl ReconciliationReport {
    /// Runs every check over one tenant's rows.
    #[must_use]
    pub fn build(
        tenant_id: TenantId,
        journals: &[Journal],
        movements: &[StockMovement],
        valuations: &[StockValuation],
    ) -> Self {
        let mut findings = unbalanced_journals(journals);
        findings.extend(broken_reversal_links(journals));
        findings.extend(orphaned_valuations(valuations, movements));
        findings.extend(negative_stock(movements));
        Self {
            tenant_id,
            journals_checked: journals.len(),
            movements_checked: movements.len(),
            valuations_checked: valuations.len(),
            findings,
        }
    }

    /// No findings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Finding counts by kind.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for finding in &self.findings {
            *counts.entry(finding.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Journals whose base debits and credits differ.
#[must_use]
pub fn unbalanced_journals(journals: &[Journal]) -> Vec<Finding> {
    journals
        .iter()
        .filter_map(|j| {
            let totals = j.totals();
            (!totals.is_balanced()).then_some(Finding::UnbalancedJournal {
                journal_id: j.id,
                debit: totals.debit,
                credit: totals.credit,
            })
        })
        .collect()
}

/// Reversal links that do not point back at each other.
#[must_use]
pub fn broken_reversal_links(journals: &[Journal]) -> Vec<Finding> {
    let by_id: HashMap<JournalId, &Journal> = journals.iter().map(|j| (j.id, j)).collect();
    let mut findings = Vec::new();
    let mut broken = |journal_id, detail: String| {
        findings.push(Finding::BrokenReversalLink { journal_id, detail });
    };

    for journal in journals {
        if let Some(reversal_id) = journal.reversed_by_journal_id {
            match by_id.get(&reversal_id) {
                None => broken(journal.id, format!("reversal {reversal_id} is missing")),
                Some(r) if !r.is_reversal => {
                    broken(journal.id, format!("reversal {reversal_id} is not a reversal"));
                }
                Some(r) if r.reverses_journal_id != Some(journal.id) => {
                    broken(journal.id, format!("reversal {reversal_id} points elsewhere"));
                }
                Some(_) => {}
            }
        }

        if journal.is_reversal {
            match journal.reverses_journal_id.and_then(|id| by_id.get(&id)) {
                None => broken(journal.id, "reversed journal is missing".to_string()),
                Some(original) if original.reversed_by_journal_id != Some(journal.id) => {
                    broken(journal.id, format!("journal {} is not stamped", original.id));
                }
                Some(_) => {}
            }
        }
    }
    findings
}

/// Active allocation rows whose outgoing or layer movement is gone or
/// reversed.
#[must_use]
pub fn orphaned_valuations(
    valuations: &[StockValuation],
    movements: &[StockMovement],
) -> Vec<Finding> {
    let active: HashMap<MovementId, bool> =
        movements.iter().map(|m| (m.id, m.is_active())).collect();
    let live = |id: &MovementId| active.get(id).copied().unwrap_or(false);

    valuations
        .iter()
        .filter(|v| v.is_active())
        .filter_map(|v| {
            let missing = [v.movement_id, v.layer_movement_id]
                .into_iter()
                .find(|id| !live(id))?;
            Some(Finding::OrphanedValuation {
                valuation_id: v.id,
                movement_id: missing,
            })
        })
        .collect()
}

/// Keys whose running quantity goes negative.
#[must_use]
pub fn negative_stock(movements: &[StockMovement]) -> Vec<Finding> {
    let mut by_key: BTreeMap<&StockKey, Vec<&StockMovement>> = BTreeMap::new();
    for movement in movements {
        by_key.entry(&movement.key).or_default().push(movement);
    }

    by_key
        .into_iter()
        .filter_map(|(key, rows)| match check_non_negative(rows) {
            Err(InventoryError::NegativeStock {
                movement_id,
                running_qty,
            }) => Some(Finding::NegativeStock {
                key: key.lock_name(),
                movement_id,
                running_qty,
            }),
            _ => None,
        })
        .collect()
}
