//! Backdated-recompute detection.
//!
//! Posting at the tail of a key's history only needs the new rows costed.
//! Posting behind existing outgoing rows changes which layers those rows
//! consumed, so everything from the candidate's stock date onward has to be
//! replayed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_shared::types::MovementId;

use super::types::StockMovement;

/// Why a posting needs the window behind it re-derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecomputeReason {
    /// Posted outgoing quantity already reaches past the incoming quantity
    /// available before the candidate's position.
    OutgoingBeyondSupply {
        /// Highest cumulative outgoing quantity posted.
        posted_outgoing: Decimal,
        /// Cumulative incoming quantity before the candidate.
        available_before: Decimal,
    },
    /// An active outgoing row sits at or after the candidate's stock date.
    LaterOutgoing {
        /// That row.
        movement_id: MovementId,
    },
}

/// Decides whether a candidate at `(stock_date, sequence_no)` forces a
/// recompute of the active history of its key.
#[must_use]
pub fn needs_recompute(
    history: &[StockMovement],
    stock_date: DateTime<Utc>,
    sequence_no: i64,
) -> Option<RecomputeReason> {
    let active = || history.iter().filter(|m| m.is_active());
    let candidate = (stock_date, sequence_no);

    let available_before = active()
        .filter(|m| m.position() < candidate)
        .max_by_key(|m| m.position())
        .map_or(Decimal::ZERO, |m| m.cumulative_incoming_qty);
    let posted_outgoing = active()
        .map(|m| m.cumulative_outgoing_qty)
        .max()
        .unwrap_or(Decimal::ZERO);

    if posted_outgoing > available_before {
        return Some(RecomputeReason::OutgoingBeyondSupply {
            posted_outgoing,
            available_before,
        });
    }

    active()
        .filter(|m| m.is_outgoing() && m.stock_date >= stock_date)
        .min_by_key(|m| m.position())
        .map(|m| RecomputeReason::LaterOutgoing { movement_id: m.id })
}
