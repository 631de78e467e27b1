//! Translator seam between business documents and the ledger.
//!
//! Document workflows (tax, discount and currency rules) live outside this
//! crate. They plug in through [`DocumentTranslator`], which turns a change
//! event into a [`PostingPlan`]. [`plan_for`] dispatches on the event and
//! checks the plan's shape against the document kind before anything is
//! written.

use async_trait::async_trait;
use thiserror::Error;

use crate::events::{ChangeAction, ChangeEvent, DocumentRef, ReferenceKind, TransferDirection};
use crate::inventory::NewMovement;
use crate::ledger::NewJournal;

/// What the posting service should do for one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingPlan {
    /// Post journals and stock movements for a new document.
    Post {
        /// Journals to create.
        journals: Vec<NewJournal>,
        /// Stock movements to record.
        movements: Vec<NewMovement>,
    },
    /// Reverse what is active for the document, then post the new version.
    Replace {
        /// Journals to create after the reversal.
        journals: Vec<NewJournal>,
        /// Stock movements to record after the reversal.
        movements: Vec<NewMovement>,
        /// Reason stamped on the reversals.
        reason: String,
    },
    /// Reverse what is active for the document.
    Reverse {
        /// Reason stamped on the reversals.
        reason: String,
    },
    /// Nothing to post.
    Skip,
}

impl PostingPlan {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Post { .. } => "post",
            Self::Replace { .. } => "replace",
            Self::Reverse { .. } => "reverse",
            Self::Skip => "skip",
        }
    }
}

/// Translation errors.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// The translator does not handle this document kind.
    #[error("No translator for {0}")]
    Unsupported(ReferenceKind),

    /// The event snapshot could not be read.
    #[error("Malformed snapshot for {document}: {reason}")]
    MalformedSnapshot {
        /// Document the event is about.
        document: DocumentRef,
        /// What was wrong.
        reason: String,
    },

    /// The plan does not fit the document kind.
    #[error("Invalid posting plan for {document}: {reason}")]
    InvalidPlan {
        /// Document the event is about.
        document: DocumentRef,
        /// What was wrong.
        reason: String,
    },
}

impl TranslateError {
    /// Returns the error code for logs and downstream consumers.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "UNSUPPORTED_DOCUMENT",
            Self::MalformedSnapshot { .. } => "MALFORMED_SNAPSHOT",
            Self::InvalidPlan { .. } => "INVALID_POSTING_PLAN",
        }
    }
}

/// Turns a created or updated business document into journals and movements.
#[async_trait]
pub trait DocumentTranslator: Send + Sync {
    /// Builds the plan for a create or update event.
    ///
    /// Translators return [`PostingPlan::Post`]; [`plan_for`] turns it into a
    /// replacement for updates. Inventory valuation lines are posted at zero
    /// and filled by FIFO costing.
    async fn translate(&self, event: &ChangeEvent) -> Result<PostingPlan, TranslateError>;
}

/// Shape a document kind's journals must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JournalShape {
    /// Zero or one journal, no stock movements.
    LedgerOnly,
    /// Zero or one journal, exactly one when stock moves.
    Inventory,
    /// One journal per transfer leg plus stock movements.
    TransferLegs,
}

const fn shape_of(kind: ReferenceKind) -> JournalShape {
    match kind {
        ReferenceKind::CustomerPayment
        | ReferenceKind::SupplierPayment
        | ReferenceKind::Expense
        | ReferenceKind::ManualJournal => JournalShape::LedgerOnly,
        ReferenceKind::SalesInvoice
        | ReferenceKind::CreditNote
        | ReferenceKind::Bill
        | ReferenceKind::SupplierCredit
        | ReferenceKind::InventoryAdjustmentQuantity
        | ReferenceKind::InventoryAdjustmentValue
        | ReferenceKind::OpeningStock => JournalShape::Inventory,
        ReferenceKind::TransferOrder => JournalShape::TransferLegs,
    }
}

/// Transfer leg a journal belongs to, when all of its lines agree.
#[must_use]
pub fn journal_direction(journal: &NewJournal) -> Option<TransferDirection> {
    let first = journal.lines.first()?.is_transfer_in;
    journal
        .lines
        .iter()
        .all(|l| l.is_transfer_in == first)
        .then_some(TransferDirection::from_transfer_in(first))
}

fn check_shape(
    document: DocumentRef,
    journals: &[NewJournal],
    movements: &[NewMovement],
) -> Result<(), TranslateError> {
    let invalid = |reason: String| TranslateError::InvalidPlan { document, reason };

    if let Some(j) = journals.iter().find(|j| j.reference != document) {
        return Err(invalid(format!("journal references {}", j.reference)));
    }
    if let Some(m) = movements.iter().find(|m| m.reference != document) {
        return Err(invalid(format!("movement references {}", m.reference)));
    }

    match shape_of(document.kind) {
        JournalShape::LedgerOnly => {
            if !movements.is_empty() {
                return Err(invalid("document kind does not move stock".to_string()));
            }
            if journals.len() > 1 {
                return Err(invalid(format!("expected one journal, got {}", journals.len())));
            }
        }
        JournalShape::Inventory => {
            if journals.len() > 1 {
                return Err(invalid(format!("expected one journal, got {}", journals.len())));
            }
            // FIFO deltas are folded into the document's own journal
            if !movements.is_empty() && journals.is_empty() {
                return Err(invalid("stock movements need a valuation journal".to_string()));
            }
        }
        JournalShape::TransferLegs => {
            let mut legs: Vec<_> = journals.iter().map(journal_direction).collect();
            legs.sort_by_key(|d| d.map(TransferDirection::is_in));
            if legs != [Some(TransferDirection::Out), Some(TransferDirection::In)] {
                return Err(invalid(
                    "transfer orders need one outgoing and one incoming journal".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Builds the plan for a change event.
///
/// Deletes reverse without consulting the translator. Creates and updates
/// are translated, and updates become replacements of the active journals.
///
/// # Errors
///
/// Returns the translator's error, or `InvalidPlan` when the plan does not
/// fit the document kind.
pub async fn plan_for(
    event: &ChangeEvent,
    translator: &dyn DocumentTranslator,
) -> Result<PostingPlan, TranslateError> {
    let document = event.document();

    if event.action == ChangeAction::Delete {
        return Ok(PostingPlan::Reverse {
            reason: format!("{} deleted", document.kind),
        });
    }

    let plan = translator.translate(event).await?;
    let (journals, movements) = match plan {
        PostingPlan::Post {
            journals,
            movements,
        }
        | PostingPlan::Replace {
            journals,
            movements,
            ..
        } => (journals, movements),
        PostingPlan::Reverse { reason } => return Ok(PostingPlan::Reverse { reason }),
        PostingPlan::Skip => return Ok(PostingPlan::Skip),
    };

    check_shape(document, &journals, &movements)?;

    Ok(match event.action {
        ChangeAction::Create => PostingPlan::Post {
            journals,
            movements,
        },
        ChangeAction::Update | ChangeAction::Delete => PostingPlan::Replace {
            journals,
            movements,
            reason: format!("{} updated", document.kind),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tally_shared::types::{AccountId, ProductId, TenantId, WarehouseId};
    use uuid::Uuid;

    use crate::inventory::{MovementKind, ProductType, StockKey};
    use crate::ledger::NewLine;

    struct Fixed {
        plan: PostingPlan,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(plan: PostingPlan) -> Self {
            Self {
                plan,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentTranslator for Fixed {
        async fn translate(&self, _event: &ChangeEvent) -> Result<PostingPlan, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.plan.clone())
        }
    }

    fn event(kind: ReferenceKind, action: ChangeAction) -> ChangeEvent {
        ChangeEvent {
            id: Uuid::now_v7(),
            tenant_id: TenantId::new(),
            reference_type: kind,
            reference_id: Uuid::from_u128(7),
            action,
            old_object: None,
            new_object: None,
            transaction_date_time: Utc::now(),
            correlation_id: None,
        }
    }

    fn journal(event: &ChangeEvent, direction: Option<TransferDirection>) -> NewJournal {
        let cash = AccountId::from_uuid(Uuid::from_u128(1));
        let income = AccountId::from_uuid(Uuid::from_u128(2));
        let mut lines = vec![
            NewLine::debit(cash, dec!(10)),
            NewLine::credit(income, dec!(10)),
        ];
        if let Some(direction) = direction {
            lines = lines.into_iter().map(|l| l.transfer(direction)).collect();
        }
        NewJournal::new(
            event.tenant_id,
            event.document(),
            "DOC-1".to_string(),
            event.transaction_date_time,
            lines,
        )
    }

    #[tokio::test]
    async fn test_delete_reverses_without_translating() {
        let ev = event(ReferenceKind::SalesInvoice, ChangeAction::Delete);
        let translator = Fixed::new(PostingPlan::Skip);

        let plan = plan_for(&ev, &translator).await.unwrap();
        assert!(matches!(plan, PostingPlan::Reverse { .. }));
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_update_becomes_replace() {
        let ev = event(ReferenceKind::CustomerPayment, ChangeAction::Update);
        let translator = Fixed::new(PostingPlan::Post {
            journals: vec![journal(&ev, None)],
            movements: vec![],
        });

        let plan = plan_for(&ev, &translator).await.unwrap();
        assert_eq!(plan.label(), "replace");
    }

    #[tokio::test]
    async fn test_transfer_order_needs_both_legs() {
        let ev = event(ReferenceKind::TransferOrder, ChangeAction::Create);

        let one_leg = Fixed::new(PostingPlan::Post {
            journals: vec![journal(&ev, Some(TransferDirection::Out))],
            movements: vec![],
        });
        assert!(matches!(
            plan_for(&ev, &one_leg).await,
            Err(TranslateError::InvalidPlan { .. })
        ));

        let both = Fixed::new(PostingPlan::Post {
            journals: vec![
                journal(&ev, Some(TransferDirection::In)),
                journal(&ev, Some(TransferDirection::Out)),
            ],
            movements: vec![],
        });
        assert_eq!(plan_for(&ev, &both).await.unwrap().label(), "post");
    }

    #[tokio::test]
    async fn test_journal_for_another_document_is_rejected() {
        let ev = event(ReferenceKind::Expense, ChangeAction::Create);
        let other = event(ReferenceKind::Bill, ChangeAction::Create);
        let translator = Fixed::new(PostingPlan::Post {
            journals: vec![journal(&other, None)],
            movements: vec![],
        });

        let err = plan_for(&ev, &translator).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_POSTING_PLAN");
    }

    #[tokio::test]
    async fn test_stock_movements_need_a_journal() {
        let ev = event(ReferenceKind::Bill, ChangeAction::Create);
        let movement = NewMovement {
            key: StockKey {
                tenant_id: ev.tenant_id,
                warehouse_id: WarehouseId::new(),
                product_id: ProductId::new(),
                product_type: ProductType::Single,
                batch: String::new(),
            },
            stock_date: ev.transaction_date_time,
            kind: MovementKind::Receipt,
            quantity: dec!(2),
            unit_cost: dec!(5),
            reference: ev.document(),
            reference_detail_id: None,
            inventory_account_id: AccountId::new(),
            counter_account_id: AccountId::new(),
        };

        let bare = Fixed::new(PostingPlan::Post {
            journals: vec![],
            movements: vec![movement.clone()],
        });
        assert!(matches!(
            plan_for(&ev, &bare).await,
            Err(TranslateError::InvalidPlan { .. })
        ));

        let with_journal = Fixed::new(PostingPlan::Post {
            journals: vec![journal(&ev, None)],
            movements: vec![movement],
        });
        assert_eq!(plan_for(&ev, &with_journal).await.unwrap().label(), "post");
    }

    #[test]
    fn test_every_kind_has_a_shape() {
        for kind in ReferenceKind::ALL {
            let shape = shape_of(kind);
            assert_eq!(
                shape == JournalShape::TransferLegs,
                kind.posts_two_journals()
            );
            assert_eq!(shape != JournalShape::LedgerOnly, kind.affects_inventory());
        }
    }

    #[test]
    fn test_mixed_legs_have_no_direction() {
        let ev = event(ReferenceKind::TransferOrder, ChangeAction::Create);
        let mut j = journal(&ev, Some(TransferDirection::In));
        j.lines[0].is_transfer_in = false;
        assert_eq!(journal_direction(&j), None);
    }
}
