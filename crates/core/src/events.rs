//! Change-event envelope and the reference kinds the ledger understands.
//!
//! Every business document that can touch the ledger is one variant of
//! [`ReferenceKind`]. Adding a kind is a compile-time checked change: every
//! `match` over it has to decide what the new kind means.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_shared::types::TenantId;

/// The kind of business document a journal or stock movement originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Sales invoice (issues stock at FIFO cost).
    SalesInvoice,
    /// Customer credit note (returns stock at a pegged cost).
    CreditNote,
    /// Supplier bill (receives stock).
    Bill,
    /// Supplier credit (returns stock to a supplier).
    SupplierCredit,
    /// Payment received from a customer.
    CustomerPayment,
    /// Payment made to a supplier.
    SupplierPayment,
    /// Expense.
    Expense,
    /// Manual journal.
    ManualJournal,
    /// Quantity adjustment of inventory.
    InventoryAdjustmentQuantity,
    /// Value adjustment of inventory.
    InventoryAdjustmentValue,
    /// Transfer order between two warehouses (two journals per reference).
    TransferOrder,
    /// Opening stock.
    OpeningStock,
}

impl ReferenceKind {
    /// All known kinds.
    pub const ALL: [Self; 12] = [
        Self::SalesInvoice,
        Self::CreditNote,
        Self::Bill,
        Self::SupplierCredit,
        Self::CustomerPayment,
        Self::SupplierPayment,
        Self::Expense,
        Self::ManualJournal,
        Self::InventoryAdjustmentQuantity,
        Self::InventoryAdjustmentValue,
        Self::TransferOrder,
        Self::OpeningStock,
    ];

    /// Returns the stable wire/storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SalesInvoice => "sales_invoice",
            Self::CreditNote => "credit_note",
            Self::Bill => "bill",
            Self::SupplierCredit => "supplier_credit",
            Self::CustomerPayment => "customer_payment",
            Self::SupplierPayment => "supplier_payment",
            Self::Expense => "expense",
            Self::ManualJournal => "manual_journal",
            Self::InventoryAdjustmentQuantity => "inventory_adjustment_quantity",
            Self::InventoryAdjustmentValue => "inventory_adjustment_value",
            Self::TransferOrder => "transfer_order",
            Self::OpeningStock => "opening_stock",
        }
    }

    /// Returns true if documents of this kind produce stock movements.
    #[must_use]
    pub const fn affects_inventory(self) -> bool {
        match self {
            Self::SalesInvoice
            | Self::CreditNote
            | Self::Bill
            | Self::SupplierCredit
            | Self::InventoryAdjustmentQuantity
            | Self::InventoryAdjustmentValue
            | Self::TransferOrder
            | Self::OpeningStock => true,
            Self::CustomerPayment
            | Self::SupplierPayment
            | Self::Expense
            | Self::ManualJournal => false,
        }
    }

    /// Returns true if one reference posts two simultaneously active journals.
    #[must_use]
    pub const fn posts_two_journals(self) -> bool {
        matches!(self, Self::TransferOrder)
    }

    /// Name of the ledger handler, used as the idempotency handler scope.
    #[must_use]
    pub const fn handler_name(self) -> &'static str {
        match self {
            Self::SalesInvoice => "ledger.sales_invoice",
            Self::CreditNote => "ledger.credit_note",
            Self::Bill => "ledger.bill",
            Self::SupplierCredit => "ledger.supplier_credit",
            Self::CustomerPayment => "ledger.customer_payment",
            Self::SupplierPayment => "ledger.supplier_payment",
            Self::Expense => "ledger.expense",
            Self::ManualJournal => "ledger.manual_journal",
            Self::InventoryAdjustmentQuantity => "ledger.inventory_adjustment_quantity",
            Self::InventoryAdjustmentValue => "ledger.inventory_adjustment_value",
            Self::TransferOrder => "ledger.transfer_order",
            Self::OpeningStock => "ledger.opening_stock",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a reference type string is not a known kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown reference type: {0}")]
pub struct UnknownReferenceKind(pub String);

impl FromStr for ReferenceKind {
    type Err = UnknownReferenceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownReferenceKind(s.to_string()))
    }
}

/// A reference back to the originating business document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    /// Kind of document.
    pub kind: ReferenceKind,
    /// Document identifier.
    pub id: Uuid,
}

impl DocumentRef {
    /// Creates a new document reference.
    #[must_use]
    pub const fn new(kind: ReferenceKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Which leg of a transfer order a journal or movement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Stock leaves the source warehouse.
    Out,
    /// Stock arrives at the destination warehouse.
    In,
}

impl TransferDirection {
    /// Maps the `is_transfer_in` line flag to a direction.
    #[must_use]
    pub const fn from_transfer_in(is_transfer_in: bool) -> Self {
        if is_transfer_in { Self::In } else { Self::Out }
    }

    /// Returns the `is_transfer_in` flag for this direction.
    #[must_use]
    pub const fn is_in(self) -> bool {
        matches!(self, Self::In)
    }
}

/// What happened to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    /// Document was created.
    Create,
    /// Document was updated.
    Update,
    /// Document was deleted or voided.
    Delete,
}

impl ChangeAction {
    /// Returns the stable wire/storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for ChangeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("Unknown change action: {other}")),
        }
    }
}

/// Durable change-event envelope produced by the document-write path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Event (and outbox record) id; doubles as the idempotency message id.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Kind of the changed document.
    pub reference_type: ReferenceKind,
    /// Id of the changed document.
    pub reference_id: Uuid,
    /// What happened.
    pub action: ChangeAction,
    /// Snapshot before the change.
    pub old_object: Option<serde_json::Value>,
    /// Snapshot after the change.
    pub new_object: Option<serde_json::Value>,
    /// Business timestamp of the change.
    pub transaction_date_time: DateTime<Utc>,
    /// Correlation id propagated from the originating request.
    pub correlation_id: Option<String>,
}

impl ChangeEvent {
    /// The document this event is about.
    #[must_use]
    pub const fn document(&self) -> DocumentRef {
        DocumentRef::new(self.reference_type, self.reference_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_kind_round_trips_through_name() {
        for kind in ReferenceKind::ALL {
            assert_eq!(kind.as_str().parse::<ReferenceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_reference_kind() {
        let err = "purchase_requisition".parse::<ReferenceKind>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown reference type: purchase_requisition");
    }

    #[test]
    fn test_only_transfer_orders_post_two_journals() {
        let two: Vec<_> = ReferenceKind::ALL
            .into_iter()
            .filter(|k| k.posts_two_journals())
            .collect();
        assert_eq!(two, vec![ReferenceKind::TransferOrder]);
    }

    #[test]
    fn test_payments_do_not_touch_inventory() {
        assert!(!ReferenceKind::CustomerPayment.affects_inventory());
        assert!(!ReferenceKind::ManualJournal.affects_inventory());
        assert!(ReferenceKind::SalesInvoice.affects_inventory());
        assert!(ReferenceKind::InventoryAdjustmentValue.affects_inventory());
    }

    #[test]
    fn test_handler_names_are_unique() {
        let mut names: Vec<_> = ReferenceKind::ALL.iter().map(|k| k.handler_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ReferenceKind::ALL.len());
    }

    #[test]
    fn test_change_event_serde() {
        let event = ChangeEvent {
            id: Uuid::nil(),
            tenant_id: TenantId::from_uuid(Uuid::nil()),
            reference_type: ReferenceKind::TransferOrder,
            reference_id: Uuid::nil(),
            action: ChangeAction::Update,
            old_object: None,
            new_object: Some(serde_json::json!({"qty": 3})),
            transaction_date_time: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            correlation_id: Some("req-1".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reference_type"], "transfer_order");
        assert_eq!(json["action"], "update");
        let back: ChangeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_transfer_direction_flag() {
        assert_eq!(TransferDirection::from_transfer_in(true), TransferDirection::In);
        assert_eq!(TransferDirection::from_transfer_in(false), TransferDirection::Out);
        assert!(TransferDirection::In.is_in());
    }
}
