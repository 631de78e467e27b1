//! `SeaORM` active enums for the PostgreSQL enum types, with conversions to
//! the domain enums of `tally-core`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use tally_core::events::{ChangeAction as DomainAction, ReferenceKind};
use tally_core::idempotency::IdempotencyStatus as DomainStatus;
use tally_core::inventory::ProductType as DomainProductType;
use tally_core::outbox::PublishState as DomainPublishState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "reference_type")]
pub enum ReferenceType {
    #[sea_orm(string_value = "sales_invoice")]
    SalesInvoice,
    #[sea_orm(string_value = "credit_note")]
    CreditNote,
    #[sea_orm(string_value = "bill")]
    Bill,
    #[sea_orm(string_value = "supplier_credit")]
    SupplierCredit,
    #[sea_orm(string_value = "customer_payment")]
    CustomerPayment,
    #[sea_orm(string_value = "supplier_payment")]
    SupplierPayment,
    #[sea_orm(string_value = "expense")]
    Expense,
    #[sea_orm(string_value = "manual_journal")]
    ManualJournal,
    #[sea_orm(string_value = "inventory_adjustment_quantity")]
    InventoryAdjustmentQuantity,
    #[sea_orm(string_value = "inventory_adjustment_value")]
    InventoryAdjustmentValue,
    #[sea_orm(string_value = "transfer_order")]
    TransferOrder,
    #[sea_orm(string_value = "opening_stock")]
    OpeningStock,
}

impl From<ReferenceKind> for ReferenceType {
    fn from(kind: ReferenceKind) -> Self {
        match kind {
            ReferenceKind::SalesInvoice => Self::SalesInvoice,
            ReferenceKind::CreditNote => Self::CreditNote,
            ReferenceKind::Bill => Self::Bill,
            ReferenceKind::SupplierCredit => Self::SupplierCredit,
            ReferenceKind::CustomerPayment => Self::CustomerPayment,
            ReferenceKind::SupplierPayment => Self::SupplierPayment,
            ReferenceKind::Expense => Self::Expense,
            ReferenceKind::ManualJournal => Self::ManualJournal,
            ReferenceKind::InventoryAdjustmentQuantity => Self::InventoryAdjustmentQuantity,
            ReferenceKind::InventoryAdjustmentValue => Self::InventoryAdjustmentValue,
            ReferenceKind::TransferOrder => Self::TransferOrder,
            ReferenceKind::OpeningStock => Self::OpeningStock,
        }
    }
}

impl From<ReferenceType> for ReferenceKind {
    fn from(kind: ReferenceType) -> Self {
        match kind {
            ReferenceType::SalesInvoice => Self::SalesInvoice,
            ReferenceType::CreditNote => Self::CreditNote,
            ReferenceType::Bill => Self::Bill,
            ReferenceType::SupplierCredit => Self::SupplierCredit,
            ReferenceType::CustomerPayment => Self::CustomerPayment,
            ReferenceType::SupplierPayment => Self::SupplierPayment,
            ReferenceType::Expense => Self::Expense,
            ReferenceType::ManualJournal => Self::ManualJournal,
            ReferenceType::InventoryAdjustmentQuantity => Self::InventoryAdjustmentQuantity,
            ReferenceType::InventoryAdjustmentValue => Self::InventoryAdjustmentValue,
            ReferenceType::TransferOrder => Self::TransferOrder,
            ReferenceType::OpeningStock => Self::OpeningStock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "movement_kind")]
pub enum MovementKind {
    #[sea_orm(string_value = "receipt")]
    Receipt,
    #[sea_orm(string_value = "issue")]
    Issue,
    #[sea_orm(string_value = "return")]
    Return,
    #[sea_orm(string_value = "value_adjustment")]
    ValueAdjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "product_type")]
pub enum ProductType {
    #[sea_orm(string_value = "single")]
    Single,
    #[sea_orm(string_value = "variant")]
    Variant,
}

impl From<DomainProductType> for ProductType {
    fn from(value: DomainProductType) -> Self {
        match value {
            DomainProductType::Single => Self::Single,
            DomainProductType::Variant => Self::Variant,
        }
    }
}

impl From<ProductType> for DomainProductType {
    fn from(value: ProductType) -> Self {
        match value {
            ProductType::Single => Self::Single,
            ProductType::Variant => Self::Variant,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "idempotency_status")]
pub enum IdempotencyStatus {
    #[sea_orm(string_value = "STARTED")]
    Started,
    #[sea_orm(string_value = "SUCCEEDED")]
    Succeeded,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl From<DomainStatus> for IdempotencyStatus {
    fn from(value: DomainStatus) -> Self {
        match value {
            DomainStatus::Started => Self::Started,
            DomainStatus::Succeeded => Self::Succeeded,
            DomainStatus::Failed => Self::Failed,
        }
    }
}

impl From<IdempotencyStatus> for DomainStatus {
    fn from(value: IdempotencyStatus) -> Self {
        match value {
            IdempotencyStatus::Started => Self::Started,
            IdempotencyStatus::Succeeded => Self::Succeeded,
            IdempotencyStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "change_action")]
pub enum ChangeAction {
    #[sea_orm(string_value = "create")]
    Create,
    #[sea_orm(string_value = "update")]
    Update,
    #[sea_orm(string_value = "delete")]
    Delete,
}

impl From<DomainAction> for ChangeAction {
    fn from(value: DomainAction) -> Self {
        match value {
            DomainAction::Create => Self::Create,
            DomainAction::Update => Self::Update,
            DomainAction::Delete => Self::Delete,
        }
    }
}

impl From<ChangeAction> for DomainAction {
    fn from(value: ChangeAction) -> Self {
        match value {
            ChangeAction::Create => Self::Create,
            ChangeAction::Update => Self::Update,
            ChangeAction::Delete => Self::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "publish_state")]
pub enum PublishState {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "SENT")]
    Sent,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "DEAD")]
    Dead,
}

impl From<DomainPublishState> for PublishState {
    fn from(value: DomainPublishState) -> Self {
        match value {
            DomainPublishState::Pending => Self::Pending,
            DomainPublishState::Processing => Self::Processing,
            DomainPublishState::Sent => Self::Sent,
            DomainPublishState::Failed => Self::Failed,
            DomainPublishState::Dead => Self::Dead,
        }
    }
}

impl From<PublishState> for DomainPublishState {
    fn from(value: PublishState) -> Self {
        match value {
            PublishState::Pending => Self::Pending,
            PublishState::Processing => Self::Processing,
            PublishState::Sent => Self::Sent,
            PublishState::Failed => Self::Failed,
            PublishState::Dead => Self::Dead,
        }
    }
}
