//! `SeaORM` Entity for ledger_lines table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub journal_id: Uuid,
    pub tenant_id: Uuid,
    pub line_no: i32,
    pub account_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub base_debit: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub base_credit: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub foreign_debit: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub foreign_credit: Decimal,
    pub foreign_currency: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((19, 10)))", nullable)]
    pub exchange_rate: Option<Decimal>,
    pub is_inventory_valuation: bool,
    pub is_transfer_in: bool,
    pub bank_transaction_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub realised_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub closing_balance: Option<Decimal>,
    pub description: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::journals::Entity",
        from = "Column::JournalId",
        to = "super::journals::Column::Id"
    )]
    Journals,
}

impl Related<super::journals::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Journals.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
