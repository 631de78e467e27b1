//! `SeaORM` Entity for journals table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::ReferenceType;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "journals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub transaction_number: String,
    pub transaction_date_time: DateTimeWithTimeZone,
    pub is_reversal: bool,
    pub reverses_journal_id: Option<Uuid>,
    pub reversed_by_journal_id: Option<Uuid>,
    #[sea_orm(column_type = "Text", nullable)]
    pub reversal_reason: Option<String>,
    pub reversed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::ledger_lines::Entity")]
    LedgerLines,
}

impl Related<super::ledger_lines::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
