//! `SeaORM` Entity for stock_movements table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::{MovementKind, ProductType, ReferenceType};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub warehouse_id: Uuid,
    pub product_id: Uuid,
    pub product_type: ProductType,
    pub batch: String,
    pub sequence_no: i64,
    pub stock_date: DateTimeWithTimeZone,
    pub kind: MovementKind,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 6)))")]
    pub unit_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 6)))", nullable)]
    pub peg_price: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub adjusted_value: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub cumulative_incoming_qty: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub cumulative_outgoing_qty: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub closing_qty: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub closing_value: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub cost_amount: Decimal,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub reference_detail_id: Option<Uuid>,
    pub inventory_account_id: Uuid,
    pub counter_account_id: Uuid,
    pub is_reversal: bool,
    pub reverses_movement_id: Option<Uuid>,
    pub reversed_by_movement_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
