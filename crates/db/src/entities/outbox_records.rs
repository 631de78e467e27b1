//! `SeaORM` Entity for outbox_records table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::{ChangeAction, PublishState, ReferenceType};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "outbox_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub reference_type: ReferenceType,
    pub reference_id: Uuid,
    pub action: ChangeAction,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub old_object: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub new_object: Option<Json>,
    pub transaction_date_time: DateTimeWithTimeZone,
    pub correlation_id: Option<String>,
    pub is_processed: bool,
    pub publish_state: PublishState,
    pub attempts: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTimeWithTimeZone>,
    pub next_attempt_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub transport_message_id: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
