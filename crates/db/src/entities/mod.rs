//! `SeaORM` entities, one module per table.

pub mod idempotency_keys;
pub mod journals;
pub mod ledger_lines;
pub mod outbox_records;
pub mod sea_orm_active_enums;
pub mod stock_movements;
pub mod stock_valuations;
