pub mod certificates;
pub mod classification;
pub mod core;
pub mod dashboard;
pub mod grades;
pub mod modules;
pub mod programs;
pub mod setup;
pub mod student_records;
pub mod students;
pub mod universities;
pub mod verifications;

use rusqlite::{Connection, ErrorCode, OptionalExtension};

use super::error::HandlerErr;

pub(crate) fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

/// Unique-key violations become `conflict`; anything else is a write failure.
pub(crate) fn insert_err(table: &str, e: rusqlite::Error) -> HandlerErr {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            HandlerErr::new("conflict", e.to_string())
                .with_details(serde_json::json!({ "table": table }))
        }
        _ => HandlerErr::db_insert(table, e),
    }
}

pub(crate) fn update_err(table: &str, e: rusqlite::Error) -> HandlerErr {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            HandlerErr::new("conflict", e.to_string())
                .with_details(serde_json::json!({ "table": table }))
        }
        _ => HandlerErr::db_update(table, e),
    }
}
