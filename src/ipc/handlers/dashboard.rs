use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::parse_params;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StatsParams {
    #[serde(default)]
    university_id: Option<String>,
}

fn count(conn: &Connection, sql: &str, university_id: Option<&str>) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [university_id], |r| r.get(0))
        .map_err(HandlerErr::db_query)
}

fn handle_stats(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: StatsParams = parse_params(req)?;
    let u = p.university_id.as_deref();

    let universities = count(
        conn,
        "SELECT COUNT(*) FROM universities WHERE (?1 IS NULL OR id = ?1)",
        u,
    )?;
    let programs = count(
        conn,
        "SELECT COUNT(*) FROM programs WHERE (?1 IS NULL OR university_id = ?1)",
        u,
    )?;
    let students = count(
        conn,
        "SELECT COUNT(*) FROM students WHERE (?1 IS NULL OR university_id = ?1)",
        u,
    )?;
    let certificates = count(
        conn,
        "SELECT COUNT(*) FROM certificates WHERE (?1 IS NULL OR university_id = ?1)",
        u,
    )?;
    let active_certificates = count(
        conn,
        "SELECT COUNT(*) FROM certificates
         WHERE status = 'ACTIVE' AND (?1 IS NULL OR university_id = ?1)",
        u,
    )?;
    let verifications = count(
        conn,
        "SELECT COUNT(*) FROM verifications v
         JOIN certificates c ON c.id = v.certificate_id
         WHERE (?1 IS NULL OR c.university_id = ?1)",
        u,
    )?;

    Ok(json!({
        "universities": universities,
        "programs": programs,
        "students": students,
        "certificates": certificates,
        "activeCertificates": active_certificates,
        "verifications": verifications
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "dashboard.stats" => handle_stats(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
