use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::{insert_err, row_exists};
use crate::ipc::params::{email, parse_params, required_text};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    university_id: Option<String>,
    #[serde(default)]
    certificate_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    certificate_id: String,
    company_name: String,
    email: String,
    reason: String,
    #[serde(default)]
    ip_address: Option<String>,
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: ListParams = parse_params(req)?;

    let mut stmt = conn
        .prepare(
            "SELECT v.id, v.certificate_id, v.company_name, v.email, v.reason,
                    v.ip_address, v.verification_date,
                    c.student_id, c.university_id, c.status,
                    s.first_name || ' ' || s.last_name
             FROM verifications v
             JOIN certificates c ON c.id = v.certificate_id
             JOIN students s ON s.id = c.student_id
             WHERE (?1 IS NULL OR c.university_id = ?1)
               AND (?2 IS NULL OR v.certificate_id = ?2)
             ORDER BY v.verification_date DESC, v.id",
        )
        .map_err(HandlerErr::db_query)?;
    let verifications = stmt
        .query_map(
            (p.university_id.as_deref(), p.certificate_id.as_deref()),
            |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "certificateId": row.get::<_, String>(1)?,
                    "companyName": row.get::<_, String>(2)?,
                    "email": row.get::<_, String>(3)?,
                    "reason": row.get::<_, String>(4)?,
                    "ipAddress": row.get::<_, Option<String>>(5)?,
                    "verificationDate": row.get::<_, String>(6)?,
                    "studentId": row.get::<_, String>(7)?,
                    "universityId": row.get::<_, String>(8)?,
                    "certificateStatus": row.get::<_, String>(9)?,
                    "studentName": row.get::<_, String>(10)?
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "verifications": verifications }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: CreateParams = parse_params(req)?;
    let company_name = required_text("companyName", &p.company_name, 200)?;
    let email = email("email", &p.email)?;
    let reason = required_text("reason", &p.reason, 500)?;
    let ip_address = p
        .ip_address
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| required_text("ipAddress", v, 64))
        .transpose()?;

    if !row_exists(conn, "SELECT 1 FROM certificates WHERE id = ?", &p.certificate_id)? {
        return Err(HandlerErr::not_found("certificate"));
    }

    let verification_id = Uuid::new_v4().to_string();
    let verification_date = db::now_rfc3339();
    conn.execute(
        "INSERT INTO verifications(
            id, certificate_id, company_name, email, reason, ip_address, verification_date
         ) VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &verification_id,
            &p.certificate_id,
            &company_name,
            &email,
            &reason,
            ip_address.as_deref(),
            &verification_date,
        ),
    )
    .map_err(|e| insert_err("verifications", e))?;

    log::info!(
        "verification {} recorded for certificate {} by {}",
        verification_id,
        p.certificate_id,
        company_name
    );
    Ok(json!({
        "verificationId": verification_id,
        "verificationDate": verification_date
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "verifications.list" => handle_list(state, req),
        "verifications.create" => handle_create(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
