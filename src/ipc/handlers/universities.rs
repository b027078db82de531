use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::{insert_err, row_exists, update_err};
use crate::ipc::params::{email, optional_text, parse_params, required_text};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    name: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    contact_email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Patch {
    name: Option<String>,
    address: Option<String>,
    contact_email: Option<String>,
    phone: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateParams {
    university_id: String,
    patch: Patch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IdParams {
    university_id: String,
}

fn contact_email(value: Option<&str>) -> Result<String, HandlerErr> {
    match value.map(str::trim) {
        None | Some("") => Ok(String::new()),
        Some(v) => email("contactEmail", v),
    }
}

fn handle_list(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "universities": [] }));
    };

    // Correlated subqueries keep the counts independent of each other.
    let mut stmt = conn
        .prepare(
            "SELECT
               u.id, u.name, u.address, u.contact_email, u.phone, u.created_at,
               (SELECT COUNT(*) FROM students s WHERE s.university_id = u.id) AS student_count,
               (SELECT COUNT(*) FROM programs p WHERE p.university_id = u.id) AS program_count
             FROM universities u
             ORDER BY u.name",
        )
        .map_err(HandlerErr::db_query)?;
    let universities = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let address: String = row.get(2)?;
            let contact_email: String = row.get(3)?;
            let phone: String = row.get(4)?;
            let created_at: String = row.get(5)?;
            let student_count: i64 = row.get(6)?;
            let program_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "name": name,
                "address": address,
                "contactEmail": contact_email,
                "phone": phone,
                "createdAt": created_at,
                "studentCount": student_count,
                "programCount": program_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "universities": universities }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: CreateParams = parse_params(req)?;
    let name = required_text("name", &p.name, 200)?;
    let address = optional_text("address", p.address.as_deref(), 400)?;
    let contact_email = contact_email(p.contact_email.as_deref())?;
    let phone = optional_text("phone", p.phone.as_deref(), 40)?;

    let university_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO universities(id, name, address, contact_email, phone, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &university_id,
            &name,
            &address,
            &contact_email,
            &phone,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| insert_err("universities", e))?;

    Ok(json!({ "universityId": university_id, "name": name }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: UpdateParams = parse_params(req)?;
    if !row_exists(conn, "SELECT 1 FROM universities WHERE id = ?", &p.university_id)? {
        return Err(HandlerErr::not_found("university"));
    }

    let name = p
        .patch
        .name
        .as_deref()
        .map(|v| required_text("name", v, 200))
        .transpose()?;
    let address = p
        .patch
        .address
        .as_deref()
        .map(|v| optional_text("address", Some(v), 400))
        .transpose()?;
    let contact_email = p
        .patch
        .contact_email
        .as_deref()
        .map(|v| contact_email(Some(v)))
        .transpose()?;
    let phone = p
        .patch
        .phone
        .as_deref()
        .map(|v| optional_text("phone", Some(v), 40))
        .transpose()?;

    conn.execute(
        "UPDATE universities SET
           name = COALESCE(?, name),
           address = COALESCE(?, address),
           contact_email = COALESCE(?, contact_email),
           phone = COALESCE(?, phone)
         WHERE id = ?",
        (name, address, contact_email, phone, &p.university_id),
    )
    .map_err(|e| update_err("universities", e))?;

    Ok(json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IdParams = parse_params(req)?;
    if !row_exists(conn, "SELECT 1 FROM universities WHERE id = ?", &p.university_id)? {
        return Err(HandlerErr::not_found("university"));
    }

    let (students, programs): (i64, i64) = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM students WHERE university_id = ?1),
               (SELECT COUNT(*) FROM programs WHERE university_id = ?1)",
            [&p.university_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db_query)?;
    if students > 0 || programs > 0 {
        return Err(HandlerErr::new(
            "conflict",
            "university still has students or programs",
        )
        .with_details(json!({ "students": students, "programs": programs })));
    }

    conn.execute("DELETE FROM universities WHERE id = ?", [&p.university_id])
        .map_err(|e| HandlerErr::db_delete("universities", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "universities.list" => handle_list(state, req),
        "universities.create" => handle_create(state, req),
        "universities.update" => handle_update(state, req),
        "universities.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
