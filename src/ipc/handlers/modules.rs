use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::{insert_err, row_exists, update_err};
use crate::ipc::params::{parse_params, positive_credits, required_text};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    program_id: Option<String>,
    #[serde(default)]
    university_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    program_id: String,
    code: String,
    name: String,
    credits: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Patch {
    code: Option<String>,
    name: Option<String>,
    credits: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateParams {
    module_id: String,
    patch: Patch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IdParams {
    module_id: String,
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: ListParams = parse_params(req)?;

    let mut stmt = conn
        .prepare(
            "SELECT m.id, m.program_id, m.code, m.name, m.credits, p.university_id, p.title
             FROM modules m
             JOIN programs p ON p.id = m.program_id
             WHERE (?1 IS NULL OR m.program_id = ?1)
               AND (?2 IS NULL OR p.university_id = ?2)
             ORDER BY m.code, p.title",
        )
        .map_err(HandlerErr::db_query)?;
    let modules = stmt
        .query_map(
            (p.program_id.as_deref(), p.university_id.as_deref()),
            |row| {
                let id: String = row.get(0)?;
                let program_id: String = row.get(1)?;
                let code: String = row.get(2)?;
                let name: String = row.get(3)?;
                let credits: i64 = row.get(4)?;
                let university_id: String = row.get(5)?;
                let program_title: String = row.get(6)?;
                Ok(json!({
                    "id": id,
                    "programId": program_id,
                    "programTitle": program_title,
                    "universityId": university_id,
                    "code": code,
                    "name": name,
                    "credits": credits
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "modules": modules }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: CreateParams = parse_params(req)?;
    let code = required_text("code", &p.code, 32)?.to_ascii_uppercase();
    let name = required_text("name", &p.name, 200)?;
    let credits = positive_credits("credits", p.credits)?;
    if !row_exists(conn, "SELECT 1 FROM programs WHERE id = ?", &p.program_id)? {
        return Err(HandlerErr::not_found("program"));
    }

    let module_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO modules(id, program_id, code, name, credits) VALUES(?, ?, ?, ?, ?)",
        (&module_id, &p.program_id, &code, &name, credits),
    )
    .map_err(|e| insert_err("modules", e))?;

    Ok(json!({ "moduleId": module_id, "code": code }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: UpdateParams = parse_params(req)?;
    if !row_exists(conn, "SELECT 1 FROM modules WHERE id = ?", &p.module_id)? {
        return Err(HandlerErr::not_found("module"));
    }

    let code = p
        .patch
        .code
        .as_deref()
        .map(|v| required_text("code", v, 32).map(|c| c.to_ascii_uppercase()))
        .transpose()?;
    let name = p
        .patch
        .name
        .as_deref()
        .map(|v| required_text("name", v, 200))
        .transpose()?;
    let credits = p
        .patch
        .credits
        .map(|v| positive_credits("credits", v))
        .transpose()?;

    conn.execute(
        "UPDATE modules SET
           code = COALESCE(?, code),
           name = COALESCE(?, name),
           credits = COALESCE(?, credits)
         WHERE id = ?",
        (code, name, credits, &p.module_id),
    )
    .map_err(|e| update_err("modules", e))?;

    Ok(json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IdParams = parse_params(req)?;
    if !row_exists(conn, "SELECT 1 FROM modules WHERE id = ?", &p.module_id)? {
        return Err(HandlerErr::not_found("module"));
    }

    // Issued certificates keep their own copy of the marks, so grades can go.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let grades_removed = tx
        .execute("DELETE FROM grades WHERE module_id = ?", [&p.module_id])
        .map_err(|e| HandlerErr::db_delete("grades", e))?;
    tx.execute("DELETE FROM modules WHERE id = ?", [&p.module_id])
        .map_err(|e| HandlerErr::db_delete("modules", e))?;
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "ok": true, "gradesRemoved": grades_removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "modules.list" => handle_list(state, req),
        "modules.create" => handle_create(state, req),
        "modules.update" => handle_update(state, req),
        "modules.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
