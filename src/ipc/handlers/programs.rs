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
    university_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    university_id: String,
    title: String,
    level: String,
    total_credits_required: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Patch {
    title: Option<String>,
    level: Option<String>,
    total_credits_required: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateParams {
    program_id: String,
    patch: Patch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IdParams {
    program_id: String,
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: ListParams = parse_params(req)?;

    let mut stmt = conn
        .prepare(
            "SELECT
               p.id, p.university_id, p.title, p.level, p.total_credits_required,
               (SELECT COUNT(*) FROM modules m WHERE m.program_id = p.id) AS module_count,
               (SELECT COALESCE(SUM(m.credits), 0) FROM modules m WHERE m.program_id = p.id) AS module_credits
             FROM programs p
             WHERE (?1 IS NULL OR p.university_id = ?1)
             ORDER BY p.title, p.level",
        )
        .map_err(HandlerErr::db_query)?;
    let programs = stmt
        .query_map([p.university_id.as_deref()], |row| {
            let id: String = row.get(0)?;
            let university_id: String = row.get(1)?;
            let title: String = row.get(2)?;
            let level: String = row.get(3)?;
            let total_credits_required: i64 = row.get(4)?;
            let module_count: i64 = row.get(5)?;
            let module_credits: i64 = row.get(6)?;
            Ok(json!({
                "id": id,
                "universityId": university_id,
                "title": title,
                "level": level,
                "totalCreditsRequired": total_credits_required,
                "moduleCount": module_count,
                "moduleCredits": module_credits
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "programs": programs }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: CreateParams = parse_params(req)?;
    let title = required_text("title", &p.title, 200)?;
    let level = required_text("level", &p.level, 60)?;
    let total = positive_credits("totalCreditsRequired", p.total_credits_required)?;
    if !row_exists(conn, "SELECT 1 FROM universities WHERE id = ?", &p.university_id)? {
        return Err(HandlerErr::not_found("university"));
    }

    let program_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO programs(id, university_id, title, level, total_credits_required)
         VALUES(?, ?, ?, ?, ?)",
        (&program_id, &p.university_id, &title, &level, total),
    )
    .map_err(|e| insert_err("programs", e))?;

    Ok(json!({ "programId": program_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: UpdateParams = parse_params(req)?;
    if !row_exists(conn, "SELECT 1 FROM programs WHERE id = ?", &p.program_id)? {
        return Err(HandlerErr::not_found("program"));
    }

    let title = p
        .patch
        .title
        .as_deref()
        .map(|v| required_text("title", v, 200))
        .transpose()?;
    let level = p
        .patch
        .level
        .as_deref()
        .map(|v| required_text("level", v, 60))
        .transpose()?;
    let total = p
        .patch
        .total_credits_required
        .map(|v| positive_credits("totalCreditsRequired", v))
        .transpose()?;

    conn.execute(
        "UPDATE programs SET
           title = COALESCE(?, title),
           level = COALESCE(?, level),
           total_credits_required = COALESCE(?, total_credits_required)
         WHERE id = ?",
        (title, level, total, &p.program_id),
    )
    .map_err(|e| update_err("programs", e))?;

    Ok(json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IdParams = parse_params(req)?;
    if !row_exists(conn, "SELECT 1 FROM programs WHERE id = ?", &p.program_id)? {
        return Err(HandlerErr::not_found("program"));
    }

    let (students, certificates): (i64, i64) = conn
        .query_row(
            "SELECT
               (SELECT COUNT(*) FROM students WHERE program_id = ?1),
               (SELECT COUNT(*) FROM certificates WHERE program_id = ?1)",
            [&p.program_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db_query)?;
    if students > 0 || certificates > 0 {
        return Err(HandlerErr::new(
            "conflict",
            "program still has enrolled students or issued certificates",
        )
        .with_details(json!({ "students": students, "certificates": certificates })));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    // No ON DELETE CASCADE: remove dependents first.
    tx.execute(
        "DELETE FROM grades
         WHERE module_id IN (SELECT id FROM modules WHERE program_id = ?)",
        [&p.program_id],
    )
    .map_err(|e| HandlerErr::db_delete("grades", e))?;
    tx.execute("DELETE FROM modules WHERE program_id = ?", [&p.program_id])
        .map_err(|e| HandlerErr::db_delete("modules", e))?;
    tx.execute("DELETE FROM programs WHERE id = ?", [&p.program_id])
        .map_err(|e| HandlerErr::db_delete("programs", e))?;
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "programs.list" => handle_list(state, req),
        "programs.create" => handle_create(state, req),
        "programs.update" => handle_update(state, req),
        "programs.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
