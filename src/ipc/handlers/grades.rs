use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::{insert_err, update_err};
use crate::ipc::params::{mark, parse_params};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    student_id: Option<String>,
    #[serde(default)]
    module_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    student_id: String,
    module_id: String,
    mark: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateParams {
    grade_id: String,
    mark: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IdParams {
    grade_id: String,
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: ListParams = parse_params(req)?;

    let mut stmt = conn
        .prepare(
            "SELECT g.id, g.student_id, g.module_id, m.code, m.name, m.credits, g.mark, g.updated_at
             FROM grades g
             JOIN modules m ON m.id = g.module_id
             WHERE (?1 IS NULL OR g.student_id = ?1)
               AND (?2 IS NULL OR g.module_id = ?2)
             ORDER BY g.student_id, m.code",
        )
        .map_err(HandlerErr::db_query)?;
    let grades = stmt
        .query_map((p.student_id.as_deref(), p.module_id.as_deref()), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "moduleId": row.get::<_, String>(2)?,
                "moduleCode": row.get::<_, String>(3)?,
                "moduleName": row.get::<_, String>(4)?,
                "credits": row.get::<_, i64>(5)?,
                "mark": row.get::<_, f64>(6)?,
                "updatedAt": row.get::<_, String>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "grades": grades }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: CreateParams = parse_params(req)?;
    let value = mark(p.mark)?;

    let student_program: Option<Option<String>> = conn
        .query_row(
            "SELECT program_id FROM students WHERE id = ?",
            [&p.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(student_program) = student_program else {
        return Err(HandlerErr::not_found("student"));
    };
    let module_program: Option<String> = conn
        .query_row(
            "SELECT program_id FROM modules WHERE id = ?",
            [&p.module_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(module_program) = module_program else {
        return Err(HandlerErr::not_found("module"));
    };
    if let Some(sp) = student_program {
        if sp != module_program {
            return Err(
                HandlerErr::bad_params("module is not part of the student's program")
                    .with_details(json!({ "moduleId": p.module_id, "programId": sp })),
            );
        }
    }

    let grade_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grades(id, student_id, module_id, mark, updated_at) VALUES(?, ?, ?, ?, ?)",
        (&grade_id, &p.student_id, &p.module_id, value, db::now_rfc3339()),
    )
    .map_err(|e| insert_err("grades", e))?;

    Ok(json!({ "gradeId": grade_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: UpdateParams = parse_params(req)?;
    let value = mark(p.mark)?;

    let changed = conn
        .execute(
            "UPDATE grades SET mark = ?, updated_at = ? WHERE id = ?",
            (value, db::now_rfc3339(), &p.grade_id),
        )
        .map_err(|e| update_err("grades", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("grade"));
    }
    Ok(json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IdParams = parse_params(req)?;

    let changed = conn
        .execute("DELETE FROM grades WHERE id = ?", [&p.grade_id])
        .map_err(|e| HandlerErr::db_delete("grades", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("grade"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "grades.list" => handle_list(state, req),
        "grades.create" => handle_create(state, req),
        "grades.update" => handle_update(state, req),
        "grades.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
