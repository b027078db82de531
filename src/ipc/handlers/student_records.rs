use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::{insert_err, row_exists, update_err};
use crate::ipc::params::{optional_text, parse_params};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

const DISCIPLINE_MAX_LEN: usize = 2000;
const URL_MAX_LEN: usize = 500;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    university_id: Option<String>,
    #[serde(default)]
    student_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GetParams {
    student_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    student_id: String,
    attendance: i64,
    #[serde(default)]
    discipline: Option<String>,
    #[serde(default)]
    grades_pdf_url: Option<String>,
    #[serde(default)]
    transcript_pdf_url: Option<String>,
    #[serde(default)]
    diploma_pdf_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Patch {
    attendance: Option<i64>,
    discipline: Option<String>,
    grades_pdf_url: Option<String>,
    transcript_pdf_url: Option<String>,
    diploma_pdf_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateParams {
    record_id: String,
    patch: Patch,
}

/// Attendance is a whole percentage.
fn attendance(value: i64) -> Result<i64, HandlerErr> {
    if !(0..=100).contains(&value) {
        return Err(HandlerErr::bad_params("attendance must be between 0 and 100")
            .with_details(json!({ "attendance": value })));
    }
    Ok(value)
}

const RECORD_SELECT: &str = "SELECT
       r.id, r.student_id, s.first_name, s.last_name, s.matricule, s.university_id,
       r.attendance, r.discipline, r.grades_pdf_url, r.transcript_pdf_url,
       r.diploma_pdf_url, r.created_at, r.updated_at
     FROM student_records r
     JOIN students s ON s.id = r.student_id";

fn record_json(row: &Row<'_>) -> rusqlite::Result<Value> {
    let first: String = row.get(2)?;
    let last: String = row.get(3)?;
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentId": row.get::<_, String>(1)?,
        "studentName": format!("{} {}", first, last),
        "matricule": row.get::<_, String>(4)?,
        "universityId": row.get::<_, String>(5)?,
        "attendance": row.get::<_, i64>(6)?,
        "discipline": row.get::<_, String>(7)?,
        "gradesPdfUrl": row.get::<_, String>(8)?,
        "transcriptPdfUrl": row.get::<_, String>(9)?,
        "diplomaPdfUrl": row.get::<_, String>(10)?,
        "createdAt": row.get::<_, String>(11)?,
        "updatedAt": row.get::<_, String>(12)?
    }))
}

fn load_by_student(conn: &Connection, student_id: &str) -> Result<Option<Value>, HandlerErr> {
    let sql = format!("{} WHERE r.student_id = ?", RECORD_SELECT);
    conn.query_row(&sql, [student_id], record_json)
        .optional()
        .map_err(HandlerErr::db_query)
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: ListParams = parse_params(req)?;

    let sql = format!(
        "{} WHERE (?1 IS NULL OR s.university_id = ?1)
           AND (?2 IS NULL OR r.student_id = ?2)
         ORDER BY s.last_name COLLATE NOCASE, s.first_name COLLATE NOCASE, r.id",
        RECORD_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let records = stmt
        .query_map(
            (p.university_id.as_deref(), p.student_id.as_deref()),
            record_json,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "records": records }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: GetParams = parse_params(req)?;
    let record =
        load_by_student(conn, &p.student_id)?.ok_or_else(|| HandlerErr::not_found("student record"))?;
    Ok(json!({ "record": record }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: CreateParams = parse_params(req)?;
    let attendance = attendance(p.attendance)?;
    let discipline = optional_text("discipline", p.discipline.as_deref(), DISCIPLINE_MAX_LEN)?;
    let grades_pdf_url = optional_text("gradesPdfUrl", p.grades_pdf_url.as_deref(), URL_MAX_LEN)?;
    let transcript_pdf_url =
        optional_text("transcriptPdfUrl", p.transcript_pdf_url.as_deref(), URL_MAX_LEN)?;
    let diploma_pdf_url =
        optional_text("diplomaPdfUrl", p.diploma_pdf_url.as_deref(), URL_MAX_LEN)?;

    if !row_exists(conn, "SELECT 1 FROM students WHERE id = ?", &p.student_id)? {
        return Err(HandlerErr::not_found("student"));
    }

    let record_id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO student_records(
            id, student_id, attendance, discipline, grades_pdf_url,
            transcript_pdf_url, diploma_pdf_url, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record_id,
            &p.student_id,
            attendance,
            &discipline,
            &grades_pdf_url,
            &transcript_pdf_url,
            &diploma_pdf_url,
            &now,
            &now,
        ),
    )
    .map_err(|e| insert_err("student_records", e))?;

    Ok(json!({ "recordId": record_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: UpdateParams = parse_params(req)?;
    if !row_exists(conn, "SELECT 1 FROM student_records WHERE id = ?", &p.record_id)? {
        return Err(HandlerErr::not_found("student record"));
    }

    let patch = &p.patch;
    let attendance = patch.attendance.map(attendance).transpose()?;
    let discipline = patch
        .discipline
        .as_deref()
        .map(|v| optional_text("discipline", Some(v), DISCIPLINE_MAX_LEN))
        .transpose()?;
    let grades_pdf_url = patch
        .grades_pdf_url
        .as_deref()
        .map(|v| optional_text("gradesPdfUrl", Some(v), URL_MAX_LEN))
        .transpose()?;
    let transcript_pdf_url = patch
        .transcript_pdf_url
        .as_deref()
        .map(|v| optional_text("transcriptPdfUrl", Some(v), URL_MAX_LEN))
        .transpose()?;
    let diploma_pdf_url = patch
        .diploma_pdf_url
        .as_deref()
        .map(|v| optional_text("diplomaPdfUrl", Some(v), URL_MAX_LEN))
        .transpose()?;

    conn.execute(
        "UPDATE student_records SET
           attendance = COALESCE(?, attendance),
           discipline = COALESCE(?, discipline),
           grades_pdf_url = COALESCE(?, grades_pdf_url),
           transcript_pdf_url = COALESCE(?, transcript_pdf_url),
           diploma_pdf_url = COALESCE(?, diploma_pdf_url),
           updated_at = ?
         WHERE id = ?",
        (
            attendance,
            discipline,
            grades_pdf_url,
            transcript_pdf_url,
            diploma_pdf_url,
            db::now_rfc3339(),
            &p.record_id,
        ),
    )
    .map_err(|e| update_err("student_records", e))?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "studentRecords.list" => handle_list(state, req),
        "studentRecords.get" => handle_get(state, req),
        "studentRecords.create" => handle_create(state, req),
        "studentRecords.update" => handle_update(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
