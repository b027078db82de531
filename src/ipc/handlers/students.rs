use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::{insert_err, row_exists, update_err};
use crate::ipc::params::{calendar_date, email, optional_text, parse_params, required_text};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    university_id: Option<String>,
    #[serde(default)]
    program_id: Option<String>,
    #[serde(default)]
    without_certificate: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    university_id: String,
    #[serde(default)]
    program_id: Option<String>,
    first_name: String,
    last_name: String,
    matricule: String,
    email: String,
    #[serde(default)]
    date_of_birth: Option<String>,
    #[serde(default)]
    major: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Patch {
    program_id: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    matricule: Option<String>,
    email: Option<String>,
    date_of_birth: Option<String>,
    major: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateParams {
    student_id: String,
    patch: Patch,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IdParams {
    student_id: String,
}

/// A student's program has to belong to the student's own university.
fn check_program(conn: &Connection, university_id: &str, program_id: &str) -> Result<(), HandlerErr> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT university_id FROM programs WHERE id = ?",
            [program_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    match owner {
        None => Err(HandlerErr::not_found("program")),
        Some(u) if u != university_id => Err(HandlerErr::bad_params(
            "program belongs to a different university",
        )
        .with_details(json!({ "programId": program_id, "universityId": university_id }))),
        Some(_) => Ok(()),
    }
}

fn date_of_birth(value: Option<&str>) -> Result<Option<String>, HandlerErr> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => Ok(Some(calendar_date("dateOfBirth", v)?.format("%Y-%m-%d").to_string())),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: ListParams = parse_params(req)?;

    let mut stmt = conn
        .prepare(
            "SELECT
               s.id, s.university_id, s.program_id, s.first_name, s.last_name,
               s.matricule, s.email, s.date_of_birth, s.major, s.created_at,
               (SELECT COUNT(*) FROM grades g WHERE g.student_id = s.id) AS grade_count,
               EXISTS(
                 SELECT 1 FROM certificates c
                 WHERE c.student_id = s.id AND c.status = 'ACTIVE'
               ) AS has_certificate
             FROM students s
             WHERE (?1 IS NULL OR s.university_id = ?1)
               AND (?2 IS NULL OR s.program_id = ?2)
             ORDER BY s.last_name COLLATE NOCASE, s.first_name COLLATE NOCASE, s.id",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map(
            (p.university_id.as_deref(), p.program_id.as_deref()),
            |row| {
                let has_certificate = row.get::<_, i64>(11)? != 0;
                Ok((
                    has_certificate,
                    json!({
                        "id": row.get::<_, String>(0)?,
                        "universityId": row.get::<_, String>(1)?,
                        "programId": row.get::<_, Option<String>>(2)?,
                        "firstName": row.get::<_, String>(3)?,
                        "lastName": row.get::<_, String>(4)?,
                        "matricule": row.get::<_, String>(5)?,
                        "email": row.get::<_, String>(6)?,
                        "dateOfBirth": row.get::<_, Option<String>>(7)?,
                        "major": row.get::<_, String>(8)?,
                        "createdAt": row.get::<_, String>(9)?,
                        "gradeCount": row.get::<_, i64>(10)?,
                        "hasCertificate": has_certificate
                    }),
                ))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let students: Vec<Value> = rows
        .into_iter()
        .filter(|(has_certificate, _)| !(p.without_certificate && *has_certificate))
        .map(|(_, v)| v)
        .collect();
    Ok(json!({ "students": students }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: CreateParams = parse_params(req)?;
    let first_name = required_text("firstName", &p.first_name, 100)?;
    let last_name = required_text("lastName", &p.last_name, 100)?;
    let matricule = required_text("matricule", &p.matricule, 40)?;
    let email = email("email", &p.email)?;
    let date_of_birth = date_of_birth(p.date_of_birth.as_deref())?;
    let major = optional_text("major", p.major.as_deref(), 120)?;

    if !row_exists(conn, "SELECT 1 FROM universities WHERE id = ?", &p.university_id)? {
        return Err(HandlerErr::not_found("university"));
    }
    if let Some(program_id) = p.program_id.as_deref() {
        check_program(conn, &p.university_id, program_id)?;
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(
            id, university_id, program_id, first_name, last_name, matricule,
            email, date_of_birth, major, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &p.university_id,
            p.program_id.as_deref(),
            &first_name,
            &last_name,
            &matricule,
            &email,
            date_of_birth.as_deref(),
            &major,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| insert_err("students", e))?;

    Ok(json!({ "studentId": student_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: UpdateParams = parse_params(req)?;
    let university_id: Option<String> = conn
        .query_row(
            "SELECT university_id FROM students WHERE id = ?",
            [&p.student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(university_id) = university_id else {
        return Err(HandlerErr::not_found("student"));
    };

    let patch = &p.patch;
    if let Some(program_id) = patch.program_id.as_deref() {
        check_program(conn, &university_id, program_id)?;
    }
    let first_name = patch
        .first_name
        .as_deref()
        .map(|v| required_text("firstName", v, 100))
        .transpose()?;
    let last_name = patch
        .last_name
        .as_deref()
        .map(|v| required_text("lastName", v, 100))
        .transpose()?;
    let matricule = patch
        .matricule
        .as_deref()
        .map(|v| required_text("matricule", v, 40))
        .transpose()?;
    let email = patch
        .email
        .as_deref()
        .map(|v| email("email", v))
        .transpose()?;
    let date_of_birth = patch
        .date_of_birth
        .as_deref()
        .map(|v| date_of_birth(Some(v)))
        .transpose()?
        .flatten();
    let major = patch
        .major
        .as_deref()
        .map(|v| optional_text("major", Some(v), 120))
        .transpose()?;

    conn.execute(
        "UPDATE students SET
           program_id = COALESCE(?, program_id),
           first_name = COALESCE(?, first_name),
           last_name = COALESCE(?, last_name),
           matricule = COALESCE(?, matricule),
           email = COALESCE(?, email),
           date_of_birth = COALESCE(?, date_of_birth),
           major = COALESCE(?, major)
         WHERE id = ?",
        (
            patch.program_id.as_deref(),
            first_name,
            last_name,
            matricule,
            email,
            date_of_birth,
            major,
            &p.student_id,
        ),
    )
    .map_err(|e| update_err("students", e))?;

    Ok(json!({ "ok": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IdParams = parse_params(req)?;
    if !row_exists(conn, "SELECT 1 FROM students WHERE id = ?", &p.student_id)? {
        return Err(HandlerErr::not_found("student"));
    }

    // Certificates are permanent records; revoke instead of deleting the holder.
    if row_exists(
        conn,
        "SELECT 1 FROM certificates WHERE student_id = ? LIMIT 1",
        &p.student_id,
    )? {
        return Err(HandlerErr::new(
            "conflict",
            "student has issued certificates",
        ));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute("DELETE FROM grades WHERE student_id = ?", [&p.student_id])
        .map_err(|e| HandlerErr::db_delete("grades", e))?;
    tx.execute(
        "DELETE FROM student_records WHERE student_id = ?",
        [&p.student_id],
    )
    .map_err(|e| HandlerErr::db_delete("student_records", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&p.student_id])
        .map_err(|e| HandlerErr::db_delete("students", e))?;
    tx.commit().map_err(HandlerErr::db_tx)?;

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_list(state, req),
        "students.create" => handle_create(state, req),
        "students.update" => handle_update(state, req),
        "students.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
