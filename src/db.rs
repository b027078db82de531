use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "diplomad.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS universities(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            address TEXT NOT NULL DEFAULT '',
            contact_email TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            university_id TEXT NOT NULL,
            title TEXT NOT NULL,
            level TEXT NOT NULL,
            total_credits_required INTEGER NOT NULL,
            FOREIGN KEY(university_id) REFERENCES universities(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_university ON programs(university_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS modules(
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            credits INTEGER NOT NULL,
            FOREIGN KEY(program_id) REFERENCES programs(id),
            UNIQUE(program_id, code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_modules_program ON modules(program_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            university_id TEXT NOT NULL,
            program_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            matricule TEXT NOT NULL,
            email TEXT NOT NULL,
            date_of_birth TEXT,
            major TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            FOREIGN KEY(university_id) REFERENCES universities(id),
            FOREIGN KEY(program_id) REFERENCES programs(id),
            UNIQUE(university_id, matricule)
        )",
        [],
    )?;
    // Workspaces created before majors were tracked lack the column.
    ensure_students_major(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_university ON students(university_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_program ON students(program_id)",
        [],
    )?;

    // At most one record per student; document links are stored as given.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            attendance INTEGER NOT NULL,
            discipline TEXT NOT NULL DEFAULT '',
            grades_pdf_url TEXT NOT NULL DEFAULT '',
            transcript_pdf_url TEXT NOT NULL DEFAULT '',
            diploma_pdf_url TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            module_id TEXT NOT NULL,
            mark REAL NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(module_id) REFERENCES modules(id),
            UNIQUE(student_id, module_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_module ON grades(module_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificates(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            university_id TEXT NOT NULL,
            program_id TEXT NOT NULL,
            degree_title TEXT NOT NULL,
            specialization TEXT NOT NULL,
            graduation_date TEXT NOT NULL,
            final_mark REAL NOT NULL,
            degree_classification TEXT NOT NULL,
            qr_hash TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            revoked_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(university_id) REFERENCES universities(id),
            FOREIGN KEY(program_id) REFERENCES programs(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_student ON certificates(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_university ON certificates(university_id)",
        [],
    )?;

    // Marks as they stood at issuance; later grade edits do not touch these.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificate_marks(
            certificate_id TEXT NOT NULL,
            module_id TEXT NOT NULL,
            module_code TEXT NOT NULL,
            mark REAL NOT NULL,
            credits INTEGER NOT NULL,
            PRIMARY KEY(certificate_id, module_id),
            FOREIGN KEY(certificate_id) REFERENCES certificates(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS verifications(
            id TEXT PRIMARY KEY,
            certificate_id TEXT NOT NULL,
            company_name TEXT NOT NULL,
            email TEXT NOT NULL,
            reason TEXT NOT NULL,
            ip_address TEXT,
            verification_date TEXT NOT NULL,
            FOREIGN KEY(certificate_id) REFERENCES certificates(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_verifications_certificate ON verifications(certificate_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_major(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "major")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN major TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, text),
    )?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn open_is_idempotent_and_settings_roundtrip() {
        let ws = temp_dir("diplomad-db-open");
        {
            let conn = open_db(&ws).expect("first open");
            assert!(settings_get_json(&conn, "setup.issuance").unwrap().is_none());
            settings_set_json(&conn, "setup.issuance", &json!({ "strictMarkRanges": true }))
                .expect("set");
            settings_set_json(&conn, "setup.issuance", &json!({ "strictMarkRanges": false }))
                .expect("overwrite");
        }
        let conn = open_db(&ws).expect("second open");
        assert_eq!(
            settings_get_json(&conn, "setup.issuance").unwrap(),
            Some(json!({ "strictMarkRanges": false }))
        );
        assert!(table_has_column(&conn, "students", "major").unwrap());
        assert!(table_has_column(&conn, "student_records", "attendance").unwrap());
    }

    #[test]
    fn students_major_column_is_added_to_old_workspaces() {
        let ws = temp_dir("diplomad-db-migrate");
        {
            let conn = Connection::open(ws.join(DB_FILE_NAME)).expect("raw open");
            conn.execute(
                "CREATE TABLE students(
                    id TEXT PRIMARY KEY,
                    university_id TEXT NOT NULL,
                    program_id TEXT,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    matricule TEXT NOT NULL,
                    email TEXT NOT NULL,
                    date_of_birth TEXT,
                    created_at TEXT NOT NULL
                )",
                [],
            )
            .expect("old students table");
            conn.execute(
                "INSERT INTO students VALUES('s1', 'u1', NULL, 'Ada', 'Lovelace', 'M1', 'a@x', NULL, '2024-01-01T00:00:00Z')",
                [],
            )
            .expect("old row");
        }
        let conn = open_db(&ws).expect("migrating open");
        assert!(table_has_column(&conn, "students", "major").unwrap());
        let major: String = conn
            .query_row("SELECT major FROM students WHERE id = 's1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(major, "");
    }
}
