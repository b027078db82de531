use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use uuid::Uuid;

use crate::classify::{
    calculate_degree_classification, check_mark_ranges, classification_color,
    validate_all_marks_assigned, validate_total_credits, ClassificationColor,
    ClassificationResult, CreditsValidation, MarksValidation, WeightedMark,
};
use crate::db;

const QR_HASH_DOMAIN: &str = "diplomad-cert-v1";

#[derive(Debug, Clone, Serialize)]
pub struct CertifyError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CertifyError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn db(e: impl std::fmt::Display) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuancePolicy {
    pub default_degree_title: String,
    pub default_specialization: String,
    pub enforce_credit_total: bool,
    pub strict_mark_ranges: bool,
}

impl Default for IssuancePolicy {
    fn default() -> Self {
        Self {
            default_degree_title: "Bachelor of Science".to_string(),
            default_specialization: "Computer Science".to_string(),
            enforce_credit_total: false,
            strict_mark_ranges: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub degree_title: Option<String>,
    pub specialization: Option<String>,
    pub graduation_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandingMark {
    pub module_id: String,
    pub module_code: String,
    pub mark: f64,
    pub credits: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramModule {
    pub id: String,
    pub code: String,
    pub name: String,
    pub credits: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStanding {
    pub student_id: String,
    pub university_id: String,
    pub program_id: String,
    pub program_title: String,
    pub total_credits_required: i64,
    pub modules: Vec<ProgramModule>,
    pub marks: Vec<StandingMark>,
    pub classification: ClassificationResult,
    pub color: ClassificationColor,
    pub marks_validation: MarksValidation,
    pub credits_validation: CreditsValidation,
}

impl StudentStanding {
    fn weighted_marks(&self) -> Vec<WeightedMark> {
        self.marks
            .iter()
            .map(|m| WeightedMark {
                mark: m.mark,
                credits: m.credits,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertificateStatus {
    Active,
    Revoked,
}

impl CertificateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Revoked => "REVOKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "REVOKED" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateMark {
    pub module_id: String,
    pub module_code: String,
    pub mark: f64,
    pub credits: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub university_id: String,
    pub university_name: String,
    pub program_id: String,
    pub degree_title: String,
    pub specialization: String,
    pub graduation_date: String,
    pub final_mark: f64,
    pub degree_classification: String,
    pub color: ClassificationColor,
    pub qr_hash: String,
    pub status: CertificateStatus,
    pub created_at: String,
    pub revoked_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marks: Option<Vec<CertificateMark>>,
}

#[derive(Debug, Clone, Default)]
pub struct CertificateFilters {
    pub university_id: Option<String>,
    pub student_id: Option<String>,
    pub status: Option<CertificateStatus>,
}

pub fn compute_student_standing(
    conn: &Connection,
    student_id: &str,
) -> Result<StudentStanding, CertifyError> {
    let student: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT university_id, program_id FROM students WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(CertifyError::db)?;
    let Some((university_id, program_id)) = student else {
        return Err(CertifyError::new("not_found", "student not found"));
    };
    let Some(program_id) = program_id else {
        return Err(CertifyError::new("bad_state", "student has no program")
            .with_details(json!({ "studentId": student_id })));
    };

    let program: Option<(String, i64)> = conn
        .query_row(
            "SELECT title, total_credits_required FROM programs WHERE id = ?",
            [&program_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(CertifyError::db)?;
    let Some((program_title, total_credits_required)) = program else {
        return Err(CertifyError::new("not_found", "program not found"));
    };

    let mut modules_stmt = conn
        .prepare(
            "SELECT id, code, name, credits
             FROM modules
             WHERE program_id = ?
             ORDER BY code",
        )
        .map_err(CertifyError::db)?;
    let modules: Vec<ProgramModule> = modules_stmt
        .query_map([&program_id], |r| {
            Ok(ProgramModule {
                id: r.get(0)?,
                code: r.get(1)?,
                name: r.get(2)?,
                credits: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CertifyError::db)?;

    // Grades for modules outside the student's program are ignored.
    let mut grades_stmt = conn
        .prepare(
            "SELECT g.module_id, m.code, g.mark, m.credits
             FROM grades g
             JOIN modules m ON m.id = g.module_id
             WHERE g.student_id = ? AND m.program_id = ?
             ORDER BY m.code",
        )
        .map_err(CertifyError::db)?;
    let marks: Vec<StandingMark> = grades_stmt
        .query_map((student_id, &program_id), |r| {
            Ok(StandingMark {
                module_id: r.get(0)?,
                module_code: r.get(1)?,
                mark: r.get(2)?,
                credits: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(CertifyError::db)?;

    let classification = calculate_degree_classification(marks.iter().map(|m| WeightedMark {
        mark: m.mark,
        credits: m.credits,
    }));
    let marks_validation = validate_all_marks_assigned(
        modules.iter().map(|m| m.id.as_str()),
        marks.iter().map(|m| m.module_id.as_str()),
    );
    let credits_validation =
        validate_total_credits(marks.iter().map(|m| m.credits), total_credits_required);

    Ok(StudentStanding {
        student_id: student_id.to_string(),
        university_id,
        program_id,
        program_title,
        total_credits_required,
        modules,
        marks,
        color: classification_color(classification.classification.code()),
        classification,
        marks_validation,
        credits_validation,
    })
}

/// Everything issuance checks before writing. Returns the standing the
/// certificate will be built from.
pub fn precheck_issuance(
    conn: &Connection,
    student_id: &str,
    policy: &IssuancePolicy,
) -> Result<StudentStanding, CertifyError> {
    let standing = compute_student_standing(conn, student_id)?;

    let active: Option<String> = conn
        .query_row(
            "SELECT id FROM certificates WHERE student_id = ? AND status = 'ACTIVE' LIMIT 1",
            [student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CertifyError::db)?;
    if let Some(certificate_id) = active {
        return Err(
            CertifyError::new("conflict", "student already holds an active certificate")
                .with_details(json!({ "certificateId": certificate_id })),
        );
    }

    if standing.marks.is_empty() {
        return Err(CertifyError::new(
            "bad_state",
            "no marks entered for this student",
        ));
    }

    if !standing.marks_validation.is_valid {
        return Err(
            CertifyError::new("incomplete_marks", "all modules must have marks assigned")
                .with_details(json!({
                    "missingModules": standing.marks_validation.missing_modules
                })),
        );
    }

    if policy.enforce_credit_total && !standing.credits_validation.is_valid {
        return Err(CertifyError::new(
            "credit_mismatch",
            format!(
                "marks cover {} credits, program requires {}",
                standing.credits_validation.total_credits, standing.total_credits_required
            ),
        )
        .with_details(json!({
            "totalCredits": standing.credits_validation.total_credits,
            "requiredCredits": standing.total_credits_required,
            "difference": standing.credits_validation.difference
        })));
    }

    if policy.strict_mark_ranges {
        if let Err(e) = check_mark_ranges(&standing.weighted_marks()) {
            return Err(CertifyError::new("bad_marks", e.message()).with_details(json!(e)));
        }
    }

    Ok(standing)
}

pub fn issue_certificate(
    conn: &Connection,
    student_id: &str,
    request: &IssueRequest,
    policy: &IssuancePolicy,
) -> Result<CertificateRecord, CertifyError> {
    let standing = precheck_issuance(conn, student_id, policy)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CertifyError::new("db_tx_failed", e.to_string()))?;
    let certificate_id = insert_certificate(&tx, &standing, request, policy)?;
    tx.commit()
        .map_err(|e| CertifyError::new("db_tx_failed", e.to_string()))?;

    log::info!(
        "issued certificate {} for student {} ({})",
        certificate_id,
        student_id,
        standing.classification.classification.code()
    );
    load_certificate(conn, &certificate_id, true)?
        .ok_or_else(|| CertifyError::new("not_found", "certificate not found after insert"))
}

/// All-or-nothing: every student is prechecked before anything is written.
pub fn issue_certificates_bulk(
    conn: &Connection,
    student_ids: &[String],
    request: &IssueRequest,
    policy: &IssuancePolicy,
) -> Result<Vec<CertificateRecord>, CertifyError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for id in student_ids {
        if !seen.insert(id.as_str()) {
            return Err(CertifyError::new("bad_params", "duplicate student id in request")
                .with_details(json!({ "studentId": id })));
        }
    }

    let mut standings: Vec<StudentStanding> = Vec::with_capacity(student_ids.len());
    let mut failures: Vec<serde_json::Value> = Vec::new();
    for id in student_ids {
        match precheck_issuance(conn, id, policy) {
            Ok(s) => standings.push(s),
            Err(e) => failures.push(json!({
                "studentId": id,
                "code": e.code,
                "message": e.message,
                "details": e.details,
            })),
        }
    }
    if !failures.is_empty() {
        return Err(CertifyError::new(
            "bulk_precheck_failed",
            format!("{} of {} students cannot be certified", failures.len(), student_ids.len()),
        )
        .with_details(json!({ "failures": failures })));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CertifyError::new("db_tx_failed", e.to_string()))?;
    let mut ids: Vec<String> = Vec::with_capacity(standings.len());
    for standing in &standings {
        ids.push(insert_certificate(&tx, standing, request, policy)?);
    }
    tx.commit()
        .map_err(|e| CertifyError::new("db_tx_failed", e.to_string()))?;
    log::info!("issued {} certificates in bulk", ids.len());

    let mut out = Vec::with_capacity(ids.len());
    for id in &ids {
        let record = load_certificate(conn, id, true)?
            .ok_or_else(|| CertifyError::new("not_found", "certificate not found after insert"))?;
        out.push(record);
    }
    Ok(out)
}

fn insert_certificate(
    conn: &Connection,
    standing: &StudentStanding,
    request: &IssueRequest,
    policy: &IssuancePolicy,
) -> Result<String, CertifyError> {
    let certificate_id = Uuid::new_v4().to_string();
    let graduation_date = request.graduation_date.format("%Y-%m-%d").to_string();
    let final_mark = standing.classification.average_mark;
    let degree_title = request
        .degree_title
        .clone()
        .unwrap_or_else(|| policy.default_degree_title.clone());
    let specialization = request
        .specialization
        .clone()
        .unwrap_or_else(|| policy.default_specialization.clone());
    let hash = qr_hash(
        &certificate_id,
        &standing.student_id,
        &graduation_date,
        final_mark,
    );

    conn.execute(
        "INSERT INTO certificates(
            id, student_id, university_id, program_id, degree_title, specialization,
            graduation_date, final_mark, degree_classification, qr_hash, status, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &certificate_id,
            &standing.student_id,
            &standing.university_id,
            &standing.program_id,
            &degree_title,
            &specialization,
            &graduation_date,
            final_mark,
            standing.classification.classification.code(),
            &hash,
            CertificateStatus::Active.as_str(),
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| {
        CertifyError::new("db_insert_failed", e.to_string())
            .with_details(json!({ "table": "certificates" }))
    })?;

    for m in &standing.marks {
        conn.execute(
            "INSERT INTO certificate_marks(certificate_id, module_id, module_code, mark, credits)
             VALUES(?, ?, ?, ?, ?)",
            (&certificate_id, &m.module_id, &m.module_code, m.mark, m.credits),
        )
        .map_err(|e| {
            CertifyError::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "certificate_marks" }))
        })?;
    }

    Ok(certificate_id)
}

pub fn qr_hash(certificate_id: &str, student_id: &str, graduation_date: &str, final_mark: f64) -> String {
    let mark = format!("{:.2}", final_mark);
    let mut hasher = Sha256::new();
    hasher.update(QR_HASH_DOMAIN.as_bytes());
    for part in [certificate_id, student_id, graduation_date, mark.as_str()] {
        hasher.update(b"|");
        hasher.update(part.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

const CERTIFICATE_SELECT: &str = "SELECT
       c.id, c.student_id, s.first_name, s.last_name, c.university_id, u.name,
       c.program_id, c.degree_title, c.specialization, c.graduation_date,
       c.final_mark, c.degree_classification, c.qr_hash, c.status, c.created_at, c.revoked_at
     FROM certificates c
     JOIN students s ON s.id = c.student_id
     JOIN universities u ON u.id = c.university_id";

fn certificate_from_row(r: &Row<'_>) -> rusqlite::Result<CertificateRecord> {
    let first: String = r.get(2)?;
    let last: String = r.get(3)?;
    let classification: String = r.get(11)?;
    let status: String = r.get(13)?;
    let status = CertificateStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            13,
            rusqlite::types::Type::Text,
            format!("unknown certificate status {:?}", status).into(),
        )
    })?;
    Ok(CertificateRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: format!("{} {}", first, last),
        university_id: r.get(4)?,
        university_name: r.get(5)?,
        program_id: r.get(6)?,
        degree_title: r.get(7)?,
        specialization: r.get(8)?,
        graduation_date: r.get(9)?,
        final_mark: r.get(10)?,
        color: classification_color(&classification),
        degree_classification: classification,
        qr_hash: r.get(12)?,
        status,
        created_at: r.get(14)?,
        revoked_at: r.get(15)?,
        marks: None,
    })
}

fn load_certificate_marks(
    conn: &Connection,
    certificate_id: &str,
) -> Result<Vec<CertificateMark>, CertifyError> {
    let mut stmt = conn
        .prepare(
            "SELECT module_id, module_code, mark, credits
             FROM certificate_marks
             WHERE certificate_id = ?
             ORDER BY module_code",
        )
        .map_err(CertifyError::db)?;
    stmt.query_map([certificate_id], |r| {
        Ok(CertificateMark {
            module_id: r.get(0)?,
            module_code: r.get(1)?,
            mark: r.get(2)?,
            credits: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CertifyError::db)
}

pub fn load_certificate(
    conn: &Connection,
    certificate_id: &str,
    with_marks: bool,
) -> Result<Option<CertificateRecord>, CertifyError> {
    let sql = format!("{} WHERE c.id = ?", CERTIFICATE_SELECT);
    let record = conn
        .query_row(&sql, [certificate_id], certificate_from_row)
        .optional()
        .map_err(CertifyError::db)?;
    let Some(mut record) = record else {
        return Ok(None);
    };
    if with_marks {
        record.marks = Some(load_certificate_marks(conn, certificate_id)?);
    }
    Ok(Some(record))
}

pub fn find_by_qr_hash(
    conn: &Connection,
    qr_hash: &str,
) -> Result<Option<CertificateRecord>, CertifyError> {
    let sql = format!("{} WHERE c.qr_hash = ?", CERTIFICATE_SELECT);
    let record = conn
        .query_row(&sql, [qr_hash.trim().to_ascii_lowercase()], certificate_from_row)
        .optional()
        .map_err(CertifyError::db)?;
    let Some(mut record) = record else {
        return Ok(None);
    };
    record.marks = Some(load_certificate_marks(conn, &record.id)?);
    Ok(Some(record))
}

pub fn list_certificates(
    conn: &Connection,
    filters: &CertificateFilters,
) -> Result<Vec<CertificateRecord>, CertifyError> {
    let sql = format!(
        "{} WHERE (?1 IS NULL OR c.university_id = ?1)
           AND (?2 IS NULL OR c.student_id = ?2)
           AND (?3 IS NULL OR c.status = ?3)
         ORDER BY c.created_at DESC, c.id",
        CERTIFICATE_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(CertifyError::db)?;
    stmt.query_map(
        (
            filters.university_id.as_deref(),
            filters.student_id.as_deref(),
            filters.status.map(|s| s.as_str()),
        ),
        certificate_from_row,
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(CertifyError::db)
}

pub fn revoke_certificate(conn: &Connection, certificate_id: &str) -> Result<(), CertifyError> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM certificates WHERE id = ?",
            [certificate_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(CertifyError::db)?;
    let Some(status) = status else {
        return Err(CertifyError::new("not_found", "certificate not found"));
    };
    if status != CertificateStatus::Active.as_str() {
        return Err(CertifyError::new("bad_state", "certificate is already revoked"));
    }
    conn.execute(
        "UPDATE certificates SET status = ?, revoked_at = ? WHERE id = ?",
        (
            CertificateStatus::Revoked.as_str(),
            db::now_rfc3339(),
            certificate_id,
        ),
    )
    .map_err(|e| {
        CertifyError::new("db_update_failed", e.to_string())
            .with_details(json!({ "table": "certificates" }))
    })?;
    log::info!("revoked certificate {}", certificate_id);
    Ok(())
}
