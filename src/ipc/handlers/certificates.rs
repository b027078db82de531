use crate::certify::{
    find_by_qr_hash, issue_certificate, issue_certificates_bulk, list_certificates,
    load_certificate, revoke_certificate, CertificateFilters, CertificateStatus, IssueRequest,
};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup::issuance_policy;
use crate::ipc::params::{calendar_date, parse_params, required_text};
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::{json, Value};

const BULK_MAX_STUDENTS: usize = 500;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ListParams {
    #[serde(default)]
    university_id: Option<String>,
    #[serde(default)]
    student_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IdParams {
    certificate_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IssueParams {
    student_id: String,
    #[serde(default)]
    degree_title: Option<String>,
    #[serde(default)]
    specialization: Option<String>,
    #[serde(default)]
    graduation_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IssueBulkParams {
    student_ids: Vec<String>,
    #[serde(default)]
    degree_title: Option<String>,
    #[serde(default)]
    specialization: Option<String>,
    #[serde(default)]
    graduation_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct VerifyParams {
    qr_hash: String,
}

fn issue_request(
    degree_title: Option<&str>,
    specialization: Option<&str>,
    graduation_date: Option<&str>,
) -> Result<IssueRequest, HandlerErr> {
    let graduation_date = match graduation_date {
        Some(v) => calendar_date("graduationDate", v)?,
        None => chrono::Utc::now().date_naive(),
    };
    Ok(IssueRequest {
        degree_title: degree_title
            .map(|v| required_text("degreeTitle", v, 120))
            .transpose()?,
        specialization: specialization
            .map(|v| required_text("specialization", v, 120))
            .transpose()?,
        graduation_date,
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: ListParams = parse_params(req)?;
    let status = match p.status.as_deref() {
        None => None,
        Some(s) => Some(CertificateStatus::parse(&s.to_ascii_uppercase()).ok_or_else(|| {
            HandlerErr::bad_params("status must be one of: ACTIVE, REVOKED")
        })?),
    };
    let filters = CertificateFilters {
        university_id: p.university_id,
        student_id: p.student_id,
        status,
    };
    let certificates = list_certificates(conn, &filters)?;
    Ok(json!({ "certificates": certificates }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IdParams = parse_params(req)?;
    let certificate = load_certificate(conn, &p.certificate_id, true)?
        .ok_or_else(|| HandlerErr::not_found("certificate"))?;
    Ok(json!({ "certificate": certificate }))
}

fn handle_issue(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IssueParams = parse_params(req)?;
    let request = issue_request(
        p.degree_title.as_deref(),
        p.specialization.as_deref(),
        p.graduation_date.as_deref(),
    )?;
    let policy = issuance_policy(conn).map_err(HandlerErr::db_query)?;
    let certificate = issue_certificate(conn, &p.student_id, &request, &policy)?;
    Ok(json!({ "certificate": certificate }))
}

fn handle_issue_bulk(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IssueBulkParams = parse_params(req)?;
    if p.student_ids.is_empty() {
        return Err(HandlerErr::bad_params("select at least one student"));
    }
    if p.student_ids.len() > BULK_MAX_STUDENTS {
        return Err(HandlerErr::bad_params("too many students in one request")
            .with_details(json!({ "count": p.student_ids.len(), "max": BULK_MAX_STUDENTS })));
    }
    let request = issue_request(
        p.degree_title.as_deref(),
        p.specialization.as_deref(),
        p.graduation_date.as_deref(),
    )?;
    let policy = issuance_policy(conn).map_err(HandlerErr::db_query)?;
    let certificates = issue_certificates_bulk(conn, &p.student_ids, &request, &policy)?;
    Ok(json!({ "certificates": certificates }))
}

fn handle_revoke(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: IdParams = parse_params(req)?;
    revoke_certificate(conn, &p.certificate_id)?;
    Ok(json!({ "ok": true }))
}

fn handle_verify(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: VerifyParams = parse_params(req)?;
    let hash = p.qr_hash.trim();
    if hash.is_empty() {
        return Err(HandlerErr::bad_params("qrHash must not be empty"));
    }
    let certificate =
        find_by_qr_hash(conn, hash)?.ok_or_else(|| HandlerErr::not_found("certificate"))?;
    let valid = certificate.status == CertificateStatus::Active;
    Ok(json!({ "certificate": certificate, "valid": valid }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "certificates.list" => handle_list(state, req),
        "certificates.get" => handle_get(state, req),
        "certificates.issue" => handle_issue(state, req),
        "certificates.issueBulk" => handle_issue_bulk(state, req),
        "certificates.revoke" => handle_revoke(state, req),
        "certificates.verify" => handle_verify(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
