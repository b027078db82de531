use crate::certify::{compute_student_standing, IssuancePolicy};
use crate::classify::{
    calculate_degree_classification, check_mark_ranges, classification_color,
    validate_all_marks_assigned, validate_total_credits, WeightedMark,
};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup::issuance_policy;
use crate::ipc::params::parse_params;
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MarkEntry {
    #[serde(default)]
    module_id: Option<String>,
    mark: f64,
    credits: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CalculateParams {
    marks: Vec<MarkEntry>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ColorParams {
    classification: String,
}

// List entries accept whole module/grade records, so extra keys are allowed here.
#[derive(Deserialize)]
struct ModuleRef {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkedModule {
    module_id: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidateMarksParams {
    modules: Vec<ModuleRef>,
    marks: Vec<MarkedModule>,
}

#[derive(Deserialize)]
struct CreditEntry {
    credits: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ValidateCreditsParams {
    marks: Vec<CreditEntry>,
    required_credits: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StudentParams {
    student_id: String,
}

fn handle_calculate(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let p: CalculateParams = parse_params(req)?;
    let marks: Vec<WeightedMark> = p
        .marks
        .iter()
        .map(|m| WeightedMark {
            mark: m.mark,
            credits: m.credits,
        })
        .collect();

    // Without a workspace there is no stored policy; the calculator stays permissive.
    let policy = match state.db.as_ref() {
        Some(conn) => issuance_policy(conn).map_err(HandlerErr::db_query)?,
        None => IssuancePolicy::default(),
    };
    if policy.strict_mark_ranges {
        if let Err(e) = check_mark_ranges(&marks) {
            let module_id = p.marks.get(e.index).and_then(|m| m.module_id.clone());
            return Err(HandlerErr::new("bad_marks", e.message())
                .with_details(json!({ "range": e, "moduleId": module_id })));
        }
    }

    let result = calculate_degree_classification(marks);
    let mut out = json!(result);
    out["color"] = json!(classification_color(result.classification.code()));
    Ok(out)
}

fn handle_color(_state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let p: ColorParams = parse_params(req)?;
    Ok(json!({ "color": classification_color(&p.classification) }))
}

fn handle_validate_marks(_state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let p: ValidateMarksParams = parse_params(req)?;
    let v = validate_all_marks_assigned(
        p.modules.iter().map(|m| m.id.as_str()),
        p.marks.iter().map(|m| m.module_id.as_str()),
    );
    Ok(json!(v))
}

fn handle_validate_credits(_state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let p: ValidateCreditsParams = parse_params(req)?;
    let v = validate_total_credits(p.marks.iter().map(|m| m.credits), p.required_credits);
    Ok(json!(v))
}

fn handle_student(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: StudentParams = parse_params(req)?;
    let standing = compute_student_standing(conn, &p.student_id)?;
    Ok(json!(standing))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "classification.calculate" => handle_calculate(state, req),
        "classification.color" => handle_color(state, req),
        "classification.validateMarks" => handle_validate_marks(state, req),
        "classification.validateCredits" => handle_validate_credits(state, req),
        "classification.student" => handle_student(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
