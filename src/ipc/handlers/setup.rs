use crate::certify::IssuancePolicy;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::params::parse_params;
use crate::ipc::types::{AppState, Request};
use serde::Deserialize;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Issuance,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "issuance" => Some(Self::Issuance),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Issuance => "setup.issuance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Issuance => {
            let d = IssuancePolicy::default();
            json!({
                "defaultDegreeTitle": d.default_degree_title,
                "defaultSpecialization": d.default_specialization,
                "enforceCreditTotal": d.enforce_credit_total,
                "strictMarkRanges": d.strict_mark_ranges
            })
        }
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_title(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.chars().count() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Issuance => match k.as_str() {
                "defaultDegreeTitle" | "defaultSpecialization" => {
                    obj.insert(k.clone(), Value::String(parse_title(v, k, 120)?));
                }
                "enforceCreditTotal" | "strictMarkRanges" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown issuance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Apply field by field so one bad stored value keeps its default only.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if merge_section_patch(section, &mut current, &single).is_err() {
                    log::warn!("ignoring stored {}.{}", section.key(), k);
                }
            }
        }
    }
    Ok(current)
}

/// Issuance policy as currently configured for the open workspace.
pub fn issuance_policy(conn: &rusqlite::Connection) -> anyhow::Result<IssuancePolicy> {
    let v = load_section(conn, SetupSection::Issuance)?;
    let d = IssuancePolicy::default();
    Ok(IssuancePolicy {
        default_degree_title: v
            .get("defaultDegreeTitle")
            .and_then(|x| x.as_str())
            .map(str::to_string)
            .unwrap_or(d.default_degree_title),
        default_specialization: v
            .get("defaultSpecialization")
            .and_then(|x| x.as_str())
            .map(str::to_string)
            .unwrap_or(d.default_specialization),
        enforce_credit_total: v
            .get("enforceCreditTotal")
            .and_then(|x| x.as_bool())
            .unwrap_or(d.enforce_credit_total),
        strict_mark_ranges: v
            .get("strictMarkRanges")
            .and_then(|x| x.as_bool())
            .unwrap_or(d.strict_mark_ranges),
    })
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateParams {
    section: String,
    patch: Map<String, Value>,
}

fn handle_setup_get(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let issuance = load_section(conn, SetupSection::Issuance).map_err(HandlerErr::db_query)?;
    Ok(json!({ "issuance": issuance }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = state.conn()?;
    let p: UpdateParams = parse_params(req)?;
    let Some(section) = SetupSection::parse(&p.section) else {
        return Err(HandlerErr::bad_params("unknown section")
            .with_details(json!({ "section": p.section })));
    };

    let mut current = load_section(conn, section).map_err(HandlerErr::db_query)?;
    merge_section_patch(section, &mut current, &p.patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::db_update("settings", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "setup.get" => handle_setup_get(state, req),
        "setup.update" => handle_setup_update(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
