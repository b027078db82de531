use serde::de::DeserializeOwned;

use super::error::HandlerErr;
use super::types::Request;

/// Decode `req.params` into a typed shape. Absent params read as `{}`;
/// missing fields, wrong types and unknown keys are all `bad_params`.
pub fn parse_params<T: DeserializeOwned>(req: &Request) -> Result<T, HandlerErr> {
    let raw = if req.params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        req.params.clone()
    };
    serde_json::from_value(raw).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

pub fn required_text(key: &str, value: &str, max_len: usize) -> Result<String, HandlerErr> {
    let t = value.trim();
    if t.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    if t.chars().count() > max_len {
        return Err(HandlerErr::bad_params(format!(
            "{} length must be <= {}",
            key, max_len
        )));
    }
    Ok(t.to_string())
}

pub fn optional_text(key: &str, value: Option<&str>, max_len: usize) -> Result<String, HandlerErr> {
    let t = value.map(str::trim).unwrap_or("");
    if t.chars().count() > max_len {
        return Err(HandlerErr::bad_params(format!(
            "{} length must be <= {}",
            key, max_len
        )));
    }
    Ok(t.to_string())
}

pub fn email(key: &str, value: &str) -> Result<String, HandlerErr> {
    let t = required_text(key, value, 254)?;
    let valid = match t.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(HandlerErr::bad_params(format!("{} is not an email address", key)));
    }
    Ok(t)
}

pub fn mark(value: f64) -> Result<f64, HandlerErr> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(HandlerErr::bad_params("mark must be between 0 and 100")
            .with_details(serde_json::json!({ "mark": value })));
    }
    Ok(value)
}

/// Upper bound on any stored credit value, per module or per program.
pub const MAX_CREDITS: i64 = 1000;

pub fn positive_credits(key: &str, value: i64) -> Result<i64, HandlerErr> {
    if value <= 0 || value > MAX_CREDITS {
        return Err(HandlerErr::bad_params(format!(
            "{} must be between 1 and {}",
            key, MAX_CREDITS
        ))
        .with_details(serde_json::json!({ key: value })));
    }
    Ok(value)
}

/// `YYYY-MM-DD` or an RFC 3339 timestamp, normalized to a calendar date.
pub fn calendar_date(key: &str, value: &str) -> Result<chrono::NaiveDate, HandlerErr> {
    let t = value.trim();
    if let Ok(d) = chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(t) {
        return Ok(ts.date_naive());
    }
    Err(HandlerErr::bad_params(format!(
        "{} must be YYYY-MM-DD or an RFC 3339 timestamp",
        key
    )))
}
