use chrono::NaiveDate;
use rusqlite::Connection;

use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD, got {:?}", key, raw)))
}

/// A score field that must be present: a number or an explicit `null`.
pub fn get_score(params: &serde_json::Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None => Err(HandlerErr::bad_params(format!("missing {}", key))),
        Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number or null", key))),
    }
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_str_list(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                    HandlerErr::bad_params(format!("{} must be a list of strings", key))
                })
            })
            .collect(),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a list of strings", key))),
    }
}

/// Runs `f` against the open workspace, or answers `no_workspace`.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn score_requires_presence_but_accepts_null() {
        let params = json!({ "score": null, "other": 7.5 });
        assert_eq!(get_score(&params, "score").expect("null"), None);
        assert_eq!(get_score(&params, "other").expect("number"), Some(7.5));
        assert_eq!(get_score(&params, "missing").unwrap_err().code, "bad_params");
        assert!(get_score(&json!({ "score": "9" }), "score").is_err());
    }

    #[test]
    fn dates_must_be_iso() {
        let params = json!({ "date": "2024-09-03", "bad": "09/03/2024" });
        assert_eq!(
            get_required_date(&params, "date").expect("date"),
            NaiveDate::from_ymd_opt(2024, 9, 3).expect("date")
        );
        assert!(get_required_date(&params, "bad").is_err());
    }

    #[test]
    fn string_lists_reject_mixed_items() {
        assert_eq!(
            get_str_list(&json!({ "ids": ["a", "b"] }), "ids").expect("list"),
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(get_str_list(&json!({ "ids": ["a", 1] }), "ids").is_err());
        assert!(get_str_list(&json!({}), "ids").expect("absent").is_empty());
    }
}
