use serde_json::{json, Map, Value};

use crate::types::{ScheduleWindow, WriteKind};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://prod.zodiac-io.com";
pub const API_KEY_PROD: &str = "EOOEMOW4YR6QNB11";

/// The cloud rejects unknown agents; this matches the vendor app.
pub const USER_AGENT: &str = "okhttp/3.14.7";

pub const LOGIN_PATH: &str = "/users/v1/login";
pub const REFRESH_PATH: &str = "/users/v1/refresh";

pub fn shadow_path(serial: &str) -> String {
    format!("/devices/v1/{serial}/shadow")
}

pub fn login_body(email: &str, password: &str) -> Value {
    json!({
        "api_key": API_KEY_PROD,
        "email": email,
        "password": password,
    })
}

pub fn refresh_body(email: &str, refresh_token: &str) -> Value {
    json!({
        "email": email,
        "refresh_token": refresh_token,
    })
}

/// Wrap a write payload in the desired-state document at the nesting the
/// device expects for its kind. Optimistic cache patches must mirror this
/// shape exactly so a later real fetch supersedes them in place.
pub fn desired_document(kind: WriteKind, target: &str, payload: &Value) -> Value {
    match kind {
        WriteKind::Pool => json!({
            "state": {"desired": {"equipment": {"swc_0": payload}}}
        }),
        WriteKind::Heating => json!({
            "state": {"desired": {"heating": {target: payload}}}
        }),
        WriteKind::Schedule => json!({
            "state": {"desired": {"schedules": {target: payload}}}
        }),
    }
}

/// Extract `state.reported` from a shadow GET response.
pub fn parse_reported(body: &Value) -> Value {
    body.pointer("/state/reported")
        .cloned()
        .unwrap_or(Value::Object(Map::new()))
}

pub fn is_rate_limited(status: u16, body: &str) -> bool {
    status == 429 || body.contains("Too Many Requests")
}

pub fn is_token_expired(body: &str) -> bool {
    body.contains("token has expired")
}

/// Build `{"a": {"b": value}}` from a dotted path `a.b`.
pub fn nested_value(path: &str, value: Value) -> Value {
    let mut nested = value;
    for key in path.rsplit('.') {
        let mut map = Map::new();
        map.insert(key.to_string(), nested);
        nested = Value::Object(map);
    }
    nested
}

/// Set a value at a dotted path inside a JSON object, creating intermediate
/// objects as needed.
pub fn set_nested(target: &mut Value, path: &[&str], value: Value) {
    let mut node = target;
    for key in &path[..path.len() - 1] {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .expect("node was just made an object")
            .entry(key.to_string())
            .or_insert(Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut()
        .expect("node was just made an object")
        .insert(path[path.len() - 1].to_string(), value);
}

pub fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => {
            for (k, v) in s {
                deep_merge(t.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (t, s) => {
            *t = s.clone();
        }
    }
}

/// Validate `HH:MM` or `HH:MM:SS` and truncate to `HH:MM`.
pub fn normalize_time(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let valid = matches!(bytes.len(), 5 | 8)
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| match i % 3 {
                2 => *b == b':',
                _ => b.is_ascii_digit(),
            });
    if !valid {
        return Err(Error::InvalidTime(value.to_string()));
    }
    Ok(value[..5].to_string())
}

/// Build the schedule patch sent as the desired value for a schedule key.
/// Returns `None` when the window carries nothing to change.
pub fn schedule_patch(window: &ScheduleWindow) -> Result<Option<Value>> {
    let mut patch = Map::new();
    if window.start.is_some() || window.end.is_some() {
        let mut timer = Map::new();
        if let Some(ref start) = window.start {
            timer.insert("start".to_string(), Value::String(normalize_time(start)?));
        }
        if let Some(ref end) = window.end {
            timer.insert("end".to_string(), Value::String(normalize_time(end)?));
        }
        patch.insert("timer".to_string(), Value::Object(timer));
    }
    if let Some(rpm) = window.rpm {
        patch.insert("rpm".to_string(), json!(rpm));
    }
    if patch.is_empty() {
        return Ok(None);
    }
    Ok(Some(Value::Object(patch)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_body_shape() {
        let body = login_body("user@example.com", "hunter2");
        assert_eq!(body["api_key"], API_KEY_PROD);
        assert_eq!(body["email"], "user@example.com");
        assert_eq!(body["password"], "hunter2");
    }

    #[test]
    fn shadow_path_embeds_serial() {
        assert_eq!(shadow_path("EXO123"), "/devices/v1/EXO123/shadow");
    }

    #[test]
    fn pool_write_nests_under_swc_0() {
        let payload = nested_value("orp_sp", json!(700));
        let doc = desired_document(WriteKind::Pool, "orp_sp", &payload);
        assert_eq!(doc["state"]["desired"]["equipment"]["swc_0"]["orp_sp"], 700);
    }

    #[test]
    fn heating_write_nests_under_heating() {
        let doc = desired_document(WriteKind::Heating, "sp", &json!(28));
        assert_eq!(doc["state"]["desired"]["heating"]["sp"], 28);
    }

    #[test]
    fn schedule_write_nests_under_key() {
        let patch = json!({"timer": {"start": "08:00"}});
        let doc = desired_document(WriteKind::Schedule, "sch1", &patch);
        assert_eq!(doc["state"]["desired"]["schedules"]["sch1"]["timer"]["start"], "08:00");
    }

    #[test]
    fn nested_value_builds_dotted_paths() {
        let v = nested_value("filter_pump.speed", json!(2));
        assert_eq!(v["filter_pump"]["speed"], 2);
    }

    #[test]
    fn set_nested_creates_intermediates() {
        let mut target = json!({});
        set_nested(&mut target, &["equipment", "swc_0", "orp_sp"], json!(700));
        assert_eq!(target["equipment"]["swc_0"]["orp_sp"], 700);

        set_nested(&mut target, &["equipment", "swc_0", "boost"], json!(1));
        assert_eq!(target["equipment"]["swc_0"]["orp_sp"], 700);
        assert_eq!(target["equipment"]["swc_0"]["boost"], 1);
    }

    #[test]
    fn deep_merge_preserves_siblings() {
        let mut base = json!({"timer": {"start": "08:00"}, "rpm": 1500});
        deep_merge(&mut base, &json!({"timer": {"end": "18:00"}}));
        assert_eq!(base["timer"]["start"], "08:00");
        assert_eq!(base["timer"]["end"], "18:00");
        assert_eq!(base["rpm"], 1500);
    }

    #[test]
    fn parse_reported_extracts_state() {
        let body = json!({"state": {"reported": {"equipment": {"swc_0": {"sn": "X"}}}}});
        let reported = parse_reported(&body);
        assert_eq!(reported["equipment"]["swc_0"]["sn"], "X");
        assert_eq!(parse_reported(&json!({})), json!({}));
    }

    #[test]
    fn normalize_time_accepts_and_truncates() {
        assert_eq!(normalize_time("08:30").unwrap(), "08:30");
        assert_eq!(normalize_time("08:30:45").unwrap(), "08:30");
        assert!(normalize_time("8:30").is_err());
        assert!(normalize_time("08-30").is_err());
        assert!(normalize_time("abcde").is_err());
    }

    #[test]
    fn schedule_patch_shape() {
        let window = ScheduleWindow {
            start: Some("08:00:00".to_string()),
            end: Some("18:00".to_string()),
            rpm: Some(1500),
        };
        let patch = schedule_patch(&window).unwrap().unwrap();
        assert_eq!(patch["timer"]["start"], "08:00");
        assert_eq!(patch["timer"]["end"], "18:00");
        assert_eq!(patch["rpm"], 1500);

        assert!(schedule_patch(&ScheduleWindow::default()).unwrap().is_none());
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limited(429, ""));
        assert!(is_rate_limited(403, "Too Many Requests"));
        assert!(!is_rate_limited(500, "internal error"));
    }
}
