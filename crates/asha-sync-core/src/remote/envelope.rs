//! Response envelope normalization.
//!
//! The backend wraps results several ways:
//!
//! - `{"success": true, "id": 7}` / `{"status": "success", "server_id": "7"}`
//! - `{"success": true, "data": {"id": 7, ...}}`
//! - `{"status": "success", "patients": [...]}` (kind-named list key)
//! - `{"success": true, "data": [{"asha_id": 3, "patients": [...]}, ...]}`
//!   (grouped by owning worker)
//! - `{"status": "error", "message": "..."}` / `{"success": false, ...}`
//!
//! [`normalize`] maps all of them to one [`NormalizedResponse`].

use serde_json::{Map, Value};

use super::{RemoteError, RemoteResult};
use crate::models::EntityKind;

/// The one shape the engine consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    /// Server id of a created/updated row, if the response names one
    pub id: Option<i64>,
    pub message: Option<String>,
    /// Record rows, flattened
    pub rows: Vec<Value>,
    pub raw: Value,
}

/// Keys a kind's rows may appear under, besides `data`.
pub fn list_keys(kind: EntityKind) -> &'static [&'static str] {
    match kind {
        EntityKind::Patient => &["patients", "patient"],
        EntityKind::Visit => &["visits", "visit"],
        EntityKind::PregnancyVisit => &["pregnancy_visits", "visits", "pregnancy_visit"],
        EntityKind::ChildGrowth => &["child_growth", "growth_records", "records"],
        EntityKind::Vaccination => &["vaccinations", "vaccination"],
    }
}

/// Positive integer id from a number or a numeric string.
pub fn id_value(value: &Value) -> Option<i64> {
    let id = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (id > 0).then_some(id)
}

fn is_failure(obj: &Map<String, Value>) -> bool {
    let success_false = match obj.get("success") {
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("false") || s == "0",
        _ => false,
    };
    let status_error = obj
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.eq_ignore_ascii_case("error") || s.eq_ignore_ascii_case("failed"))
        .unwrap_or(false);
    success_false || status_error
}

fn message_of(obj: &Map<String, Value>) -> Option<String> {
    ["message", "error", "msg"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn has_id(obj: &Map<String, Value>) -> bool {
    obj.get("id").and_then(id_value).is_some()
}

/// Expand owner groups (`{"asha_id": 3, "patients": [...]}`) into their rows.
fn flatten(kind: EntityKind, items: &[Value]) -> Vec<Value> {
    let mut rows = Vec::new();
    for item in items {
        let nested = item.as_object().filter(|obj| !has_id(obj)).and_then(|obj| {
            list_keys(kind)
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_array))
        });
        match nested {
            Some(group) => rows.extend(flatten(kind, group)),
            None => rows.push(item.clone()),
        }
    }
    rows
}

fn rows_of(kind: EntityKind, obj: &Map<String, Value>) -> Vec<Value> {
    match obj.get("data") {
        Some(Value::Array(items)) => return flatten(kind, items),
        Some(Value::Object(data)) => {
            if has_id(data) {
                return vec![Value::Object(data.clone())];
            }
            let nested = rows_of(kind, data);
            if !nested.is_empty() {
                return nested;
            }
        }
        _ => {}
    }

    for key in list_keys(kind) {
        match obj.get(*key) {
            Some(Value::Array(items)) => return flatten(kind, items),
            Some(Value::Object(row)) => return vec![Value::Object(row.clone())],
            _ => {}
        }
    }
    Vec::new()
}

fn id_of(obj: &Map<String, Value>, rows: &[Value]) -> Option<i64> {
    obj.get("id")
        .and_then(id_value)
        .or_else(|| obj.get("server_id").and_then(id_value))
        .or_else(|| {
            obj.get("data")
                .and_then(Value::as_object)
                .and_then(|data| data.get("id").or_else(|| data.get("server_id")))
                .and_then(id_value)
        })
        .or_else(|| match rows {
            [only] => only.get("id").and_then(id_value),
            _ => None,
        })
}

/// Normalize a parsed response body for `kind`.
pub fn normalize(kind: EntityKind, body: Value) -> RemoteResult<NormalizedResponse> {
    match &body {
        Value::Object(obj) => {
            if is_failure(obj) {
                return Err(RemoteError::Rejected {
                    message: message_of(obj).unwrap_or_else(|| "Request rejected".to_string()),
                });
            }
            let rows = rows_of(kind, obj);
            let id = id_of(obj, &rows);
            Ok(NormalizedResponse {
                id,
                message: message_of(obj),
                rows,
                raw: body,
            })
        }
        Value::Array(items) => Ok(NormalizedResponse {
            id: None,
            message: None,
            rows: flatten(kind, items),
            raw: body,
        }),
        other => Err(RemoteError::Parse(format!(
            "expected a JSON object or array, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_response_variants() {
        let flat = normalize(EntityKind::Patient, json!({"success": true, "id": 42})).unwrap();
        assert_eq!(flat.id, Some(42));

        let string_id = normalize(
            EntityKind::Patient,
            json!({"status": "success", "server_id": "42"}),
        )
        .unwrap();
        assert_eq!(string_id.id, Some(42));

        let nested = normalize(
            EntityKind::Vaccination,
            json!({"success": true, "message": "Saved", "data": {"id": "9"}}),
        )
        .unwrap();
        assert_eq!(nested.id, Some(9));
        assert_eq!(nested.message.as_deref(), Some("Saved"));
    }

    #[test]
    fn test_missing_id_is_none() {
        let response = normalize(
            EntityKind::Patient,
            json!({"status": "success", "message": "Patient added"}),
        )
        .unwrap();
        assert_eq!(response.id, None);
        assert!(response.rows.is_empty());
    }

    #[test]
    fn test_failure_envelopes() {
        let err = normalize(
            EntityKind::Patient,
            json!({"status": "error", "message": "Missing server_id"}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Rejected {
                message: "Missing server_id".into()
            }
        );

        let err = normalize(EntityKind::Vaccination, json!({"success": false})).unwrap_err();
        assert!(matches!(err, RemoteError::Rejected { .. }));
    }

    #[test]
    fn test_list_under_kind_key() {
        let response = normalize(
            EntityKind::Patient,
            json!({"status": "success", "patients": [{"id": "1"}, {"id": "2"}]}),
        )
        .unwrap();
        assert_eq!(response.rows.len(), 2);
        assert_eq!(response.id, None);
    }

    #[test]
    fn test_list_under_data() {
        let response = normalize(
            EntityKind::Visit,
            json!({"success": true, "data": [{"id": 1}, {"id": 2}, {"id": 3}]}),
        )
        .unwrap();
        assert_eq!(response.rows.len(), 3);
    }

    #[test]
    fn test_grouped_by_owner_is_flattened() {
        let response = normalize(
            EntityKind::Patient,
            json!({
                "success": true,
                "data": [
                    {"asha_id": 3, "worker_name": "Kavya", "patients": [{"id": 1}, {"id": 2}]},
                    {"asha_id": 4, "worker_name": "Meena", "patients": [{"id": 5}]}
                ]
            }),
        )
        .unwrap();
        let ids: Vec<i64> = response
            .rows
            .iter()
            .filter_map(|r| r.get("id").and_then(id_value))
            .collect();
        assert_eq!(ids, vec![1, 2, 5]);
    }

    #[test]
    fn test_single_row_object() {
        let response = normalize(
            EntityKind::Patient,
            json!({"status": "success", "patient": {"id": "42", "name": "Radha"}}),
        )
        .unwrap();
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.id, Some(42));
    }

    #[test]
    fn test_bare_array_and_scalar() {
        let response = normalize(EntityKind::Visit, json!([{"id": 1}])).unwrap();
        assert_eq!(response.rows.len(), 1);

        assert!(matches!(
            normalize(EntityKind::Visit, json!("ok")),
            Err(RemoteError::Parse(_))
        ));
    }

    #[test]
    fn test_id_value() {
        assert_eq!(id_value(&json!(7)), Some(7));
        assert_eq!(id_value(&json!(" 7 ")), Some(7));
        assert_eq!(id_value(&json!(0)), None);
        assert_eq!(id_value(&json!("abc")), None);
        assert_eq!(id_value(&Value::Null), None);
    }
}
