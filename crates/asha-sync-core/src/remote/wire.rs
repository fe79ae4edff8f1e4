//! Mapping between local records and backend rows.

use serde_json::{json, Value};

use super::envelope::id_value;
use super::{RemoteError, RemoteResult};
use crate::models::{EntityKind, Record, RecordPayload};

/// A row received from the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRecord {
    pub server_id: i64,
    /// Patient server id (children only)
    pub parent_server_id: Option<i64>,
    pub payload: RecordPayload,
}

/// Body for a create or update of `record`.
///
/// Children carry `patient_id`, which the backend only understands as a
/// server id; callers resolve it before building the body.
pub fn to_wire(record: &Record, parent_server_id: Option<i64>) -> RemoteResult<Value> {
    let mut body = record
        .payload
        .to_json()
        .map_err(|e| RemoteError::Parse(format!("cannot encode {}: {}", record.key(), e)))?;

    let Some(obj) = body.as_object_mut() else {
        return Err(RemoteError::Parse(format!("{} did not encode to an object", record.key())));
    };
    obj.insert("local_id".into(), json!(record.local_id));
    if let Some(server_id) = record.server_id.filter(|id| *id > 0) {
        obj.insert("id".into(), json!(server_id));
        obj.insert("server_id".into(), json!(server_id));
    }
    if record.kind().has_parent() {
        if let Some(patient_id) = parent_server_id {
            obj.insert("patient_id".into(), json!(patient_id));
        }
    }
    Ok(body)
}

/// Decode a backend row for `kind`.
pub fn from_wire(kind: EntityKind, row: Value) -> RemoteResult<WireRecord> {
    let server_id = row
        .get("id")
        .and_then(id_value)
        .or_else(|| row.get("server_id").and_then(id_value))
        .ok_or_else(|| RemoteError::Parse(format!("{} row without an id", kind)))?;
    let parent_server_id = if kind.has_parent() {
        row.get("patient_id").and_then(id_value)
    } else {
        None
    };
    let payload = RecordPayload::from_json(kind, row)
        .map_err(|e| RemoteError::Parse(format!("{} row {}: {}", kind, server_id, e)))?;

    Ok(WireRecord {
        server_id,
        parent_server_id,
        payload,
    })
}
