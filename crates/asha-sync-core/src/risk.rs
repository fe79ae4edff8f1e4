//! Derived risk state on patients.
//!
//! A child record that carries a [`RiskSignal`] flags its patient as high
//! risk and contributes its reason to the patient's accumulated reason text.

use tracing::debug;

use crate::db::{Database, DbResult};
use crate::models::{EntityKind, Patient, Record, RiskSignal};

/// Separator between accumulated reasons.
pub const REASON_SEPARATOR: &str = ", ";

/// Reason text used when a signal arrives with no reason and the patient has none.
pub fn fallback_reason(source: EntityKind) -> String {
    format!("{} Risk Factors", source.label())
}

/// Merge `reason` into `current`.
///
/// `reason` may hold several comma-separated parts; each part is appended
/// only if it is not already a substring of the accumulated text.
pub fn merge_reason(current: &str, reason: &str) -> String {
    let mut merged = current.trim().to_string();
    for part in reason.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if merged.contains(part) {
            continue;
        }
        if !merged.is_empty() {
            merged.push_str(REASON_SEPARATOR);
        }
        merged.push_str(part);
    }
    merged
}

/// Apply a signal to a patient. Returns true if anything changed.
pub fn apply_signal(patient: &mut Patient, signal: &RiskSignal) -> bool {
    let mut reason = match signal.reason.as_deref() {
        Some(text) => merge_reason(&patient.high_risk_reason, text),
        None => patient.high_risk_reason.clone(),
    };
    if reason.trim().is_empty() {
        reason = fallback_reason(signal.source);
    }

    let changed = !patient.high_risk || reason != patient.high_risk_reason;
    patient.high_risk = true;
    patient.high_risk_reason = reason;
    changed
}

/// Find the patient `child` belongs to, by local id first, then server id.
pub fn find_patient(db: &Database, child: &Record) -> DbResult<Option<Record>> {
    if let Some(local_id) = child.parent.local_id {
        if let Some(patient) = db.get_record(EntityKind::Patient, local_id)? {
            return Ok(Some(patient));
        }
    }
    if let Some(server_id) = child.parent.server_id {
        return db.get_record_by_server_id(EntityKind::Patient, server_id);
    }
    Ok(None)
}

/// The patient update implied by `child`, if any.
///
/// Returns the patient record with its risk state already applied; the
/// caller persists it.
pub fn plan_update(db: &Database, child: &Record) -> DbResult<Option<Record>> {
    let Some(signal) = child.payload.risk_signal() else {
        return Ok(None);
    };
    let Some(mut patient) = find_patient(db, child)? else {
        debug!(kind = %child.kind(), local_id = child.local_id, "Risk signal without a local patient");
        return Ok(None);
    };

    let changed = patient
        .payload
        .as_patient_mut()
        .map(|p| apply_signal(p, &signal))
        .unwrap_or(false);

    Ok(changed.then_some(patient))
}
