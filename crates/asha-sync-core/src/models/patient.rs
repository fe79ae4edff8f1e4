//! Patient models.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::lenient;

/// Beneficiary category tracked by the health worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PatientCategory {
    PregnantWoman,
    Child,
    LactatingMother,
    AdolescentGirl,
    #[default]
    General,
}

impl PatientCategory {
    pub const ALL: [PatientCategory; 5] = [
        PatientCategory::PregnantWoman,
        PatientCategory::Child,
        PatientCategory::LactatingMother,
        PatientCategory::AdolescentGirl,
        PatientCategory::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatientCategory::PregnantWoman => "Pregnant Woman",
            PatientCategory::Child => "Child",
            PatientCategory::LactatingMother => "Lactating Mother",
            PatientCategory::AdolescentGirl => "Adolescent Girl",
            PatientCategory::General => "General",
        }
    }
}

impl fmt::Display for PatientCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for PatientCategory {
    fn from(value: String) -> Self {
        let wanted = value.trim();
        PatientCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .or_else(|| match wanted.to_ascii_lowercase().as_str() {
                "pregnant" => Some(PatientCategory::PregnantWoman),
                "lactating" => Some(PatientCategory::LactatingMother),
                "adolescent" => Some(PatientCategory::AdolescentGirl),
                _ => None,
            })
            .unwrap_or_default()
    }
}

impl From<PatientCategory> for String {
    fn from(value: PatientCategory) -> Self {
        value.as_str().to_string()
    }
}

/// A registered beneficiary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub age: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub dob: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub phone: Option<String>,
    /// Older backends call this `village`
    #[serde(default, alias = "village", deserialize_with = "lenient::opt_text")]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub district: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub area: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub category: PatientCategory,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub blood_group: Option<String>,
    /// Ayushman Bharat Health Account number
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub abha_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub medical_notes: Option<String>,
    /// Derived from risk-flagging child records.
    #[serde(rename = "is_high_risk", default, deserialize_with = "lenient::flag")]
    pub high_risk: bool,
    /// Deduplicated, comma-joined reasons.
    #[serde(default, deserialize_with = "lenient::text")]
    pub high_risk_reason: String,
}

impl Patient {
    /// Create a new patient with required fields.
    pub fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn with_category(mut self, category: PatientCategory) -> Self {
        self.category = category;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_patient() {
        let patient = Patient::new("Lakshmi".into());
        assert_eq!(patient.name, "Lakshmi");
        assert_eq!(patient.category, PatientCategory::General);
        assert!(!patient.high_risk);
        assert!(patient.high_risk_reason.is_empty());
    }

    #[test]
    fn test_category_parsing_is_lenient() {
        assert_eq!(
            PatientCategory::from("pregnant woman".to_string()),
            PatientCategory::PregnantWoman
        );
        assert_eq!(PatientCategory::from("CHILD".to_string()), PatientCategory::Child);
        assert_eq!(PatientCategory::from("unknown".to_string()), PatientCategory::General);
    }

    #[test]
    fn test_decode_backend_row() {
        let row = serde_json::json!({
            "id": "42",
            "name": "Radha",
            "age": "27",
            "village": "Kothur",
            "category": "Pregnant Woman",
            "is_high_risk": "1",
            "high_risk_reason": "Anemia",
            "photo_url": null
        });

        let patient: Patient = serde_json::from_value(row).unwrap();
        assert_eq!(patient.age, Some(27));
        assert_eq!(patient.address.as_deref(), Some("Kothur"));
        assert_eq!(patient.category, PatientCategory::PregnantWoman);
        assert!(patient.high_risk);
        assert_eq!(patient.high_risk_reason, "Anemia");
    }

    #[test]
    fn test_encode_uses_backend_names() {
        let mut patient = Patient::new("Radha".into()).with_category(PatientCategory::Child);
        patient.high_risk = true;

        let value = serde_json::to_value(&patient).unwrap();
        assert_eq!(value["is_high_risk"], true);
        assert_eq!(value["category"], "Child");
    }
}
