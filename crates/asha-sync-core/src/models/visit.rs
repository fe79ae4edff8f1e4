//! Home visit and antenatal visit models.

use serde::{Deserialize, Serialize};

use super::{lenient, EntityKind, RiskSignal};

/// A general home visit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    #[serde(default, deserialize_with = "lenient::text")]
    pub visit_date: String,
    /// e.g. "Routine Checkup", "Emergency", "Follow-up"
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub visit_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub purpose: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub findings: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub recommendations: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub next_visit_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub notes: Option<String>,
}

/// An antenatal check-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PregnancyVisit {
    #[serde(default, deserialize_with = "lenient::text")]
    pub visit_date: String,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub gestational_weeks: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub weight: Option<f64>,
    /// "systolic/diastolic"
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub blood_pressure: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub hemoglobin: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub fetal_heart_rate: Option<i64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub fundal_height: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub urine_protein: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub urine_sugar: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub complaints: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub advice: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub next_visit_date: Option<String>,
    #[serde(rename = "is_high_risk", default, deserialize_with = "lenient::flag")]
    pub high_risk: bool,
    /// Comma separated. The backend calls this `high_risk_reason`.
    #[serde(
        rename = "high_risk_reason",
        alias = "risk_factors",
        default,
        deserialize_with = "lenient::text"
    )]
    pub risk_factors: String,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub notes: Option<String>,
}

impl PregnancyVisit {
    pub fn risk_signal(&self) -> Option<RiskSignal> {
        if !self.high_risk {
            return None;
        }
        let reason = self.risk_factors.trim();
        Some(RiskSignal {
            source: EntityKind::PregnancyVisit,
            reason: (!reason.is_empty()).then(|| reason.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_risk_visit_has_no_signal() {
        let visit = PregnancyVisit {
            risk_factors: "Anemia".into(),
            ..Default::default()
        };
        assert!(visit.risk_signal().is_none());
    }

    #[test]
    fn test_high_risk_visit_signal() {
        let visit = PregnancyVisit {
            high_risk: true,
            risk_factors: "  Anemia ".into(),
            ..Default::default()
        };
        let signal = visit.risk_signal().unwrap();
        assert_eq!(signal.source, EntityKind::PregnancyVisit);
        assert_eq!(signal.reason.as_deref(), Some("Anemia"));

        let bare = PregnancyVisit {
            high_risk: true,
            ..Default::default()
        };
        assert_eq!(bare.risk_signal().unwrap().reason, None);
    }

    #[test]
    fn test_decode_string_encoded_vitals() {
        let row = serde_json::json!({
            "visit_date": "2024-03-02",
            "gestational_weeks": "24",
            "hemoglobin": "9.8",
            "is_high_risk": 1,
            "high_risk_reason": "Anemia"
        });
        let visit: PregnancyVisit = serde_json::from_value(row).unwrap();
        assert_eq!(visit.gestational_weeks, Some(24));
        assert_eq!(visit.hemoglobin, Some(9.8));
        assert!(visit.high_risk);
        assert_eq!(visit.risk_factors, "Anemia");
    }
}
