//! Child growth and immunization models.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{lenient, EntityKind, RiskSignal};

/// Growth assessment recorded at a weighing.
///
/// Text outside the clinical vocabulary is kept as written, since the
/// backend also stores free-text notes in this column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GrowthStatus {
    #[default]
    Normal,
    Underweight,
    SevereUnderweight,
    Stunting,
    SevereStunting,
    Wasting,
    Overweight,
    Other(String),
}

impl GrowthStatus {
    pub fn as_str(&self) -> &str {
        match self {
            GrowthStatus::Normal => "Normal",
            GrowthStatus::Underweight => "Underweight",
            GrowthStatus::SevereUnderweight => "Severe Underweight",
            GrowthStatus::Stunting => "Stunting",
            GrowthStatus::SevereStunting => "Severe Stunting",
            GrowthStatus::Wasting => "Wasting",
            GrowthStatus::Overweight => "Overweight",
            GrowthStatus::Other(text) => text,
        }
    }

    /// Statuses that flag the child as high risk.
    pub fn is_risk(&self) -> bool {
        matches!(
            self,
            GrowthStatus::Underweight
                | GrowthStatus::SevereUnderweight
                | GrowthStatus::Stunting
                | GrowthStatus::SevereStunting
                | GrowthStatus::Wasting
        )
    }
}

impl fmt::Display for GrowthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for GrowthStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "normal" => GrowthStatus::Normal,
            "underweight" => GrowthStatus::Underweight,
            "severe underweight" | "severely underweight" => GrowthStatus::SevereUnderweight,
            "stunting" | "stunted" => GrowthStatus::Stunting,
            "severe stunting" | "severely stunted" => GrowthStatus::SevereStunting,
            "wasting" | "wasted" => GrowthStatus::Wasting,
            "overweight" => GrowthStatus::Overweight,
            _ => GrowthStatus::Other(value),
        }
    }
}

impl From<GrowthStatus> for String {
    fn from(value: GrowthStatus) -> Self {
        match value {
            GrowthStatus::Other(text) => text,
            known => known.as_str().to_string(),
        }
    }
}

/// A growth-monitoring measurement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildGrowth {
    #[serde(default, deserialize_with = "lenient::text")]
    pub record_date: String,
    #[serde(default, deserialize_with = "lenient::opt_i64")]
    pub age_months: Option<i64>,
    /// kg
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub weight: Option<f64>,
    /// cm
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub height: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub head_circumference: Option<f64>,
    /// Mid-upper arm circumference, cm
    #[serde(default, deserialize_with = "lenient::opt_f64")]
    pub muac: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub nutritional_status: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub growth_status: GrowthStatus,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub milestones: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub notes: Option<String>,
}

impl ChildGrowth {
    /// Either status in the risk vocabulary flags the child.
    pub fn risk_signal(&self) -> Option<RiskSignal> {
        let nutritional = self
            .nutritional_status
            .clone()
            .map(GrowthStatus::from)
            .unwrap_or_default();

        let mut reasons: Vec<&str> = Vec::new();
        for status in [&nutritional, &self.growth_status] {
            if status.is_risk() && !reasons.contains(&status.as_str()) {
                reasons.push(status.as_str());
            }
        }
        if reasons.is_empty() {
            return None;
        }
        Some(RiskSignal {
            source: EntityKind::ChildGrowth,
            reason: Some(reasons.join(", ")),
        })
    }
}

/// Immunization schedule state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VaccinationStatus {
    #[default]
    Due,
    Upcoming,
    Overdue,
    Completed,
}

impl VaccinationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VaccinationStatus::Due => "DUE",
            VaccinationStatus::Upcoming => "UPCOMING",
            VaccinationStatus::Overdue => "OVERDUE",
            VaccinationStatus::Completed => "COMPLETED",
        }
    }
}

impl From<String> for VaccinationStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "UPCOMING" | "SCHEDULED" => VaccinationStatus::Upcoming,
            "OVERDUE" | "MISSED" => VaccinationStatus::Overdue,
            "COMPLETED" | "GIVEN" | "DONE" => VaccinationStatus::Completed,
            _ => VaccinationStatus::Due,
        }
    }
}

impl From<VaccinationStatus> for String {
    fn from(value: VaccinationStatus) -> Self {
        value.as_str().to_string()
    }
}

/// A scheduled or administered vaccine dose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vaccination {
    #[serde(default, deserialize_with = "lenient::text")]
    pub vaccine_name: String,
    /// The backend calls this `scheduled_date`
    #[serde(
        rename = "scheduled_date",
        alias = "due_date",
        default,
        deserialize_with = "lenient::opt_text"
    )]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub given_date: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub status: VaccinationStatus,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub batch_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub side_effects: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_text")]
    pub notes: Option<String>,
}
