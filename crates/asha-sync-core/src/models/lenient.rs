//! Lenient field decoders for payloads that arrive from the PHP backend,
//! where numbers and flags are frequently encoded as strings.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub(crate) fn opt_i64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    })
}

pub(crate) fn opt_f64<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

pub(crate) fn flag<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    })
}

/// Null or missing text decodes to the empty string.
pub(crate) fn text<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

/// Empty strings decode to `None`.
pub(crate) fn opt_text<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Null decodes to the type's default.
pub(crate) fn or_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(de)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "super::opt_i64")]
        count: Option<i64>,
        #[serde(default, deserialize_with = "super::opt_f64")]
        weight: Option<f64>,
        #[serde(default, deserialize_with = "super::flag")]
        risky: bool,
        #[serde(default, deserialize_with = "super::text")]
        reason: String,
        #[serde(default, deserialize_with = "super::opt_text")]
        phone: Option<String>,
    }

    #[test]
    fn test_string_encoded_values() {
        let probe: Probe = serde_json::from_str(
            r#"{"count": "12", "weight": "3.5", "risky": "1", "reason": null, "phone": ""}"#,
        )
        .unwrap();
        assert_eq!(probe.count, Some(12));
        assert_eq!(probe.weight, Some(3.5));
        assert!(probe.risky);
        assert_eq!(probe.reason, "");
        assert_eq!(probe.phone, None);
    }

    #[test]
    fn test_native_values_and_missing_fields() {
        let probe: Probe = serde_json::from_str(r#"{"count": 7, "risky": false}"#).unwrap();
        assert_eq!(probe.count, Some(7));
        assert_eq!(probe.weight, None);
        assert!(!probe.risky);
        assert_eq!(probe.reason, "");
    }
}
