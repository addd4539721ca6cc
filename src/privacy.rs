//! Identifier-key scan applied to every payload immediately before
//! export. A hit is fatal for the job and never retried.

use serde_json::Value;

use crate::error::PipelineError;

/// Returns the first map key, anywhere in the payload, that
/// case-insensitively contains "plate" or "license".
pub fn find_identifier_key(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let lower = key.to_ascii_lowercase();
                if lower.contains("plate") || lower.contains("license") {
                    return Some(key.clone());
                }
                if let Some(hit) = find_identifier_key(child) {
                    return Some(hit);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(find_identifier_key),
        _ => None,
    }
}

/// Gate one export stage. `stage` names the payload being exported
/// (events, tracks, windows, summary) for the failure log.
pub fn validate_export(stage: &str, payload: &Value) -> Result<(), PipelineError> {
    match find_identifier_key(payload) {
        Some(key) => Err(PipelineError::PrivacyValidation {
            stage: stage.to_string(),
            key,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plate_like_keys_are_rejected_at_any_depth() {
        let payload = json!({"tracks": [{"bbox": [1, 2], "License_Plate": "ABC123"}]});
        let err = validate_export("tracks", &payload).unwrap_err();
        match err {
            PipelineError::PrivacyValidation { stage, key } => {
                assert_eq!(stage, "tracks");
                assert_eq!(key, "License_Plate");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(validate_export("summary", &json!({"license_plate": "ABC123"})).is_err());
        assert!(validate_export("events", &json!({"numberPlateText": "x"})).is_err());
    }

    #[test]
    fn identifier_values_without_identifier_keys_pass() {
        // Only keys are scanned; values are opaque.
        let payload = json!({
            "windows": [{"congestion_score": 22}],
            "privacy": {"contains_identifiers": false},
            "notes": "license plates are never exported",
        });
        assert!(validate_export("windows", &payload).is_ok());
    }
}
