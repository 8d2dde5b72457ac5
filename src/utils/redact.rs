use serde_json::Value as JsonValue;

use crate::error::AppResult;

const REDACTED: &str = "[REDACTED]";

/// Masks free-text and credential fields before a payload reaches the logs.
/// Identifiers, timestamps and numbers are kept so requests stay traceable.
pub fn redact_sensitive_data(data: &JsonValue) -> AppResult<JsonValue> {
    Ok(redact_value(data))
}

fn redact_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(key, val)| {
                    let redacted = if is_sensitive_field(key) {
                        mask(val)
                    } else {
                        redact_value(val)
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(redact_value).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_field(field_name: &str) -> bool {
    let lower = field_name.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "title"
            | "description"
            | "reason"
            | "message"
            | "note"
            | "notes"
            | "comment"
            | "adjustment_reasons"
            | "token"
            | "access_token"
            | "authorization"
            | "password"
    )
}

fn mask(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) if !text.is_empty() => JsonValue::String(REDACTED.to_string()),
        JsonValue::Array(items) if !items.is_empty() => JsonValue::String(REDACTED.to_string()),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn masks_manual_input_free_text() {
        let data = json!({
            "suggestionType": "manual",
            "manual_input": {
                "title": "Prepare board deck",
                "description": "numbers for Q3",
                "duration_minutes": 60,
                "deadline": "2026-03-04T17:00:00Z"
            },
            "timezone": "UTC"
        });

        let redacted = redact_sensitive_data(&data).unwrap();

        assert_eq!(redacted["manual_input"]["title"], REDACTED);
        assert_eq!(redacted["manual_input"]["description"], REDACTED);
        assert_eq!(redacted["manual_input"]["duration_minutes"], 60);
        assert_eq!(redacted["manual_input"]["deadline"], "2026-03-04T17:00:00Z");
        assert_eq!(redacted["timezone"], "UTC");
    }

    #[test]
    fn masks_nested_slot_reasons_and_tokens() {
        let data = json!({
            "token": "secret",
            "slots": [
                { "slot_index": 1, "reason": "quiet morning", "confidence": 0.8 }
            ]
        });

        let redacted = redact_sensitive_data(&data).unwrap();

        assert_eq!(redacted["token"], REDACTED);
        assert_eq!(redacted["slots"][0]["reason"], REDACTED);
        assert_eq!(redacted["slots"][0]["slot_index"], 1);
    }

    #[test]
    fn leaves_status_bodies_untouched() {
        let data = json!({
            "status": "accepted",
            "selected_slot_index": 2,
            "suggested_start_at": "2026-03-03T10:00:00Z"
        });

        assert_eq!(redact_sensitive_data(&data).unwrap(), data);
    }
}
