//! Normalization of upload endpoint responses.
//!
//! Deployed endpoints have answered in more than one shape over time:
//! the current `{files: [...]}` envelope, an older single `{file}`
//! object, and a flat `{url}`/`{cloudinaryUrl}` body. Clients must
//! accept all of them, so the matchers below are tried in order and
//! the first hit wins.

use serde_json::Value;

/// One hosted file, normalized from whatever shape the server used.
#[derive(Debug, Clone, PartialEq)]
pub struct HostedFile {
    pub url: String,
    pub public_id: Option<String>,
    pub original_name: Option<String>,
    pub file_size: Option<u64>,
    pub file_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<f64>,
    /// Id of the persisted metadata row, null when persistence was
    /// skipped or failed server-side.
    pub record_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub files: Vec<HostedFile>,
}

type ShapeMatcher = fn(&Value, &str) -> Option<UploadOutcome>;

/// Ordered list: newest shape first, legacy fallbacks after.
const SHAPE_MATCHERS: &[ShapeMatcher] = &[match_files_array, match_single_file, match_flat_url];

/// Returns `None` when the body matches no recognized success shape;
/// callers treat that as a failed task even on HTTP 2xx.
pub fn normalize_response(value: &Value, original_name: &str) -> Option<UploadOutcome> {
    SHAPE_MATCHERS
        .iter()
        .find_map(|matcher| matcher(value, original_name))
}

fn match_files_array(value: &Value, original_name: &str) -> Option<UploadOutcome> {
    let entries = value.get("files")?.as_array()?;
    let files: Vec<HostedFile> = entries
        .iter()
        .filter_map(|v| hosted_from_value(v, original_name))
        .collect();
    if files.is_empty() {
        None
    } else {
        Some(UploadOutcome { files })
    }
}

fn match_single_file(value: &Value, original_name: &str) -> Option<UploadOutcome> {
    let file = hosted_from_value(value.get("file")?, original_name)?;
    Some(UploadOutcome { files: vec![file] })
}

fn match_flat_url(value: &Value, original_name: &str) -> Option<UploadOutcome> {
    if !value.is_object() || value.get("files").is_some() || value.get("file").is_some() {
        return None;
    }
    let file = hosted_from_value(value, original_name)?;
    Some(UploadOutcome { files: vec![file] })
}

fn hosted_from_value(value: &Value, original_name: &str) -> Option<HostedFile> {
    let url = value
        .get("cloudinaryUrl")
        .and_then(Value::as_str)
        .or_else(|| value.get("url").and_then(Value::as_str))?
        .to_string();

    Some(HostedFile {
        url,
        public_id: string_field(value, "publicId"),
        original_name: string_field(value, "originalName")
            .or_else(|| Some(original_name.to_string())),
        file_size: value.get("fileSize").and_then(Value::as_u64),
        file_type: string_field(value, "fileType"),
        width: value.get("width").and_then(Value::as_u64).map(|w| w as u32),
        height: value
            .get("height")
            .and_then(Value::as_u64)
            .map(|h| h as u32),
        duration: value.get("duration").and_then(Value::as_f64),
        record_id: match value.get("supabaseId") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        },
    })
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn files_array_shape() {
        let body = json!({
            "success": true,
            "files": [{
                "cloudinaryUrl": "https://media.example/a.jpg",
                "publicId": "p/a",
                "originalName": "a.jpg",
                "fileSize": 123,
                "fileType": "image",
                "width": 800,
                "height": 600,
                "supabaseId": "abc123"
            }]
        });
        let outcome = normalize_response(&body, "a.jpg").unwrap();
        assert_eq!(outcome.files.len(), 1);
        let file = &outcome.files[0];
        assert_eq!(file.url, "https://media.example/a.jpg");
        assert_eq!(file.record_id.as_deref(), Some("abc123"));
        assert_eq!(file.width, Some(800));
    }

    #[test]
    fn legacy_single_file_shape() {
        let body = json!({"file": {"url": "https://media.example/b.mp4"}});
        let outcome = normalize_response(&body, "b.mp4").unwrap();
        assert_eq!(outcome.files[0].url, "https://media.example/b.mp4");
        assert_eq!(outcome.files[0].original_name.as_deref(), Some("b.mp4"));
    }

    #[test]
    fn legacy_flat_url_shape() {
        let body = json!({"cloudinaryUrl": "https://media.example/c.png", "publicId": "c"});
        let outcome = normalize_response(&body, "c.png").unwrap();
        assert_eq!(outcome.files[0].public_id.as_deref(), Some("c"));
    }

    #[test]
    fn files_envelope_wins_over_flat_fields() {
        let body = json!({
            "url": "https://media.example/wrong.png",
            "files": [{"url": "https://media.example/right.png"}]
        });
        let outcome = normalize_response(&body, "x.png").unwrap();
        assert_eq!(outcome.files[0].url, "https://media.example/right.png");
    }

    #[test]
    fn unrecognized_shape_is_none() {
        assert!(normalize_response(&json!({"success": true}), "x").is_none());
        assert!(normalize_response(&json!({"files": []}), "x").is_none());
        assert!(normalize_response(&json!("nope"), "x").is_none());
    }

    #[test]
    fn numeric_record_id_is_accepted() {
        let body = json!({"url": "https://m/x", "supabaseId": 42});
        let outcome = normalize_response(&body, "x").unwrap();
        assert_eq!(outcome.files[0].record_id.as_deref(), Some("42"));
    }
}
