//! File descriptor carried in the `FILE_NAME` column.
//!
//! The backing table stores a directory-table row as a JSON object. Depending
//! on the transport it arrives either as a JSON-encoded string or as an
//! already-structured value; [`RawDescriptor`] records which one once, at the
//! snapshot boundary, and [`extract`] treats both the same way.

use crate::error::MetadataWarning;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of ETag characters shown in the detail panel
pub const ETAG_DISPLAY_LEN: usize = 16;

/// Descriptor cell as received
#[derive(Debug, Clone, PartialEq)]
pub enum RawDescriptor {
    Encoded(String),
    Structured(Value),
}

impl From<&Value> for RawDescriptor {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(s) => RawDescriptor::Encoded(s.clone()),
            other => RawDescriptor::Structured(other.clone()),
        }
    }
}

impl From<Value> for RawDescriptor {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => RawDescriptor::Encoded(s),
            other => RawDescriptor::Structured(other),
        }
    }
}

impl RawDescriptor {
    /// Text shown in debug output when extraction fails
    pub fn as_text(&self) -> String {
        match self {
            RawDescriptor::Encoded(s) => s.clone(),
            RawDescriptor::Structured(v) => v.to_string(),
        }
    }
}

/// Directory-table attributes of one staged object
///
/// Field names are the wire keys of the backing table and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(rename = "STAGE", default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    #[serde(rename = "RELATIVE_PATH")]
    pub relative_path: String,

    #[serde(rename = "CONTENT_TYPE", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(rename = "SIZE", default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(rename = "LAST_MODIFIED", default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,

    #[serde(rename = "ETAG", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl FileDescriptor {
    /// Leading characters of the ETag, for display only
    pub fn etag_prefix(&self) -> Option<&str> {
        self.etag.as_deref().map(|etag| {
            match etag.char_indices().nth(ETAG_DISPLAY_LEN) {
                Some((end, _)) => &etag[..end],
                None => etag,
            }
        })
    }
}

/// Parse a descriptor cell
///
/// Never fails hard: anything unusable comes back as a [`MetadataWarning`].
pub fn extract(raw: &RawDescriptor) -> Result<FileDescriptor, MetadataWarning> {
    let parsed;
    let value = match raw {
        RawDescriptor::Encoded(text) => {
            parsed = serde_json::from_str::<Value>(text)
                .map_err(|e| MetadataWarning::Malformed(e.to_string()))?;
            &parsed
        }
        RawDescriptor::Structured(value) => value,
    };

    let object = value
        .as_object()
        .ok_or_else(|| MetadataWarning::WrongType(json_kind(value)))?;

    match object.get("RELATIVE_PATH") {
        Some(Value::String(path)) if !path.is_empty() => {}
        _ => return Err(MetadataWarning::MissingField("RELATIVE_PATH")),
    }

    serde_json::from_value(value.clone()).map_err(|e| MetadataWarning::Malformed(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str =
        r#"{"STAGE":"snaps","RELATIVE_PATH":"a.jpg","SIZE":1024,"CONTENT_TYPE":"image/jpeg"}"#;

    #[test]
    fn test_extract_relative_path() {
        let descriptor = extract(&RawDescriptor::Encoded(SAMPLE.to_string())).expect("valid");
        assert_eq!(descriptor.relative_path, "a.jpg");
        assert_eq!(descriptor.stage.as_deref(), Some("snaps"));
        assert_eq!(descriptor.size, Some(1024));
        assert_eq!(descriptor.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(descriptor.last_modified, None);
    }

    #[test]
    fn test_encoded_and_structured_agree() {
        let full = json!({
            "STAGE": "@KAMESH_DEMOS.CONFERENCES.SNAPS",
            "RELATIVE_PATH": "keynote/hall-a.png",
            "CONTENT_TYPE": "image/png",
            "SIZE": 88123,
            "LAST_MODIFIED": "Tue, 15 Jul 2025 09:12:44 GMT",
            "ETAG": "\"5c8d0e3f1a2b4c6d8e0f1a2b3c4d5e6f\""
        });
        for value in [serde_json::from_str::<Value>(SAMPLE).expect("json"), full] {
            let encoded = extract(&RawDescriptor::Encoded(value.to_string()));
            let structured = extract(&RawDescriptor::Structured(value));
            assert_eq!(encoded, structured);
            assert!(encoded.is_ok());
        }
    }

    #[test]
    fn test_malformed_json_is_a_warning() {
        let result = extract(&RawDescriptor::Encoded("{not json".to_string()));
        assert!(matches!(result, Err(MetadataWarning::Malformed(_))));
    }

    #[test]
    fn test_wrong_type_and_missing_path() {
        assert_eq!(
            extract(&RawDescriptor::Structured(json!([1, 2]))),
            Err(MetadataWarning::WrongType("an array"))
        );
        assert_eq!(
            extract(&RawDescriptor::Encoded("42".to_string())),
            Err(MetadataWarning::WrongType("a number"))
        );
        assert_eq!(
            extract(&RawDescriptor::Structured(json!({"STAGE": "snaps"}))),
            Err(MetadataWarning::MissingField("RELATIVE_PATH"))
        );
        assert_eq!(
            extract(&RawDescriptor::Structured(json!({"RELATIVE_PATH": ""}))),
            Err(MetadataWarning::MissingField("RELATIVE_PATH"))
        );
    }

    #[test]
    fn test_size_of_wrong_type_is_a_warning() {
        let result = extract(&RawDescriptor::Structured(
            json!({"RELATIVE_PATH": "a.jpg", "SIZE": "big"}),
        ));
        assert!(matches!(result, Err(MetadataWarning::Malformed(_))));
    }

    #[test]
    fn test_etag_prefix() {
        let mut descriptor = extract(&RawDescriptor::Encoded(SAMPLE.to_string())).expect("valid");
        assert_eq!(descriptor.etag_prefix(), None);

        descriptor.etag = Some("0123456789abcdef0123".to_string());
        assert_eq!(descriptor.etag_prefix(), Some("0123456789abcdef"));

        descriptor.etag = Some("short".to_string());
        assert_eq!(descriptor.etag_prefix(), Some("short"));
    }

    #[test]
    fn test_wire_keys_preserved() {
        let descriptor = extract(&RawDescriptor::Encoded(SAMPLE.to_string())).expect("valid");
        let value = serde_json::to_value(&descriptor).expect("serializes");
        assert_eq!(value["RELATIVE_PATH"], "a.jpg");
        assert_eq!(value["SIZE"], 1024);
        assert!(value.get("ETAG").is_none());
    }
}
