//! Delivery classification: content-shape heuristics over a step's
//! open-ended output payload.
//!
//! The precedence order is deliberate and first-match-wins; an ambiguous
//! payload falls through to `Text`, the safest rendering.

use serde_json::{Map, Value};

use taskdeck_types::DeliveryKind;

/// Marker fields carrying embedded (base64) file content.
const EMBEDDED_FILE_KEYS: [&str; 2] = ["fileData", "fileBase64"];

/// Marker fields carrying embedded (base64) image content.
const EMBEDDED_IMAGE_KEYS: [&str; 2] = ["imageData", "imageBase64"];

/// URL-bearing fields whose extension decides between image and file.
const URL_KEYS: [&str; 5] = ["url", "fileUrl", "imageUrl", "downloadUrl", "link"];

/// Marker fields set by notification/email steps.
const NOTIFICATION_KEYS: [&str; 3] = ["emailSent", "notificationSent", "notification"];

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "svg"];

const DOCUMENT_EXTENSIONS: [&str; 11] = [
    "pdf", "doc", "docx", "xls", "xlsx", "csv", "zip", "tar", "gz", "txt", "md",
];

/// Classify a step's outputs into a delivery kind. Total: every payload,
/// including `{}`, yields exactly one kind.
pub fn classify_outputs(outputs: &Map<String, Value>) -> DeliveryKind {
    if EMBEDDED_FILE_KEYS.iter().any(|k| has_content(outputs, k)) {
        return DeliveryKind::File;
    }
    if EMBEDDED_IMAGE_KEYS.iter().any(|k| has_content(outputs, k)) {
        return DeliveryKind::Image;
    }
    if outputs.values().any(is_file_object) {
        return DeliveryKind::File;
    }
    for key in URL_KEYS {
        if let Some(url) = outputs.get(key).and_then(Value::as_str) {
            if let Some(kind) = kind_from_extension(url) {
                return kind;
            }
        }
    }
    if NOTIFICATION_KEYS.iter().any(|k| is_truthy(outputs.get(*k))) {
        return DeliveryKind::Notification;
    }
    DeliveryKind::Text
}

fn has_content(outputs: &Map<String, Value>, key: &str) -> bool {
    outputs
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

/// A "file-shaped" nested object: has a name plus either inline content or
/// a location.
fn is_file_object(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.contains_key("name") && (obj.contains_key("content") || obj.contains_key("url"))
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Object(_)) | Some(Value::Array(_)) => true,
        _ => false,
    }
}

fn kind_from_extension(url: &str) -> Option<DeliveryKind> {
    // Strip query/fragment before looking at the extension.
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(DeliveryKind::Image)
    } else if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
        Some(DeliveryKind::File)
    } else {
        None
    }
}
