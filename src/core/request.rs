// src/core/request.rs

use crate::core::models::Target;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

/// Loads the optional scan-behavior template.
///
/// A missing file yields `None` silently; an unreadable or invalid one is logged
/// and ignored so a broken template never blocks the run.
pub async fn load_scan_template(path: &Path) -> Option<Value> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read scan template, ignoring it.");
            return None;
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(template) if template.is_object() => {
            info!(path = %path.display(), "Loaded scan template.");
            Some(template)
        }
        Ok(_) => {
            warn!(path = %path.display(), "Scan template is not a JSON object, ignoring it.");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Scan template is not valid JSON, ignoring it.");
            None
        }
    }
}

/// Builds the scan-creation body for one target.
///
/// The target is both the seed URL and the only scope rule. A template's
/// `scanner` member is injected as-is; a template without one is merged
/// member by member into the body.
pub fn build_scan_request(target: &Target, template: Option<&Value>) -> Value {
    let mut request = json!({
        "urls": [target.as_str()],
        "scope": {
            "include": [{ "rule": target.as_str() }],
            "exclude": []
        }
    });

    let Some(Value::Object(template)) = template else {
        return request;
    };
    if let Value::Object(body) = &mut request {
        match template.get("scanner") {
            Some(scanner) => {
                body.insert("scanner".to_string(), scanner.clone());
            }
            None => {
                for (key, value) in template {
                    body.insert(key.clone(), value.clone());
                }
            }
        }
    }
    request
}
