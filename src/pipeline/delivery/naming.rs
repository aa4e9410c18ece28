use std::path::{Path, PathBuf};

use super::DeliveryResponse;
use crate::config::DeliveryConfig;
use crate::pipeline::intake::sanitize_filename;

/// Keyword groups for the route hint sent with a delivery, first match wins.
const ROUTE_HINTS: &[(&str, &[&str])] = &[
    ("AP", &["invoice", "bill", "payable"]),
    ("AR", &["receipt", "payment", "credit"]),
    ("CLIENT", &["contract", "client", "engagement"]),
    ("ADMIN", &["policy", "admin", "hr"]),
];
const DEFAULT_ROUTE_HINT: &str = "ARCHIVE";

pub fn determine_route_hint(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    ROUTE_HINTS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(route, _)| *route)
        .unwrap_or(DEFAULT_ROUTE_HINT)
}

/// Final filename for a delivered file.
///
/// `final_filename` wins; otherwise `naming_convention` is filled from the
/// response metadata (`{key}` placeholders, `{{`/`}}` escapes). A template
/// that cannot be filled falls back to `fallback`.
pub fn apply_naming_convention(response: &DeliveryResponse, fallback: &str) -> String {
    if let Some(name) = response.final_filename.as_deref().filter(|n| !n.is_empty()) {
        return sanitize_filename(name);
    }
    if let Some(template) = response.naming_convention.as_deref() {
        match fill_template(template, &response.metadata) {
            Ok(name) if !name.is_empty() => return sanitize_filename(&name),
            Ok(_) => tracing::warn!(template, "Naming convention produced an empty name"),
            Err(e) => tracing::warn!(template, error = %e, "Failed to apply naming convention"),
        }
    }
    fallback.to_string()
}

fn fill_template(
    template: &str,
    values: &serde_json::Map<String, serde_json::Value>,
) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(k) => key.push(k),
                        None => return Err("unterminated placeholder".into()),
                    }
                }
                match values.get(&key) {
                    Some(serde_json::Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => return Err(format!("missing key {key:?}")),
                }
            }
            '}' => return Err("single '}' in template".into()),
            _ => out.push(c),
        }
    }
    Ok(out)
}

/// Upper-cased route and its directory under `processed_dir`.
///
/// Unknown or missing routes use the configured fallback route.
pub fn resolve_route_dir(
    route: Option<&str>,
    processed_dir: &Path,
    config: &DeliveryConfig,
) -> (String, PathBuf) {
    let requested = route
        .map(|r| r.trim().to_uppercase())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| config.fallback_route.to_uppercase());

    if let Some(dir) = config.route_dirs.get(&requested) {
        return (requested, processed_dir.join(dir));
    }
    tracing::warn!(route = %requested, fallback = %config.fallback_route, "Unknown route");
    let fallback = config.fallback_route.to_uppercase();
    let dir = config
        .route_dirs
        .get(&fallback)
        .cloned()
        .unwrap_or_else(|| fallback.to_lowercase());
    (fallback, processed_dir.join(dir))
}
