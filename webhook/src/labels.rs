//! Label selector used by the injected topology spread constraint.

use std::collections::BTreeMap;

/// Pod labels that may take part in the topology spread selector, in order.
pub const SELECTOR_LABELS: &[&str] = &["app", "version", "component", "tier", "env"];

const FALLBACK_KEY: &str = "topology-group";
const FALLBACK_VALUE: &str = "default";

/// Reduces pod labels to a selector made of well-known business labels.
///
/// The result is never empty: an empty selector would match every pod in
/// the namespace.
pub fn sanitize(labels: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    let mut safe = BTreeMap::new();
    if let Some(labels) = labels {
        for key in SELECTOR_LABELS {
            if let Some(value) = labels.get(*key) {
                safe.insert(key.to_string(), value.clone());
            }
        }
    }
    if safe.is_empty() {
        match labels.and_then(|l| l.get("app")) {
            Some(app) => {
                safe.insert("app".to_string(), app.clone());
            }
            None => {
                safe.insert(FALLBACK_KEY.to_string(), FALLBACK_VALUE.to_string());
            }
        }
    }
    safe
}
