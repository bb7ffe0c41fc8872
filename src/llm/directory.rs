use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::ChatError;

#[async_trait]
pub trait ModelDirectory: Send + Sync {
    /// Installed model identifiers. `Ok(vec![])` means the server answered
    /// but has nothing installed; an unreachable server is an error.
    async fn list_models(&self) -> Result<Vec<String>, ChatError>;

    /// Server version string when the server is reachable.
    async fn check_connection(&self) -> Result<String, ChatError>;
}

/// Pulls model names out of a `/api/tags` body.
///
/// Current servers answer `{"models":[{"name":..,"model":..}]}`; older ones
/// returned a bare array of names or objects. Duplicates are dropped and the
/// server's order is kept.
pub fn parse_model_names(json: &Value) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();

    if let Some(models) = json.get("models").and_then(|v| v.as_array()) {
        for item in models {
            if
                let Some(name) = item
                    .get("name")
                    .or(item.get("model"))
                    .and_then(|v| v.as_str())
            {
                names.push(name.to_string());
            }
        }
    } else if let Some(arr) = json.as_array() {
        for item in arr {
            if let Some(s) = item.as_str() {
                names.push(s.to_string());
            } else if let Some(n) = item.get("name").and_then(|v| v.as_str()) {
                names.push(n.to_string());
            } else if let Some(n) = item.get("model").and_then(|v| v.as_str()) {
                names.push(n.to_string());
            }
        }
    }

    let mut seen = HashSet::new();
    names.retain(|n| !n.trim().is_empty() && seen.insert(n.clone()));
    names
}
