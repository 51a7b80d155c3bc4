//! Access rules file: a JSON array of `{ "path", "role", "permission" }`.

use crate::access::{AccessRule, Permission, Role};
use crate::error::ConfigError;
use std::path::Path;

/// Rule installed when no rules file is configured: everything under the API is open.
pub fn default_rules(api_path: &str) -> Vec<AccessRule> {
    vec![AccessRule::new(format!("{}/", api_path), Role::Everyone, Permission::All)]
}

pub fn parse_rules(json: &str) -> Result<Vec<AccessRule>, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Load(format!("access rules: {}", e)))
}

/// Rules from `path`, or [`default_rules`] when no path is given.
pub fn load_rules(path: Option<&Path>, api_path: &str) -> Result<Vec<AccessRule>, ConfigError> {
    let Some(path) = path else {
        return Ok(default_rules(api_path));
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let rules = parse_rules(&raw)?;
    tracing::info!(path = %path.display(), rules = rules.len(), "access rules loaded");
    Ok(rules)
}
