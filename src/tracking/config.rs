use serde::{Deserialize, Serialize};

/// Tracker settings, loadable from JSON.
///
/// ```rust
/// use disposal::tracking::TrackingConfig;
///
/// let config = TrackingConfig::from_json(r#"{ "enabled": true, "allowed_types": ["app::Socket"] }"#).unwrap();
/// assert!(config.enabled);
/// assert!(!config.capture_backtraces);
/// assert_eq!(config.allowed_types, ["app::Socket"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Record instances at all.
    pub enabled: bool,
    /// Capture a backtrace when each instance is registered. Expensive.
    pub capture_backtraces: bool,
    /// Fully qualified type names to track; empty means every type.
    pub allowed_types: Vec<String>,
}

impl TrackingConfig {
    /// Parses a configuration. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Renders the configuration as JSON.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures from `serde_json`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
