use std::time::Duration;

use serde::Deserialize;

/// Per-registry settings.
///
/// ```toml
/// label = "host"
/// slow_listener_threshold_ms = 50
/// first_service_id = 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
	/// Name attached to log records emitted by this registry.
	pub label: String,
	/// Subscriber callbacks running longer than this are logged. Delivery is never cut short.
	pub slow_listener_threshold_ms: Option<u64>,
	/// First id handed out by [`crate::ServiceRegistry::register_service`].
	pub first_service_id: u64,
}

impl Default for RegistryConfig {
	fn default() -> Self {
		Self {
			label: "keel".to_owned(),
			slow_listener_threshold_ms: None,
			first_service_id: 1,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("invalid registry config: {0}")]
	Parse(#[from] toml::de::Error),
}

impl RegistryConfig {
	pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(s)?)
	}

	pub fn slow_listener_threshold(&self) -> Option<Duration> {
		self.slow_listener_threshold_ms.map(Duration::from_millis)
	}
}
