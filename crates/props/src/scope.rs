use std::fmt;

use serde::{Deserialize, Serialize};

/// How a published service is instantiated for consumers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
	/// One shared object for every consumer.
	#[default]
	Singleton,
	/// One object per consuming bundle, cached until that bundle's last release.
	Bundle,
	/// A fresh object for every acquisition.
	Prototype,
}

impl ServiceScope {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Singleton => "singleton",
			Self::Bundle => "bundle",
			Self::Prototype => "prototype",
		}
	}

	/// Parses the value stored under [`crate::keys::SERVICE_SCOPE`].
	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"singleton" => Some(Self::Singleton),
			"bundle" => Some(Self::Bundle),
			"prototype" => Some(Self::Prototype),
			_ => None,
		}
	}
}

impl fmt::Display for ServiceScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
