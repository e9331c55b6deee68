use std::collections::BTreeMap;

use crate::keys;
use crate::{BundleId, ServiceId, ServiceScope, Value};

/// Errors raised while building a property set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
	/// Two keys that differ only by ASCII case.
	#[error("duplicate property key: {existing:?} and {incoming:?} differ only by case")]
	DuplicateKey { existing: String, incoming: String },
}

/// Ordered, case-insensitive key/value snapshot of a service's metadata.
///
/// Iteration order is the order of the case-folded keys. The spelling a key was
/// first inserted with is preserved for display.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Properties {
	entries: BTreeMap<String, (String, Value)>,
}

fn fold(key: &str) -> String {
	key.to_ascii_lowercase()
}

impl Properties {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a property set, rejecting keys that collide ignoring case.
	pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self, PropertyError>
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<Value>,
	{
		let mut props = Self::new();
		for (k, v) in pairs {
			props.insert(k, v)?;
		}
		Ok(props)
	}

	/// Inserts a value, replacing one stored under the identically spelled key.
	///
	/// Fails if a key equal ignoring case but spelled differently already exists.
	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Option<Value>, PropertyError> {
		let key = key.into();
		let folded = fold(&key);
		if let Some((existing, _)) = self.entries.get(&folded)
			&& *existing != key
		{
			return Err(PropertyError::DuplicateKey {
				existing: existing.clone(),
				incoming: key,
			});
		}
		Ok(self.entries.insert(folded, (key, value.into())).map(|(_, v)| v))
	}

	/// Sets a value, overwriting any key equal ignoring case (spelling included).
	pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
		let key = key.into();
		self.entries.insert(fold(&key), (key, value.into())).map(|(_, v)| v)
	}

	/// Builder form of [`Properties::set`].
	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.set(key, value);
		self
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.entries.get(&fold(key)).map(|(_, v)| v)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.entries.contains_key(&fold(key))
	}

	pub fn remove(&mut self, key: &str) -> Option<Value> {
		self.entries.remove(&fold(key)).map(|(_, v)| v)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Keys in their original spelling.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.entries.values().map(|(k, _)| k.as_str())
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.entries.values().map(|(k, v)| (k.as_str(), v))
	}

	pub fn service_id(&self) -> Option<ServiceId> {
		self.get(keys::SERVICE_ID)
			.and_then(Value::as_int)
			.and_then(|id| u64::try_from(id).ok())
			.map(ServiceId)
	}

	/// Ranking used for ordering; missing or non-integer values rank as 0.
	pub fn ranking(&self) -> i32 {
		self.get(keys::SERVICE_RANKING)
			.and_then(Value::as_int)
			.and_then(|r| i32::try_from(r).ok())
			.unwrap_or(0)
	}

	pub fn object_class(&self) -> Vec<&str> {
		self.get(keys::OBJECTCLASS).map(Value::strings).unwrap_or_default()
	}

	pub fn scope(&self) -> ServiceScope {
		self.get(keys::SERVICE_SCOPE)
			.and_then(Value::as_str)
			.and_then(ServiceScope::parse)
			.unwrap_or_default()
	}

	pub fn bundle_id(&self) -> Option<BundleId> {
		self.get(keys::SERVICE_BUNDLE_ID)
			.and_then(Value::as_int)
			.and_then(|id| u64::try_from(id).ok())
			.map(BundleId)
	}
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
	/// Collects pairs with last-wins semantics for case-colliding keys.
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut props = Self::new();
		for (k, v) in iter {
			props.set(k, v);
		}
		props
	}
}
