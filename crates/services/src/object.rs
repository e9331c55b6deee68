use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased published object.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

/// Objects a service is published as, keyed by interface name.
///
/// One registration may expose the same object under several interface names, or
/// distinct objects per name.
#[derive(Clone, Default)]
pub struct InterfaceMap {
	objects: BTreeMap<String, ServiceObject>,
}

impl InterfaceMap {
	pub fn new() -> Self {
		Self::default()
	}

	/// Map exposing `object` under a single interface name.
	pub fn single<T: Any + Send + Sync>(interface: impl Into<String>, object: Arc<T>) -> Self {
		Self::new().with(interface, object)
	}

	pub fn with<T: Any + Send + Sync>(mut self, interface: impl Into<String>, object: Arc<T>) -> Self {
		self.insert(interface, object);
		self
	}

	pub fn insert(&mut self, interface: impl Into<String>, object: ServiceObject) -> Option<ServiceObject> {
		self.objects.insert(interface.into(), object)
	}

	pub fn get(&self, interface: &str) -> Option<&ServiceObject> {
		self.objects.get(interface)
	}

	pub fn contains(&self, interface: &str) -> bool {
		self.objects.contains_key(interface)
	}

	pub fn interfaces(&self) -> impl Iterator<Item = &str> {
		self.objects.keys().map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.objects.len()
	}

	pub fn is_empty(&self) -> bool {
		self.objects.is_empty()
	}

	/// Whether `object` is one of the objects in this map (pointer identity).
	pub fn holds(&self, object: &ServiceObject) -> bool {
		self.objects.values().any(|o| Arc::ptr_eq(o, object))
	}
}

impl fmt::Debug for InterfaceMap {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.objects.keys()).finish()
	}
}

/// Recovers the concrete type of a service object.
pub fn downcast<T: Any + Send + Sync>(object: ServiceObject) -> Option<Arc<T>> {
	object.downcast::<T>().ok()
}
