use std::any::Any;
use std::fmt;
use std::sync::Arc;

use keel_props::{BundleId, Properties};

use crate::error::{Result, ServiceError};
use crate::object::downcast;
use crate::{
	ListenerToken, ServiceListener, ServiceObject, ServiceReference, ServiceRegistration, ServiceRegistry,
	ServiceSource,
};

/// A bundle's capability to publish, look up and consume services.
///
/// Every call made through a context is attributed to its bundle, so the registry can
/// clean up after it in [`ServiceRegistry::release_bundle`].
#[derive(Clone)]
pub struct BundleContext {
	bundle: BundleId,
	registry: ServiceRegistry,
}

impl BundleContext {
	pub fn new(registry: ServiceRegistry, bundle: BundleId) -> Self {
		Self { bundle, registry }
	}

	pub fn bundle(&self) -> BundleId {
		self.bundle
	}

	pub fn registry(&self) -> &ServiceRegistry {
		&self.registry
	}

	pub fn register_service<I, S>(&self, interfaces: I, source: ServiceSource, properties: Properties) -> Result<ServiceRegistration>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.registry.register_service(self.bundle, interfaces, source, properties)
	}

	pub fn register_instance<T: Any + Send + Sync>(
		&self,
		interface: &str,
		object: Arc<T>,
		properties: Properties,
	) -> Result<ServiceRegistration> {
		self.registry.register_instance(self.bundle, interface, object, properties)
	}

	pub fn get_service_references(&self, interface: Option<&str>, filter: Option<&str>) -> Result<Vec<ServiceReference>> {
		self.registry.get_service_references(interface, filter)
	}

	pub fn get_service_reference(&self, interface: &str) -> Option<ServiceReference> {
		self.registry.get_service_reference(interface)
	}

	pub fn get_service(&self, reference: &ServiceReference, interface: &str) -> Result<ServiceObject> {
		reference.get_service(interface, self.bundle)
	}

	/// [`BundleContext::get_service`] followed by a downcast to `T`.
	///
	/// On a type mismatch the acquisition is returned before the error is reported.
	pub fn get_service_as<T: Any + Send + Sync>(&self, reference: &ServiceReference, interface: &str) -> Result<Arc<T>> {
		let object = self.get_service(reference, interface)?;
		match downcast::<T>(Arc::clone(&object)) {
			Some(typed) => Ok(typed),
			None => {
				reference.unget_service(self.bundle, Some(&object));
				Err(ServiceError::InvalidArgument(format!(
					"object published under {interface:?} is not a {}",
					std::any::type_name::<T>()
				)))
			}
		}
	}

	/// Releases one acquisition of a singleton or bundle scoped service.
	///
	/// Prototype objects are returned through [`ServiceObjects::unget_service`].
	pub fn unget_service(&self, reference: &ServiceReference) -> bool {
		reference.unget_service(self.bundle, None)
	}

	/// Per-object access, needed to obtain distinct prototype instances.
	pub fn service_objects(&self, reference: &ServiceReference) -> ServiceObjects {
		ServiceObjects {
			bundle: self.bundle,
			reference: reference.clone(),
		}
	}

	pub fn add_service_listener(&self, listener: Arc<dyn ServiceListener>, filter: Option<&str>) -> Result<ListenerToken> {
		self.registry.add_service_listener(self.bundle, listener, filter)
	}

	pub fn remove_service_listener(&self, token: ListenerToken) -> bool {
		self.registry.remove_service_listener(token)
	}

	pub fn registered_services(&self) -> Vec<ServiceReference> {
		self.registry.registered_services(self.bundle)
	}

	pub fn services_in_use(&self) -> Vec<ServiceReference> {
		self.registry.services_in_use(self.bundle)
	}
}

impl fmt::Debug for BundleContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BundleContext").field("bundle", &self.bundle).finish()
	}
}

/// Acquires and returns individual service objects for one bundle.
#[derive(Clone, Debug)]
pub struct ServiceObjects {
	bundle: BundleId,
	reference: ServiceReference,
}

impl ServiceObjects {
	pub fn reference(&self) -> &ServiceReference {
		&self.reference
	}

	/// A fresh object for prototype services, the shared or per-bundle one otherwise.
	pub fn get_service(&self, interface: &str) -> Result<ServiceObject> {
		self.reference.get_service(interface, self.bundle)
	}

	pub fn unget_service(&self, instance: &ServiceObject) -> bool {
		self.reference.unget_service(self.bundle, Some(instance))
	}
}
