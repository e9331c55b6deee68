use std::fmt;
use std::sync::Arc;

use keel_props::{BundleId, ServiceScope};

use crate::{InterfaceMap, ServiceRegistration};

/// Produces service objects on demand for consuming bundles.
///
/// Both hooks run under the registration's reentrant lock, so an implementation may
/// call back into the registry (including the same registration) from the same thread.
/// Errors and panics are caught by the registry and logged.
pub trait ServiceFactory: Send + Sync {
	/// Creates the objects handed to `bundle`. The returned map must contain every
	/// interface the registration is published under.
	fn get_service(&self, bundle: BundleId, registration: &ServiceRegistration) -> anyhow::Result<InterfaceMap>;

	/// Releases objects previously returned by [`ServiceFactory::get_service`].
	fn unget_service(&self, bundle: BundleId, registration: &ServiceRegistration, service: InterfaceMap) -> anyhow::Result<()>;
}

/// What a registration publishes.
#[derive(Clone)]
pub enum ServiceSource {
	/// A shared object map handed to every consumer.
	Instance(InterfaceMap),
	/// One factory-made object per consuming bundle.
	BundleFactory(Arc<dyn ServiceFactory>),
	/// A fresh factory-made object per acquisition.
	PrototypeFactory(Arc<dyn ServiceFactory>),
}

impl ServiceSource {
	pub fn scope(&self) -> ServiceScope {
		match self {
			Self::Instance(_) => ServiceScope::Singleton,
			Self::BundleFactory(_) => ServiceScope::Bundle,
			Self::PrototypeFactory(_) => ServiceScope::Prototype,
		}
	}

	pub(crate) fn factory(&self) -> Option<&Arc<dyn ServiceFactory>> {
		match self {
			Self::Instance(_) => None,
			Self::BundleFactory(f) | Self::PrototypeFactory(f) => Some(f),
		}
	}
}

impl fmt::Debug for ServiceSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Instance(map) => f.debug_tuple("Instance").field(map).finish(),
			Self::BundleFactory(_) => f.write_str("BundleFactory(..)"),
			Self::PrototypeFactory(_) => f.write_str("PrototypeFactory(..)"),
		}
	}
}
