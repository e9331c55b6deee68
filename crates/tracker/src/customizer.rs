use keel_services::{BundleContext, ServiceObject, ServiceReference};

/// Hooks deciding what a tracker stores for each matching service.
///
/// Hooks run on the thread delivering the triggering event, without any tracker lock
/// held, so they may call back into the registry or the tracker. Panics are caught and
/// logged; a panic in [`TrackerCustomizer::adding_service`] leaves the service untracked.
pub trait TrackerCustomizer<T>: Send + Sync {
	/// Produces the object to track for `reference`, or `None` to leave it untracked.
	fn adding_service(&self, reference: &ServiceReference) -> Option<T>;

	/// A tracked service's properties changed and it still matches.
	fn modified_service(&self, reference: &ServiceReference, service: &T) {
		let _ = (reference, service);
	}

	/// The service left the tracker. The service is still obtainable when this runs for
	/// an unregistration, so anything acquired in `adding_service` can be released here.
	fn removed_service(&self, reference: &ServiceReference, service: T) {
		let _ = (reference, service);
	}
}

/// Default customizer: tracks the service object itself.
///
/// Acquires the object through the bundle context when a service is added and returns
/// it when the service is removed.
#[derive(Debug, Clone)]
pub struct ObjectCustomizer {
	context: BundleContext,
	interface: Option<String>,
}

impl ObjectCustomizer {
	/// `interface` selects which published object to acquire; `None` takes the first
	/// interface the service is published under.
	pub fn new(context: BundleContext, interface: Option<&str>) -> Self {
		Self {
			context,
			interface: interface.map(str::to_owned),
		}
	}
}

impl TrackerCustomizer<ServiceObject> for ObjectCustomizer {
	fn adding_service(&self, reference: &ServiceReference) -> Option<ServiceObject> {
		let interface = self
			.interface
			.as_deref()
			.or_else(|| reference.interfaces().first().map(String::as_str))?;
		match self.context.get_service(reference, interface) {
			Ok(object) => Some(object),
			Err(err) => {
				tracing::debug!(bundle = %self.context.bundle(), interface, error = %err, "tracker.acquire_failed");
				None
			}
		}
	}

	fn removed_service(&self, reference: &ServiceReference, service: ServiceObject) {
		reference.unget_service(self.context.bundle(), Some(&service));
	}
}
