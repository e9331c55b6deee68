use std::fmt;
use std::sync::Arc;

use keel_props::Properties;

use crate::ServiceReference;

/// Lifecycle transition a [`ServiceEvent`] reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
	/// The service was published and is obtainable.
	Registered,
	/// The service's properties were replaced and still match the subscriber's filter.
	Modified,
	/// The properties were replaced and no longer match the subscriber's filter,
	/// although the previous snapshot did.
	ModifiedEndMatch,
	/// Unregistration has started. The service is still fully valid during delivery;
	/// subscribers should release it before returning.
	Unregistering,
}

/// Notification delivered synchronously to service listeners.
#[derive(Clone)]
pub struct ServiceEvent {
	pub kind: ServiceEventKind,
	pub reference: ServiceReference,
	/// Snapshot in effect when the event fired.
	pub properties: Arc<Properties>,
	/// Snapshot replaced by a modification; `None` for other kinds.
	pub previous: Option<Arc<Properties>>,
}

impl fmt::Debug for ServiceEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceEvent")
			.field("kind", &self.kind)
			.field("reference", &self.reference)
			.finish()
	}
}

/// Receives service lifecycle events.
///
/// Callbacks run on the thread performing the mutation, in subscription order, and
/// may call back into the registry.
pub trait ServiceListener: Send + Sync {
	fn service_changed(&self, event: &ServiceEvent);
}

impl<F> ServiceListener for F
where
	F: Fn(&ServiceEvent) + Send + Sync,
{
	fn service_changed(&self, event: &ServiceEvent) {
		self(event)
	}
}

/// Handle identifying one listener subscription.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerToken(pub(crate) u64);
