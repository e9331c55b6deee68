//! Per-runtime index of live registrations.
//!
//! # Role
//!
//! [`ServiceRegistry`] assigns service ids, indexes live registrations by id and by
//! interface name, answers lookups, and owns the subscriber list that lifecycle events
//! are delivered to. It is an explicit value: each runtime instance creates its own and
//! hands it to bundles through [`crate::BundleContext`].
//!
//! # Concurrency
//!
//! - The index lock is held only across index mutation and lookup, never across a
//!   subscriber or factory callback, and never while a registration's state lock is
//!   being acquired.
//! - Ids are assigned under the index write lock, so insertion order equals id order.
//! - A new registration's `events` lock is taken before it enters the index and held
//!   through its `Registered` delivery. This is the only place the index lock and an
//!   `events` lock nest, and the registration cannot be reached by anyone else yet.
//! - Lookups evaluate filters and copy the result under one read lock; the returned
//!   references stay usable after a concurrent unregistration, which then surfaces as
//!   [`crate::ServiceError::ServiceUnavailable`] on `get_service`.
//!
//! # Invariants
//!
//! - Ids are unique and strictly increasing.
//!   - Enforced in: [`ServiceRegistry::register_service`].
//!   - Tested by: [`crate::invariants::test_concurrent_ids_unique`]
//!   - Failure symptom: two services answer to one id; ordering ties break arbitrarily.
//! - A registration is indexed iff it is available and not unregistering.
//!   - Enforced in: [`ServiceRegistry::register_service`], [`crate::ServiceRegistration::unregister`].
//!   - Tested by: [`crate::invariants::test_available_tracks_lifecycle`]
//!   - Failure symptom: lookups return services that cannot be obtained.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use keel_filter::Filter;
use keel_props::{BundleId, Properties, ServiceId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{Result, ServiceError};
use crate::listeners::Listeners;
use crate::reference::sort_references;
use crate::registration::RegistrationInner;
use crate::{
	BundleContext, InterfaceMap, ListenerToken, RegistryConfig, ServiceEventKind, ServiceListener, ServiceObject,
	ServiceReference, ServiceRegistration, ServiceSource,
};

struct RegistryIndex {
	next_id: u64,
	by_id: BTreeMap<ServiceId, Arc<RegistrationInner>>,
	by_interface: FxHashMap<String, Vec<Arc<RegistrationInner>>>,
}

pub(crate) struct RegistryShared {
	config: RegistryConfig,
	index: RwLock<RegistryIndex>,
	pub(crate) listeners: Listeners,
}

impl RegistryShared {
	pub(crate) fn remove(&self, inner: &Arc<RegistrationInner>) {
		let mut index = self.index.write();
		index.by_id.remove(&inner.id);
		for interface in inner.interfaces.iter() {
			if let Some(list) = index.by_interface.get_mut(interface) {
				list.retain(|r| !Arc::ptr_eq(r, inner));
				if list.is_empty() {
					index.by_interface.remove(interface);
				}
			}
		}
	}

	fn live(&self) -> Vec<Arc<RegistrationInner>> {
		self.index.read().by_id.values().cloned().collect()
	}
}

/// Service registry for one runtime instance.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ServiceRegistry {
	shared: Arc<RegistryShared>,
}

impl Default for ServiceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

fn validate_interfaces(interfaces: Vec<String>, source: &ServiceSource) -> Result<Box<[String]>> {
	let mut names: Vec<String> = Vec::with_capacity(interfaces.len());
	for name in interfaces {
		if name.is_empty() {
			return Err(ServiceError::InvalidArgument("empty interface name".to_owned()));
		}
		if !names.contains(&name) {
			names.push(name);
		}
	}
	if names.is_empty() {
		return Err(ServiceError::InvalidArgument(
			"a service must be published under at least one interface".to_owned(),
		));
	}
	if let ServiceSource::Instance(map) = source
		&& let Some(missing) = names.iter().find(|n| !map.contains(n))
	{
		return Err(ServiceError::InvalidArgument(format!(
			"instance map does not provide interface {missing:?}"
		)));
	}
	Ok(names.into_boxed_slice())
}

impl ServiceRegistry {
	pub fn new() -> Self {
		Self::with_config(RegistryConfig::default())
	}

	pub fn with_config(config: RegistryConfig) -> Self {
		let listeners = Listeners::new(config.slow_listener_threshold());
		let next_id = config.first_service_id.max(1);
		Self {
			shared: Arc::new(RegistryShared {
				config,
				index: RwLock::new(RegistryIndex {
					next_id,
					by_id: BTreeMap::new(),
					by_interface: FxHashMap::default(),
				}),
				listeners,
			}),
		}
	}

	pub fn config(&self) -> &RegistryConfig {
		&self.shared.config
	}

	/// Entry-point capability for `bundle`.
	pub fn context(&self, bundle: BundleId) -> BundleContext {
		BundleContext::new(self.clone(), bundle)
	}

	/// Number of live registrations.
	pub fn len(&self) -> usize {
		self.shared.index.read().by_id.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Publishes a service and delivers `Registered` to current subscribers.
	pub fn register_service<I, S>(
		&self,
		bundle: BundleId,
		interfaces: I,
		source: ServiceSource,
		properties: Properties,
	) -> Result<ServiceRegistration>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let interfaces = validate_interfaces(interfaces.into_iter().map(Into::into).collect(), &source)?;
		if i64::try_from(bundle.0).is_err() {
			return Err(ServiceError::InvalidArgument(format!(
				"bundle id {bundle} does not fit the service.bundleid property"
			)));
		}

		let mut index = self.shared.index.write();
		// Ids are published as signed integer properties.
		if i64::try_from(index.next_id).is_err() {
			return Err(ServiceError::InvalidArgument("service ids exhausted".to_owned()));
		}
		let id = ServiceId(index.next_id);
		index.next_id += 1;
		let inner = Arc::new(RegistrationInner::new(
			id,
			bundle,
			interfaces,
			source,
			properties,
			Arc::downgrade(&self.shared),
		));
		// Held until `Registered` is delivered, so no other event for this service can
		// overtake it once the index exposes it.
		let events = inner.events.lock();
		index.by_id.insert(id, Arc::clone(&inner));
		for interface in inner.interfaces.iter() {
			index
				.by_interface
				.entry(interface.clone())
				.or_default()
				.push(Arc::clone(&inner));
		}
		drop(index);

		tracing::trace!(
			registry = %self.shared.config.label,
			service.id = %inner.id,
			bundle = %bundle,
			interfaces = ?inner.interfaces,
			"service.register"
		);
		inner.fire(ServiceEventKind::Registered, None);
		drop(events);
		Ok(ServiceRegistration { inner })
	}

	/// Convenience for publishing one object under one interface.
	pub fn register_instance<T: Any + Send + Sync>(
		&self,
		bundle: BundleId,
		interface: &str,
		object: Arc<T>,
		properties: Properties,
	) -> Result<ServiceRegistration> {
		self.register_service(
			bundle,
			[interface],
			ServiceSource::Instance(InterfaceMap::single(interface, object)),
			properties,
		)
	}

	/// Live references published under `interface` (all when `None`) whose properties
	/// match `filter`, best match first.
	pub fn get_service_references(&self, interface: Option<&str>, filter: Option<&str>) -> Result<Vec<ServiceReference>> {
		let filter = filter.map(Filter::parse).transpose()?;
		Ok(self.find_references(interface, filter.as_ref()))
	}

	/// [`ServiceRegistry::get_service_references`] with an already parsed filter.
	pub fn find_references(&self, interface: Option<&str>, filter: Option<&Filter>) -> Vec<ServiceReference> {
		let mut refs = Vec::new();
		{
			let index = self.shared.index.read();
			let mut push = |inner: &Arc<RegistrationInner>| {
				if filter.is_none_or(|f| f.matches(&inner.properties())) {
					refs.push(ServiceReference::from_inner(Arc::clone(inner)));
				}
			};
			match interface {
				Some(name) => index.by_interface.get(name).into_iter().flatten().for_each(&mut push),
				None => index.by_id.values().for_each(&mut push),
			}
		}
		sort_references(&mut refs);
		refs
	}

	/// Best live reference published under `interface`.
	pub fn get_service_reference(&self, interface: &str) -> Option<ServiceReference> {
		self.find_references(Some(interface), None).into_iter().next()
	}

	pub fn get_service(&self, reference: &ServiceReference, interface: &str, consumer: BundleId) -> Result<ServiceObject> {
		reference.get_service(interface, consumer)
	}

	pub fn unget_service(&self, reference: &ServiceReference, consumer: BundleId, instance: Option<&ServiceObject>) -> bool {
		reference.unget_service(consumer, instance)
	}

	/// Subscribes `listener` to events for services matching `filter`.
	///
	/// The filter is parsed here; a malformed expression is rejected before subscription.
	pub fn add_service_listener(
		&self,
		bundle: BundleId,
		listener: Arc<dyn ServiceListener>,
		filter: Option<&str>,
	) -> Result<ListenerToken> {
		let filter = filter.map(Filter::parse).transpose()?;
		Ok(self.add_service_listener_with(bundle, listener, filter))
	}

	/// [`ServiceRegistry::add_service_listener`] with an already parsed filter.
	pub fn add_service_listener_with(
		&self,
		bundle: BundleId,
		listener: Arc<dyn ServiceListener>,
		filter: Option<Filter>,
	) -> ListenerToken {
		self.shared.listeners.add(bundle, listener, filter)
	}

	pub fn remove_service_listener(&self, token: ListenerToken) -> bool {
		self.shared.listeners.remove(token)
	}

	pub fn listener_count(&self) -> usize {
		self.shared.listeners.len()
	}

	/// Live services published by `bundle`, in id order.
	pub fn registered_services(&self, bundle: BundleId) -> Vec<ServiceReference> {
		self.shared
			.live()
			.into_iter()
			.filter(|r| r.bundle == bundle)
			.map(ServiceReference::from_inner)
			.collect()
	}

	/// Live services `bundle` currently holds, in id order.
	pub fn services_in_use(&self, bundle: BundleId) -> Vec<ServiceReference> {
		self.shared
			.live()
			.into_iter()
			.filter(|r| r.is_used_by_bundle(bundle))
			.map(ServiceReference::from_inner)
			.collect()
	}

	/// Cleans up after a departing bundle: withdraws its services, returns every
	/// service it still holds, and drops its listeners.
	pub fn release_bundle(&self, bundle: BundleId) {
		for inner in self.shared.live().into_iter().filter(|r| r.bundle == bundle) {
			let registration = ServiceRegistration { inner };
			if let Err(err) = registration.unregister() {
				tracing::debug!(bundle = %bundle, error = %err, "service.release_bundle.skip");
			}
		}
		for inner in self.shared.live() {
			inner.release_consumer(bundle);
		}
		let removed = self.shared.listeners.remove_bundle(bundle);
		tracing::debug!(bundle = %bundle, listeners = removed, "service.release_bundle");
	}
}
