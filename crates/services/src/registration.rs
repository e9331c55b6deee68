//! Published service records and their per-consumer bookkeeping.
//!
//! # Role
//!
//! A [`ServiceRegistration`] is the publisher's handle to one published service. The
//! record behind it owns the service object or factory, the current property snapshot,
//! the availability flags and the per-consumer instance caches.
//!
//! # Locks
//!
//! - `state`: reentrant; guards the flags, the service source and the instance maps.
//!   Factory hooks run while it is held, so a factory may re-enter the registry from the
//!   same thread. No `RefCell` borrow is ever held across a hook.
//! - `events`: reentrant; serializes this registration's event deliveries. Registry code
//!   never takes it while holding `state`; only a factory hook that changes its own
//!   registration's properties does.
//! - Properties live in an `ArcSwap`, so reads through references never wait on either lock.
//!
//! # Invariants
//!
//! - `available` is true iff registration succeeded and unregistration has not completed.
//!   - Enforced in: [`ServiceRegistration::unregister`].
//!   - Tested by: [`crate::invariants::test_available_tracks_lifecycle`]
//!   - Failure symptom: consumers obtain objects from a withdrawn service.
//! - Unregistration happens at most once.
//!   - Enforced in: [`ServiceRegistration::unregister`] (flag transition under `state`).
//!   - Tested by: [`crate::invariants::test_unregister_at_most_once`]
//!   - Failure symptom: release hooks fire twice, listeners see two `Unregistering` events.
//! - A consumer has a dependents / instance entry only while its count or list is non-empty.
//!   - Enforced in: [`ServiceRegistration::unget_service`].
//!   - Tested by: [`crate::invariants::test_bundle_scope_release_once`], [`crate::invariants::test_prototype_unget_by_identity`]
//!   - Failure symptom: `is_used_by_bundle` stays true after the last release.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use keel_props::{BundleId, Properties, ServiceId, ServiceScope, Value, keys};
use parking_lot::ReentrantMutex;
use rustc_hash::FxHashMap;

use crate::error::{Result, ServiceError};
use crate::hook::run_hook;
use crate::registry::RegistryShared;
use crate::{InterfaceMap, ServiceEventKind, ServiceFactory, ServiceObject, ServiceReference, ServiceSource};

#[derive(Default)]
struct InstanceState {
	/// `None` once unregistration has completed.
	source: Option<ServiceSource>,
	/// Unbalanced `get_service` calls per consumer.
	dependents: FxHashMap<BundleId, usize>,
	bundle_instances: FxHashMap<BundleId, InterfaceMap>,
	prototype_instances: FxHashMap<BundleId, Vec<InterfaceMap>>,
}

pub(crate) struct RegistrationInner {
	pub(crate) id: ServiceId,
	pub(crate) bundle: BundleId,
	pub(crate) scope: ServiceScope,
	pub(crate) interfaces: Box<[String]>,
	registry: Weak<RegistryShared>,
	props: ArcSwap<Properties>,
	/// Written only while `state` is held.
	available: AtomicBool,
	/// Written only while `state` is held.
	unregistering: AtomicBool,
	state: ReentrantMutex<RefCell<InstanceState>>,
	pub(crate) events: ReentrantMutex<()>,
}

/// Stamps the registry-owned keys onto caller-supplied properties.
///
/// `ServiceRegistry::register_service` only admits ids that fit an `i64`.
pub(crate) fn stamp(mut props: Properties, id: ServiceId, bundle: BundleId, scope: ServiceScope, interfaces: &[String]) -> Properties {
	props.set(keys::OBJECTCLASS, Value::List(interfaces.iter().cloned().map(Value::Str).collect()));
	props.set(keys::SERVICE_ID, i64::try_from(id.as_u64()).unwrap_or(i64::MAX));
	props.set(keys::SERVICE_SCOPE, scope.as_str());
	props.set(keys::SERVICE_BUNDLE_ID, i64::try_from(bundle.0).unwrap_or(i64::MAX));
	props
}

impl RegistrationInner {
	pub(crate) fn new(
		id: ServiceId,
		bundle: BundleId,
		interfaces: Box<[String]>,
		source: ServiceSource,
		props: Properties,
		registry: Weak<RegistryShared>,
	) -> Self {
		let scope = source.scope();
		let props = stamp(props, id, bundle, scope, &interfaces);
		Self {
			id,
			bundle,
			scope,
			interfaces,
			registry,
			props: ArcSwap::from_pointee(props),
			available: AtomicBool::new(true),
			unregistering: AtomicBool::new(false),
			state: ReentrantMutex::new(RefCell::new(InstanceState {
				source: Some(source),
				..InstanceState::default()
			})),
			events: ReentrantMutex::new(()),
		}
	}

	pub(crate) fn properties(&self) -> Arc<Properties> {
		self.props.load_full()
	}

	pub(crate) fn is_available(&self) -> bool {
		self.available.load(Ordering::Acquire)
	}

	pub(crate) fn obtainable(&self) -> bool {
		self.is_available() && !self.unregistering.load(Ordering::Acquire)
	}

	fn unavailable(&self) -> ServiceError {
		ServiceError::ServiceUnavailable { id: self.id }
	}

	pub(crate) fn fire(self: &Arc<Self>, kind: ServiceEventKind, previous: Option<Arc<Properties>>) {
		let Some(registry) = self.registry.upgrade() else {
			return;
		};
		let _events = self.events.lock();
		let reference = ServiceReference::from_inner(Arc::clone(self));
		registry
			.listeners
			.deliver(kind, self.id, &reference, self.properties(), previous);
	}

	fn publisher(self: &Arc<Self>) -> ServiceRegistration {
		ServiceRegistration { inner: Arc::clone(self) }
	}

	fn invoke_factory(self: &Arc<Self>, factory: &Arc<dyn ServiceFactory>, consumer: BundleId) -> Result<InterfaceMap> {
		let registration = self.publisher();
		let map = run_hook("factory.get_service", self.id, || factory.get_service(consumer, &registration))
			.map_err(|message| ServiceError::Factory { id: self.id, message })?;
		if let Some(missing) = self.interfaces.iter().find(|i| !map.contains(i)) {
			let message = format!("factory result does not provide interface {missing:?}");
			tracing::error!(service.id = %self.id, bundle = %consumer, interface = %missing, "service.factory.incomplete");
			return Err(ServiceError::Factory { id: self.id, message });
		}
		Ok(map)
	}

	fn invoke_release(self: &Arc<Self>, factory: &Arc<dyn ServiceFactory>, consumer: BundleId, service: InterfaceMap) {
		let registration = self.publisher();
		let _ = run_hook("factory.unget_service", self.id, || factory.unget_service(consumer, &registration, service));
	}

	/// Obtains the object map for `consumer`, creating it through the factory as the
	/// scope requires, and counts the acquisition.
	pub(crate) fn acquire(self: &Arc<Self>, consumer: BundleId) -> Result<InterfaceMap> {
		let guard = self.state.lock();
		if !self.obtainable() {
			return Err(self.unavailable());
		}
		let source = guard.borrow().source.clone().ok_or_else(|| self.unavailable())?;

		let map = match source {
			ServiceSource::Instance(map) => map,
			ServiceSource::BundleFactory(factory) => {
				let cached = guard.borrow().bundle_instances.get(&consumer).cloned();
				match cached {
					Some(map) => map,
					None => {
						let made = self.invoke_factory(&factory, consumer)?;
						if !self.obtainable() {
							self.invoke_release(&factory, consumer, made);
							return Err(self.unavailable());
						}
						// A reentrant call from inside the factory may have filled the slot already.
						let mut state = guard.borrow_mut();
						let existing = state.bundle_instances.get(&consumer).cloned();
						match existing {
							Some(existing) => {
								drop(state);
								self.invoke_release(&factory, consumer, made);
								existing
							}
							None => {
								state.bundle_instances.insert(consumer, made.clone());
								made
							}
						}
					}
				}
			}
			ServiceSource::PrototypeFactory(factory) => {
				let made = self.invoke_factory(&factory, consumer)?;
				if !self.obtainable() {
					self.invoke_release(&factory, consumer, made);
					return Err(self.unavailable());
				}
				guard
					.borrow_mut()
					.prototype_instances
					.entry(consumer)
					.or_default()
					.push(made.clone());
				made
			}
		};

		*guard.borrow_mut().dependents.entry(consumer).or_insert(0) += 1;
		tracing::trace!(service.id = %self.id, bundle = %consumer, scope = %self.scope, "service.get");
		Ok(map)
	}

	pub(crate) fn get_service(self: &Arc<Self>, interface: &str, consumer: BundleId) -> Result<ServiceObject> {
		if !self.interfaces.iter().any(|i| i == interface) {
			return Err(ServiceError::InvalidArgument(format!(
				"service {} is not published under {interface:?}",
				self.id
			)));
		}
		let map = self.acquire(consumer)?;
		map.get(interface).cloned().ok_or_else(|| self.unavailable())
	}

	pub(crate) fn unget_service(self: &Arc<Self>, consumer: BundleId, instance: Option<&ServiceObject>) -> bool {
		let guard = self.state.lock();
		let (released, factory) = {
			let mut state = guard.borrow_mut();
			if !state.dependents.contains_key(&consumer) {
				return false;
			}
			let factory = state.source.as_ref().and_then(ServiceSource::factory).cloned();

			let released = match self.scope {
				ServiceScope::Singleton => None,
				ServiceScope::Bundle => {
					if state.dependents.get(&consumer) == Some(&1) {
						state.bundle_instances.remove(&consumer)
					} else {
						None
					}
				}
				ServiceScope::Prototype => {
					let Some(instance) = instance else {
						tracing::warn!(service.id = %self.id, bundle = %consumer, "service.unget.prototype_without_instance");
						return false;
					};
					let Some(list) = state.prototype_instances.get_mut(&consumer) else {
						return false;
					};
					let Some(pos) = list.iter().position(|m| m.holds(instance)) else {
						tracing::warn!(service.id = %self.id, bundle = %consumer, "service.unget.unknown_instance");
						return false;
					};
					let removed = list.remove(pos);
					if list.is_empty() {
						state.prototype_instances.remove(&consumer);
					}
					Some(removed)
				}
			};

			if let Some(count) = state.dependents.get_mut(&consumer) {
				*count -= 1;
				if *count == 0 {
					state.dependents.remove(&consumer);
				}
			}
			(released, factory)
		};

		if let (Some(service), Some(factory)) = (released, factory) {
			self.invoke_release(&factory, consumer, service);
		}
		tracing::trace!(service.id = %self.id, bundle = %consumer, "service.unget");
		true
	}

	/// Drops every acquisition `consumer` holds, releasing factory-made objects.
	pub(crate) fn release_consumer(self: &Arc<Self>, consumer: BundleId) -> bool {
		let guard = self.state.lock();
		let (factory, instances) = {
			let mut state = guard.borrow_mut();
			let had = state.dependents.remove(&consumer).is_some();
			let mut instances: Vec<InterfaceMap> = state.prototype_instances.remove(&consumer).unwrap_or_default();
			instances.extend(state.bundle_instances.remove(&consumer));
			if !had && instances.is_empty() {
				return false;
			}
			(state.source.as_ref().and_then(ServiceSource::factory).cloned(), instances)
		};
		if let Some(factory) = factory {
			for service in instances {
				self.invoke_release(&factory, consumer, service);
			}
		}
		true
	}

	pub(crate) fn is_used_by_bundle(&self, bundle: BundleId) -> bool {
		let guard = self.state.lock();
		let state = guard.borrow();
		state.dependents.get(&bundle).is_some_and(|&n| n > 0)
			|| state.bundle_instances.contains_key(&bundle)
			|| state.prototype_instances.get(&bundle).is_some_and(|l| !l.is_empty())
	}

	pub(crate) fn using_bundles(&self) -> Vec<BundleId> {
		let guard = self.state.lock();
		let mut bundles: Vec<BundleId> = guard.borrow().dependents.keys().copied().collect();
		bundles.sort_unstable();
		bundles
	}

	fn unregister(self: &Arc<Self>) -> Result<()> {
		{
			let _state = self.state.lock();
			if !self.is_available() || self.unregistering.load(Ordering::Acquire) {
				return Err(ServiceError::IllegalState {
					id: self.id,
					reason: "service already unregistered",
				});
			}
			self.unregistering.store(true, Ordering::Release);
		}

		if let Some(registry) = self.registry.upgrade() {
			registry.remove(self);
		}
		self.fire(ServiceEventKind::Unregistering, None);

		let guard = self.state.lock();
		let (factory, instances) = {
			let mut state = guard.borrow_mut();
			let mut instances: Vec<(BundleId, InterfaceMap)> = state.bundle_instances.drain().collect();
			for (bundle, list) in state.prototype_instances.drain() {
				instances.extend(list.into_iter().map(|m| (bundle, m)));
			}
			(state.source.as_ref().and_then(ServiceSource::factory).cloned(), instances)
		};
		if let Some(factory) = factory {
			for (bundle, service) in instances {
				self.invoke_release(&factory, bundle, service);
			}
		}

		let source = {
			let mut state = guard.borrow_mut();
			state.dependents.clear();
			self.available.store(false, Ordering::Release);
			self.unregistering.store(false, Ordering::Release);
			state.source.take()
		};
		drop(guard);
		drop(source);
		tracing::trace!(service.id = %self.id, bundle = %self.bundle, "service.unregistered");
		Ok(())
	}

	fn set_properties(self: &Arc<Self>, props: Properties) -> Result<()> {
		let _events = self.events.lock();
		if !self.obtainable() {
			return Err(ServiceError::IllegalState {
				id: self.id,
				reason: "properties cannot change after unregistration",
			});
		}
		let next = Arc::new(stamp(props, self.id, self.bundle, self.scope, &self.interfaces));
		let previous = self.props.swap(next);
		tracing::trace!(service.id = %self.id, "service.modified");
		self.fire(ServiceEventKind::Modified, Some(previous));
		Ok(())
	}
}

/// Publisher-side handle to a registered service.
///
/// Cloning the handle does not duplicate the registration.
#[derive(Clone)]
pub struct ServiceRegistration {
	pub(crate) inner: Arc<RegistrationInner>,
}

impl ServiceRegistration {
	pub fn id(&self) -> ServiceId {
		self.inner.id
	}

	pub fn bundle(&self) -> BundleId {
		self.inner.bundle
	}

	pub fn scope(&self) -> ServiceScope {
		self.inner.scope
	}

	pub fn interfaces(&self) -> &[String] {
		&self.inner.interfaces
	}

	pub fn is_available(&self) -> bool {
		self.inner.is_available()
	}

	/// Read-only handle sharing this registration's metadata.
	pub fn reference(&self) -> ServiceReference {
		ServiceReference::from_inner(Arc::clone(&self.inner))
	}

	pub fn properties(&self) -> Arc<Properties> {
		self.inner.properties()
	}

	/// The published object map of an instance registration.
	///
	/// Factory-backed registrations have no shared map; their objects are only
	/// reachable through [`ServiceRegistration::get_service`].
	pub fn get_interfaces(&self) -> Result<InterfaceMap> {
		let guard = self.inner.state.lock();
		let state = guard.borrow();
		match &state.source {
			Some(ServiceSource::Instance(map)) => Ok(map.clone()),
			Some(_) => Err(ServiceError::InvalidUse {
				id: self.inner.id,
				reason: "factory-backed services must be obtained through get_service",
			}),
			None => Err(self.inner.unavailable()),
		}
	}

	/// Obtains the object published under `interface` on behalf of `consumer`.
	pub fn get_service(&self, interface: &str, consumer: BundleId) -> Result<ServiceObject> {
		self.inner.get_service(interface, consumer)
	}

	/// Releases one acquisition by `consumer`. Returns `false` if nothing was released.
	///
	/// `instance` identifies which prototype object is returned and is ignored for the
	/// other scopes.
	pub fn unget_service(&self, consumer: BundleId, instance: Option<&ServiceObject>) -> bool {
		self.inner.unget_service(consumer, instance)
	}

	/// Replaces the property snapshot and notifies subscribers with old and new snapshots.
	///
	/// Registry-owned keys (`objectclass`, `service.id`, `service.scope`,
	/// `service.bundleid`) keep their values.
	pub fn set_properties(&self, props: Properties) -> Result<()> {
		self.inner.set_properties(props)
	}

	/// Withdraws the service.
	///
	/// Removes it from lookups, delivers `Unregistering` while the object is still
	/// valid, releases every factory-made instance, then marks it unavailable.
	pub fn unregister(&self) -> Result<()> {
		self.inner.unregister()
	}

	pub fn is_used_by_bundle(&self, bundle: BundleId) -> bool {
		self.inner.is_used_by_bundle(bundle)
	}

	pub fn using_bundles(&self) -> Vec<BundleId> {
		self.inner.using_bundles()
	}
}

impl PartialEq for ServiceRegistration {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl Eq for ServiceRegistration {}

impl fmt::Debug for ServiceRegistration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceRegistration")
			.field("id", &self.inner.id)
			.field("bundle", &self.inner.bundle)
			.field("interfaces", &self.inner.interfaces)
			.field("available", &self.is_available())
			.finish()
	}
}

#[cfg(test)]
mod tests;
