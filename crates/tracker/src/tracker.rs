use std::cmp::Reverse;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use keel_services::{
	BundleContext, Filter, ListenerToken, Result, ServiceEvent, ServiceEventKind, ServiceId, ServiceListener,
	ServiceObject, ServiceReference, run_hook, sort_references,
};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::{ObjectCustomizer, TrackerCustomizer};

/// An `adding_service` call in flight.
struct PendingAdd {
	thread: ThreadId,
	/// Set when the service stopped matching while the customizer ran.
	cancelled: bool,
}

struct TrackerState<T> {
	open: bool,
	token: Option<ListenerToken>,
	tracked: FxHashMap<ServiceReference, T>,
	adding: FxHashMap<ServiceReference, PendingAdd>,
	count: u64,
}

impl<T> TrackerState<T> {
	fn closed() -> Self {
		Self {
			open: false,
			token: None,
			tracked: FxHashMap::default(),
			adding: FxHashMap::default(),
			count: 0,
		}
	}

	/// Whether an add started by another thread is still running.
	fn adding_elsewhere(&self, me: ThreadId) -> bool {
		self.adding.values().any(|p| p.thread != me)
	}
}

struct TrackerShared<T> {
	context: BundleContext,
	filter: Filter,
	customizer: Arc<dyn TrackerCustomizer<T>>,
	/// Never held across a customizer call.
	state: Mutex<TrackerState<T>>,
	generation: Mutex<u64>,
	changed: Condvar,
}

fn hook_id(reference: &ServiceReference) -> ServiceId {
	reference.id().unwrap_or(ServiceId(0))
}

impl<T: Clone + Send + Sync + 'static> TrackerShared<T> {
	fn notify(&self) {
		*self.generation.lock() += 1;
		self.changed.notify_all();
	}

	/// Blocks while the tracker stays closed and another thread's add is unfinished.
	fn await_pending_adds(&self) {
		let me = thread::current().id();
		loop {
			let seen = *self.generation.lock();
			{
				let state = self.state.lock();
				if state.open || !state.adding_elsewhere(me) {
					return;
				}
			}
			let mut generation = self.generation.lock();
			if *generation == seen {
				self.changed.wait(&mut generation);
			}
		}
	}

	fn handle(&self, event: &ServiceEvent) {
		let reference = &event.reference;
		match event.kind {
			ServiceEventKind::Registered | ServiceEventKind::Modified => {
				let modified = {
					let mut state = self.state.lock();
					if !state.open {
						return;
					}
					let tracked = state.tracked.get(reference).cloned();
					if tracked.is_some() && event.kind == ServiceEventKind::Modified {
						state.count += 1;
					}
					tracked
				};
				match modified {
					Some(service) if event.kind == ServiceEventKind::Modified => {
						let _ = run_hook("tracker.modified_service", hook_id(reference), || {
							self.customizer.modified_service(reference, &service);
							Ok(())
						});
					}
					Some(_) => {}
					None => self.track(reference),
				}
			}
			ServiceEventKind::ModifiedEndMatch | ServiceEventKind::Unregistering => {
				self.untrack(reference);
			}
		}
		self.notify();
	}

	fn track(&self, reference: &ServiceReference) {
		{
			let mut state = self.state.lock();
			if !state.open || state.tracked.contains_key(reference) {
				return;
			}
			if let Some(pending) = state.adding.get_mut(reference) {
				// Matches again; the running add may keep its result.
				pending.cancelled = false;
				return;
			}
			let pending = PendingAdd {
				thread: thread::current().id(),
				cancelled: false,
			};
			state.adding.insert(reference.clone(), pending);
		}
		self.finish_add(reference);
		self.notify();
	}

	fn finish_add(&self, reference: &ServiceReference) {
		let added = run_hook("tracker.adding_service", hook_id(reference), || {
			Ok(self.customizer.adding_service(reference))
		})
		.ok()
		.flatten();
		let Some(service) = added else {
			self.state.lock().adding.remove(reference);
			tracing::trace!(service.id = %hook_id(reference), "tracker.declined");
			return;
		};

		let rejected = {
			let mut state = self.state.lock();
			// Removed, withdrawn or closed while the customizer ran.
			let cancelled = state.adding.remove(reference).is_none_or(|p| p.cancelled);
			let wanted = !cancelled && state.open && reference.is_obtainable();
			if wanted {
				state.tracked.insert(reference.clone(), service);
				state.count += 1;
				tracing::trace!(service.id = %hook_id(reference), tracked = state.tracked.len(), "tracker.add");
				None
			} else {
				Some(service)
			}
		};
		if let Some(service) = rejected {
			self.removed(reference, service);
		}
	}

	fn untrack(&self, reference: &ServiceReference) -> bool {
		let removed = {
			let mut state = self.state.lock();
			if let Some(pending) = state.adding.get_mut(reference) {
				pending.cancelled = true;
				return false;
			}
			let removed = state.tracked.remove(reference);
			if removed.is_some() {
				state.count += 1;
			}
			removed
		};
		match removed {
			Some(service) => {
				tracing::trace!(service.id = %hook_id(reference), "tracker.remove");
				self.removed(reference, service);
				true
			}
			None => false,
		}
	}

	fn removed(&self, reference: &ServiceReference, service: T) {
		let _ = run_hook("tracker.removed_service", hook_id(reference), || {
			self.customizer.removed_service(reference, service);
			Ok(())
		});
	}
}

struct TrackerListener<T> {
	shared: Weak<TrackerShared<T>>,
}

impl<T: Clone + Send + Sync + 'static> ServiceListener for TrackerListener<T> {
	fn service_changed(&self, event: &ServiceEvent) {
		if let Some(shared) = self.shared.upgrade() {
			shared.handle(event);
		}
	}
}

/// Live table of the services matching one filter, with a customizer deciding what
/// is stored for each.
///
/// Dropping an open tracker closes it.
pub struct ServiceTracker<T: Clone + Send + Sync + 'static> {
	shared: Arc<TrackerShared<T>>,
}

impl<T: Clone + Send + Sync + 'static> ServiceTracker<T> {
	/// Tracks services published under `interface`.
	pub fn new(context: BundleContext, interface: &str, customizer: Arc<dyn TrackerCustomizer<T>>) -> Self {
		Self::from_filter(context, Filter::object_class(interface), customizer)
	}

	/// Tracks services whose properties match `filter`.
	pub fn with_filter(context: BundleContext, filter: &str, customizer: Arc<dyn TrackerCustomizer<T>>) -> Result<Self> {
		Ok(Self::from_filter(context, Filter::parse(filter)?, customizer))
	}

	pub fn from_filter(context: BundleContext, filter: Filter, customizer: Arc<dyn TrackerCustomizer<T>>) -> Self {
		Self {
			shared: Arc::new(TrackerShared {
				context,
				filter,
				customizer,
				state: Mutex::new(TrackerState::closed()),
				generation: Mutex::new(0),
				changed: Condvar::new(),
			}),
		}
	}

	pub fn filter(&self) -> &Filter {
		&self.shared.filter
	}

	/// Subscribes, then adds every service that already matches. No-op when open.
	pub fn open(&self) {
		let shared = &self.shared;
		{
			let mut state = shared.state.lock();
			if state.open {
				return;
			}
			state.open = true;
			state.count = 0;
		}
		let listener: Arc<dyn ServiceListener> = Arc::new(TrackerListener {
			shared: Arc::downgrade(shared),
		});
		let registry = shared.context.registry();
		let token = registry.add_service_listener_with(shared.context.bundle(), listener, Some(shared.filter.clone()));
		{
			let mut state = shared.state.lock();
			if !state.open || state.token.is_some() {
				// Closed or reopened by another thread meanwhile.
				drop(state);
				registry.remove_service_listener(token);
				return;
			}
			state.token = Some(token);
		}
		tracing::debug!(bundle = %shared.context.bundle(), filter = %shared.filter, "tracker.open");

		for reference in registry.find_references(None, Some(&shared.filter)) {
			shared.track(&reference);
		}
		shared.notify();
	}

	/// Unsubscribes and removes every tracked service, best match first. No-op when closed.
	///
	/// Adds still running on other threads are waited for, so their objects are also
	/// handed back before this returns. An add running on the calling thread (a
	/// customizer closing its own tracker) is released once that customizer returns.
	pub fn close(&self) {
		let shared = &self.shared;
		let (token, mut entries) = {
			let mut state = shared.state.lock();
			if !state.open {
				return;
			}
			state.open = false;
			let entries: Vec<(ServiceReference, T)> = state.tracked.drain().collect();
			(state.token.take(), entries)
		};
		if let Some(token) = token {
			shared.context.remove_service_listener(token);
		}
		entries.sort_by_cached_key(|(reference, _)| (Reverse(reference.ranking()), reference.id()));
		let released = entries.len();
		for (reference, service) in entries {
			shared.removed(&reference, service);
		}
		shared.notify();
		shared.await_pending_adds();
		tracing::debug!(bundle = %shared.context.bundle(), filter = %shared.filter, released, "tracker.close");
	}

	pub fn is_open(&self) -> bool {
		self.shared.state.lock().open
	}

	/// Tracked references, best match first.
	pub fn get_service_references(&self) -> Vec<ServiceReference> {
		let mut refs: Vec<ServiceReference> = self.shared.state.lock().tracked.keys().cloned().collect();
		sort_references(&mut refs);
		refs
	}

	pub fn get_service_reference(&self) -> Option<ServiceReference> {
		self.get_service_references().into_iter().next()
	}

	/// Tracked object of the best matching service.
	pub fn get_service(&self) -> Option<T> {
		self.get_services().into_iter().next()
	}

	/// All tracked objects, best match first.
	pub fn get_services(&self) -> Vec<T> {
		let state = self.shared.state.lock();
		let mut refs: Vec<ServiceReference> = state.tracked.keys().cloned().collect();
		sort_references(&mut refs);
		refs.iter().filter_map(|r| state.tracked.get(r).cloned()).collect()
	}

	pub fn get_service_for(&self, reference: &ServiceReference) -> Option<T> {
		self.shared.state.lock().tracked.get(reference).cloned()
	}

	pub fn size(&self) -> usize {
		self.shared.state.lock().tracked.len()
	}

	pub fn is_empty(&self) -> bool {
		self.size() == 0
	}

	/// Number of additions, modifications and removals seen since the last open;
	/// `None` while closed.
	pub fn get_tracking_count(&self) -> Option<u64> {
		let state = self.shared.state.lock();
		state.open.then_some(state.count)
	}

	/// Stops tracking `reference` until it is registered or modified again.
	pub fn remove(&self, reference: &ServiceReference) -> bool {
		let removed = self.shared.untrack(reference);
		if removed {
			self.shared.notify();
		}
		removed
	}

	/// Blocks until a service is tracked, the tracker is closed or `timeout` elapses.
	pub fn wait_for_service(&self, timeout: Duration) -> Option<T> {
		let deadline = Instant::now() + timeout;
		loop {
			let seen = *self.shared.generation.lock();
			if let Some(service) = self.get_service() {
				return Some(service);
			}
			if !self.is_open() {
				return None;
			}
			let mut generation = self.shared.generation.lock();
			if *generation == seen && self.shared.changed.wait_until(&mut generation, deadline).timed_out() {
				drop(generation);
				return self.get_service();
			}
		}
	}
}

impl ServiceTracker<ServiceObject> {
	/// Tracks the objects published under `interface`, acquired on behalf of the
	/// context's bundle.
	pub fn objects(context: BundleContext, interface: &str) -> Self {
		let customizer = Arc::new(ObjectCustomizer::new(context.clone(), Some(interface)));
		Self::new(context, interface, customizer)
	}

	/// Tracks the objects of every service matching `filter`.
	pub fn objects_matching(context: BundleContext, filter: &str) -> Result<Self> {
		let customizer = Arc::new(ObjectCustomizer::new(context.clone(), None));
		Self::with_filter(context, filter, customizer)
	}
}

impl<T: Clone + Send + Sync + 'static> Drop for ServiceTracker<T> {
	fn drop(&mut self) {
		self.close();
	}
}

impl<T: Clone + Send + Sync + 'static> fmt::Debug for ServiceTracker<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceTracker")
			.field("filter", &self.shared.filter.to_string())
			.field("open", &self.is_open())
			.field("size", &self.size())
			.finish()
	}
}
