use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use keel_filter::Filter;
use keel_props::{BundleId, Properties, ServiceId};
use parking_lot::RwLock;

use crate::hook::run_hook;
use crate::{ListenerToken, ServiceEvent, ServiceEventKind, ServiceListener, ServiceReference};

struct ListenerEntry {
	token: ListenerToken,
	bundle: BundleId,
	filter: Option<Filter>,
	listener: Arc<dyn ServiceListener>,
	removed: AtomicBool,
}

impl ListenerEntry {
	fn accepts(&self, props: &Properties) -> bool {
		self.filter.as_ref().is_none_or(|f| f.matches(props))
	}
}

/// Ordered subscriber list with snapshot-at-fire delivery.
///
/// The list lock is held only to copy or edit the list, never across a callback.
pub(crate) struct Listeners {
	next: AtomicU64,
	entries: RwLock<Vec<Arc<ListenerEntry>>>,
	slow: Option<Duration>,
}

impl Listeners {
	pub(crate) fn new(slow: Option<Duration>) -> Self {
		Self {
			next: AtomicU64::new(1),
			entries: RwLock::new(Vec::new()),
			slow,
		}
	}

	pub(crate) fn add(&self, bundle: BundleId, listener: Arc<dyn ServiceListener>, filter: Option<Filter>) -> ListenerToken {
		let token = ListenerToken(self.next.fetch_add(1, Ordering::Relaxed));
		tracing::debug!(bundle = %bundle, token = token.0, filter = ?filter.as_ref().map(ToString::to_string), "service.listener.add");
		self.entries.write().push(Arc::new(ListenerEntry {
			token,
			bundle,
			filter,
			listener,
			removed: AtomicBool::new(false),
		}));
		token
	}

	pub(crate) fn remove(&self, token: ListenerToken) -> bool {
		let mut entries = self.entries.write();
		let Some(pos) = entries.iter().position(|e| e.token == token) else {
			return false;
		};
		let entry = entries.remove(pos);
		entry.removed.store(true, Ordering::Release);
		tracing::debug!(bundle = %entry.bundle, token = token.0, "service.listener.remove");
		true
	}

	pub(crate) fn remove_bundle(&self, bundle: BundleId) -> usize {
		let mut entries = self.entries.write();
		let before = entries.len();
		entries.retain(|e| {
			let keep = e.bundle != bundle;
			if !keep {
				e.removed.store(true, Ordering::Release);
			}
			keep
		});
		before - entries.len()
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Delivers one event to every subscriber registered when delivery starts.
	///
	/// A subscriber removed before its turn is skipped; one added meanwhile never sees
	/// this event.
	pub(crate) fn deliver(
		&self,
		kind: ServiceEventKind,
		id: ServiceId,
		reference: &ServiceReference,
		properties: Arc<Properties>,
		previous: Option<Arc<Properties>>,
	) {
		let snapshot: Vec<Arc<ListenerEntry>> = self.entries.read().clone();
		for entry in &snapshot {
			if entry.removed.load(Ordering::Acquire) {
				continue;
			}
			let kind = match kind {
				ServiceEventKind::Modified if entry.accepts(&properties) => ServiceEventKind::Modified,
				ServiceEventKind::Modified if previous.as_deref().is_some_and(|p| entry.accepts(p)) => {
					ServiceEventKind::ModifiedEndMatch
				}
				ServiceEventKind::Modified => continue,
				other if entry.accepts(&properties) => other,
				_ => continue,
			};
			let event = ServiceEvent {
				kind,
				reference: reference.clone(),
				properties: Arc::clone(&properties),
				previous: previous.clone(),
			};
			let started = Instant::now();
			let _ = run_hook("listener", id, || {
				entry.listener.service_changed(&event);
				Ok(())
			});
			if let Some(limit) = self.slow {
				let elapsed = started.elapsed();
				if elapsed > limit {
					tracing::warn!(
						service.id = %id,
						bundle = %entry.bundle,
						elapsed_ms = elapsed.as_millis() as u64,
						"service.listener.slow"
					);
				}
			}
		}
	}
}
