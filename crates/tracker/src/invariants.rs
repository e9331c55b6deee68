use std::sync::Arc;

use keel_services::{BundleId, Properties, ServiceReference, ServiceRegistry, keys};
use parking_lot::Mutex;

use crate::{ServiceTracker, TrackerCustomizer};

const SINK: &str = "log.Sink";

/// Records hook calls as `"<hook>:<service id>"`.
#[derive(Default)]
pub(crate) struct Journal {
	pub(crate) calls: Mutex<Vec<String>>,
}

impl Journal {
	fn push(&self, hook: &str, reference: &ServiceReference) {
		let id = reference.id().map_or(0, |id| id.as_u64());
		self.calls.lock().push(format!("{hook}:{id}"));
	}

	pub(crate) fn take(&self) -> Vec<String> {
		std::mem::take(&mut *self.calls.lock())
	}
}

impl TrackerCustomizer<u64> for Journal {
	fn adding_service(&self, reference: &ServiceReference) -> Option<u64> {
		self.push("adding", reference);
		reference.id().map(|id| id.as_u64())
	}

	fn modified_service(&self, reference: &ServiceReference, _service: &u64) {
		self.push("modified", reference);
	}

	fn removed_service(&self, reference: &ServiceReference, _service: u64) {
		self.push("removed", reference);
	}
}

fn publish(registry: &ServiceRegistry, props: Properties) -> keel_services::ServiceRegistration {
	registry
		.register_instance(BundleId(1), SINK, Arc::new(()), props)
		.unwrap()
}

/// Must add every already matching service before `open` returns.
///
/// - Enforced in: `ServiceTracker::open`
/// - Failure symptom: services registered before the tracker opened are never seen.
#[cfg_attr(test, test)]
pub(crate) fn test_open_scans_existing() {
	let registry = ServiceRegistry::new();
	let a = publish(&registry, Properties::new());
	let b = publish(&registry, Properties::new().with(keys::SERVICE_RANKING, 3));
	let journal = Arc::new(Journal::default());
	let tracker = ServiceTracker::<u64>::new(registry.context(BundleId(2)), SINK, journal.clone());

	tracker.open();
	assert_eq!(journal.take(), vec![format!("adding:{}", b.id()), format!("adding:{}", a.id())]);
	assert_eq!(tracker.size(), 2);
	assert_eq!(tracker.get_service(), Some(b.id().as_u64()));
	assert_eq!(tracker.get_tracking_count(), Some(2));
}

/// Must remove every tracked service, and unsubscribe, before `close` returns.
///
/// - Enforced in: `ServiceTracker::close`
/// - Failure symptom: customizer objects leak past close, or events keep arriving.
#[cfg_attr(test, test)]
pub(crate) fn test_close_releases_everything() {
	let registry = ServiceRegistry::new();
	let a = publish(&registry, Properties::new());
	let b = publish(&registry, Properties::new());
	let journal = Arc::new(Journal::default());
	let tracker = ServiceTracker::<u64>::new(registry.context(BundleId(2)), SINK, journal.clone());
	tracker.open();
	journal.take();

	tracker.close();
	assert_eq!(journal.take(), vec![format!("removed:{}", a.id()), format!("removed:{}", b.id())]);
	assert!(tracker.is_empty());
	assert_eq!(tracker.get_tracking_count(), None);
	assert_eq!(registry.listener_count(), 0);

	publish(&registry, Properties::new());
	assert!(journal.take().is_empty(), "closed trackers see no events");
}

/// Must stop tracking a service whose properties no longer match.
///
/// - Enforced in: `TrackerShared::handle` (`ModifiedEndMatch`)
/// - Failure symptom: a consumer keeps using a service outside its filter.
#[cfg_attr(test, test)]
pub(crate) fn test_end_match_untracks() {
	let registry = ServiceRegistry::new();
	let reg = publish(&registry, Properties::new().with("level", "debug"));
	let journal = Arc::new(Journal::default());
	let tracker = ServiceTracker::<u64>::with_filter(registry.context(BundleId(2)), "(level=debug)", journal.clone()).unwrap();
	tracker.open();

	reg.set_properties(Properties::new().with("level", "debug").with("note", "x")).unwrap();
	reg.set_properties(Properties::new().with("level", "info")).unwrap();
	reg.set_properties(Properties::new().with("level", "debug")).unwrap();

	let id = reg.id();
	assert_eq!(
		journal.take(),
		vec![
			format!("adding:{id}"),
			format!("modified:{id}"),
			format!("removed:{id}"),
			format!("adding:{id}"),
		]
	);
	assert_eq!(tracker.get_tracking_count(), Some(4));
}
