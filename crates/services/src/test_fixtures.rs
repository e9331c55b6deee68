use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keel_props::{BundleId, Properties, keys};
use parking_lot::Mutex;

use crate::{InterfaceMap, ServiceEvent, ServiceEventKind, ServiceFactory, ServiceId, ServiceListener, ServiceRegistration};

pub(crate) const GREETER: &str = "test.Greeter";
pub(crate) const PUBLISHER: BundleId = BundleId(1);
pub(crate) const CONSUMER: BundleId = BundleId(2);

/// Object handed out by [`CountingFactory`]; `serial` is unique per creation.
#[derive(Debug)]
pub(crate) struct Greeter {
	pub(crate) serial: usize,
	pub(crate) bundle: BundleId,
}

/// Factory that numbers every object it creates and counts releases.
#[derive(Default)]
pub(crate) struct CountingFactory {
	pub(crate) created: AtomicUsize,
	pub(crate) released: AtomicUsize,
}

impl CountingFactory {
	pub(crate) fn created(&self) -> usize {
		self.created.load(Ordering::SeqCst)
	}

	pub(crate) fn released(&self) -> usize {
		self.released.load(Ordering::SeqCst)
	}
}

impl ServiceFactory for CountingFactory {
	fn get_service(&self, bundle: BundleId, registration: &ServiceRegistration) -> anyhow::Result<InterfaceMap> {
		let serial = self.created.fetch_add(1, Ordering::SeqCst);
		let mut map = InterfaceMap::new();
		for interface in registration.interfaces() {
			map.insert(interface.clone(), Arc::new(Greeter { serial, bundle }));
		}
		Ok(map)
	}

	fn unget_service(&self, _bundle: BundleId, _registration: &ServiceRegistration, _service: InterfaceMap) -> anyhow::Result<()> {
		self.released.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Listener recording `(kind, service id)` for every delivery.
#[derive(Default)]
pub(crate) struct Recorder {
	pub(crate) events: Mutex<Vec<(ServiceEventKind, ServiceId)>>,
}

impl Recorder {
	pub(crate) fn record(&self, event: &ServiceEvent) {
		if let Some(id) = event.reference.id() {
			self.events.lock().push((event.kind, id));
		}
	}

	pub(crate) fn take(&self) -> Vec<(ServiceEventKind, ServiceId)> {
		std::mem::take(&mut *self.events.lock())
	}

	pub(crate) fn kinds(&self) -> Vec<ServiceEventKind> {
		self.events.lock().iter().map(|(k, _)| *k).collect()
	}
}

impl ServiceListener for Recorder {
	fn service_changed(&self, event: &ServiceEvent) {
		self.record(event);
	}
}

pub(crate) fn ranked(ranking: i32) -> Properties {
	Properties::new().with(keys::SERVICE_RANKING, ranking)
}

pub(crate) fn greeter() -> Arc<Greeter> {
	Arc::new(Greeter {
		serial: 0,
		bundle: PUBLISHER,
	})
}
