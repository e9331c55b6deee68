use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::test_fixtures::{CONSUMER, CountingFactory, GREETER, Greeter, PUBLISHER, Recorder, greeter, ranked};
use crate::{
	BundleId, Properties, ServiceError, ServiceEvent, ServiceEventKind, ServiceId, ServiceObject, ServiceReference,
	ServiceRegistry, ServiceSource, downcast, sort_references,
};

/// Must report a service available exactly between successful registration and
/// completed unregistration. While `Unregistering` is delivered the service is still
/// available and held objects stay valid, but no new acquisition succeeds.
///
/// - Enforced in: `ServiceRegistration::unregister`
/// - Failure symptom: consumers obtain objects from a withdrawn service, or cannot
///   release cleanly during the unregistering callback.
#[cfg_attr(test, test)]
pub(crate) fn test_available_tracks_lifecycle() {
	let registry = ServiceRegistry::new();
	let ctx = registry.context(PUBLISHER);
	let reg = ctx.register_instance(GREETER, greeter(), Properties::new()).unwrap();
	let reference = reg.reference();
	assert!(reg.is_available());
	assert!(reference.is_obtainable());
	assert_eq!(registry.get_service_reference(GREETER), Some(reference.clone()));
	let held = reference.get_service(GREETER, CONSUMER).unwrap();

	let observed = Arc::new(AtomicUsize::new(0));
	let seen = Arc::clone(&observed);
	registry
		.add_service_listener(
			CONSUMER,
			Arc::new(move |event: &ServiceEvent| {
				if event.kind == ServiceEventKind::Unregistering {
					assert!(event.reference.is_available());
					assert!(!event.reference.is_obtainable());
					assert!(event.reference.is_used_by_bundle(CONSUMER));
					assert!(event.reference.get_service(GREETER, BundleId(9)).is_err());
					assert!(event.reference.unget_service(CONSUMER, None));
					seen.fetch_add(1, Ordering::SeqCst);
				}
			}),
			None,
		)
		.unwrap();

	reg.unregister().unwrap();
	assert_eq!(observed.load(Ordering::SeqCst), 1);
	assert!(downcast::<Greeter>(held).is_some(), "held objects outlive unregistration");
	assert!(!reg.is_available());
	assert!(!reference.is_available());
	assert!(!reference.is_obtainable());
	assert_eq!(registry.get_service_reference(GREETER), None);
	assert!(matches!(
		reference.get_service(GREETER, CONSUMER),
		Err(ServiceError::ServiceUnavailable { .. })
	));
}

/// Must unregister at most once, with exactly one `Unregistering` delivery, even when
/// several threads race.
///
/// - Enforced in: `ServiceRegistration::unregister`
/// - Failure symptom: release hooks fire twice; subscribers see duplicate departures.
#[cfg_attr(test, test)]
pub(crate) fn test_unregister_at_most_once() {
	let registry = ServiceRegistry::new();
	let recorder = Arc::new(Recorder::default());
	registry.add_service_listener(CONSUMER, recorder.clone(), None).unwrap();
	let reg = registry
		.register_instance(PUBLISHER, GREETER, greeter(), Properties::new())
		.unwrap();

	let wins = AtomicUsize::new(0);
	thread::scope(|s| {
		for _ in 0..8 {
			s.spawn(|| {
				match reg.unregister() {
					Ok(()) => {
						wins.fetch_add(1, Ordering::SeqCst);
					}
					Err(err) => assert!(matches!(err, ServiceError::IllegalState { .. }), "{err}"),
				}
			});
		}
	});

	assert_eq!(wins.load(Ordering::SeqCst), 1);
	assert_eq!(recorder.kinds(), vec![ServiceEventKind::Registered, ServiceEventKind::Unregistering]);
	assert!(matches!(reg.unregister(), Err(ServiceError::IllegalState { .. })));
}

/// Must create one bundle scoped object per consumer and release it exactly once, when
/// the consumer's last acquisition is returned.
///
/// - Enforced in: `RegistrationInner::acquire`, `RegistrationInner::unget_service`
/// - Failure symptom: factory objects leak or are released while still in use.
#[cfg_attr(test, test)]
pub(crate) fn test_bundle_scope_release_once() {
	let registry = ServiceRegistry::new();
	let factory = Arc::new(CountingFactory::default());
	let reg = registry
		.register_service(
			PUBLISHER,
			[GREETER],
			ServiceSource::BundleFactory(factory.clone()),
			Properties::new(),
		)
		.unwrap();

	let a = downcast::<Greeter>(reg.get_service(GREETER, CONSUMER).unwrap()).unwrap();
	let b = downcast::<Greeter>(reg.get_service(GREETER, CONSUMER).unwrap()).unwrap();
	assert!(Arc::ptr_eq(&a, &b));
	assert_eq!(a.bundle, CONSUMER);
	assert_eq!(factory.created(), 1);

	let other = downcast::<Greeter>(reg.get_service(GREETER, BundleId(3)).unwrap()).unwrap();
	assert_ne!(other.serial, a.serial);
	assert_eq!(factory.created(), 2);

	assert!(reg.unget_service(CONSUMER, None));
	assert_eq!(factory.released(), 0);
	assert!(reg.is_used_by_bundle(CONSUMER));
	assert!(reg.unget_service(CONSUMER, None));
	assert_eq!(factory.released(), 1);
	assert!(!reg.is_used_by_bundle(CONSUMER));
	assert!(!reg.unget_service(CONSUMER, None));
	assert_eq!(factory.released(), 1);
}

/// Must release exactly the prototype object handed back, identified by pointer.
///
/// - Enforced in: `RegistrationInner::unget_service`
/// - Failure symptom: returning one prototype object releases a different one.
#[cfg_attr(test, test)]
pub(crate) fn test_prototype_unget_by_identity() {
	let registry = ServiceRegistry::new();
	let factory = Arc::new(CountingFactory::default());
	let reg = registry
		.register_service(
			PUBLISHER,
			[GREETER],
			ServiceSource::PrototypeFactory(factory.clone()),
			Properties::new(),
		)
		.unwrap();
	let objects = registry.context(CONSUMER).service_objects(&reg.reference());

	let first = objects.get_service(GREETER).unwrap();
	let second = objects.get_service(GREETER).unwrap();
	assert!(!Arc::ptr_eq(&first, &second));
	assert_eq!(factory.created(), 2);

	let stranger: ServiceObject = greeter();
	assert!(!objects.unget_service(&stranger));
	assert_eq!(factory.released(), 0);

	assert!(objects.unget_service(&second));
	assert_eq!(factory.released(), 1);
	assert!(!objects.unget_service(&second), "an object is returned only once");
	assert!(reg.is_used_by_bundle(CONSUMER));
	assert!(objects.unget_service(&first));
	assert_eq!(factory.released(), 2);
	assert!(!reg.is_used_by_bundle(CONSUMER));
}

/// Must keep a reference's metadata readable after unregistration.
///
/// - Enforced in: `ServiceReference` (shares the record)
/// - Failure symptom: property reads on a withdrawn service return nothing.
#[cfg_attr(test, test)]
pub(crate) fn test_stale_reference_keeps_metadata() {
	let registry = ServiceRegistry::new();
	let reg = registry
		.register_instance(PUBLISHER, GREETER, greeter(), ranked(7).with("name", "hello"))
		.unwrap();
	let reference = reg.reference();
	reg.unregister().unwrap();
	drop(reg);

	assert!(reference.is_valid());
	assert!(!reference.is_available());
	assert_eq!(reference.ranking(), 7);
	assert_eq!(reference.property("NAME").and_then(|v| v.as_str().map(str::to_owned)), Some("hello".to_owned()));
	assert_eq!(reference.interfaces(), [GREETER.to_owned()]);
	assert_eq!(reference.properties().object_class(), vec![GREETER]);
}

/// Must order lookups by ranking descending, then id ascending.
///
/// - Enforced in: `sort_references`
/// - Failure symptom: a lower ranked service wins selection.
#[cfg_attr(test, test)]
pub(crate) fn test_ranking_order() {
	let registry = ServiceRegistry::new();
	let ids: Vec<ServiceId> = [5, 10, 10, -1]
		.into_iter()
		.map(|r| {
			registry
				.register_instance(PUBLISHER, GREETER, greeter(), ranked(r))
				.unwrap()
				.id()
		})
		.collect();

	let found: Vec<ServiceId> = registry
		.get_service_references(Some(GREETER), None)
		.unwrap()
		.iter()
		.filter_map(ServiceReference::id)
		.collect();
	assert_eq!(found, vec![ids[1], ids[2], ids[0], ids[3]]);

	let mut refs = registry.get_service_references(Some(GREETER), None).unwrap();
	refs.reverse();
	refs.push(ServiceReference::default());
	sort_references(&mut refs);
	assert_eq!(refs[0].id(), Some(ids[1]));
	assert!(!refs[4].is_valid(), "invalid references sort last");
}

/// Must hand out unique, strictly increasing ids under concurrent registration.
///
/// - Enforced in: `ServiceRegistry::register_service`
/// - Failure symptom: two services share an id.
#[cfg_attr(test, test)]
pub(crate) fn test_concurrent_ids_unique() {
	let registry = ServiceRegistry::new();
	let per_thread = 50;
	let ids: Vec<Vec<ServiceId>> = thread::scope(|s| {
		let handles: Vec<_> = (0..4)
			.map(|t| {
				let registry = &registry;
				s.spawn(move || {
					(0..per_thread)
						.map(|_| {
							registry
								.register_instance(BundleId(t), GREETER, greeter(), Properties::new())
								.unwrap()
								.id()
						})
						.collect::<Vec<_>>()
				})
			})
			.collect();
		handles.into_iter().map(|h| h.join().unwrap()).collect()
	});

	for per in &ids {
		assert!(per.windows(2).all(|w| w[0] < w[1]), "ids must increase per thread");
	}
	let all: BTreeSet<ServiceId> = ids.into_iter().flatten().collect();
	assert_eq!(all.len(), 4 * per_thread as usize);
	assert_eq!(registry.len(), all.len());
}
