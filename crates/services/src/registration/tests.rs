use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use crate::test_fixtures::{CONSUMER, CountingFactory, GREETER, Greeter, PUBLISHER, greeter, ranked};
use crate::{
	BundleId, InterfaceMap, Properties, ServiceError, ServiceFactory, ServiceRegistration, ServiceRegistry,
	ServiceScope, ServiceSource, Value, downcast, keys,
};

const ALT: &str = "test.Alt";

struct FailingFactory {
	panic: bool,
}

impl ServiceFactory for FailingFactory {
	fn get_service(&self, _bundle: BundleId, _registration: &ServiceRegistration) -> anyhow::Result<InterfaceMap> {
		if self.panic {
			panic!("factory exploded");
		}
		anyhow::bail!("no greeter today")
	}

	fn unget_service(&self, _: BundleId, _: &ServiceRegistration, _: InterfaceMap) -> anyhow::Result<()> {
		Ok(())
	}
}

/// Returns a map missing the second published interface.
struct PartialFactory;

impl ServiceFactory for PartialFactory {
	fn get_service(&self, _bundle: BundleId, _registration: &ServiceRegistration) -> anyhow::Result<InterfaceMap> {
		Ok(InterfaceMap::single(GREETER, greeter()))
	}

	fn unget_service(&self, _: BundleId, _: &ServiceRegistration, _: InterfaceMap) -> anyhow::Result<()> {
		Ok(())
	}
}

fn bundle_scoped(registry: &ServiceRegistry, factory: Arc<dyn ServiceFactory>) -> ServiceRegistration {
	registry
		.register_service(PUBLISHER, [GREETER], ServiceSource::BundleFactory(factory), Properties::new())
		.unwrap()
}

#[test]
fn test_registry_keys_stamped() {
	let registry = ServiceRegistry::new();
	let reg = registry
		.register_instance(PUBLISHER, GREETER, greeter(), ranked(3))
		.unwrap();
	let props = reg.properties();
	assert_eq!(props.service_id(), Some(reg.id()));
	assert_eq!(props.bundle_id(), Some(PUBLISHER));
	assert_eq!(props.scope(), ServiceScope::Singleton);
	assert_eq!(props.object_class(), vec![GREETER]);
	assert_eq!(props.ranking(), 3);
}

#[test]
fn test_set_properties_keeps_registry_keys() {
	let registry = ServiceRegistry::new();
	let reg = registry
		.register_instance(PUBLISHER, GREETER, greeter(), Properties::new())
		.unwrap();
	let forged = ranked(9)
		.with(keys::SERVICE_ID, 999)
		.with(keys::OBJECTCLASS, "other.Interface");
	reg.set_properties(forged).unwrap();

	let props = reg.properties();
	assert_eq!(props.ranking(), 9);
	assert_eq!(props.service_id(), Some(reg.id()));
	assert_eq!(props.object_class(), vec![GREETER]);
}

#[test]
fn test_set_properties_after_unregister_fails() {
	let registry = ServiceRegistry::new();
	let reg = registry
		.register_instance(PUBLISHER, GREETER, greeter(), ranked(1))
		.unwrap();
	reg.unregister().unwrap();
	assert!(matches!(
		reg.set_properties(ranked(2)),
		Err(ServiceError::IllegalState { .. })
	));
	assert_eq!(reg.properties().ranking(), 1);
}

#[test]
fn test_get_interfaces_instance_only() {
	let registry = ServiceRegistry::new();
	let instance = registry
		.register_instance(PUBLISHER, GREETER, greeter(), Properties::new())
		.unwrap();
	let map = instance.get_interfaces().unwrap();
	assert_eq!(map.interfaces().collect::<Vec<_>>(), vec![GREETER]);

	let factory = bundle_scoped(&registry, Arc::new(CountingFactory::default()));
	assert!(matches!(factory.get_interfaces(), Err(ServiceError::InvalidUse { .. })));

	instance.unregister().unwrap();
	assert!(matches!(
		instance.get_interfaces(),
		Err(ServiceError::ServiceUnavailable { .. })
	));
}

#[test]
fn test_get_service_unknown_interface() {
	let registry = ServiceRegistry::new();
	let reg = registry
		.register_instance(PUBLISHER, GREETER, greeter(), Properties::new())
		.unwrap();
	assert!(matches!(
		reg.get_service(ALT, CONSUMER),
		Err(ServiceError::InvalidArgument(_))
	));
	assert!(!reg.is_used_by_bundle(CONSUMER));
}

#[test]
fn test_singleton_counts_per_consumer() {
	let registry = ServiceRegistry::new();
	let reg = registry
		.register_instance(PUBLISHER, GREETER, greeter(), Properties::new())
		.unwrap();
	let a = reg.get_service(GREETER, CONSUMER).unwrap();
	let b = reg.get_service(GREETER, BundleId(5)).unwrap();
	assert!(Arc::ptr_eq(&a, &b));
	assert_eq!(reg.using_bundles(), vec![CONSUMER, BundleId(5)]);

	assert!(reg.unget_service(BundleId(5), None));
	assert_eq!(reg.using_bundles(), vec![CONSUMER]);
	assert!(!reg.unget_service(BundleId(5), None));
}

#[test]
fn test_multi_interface_shares_one_factory_object() {
	let registry = ServiceRegistry::new();
	let factory = Arc::new(CountingFactory::default());
	let reg = registry
		.register_service(
			PUBLISHER,
			[GREETER, ALT],
			ServiceSource::BundleFactory(factory.clone()),
			Properties::new(),
		)
		.unwrap();
	let a = downcast::<Greeter>(reg.get_service(GREETER, CONSUMER).unwrap()).unwrap();
	let b = downcast::<Greeter>(reg.get_service(ALT, CONSUMER).unwrap()).unwrap();
	assert_eq!(a.serial, b.serial);
	assert_eq!(factory.created(), 1);
}

#[test]
fn test_factory_error_counts_nothing() {
	let registry = ServiceRegistry::new();
	for panic in [false, true] {
		let reg = bundle_scoped(&registry, Arc::new(FailingFactory { panic }));
		let err = reg.get_service(GREETER, CONSUMER).unwrap_err();
		assert!(matches!(err, ServiceError::Factory { .. }), "{err}");
		assert!(!reg.is_used_by_bundle(CONSUMER));
		assert!(reg.using_bundles().is_empty());
		assert!(reg.is_available(), "a failing factory does not withdraw the service");
	}
}

#[test]
fn test_factory_must_cover_all_interfaces() {
	let registry = ServiceRegistry::new();
	let reg = registry
		.register_service(
			PUBLISHER,
			[GREETER, ALT],
			ServiceSource::PrototypeFactory(Arc::new(PartialFactory)),
			Properties::new(),
		)
		.unwrap();
	let err = reg.get_service(GREETER, CONSUMER).unwrap_err();
	match err {
		ServiceError::Factory { message, .. } => assert!(message.contains(ALT), "{message}"),
		other => panic!("unexpected error: {other}"),
	}
}

#[test]
fn test_unregister_releases_factory_instances() {
	let registry = ServiceRegistry::new();
	let factory = Arc::new(CountingFactory::default());
	let reg = bundle_scoped(&registry, factory.clone());
	reg.get_service(GREETER, CONSUMER).unwrap();
	reg.get_service(GREETER, BundleId(7)).unwrap();
	assert_eq!(factory.created(), 2);

	reg.unregister().unwrap();
	assert_eq!(factory.released(), 2);
	assert!(reg.using_bundles().is_empty());
	assert!(!reg.unget_service(CONSUMER, None));
	assert_eq!(factory.released(), 2);
}

/// Factory that looks up and obtains another service from inside its hook, and
/// re-enters its own registration.
struct ReentrantFactory {
	registry: ServiceRegistry,
	calls: AtomicUsize,
}

impl ServiceFactory for ReentrantFactory {
	fn get_service(&self, bundle: BundleId, registration: &ServiceRegistration) -> anyhow::Result<InterfaceMap> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let dep = self
			.registry
			.get_service_reference(ALT)
			.ok_or_else(|| anyhow::anyhow!("dependency missing"))?;
		let object = dep.get_service(ALT, bundle)?;
		registration.set_properties(ranked(4))?;
		Ok(InterfaceMap::new().with(GREETER, Arc::new(Greeter { serial: 42, bundle })).with("dep", Arc::new(object)))
	}

	fn unget_service(&self, _: BundleId, _: &ServiceRegistration, _: InterfaceMap) -> anyhow::Result<()> {
		Ok(())
	}
}

#[test]
fn test_factory_may_reenter_registry() {
	let registry = ServiceRegistry::new();
	registry
		.register_instance(PUBLISHER, ALT, greeter(), Properties::new())
		.unwrap();
	let factory = Arc::new(ReentrantFactory {
		registry: registry.clone(),
		calls: AtomicUsize::new(0),
	});
	let reg = bundle_scoped(&registry, factory.clone());

	let object = downcast::<Greeter>(reg.get_service(GREETER, CONSUMER).unwrap()).unwrap();
	assert_eq!(object.serial, 42);
	assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
	assert_eq!(reg.properties().ranking(), 4);
	assert_eq!(registry.services_in_use(CONSUMER).len(), 2);
}

#[test]
fn test_custom_property_types_survive() {
	let registry = ServiceRegistry::new();
	let props = Properties::new()
		.with("enabled", true)
		.with("ratio", 0.5)
		.with("tags", Value::List(vec![Value::from("a"), Value::from("b")]));
	let reg = registry.register_instance(PUBLISHER, GREETER, greeter(), props).unwrap();
	let reference = reg.reference();
	assert_eq!(reference.property("Enabled"), Some(Value::Bool(true)));
	assert_eq!(reference.property("ratio"), Some(Value::Float(0.5)));
	assert_eq!(reference.property("tags").map(|v| v.strings().len()), Some(2));
}
