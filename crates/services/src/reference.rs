//! Read-only, independently counted handles to registration metadata.
//!
//! # Role
//!
//! A [`ServiceReference`] shares ownership of the registration record behind it. It keeps
//! the metadata queryable after the service is unregistered: the record, and with it the
//! last property snapshot, is freed only when the last reference, registration handle
//! and index entry are gone.
//!
//! # Ordering
//!
//! References order by `service.ranking` descending, then `service.id` ascending. This is
//! the "best match first" order of every lookup. Rankings can change while a sequence is
//! being sorted, so lookups sort on a snapshot of the keys ([`sort_references`]) rather
//! than through [`Ord`].
//!
//! # Invariants
//!
//! - A reference's metadata survives unregistration until its last clone is dropped.
//!   - Enforced in: [`ServiceReference`] (holds the record's `Arc`).
//!   - Tested by: [`crate::invariants::test_stale_reference_keeps_metadata`]
//!   - Failure symptom: property reads on a withdrawn service return nothing or crash.
//! - Lookup results are ordered by ranking descending, then id ascending.
//!   - Enforced in: [`sort_references`].
//!   - Tested by: [`crate::invariants::test_ranking_order`]
//!   - Failure symptom: a lower ranked service wins selection.

use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use keel_props::{BundleId, Properties, ServiceId, ServiceScope, Value};

use crate::error::{Result, ServiceError};
use crate::registration::RegistrationInner;
use crate::ServiceObject;

/// Copyable handle to a registration's metadata.
///
/// The default value is an invalid reference that points at nothing.
#[derive(Clone, Default)]
pub struct ServiceReference {
	inner: Option<Arc<RegistrationInner>>,
}

type RankKey = (Reverse<i32>, ServiceId);

impl ServiceReference {
	pub(crate) fn from_inner(inner: Arc<RegistrationInner>) -> Self {
		Self { inner: Some(inner) }
	}

	pub(crate) fn inner(&self) -> Option<&Arc<RegistrationInner>> {
		self.inner.as_ref()
	}

	/// Whether the reference points at a registration record.
	///
	/// Independent of availability: a reference to an unregistered service is still valid.
	pub fn is_valid(&self) -> bool {
		self.inner.is_some()
	}

	/// Whether the service can currently be obtained.
	pub fn is_available(&self) -> bool {
		self.inner.as_ref().is_some_and(|i| i.is_available())
	}

	/// Whether `get_service` can currently succeed: available and not being unregistered.
	pub fn is_obtainable(&self) -> bool {
		self.inner.as_ref().is_some_and(|i| i.obtainable())
	}

	pub fn id(&self) -> Option<ServiceId> {
		self.inner.as_ref().map(|i| i.id)
	}

	/// The publishing bundle.
	pub fn bundle(&self) -> Option<BundleId> {
		self.inner.as_ref().map(|i| i.bundle)
	}

	pub fn scope(&self) -> Option<ServiceScope> {
		self.inner.as_ref().map(|i| i.scope)
	}

	pub fn interfaces(&self) -> &[String] {
		match &self.inner {
			Some(i) => &i.interfaces[..],
			None => &[],
		}
	}

	/// Last property snapshot; empty for an invalid reference.
	pub fn properties(&self) -> Arc<Properties> {
		self.inner
			.as_ref()
			.map_or_else(|| Arc::new(Properties::new()), |i| i.properties())
	}

	pub fn property(&self, key: &str) -> Option<Value> {
		self.inner.as_ref()?.properties().get(key).cloned()
	}

	pub fn property_keys(&self) -> Vec<String> {
		self.properties().keys().map(str::to_owned).collect()
	}

	pub fn ranking(&self) -> i32 {
		self.inner.as_ref().map_or(0, |i| i.properties().ranking())
	}

	pub fn using_bundles(&self) -> Vec<BundleId> {
		self.inner.as_ref().map(|i| i.using_bundles()).unwrap_or_default()
	}

	pub fn is_used_by_bundle(&self, bundle: BundleId) -> bool {
		self.inner.as_ref().is_some_and(|i| i.is_used_by_bundle(bundle))
	}

	/// Asks the registration for the object published under `interface`.
	pub fn get_service(&self, interface: &str, consumer: BundleId) -> Result<ServiceObject> {
		self.valid()?.get_service(interface, consumer)
	}

	/// Releases one acquisition made through [`ServiceReference::get_service`].
	pub fn unget_service(&self, consumer: BundleId, instance: Option<&ServiceObject>) -> bool {
		self.inner
			.as_ref()
			.is_some_and(|i| i.unget_service(consumer, instance))
	}

	pub(crate) fn valid(&self) -> Result<&Arc<RegistrationInner>> {
		self.inner
			.as_ref()
			.ok_or_else(|| ServiceError::InvalidArgument("invalid service reference".to_owned()))
	}

	fn rank_key(&self) -> RankKey {
		match &self.inner {
			Some(i) => (Reverse(i.properties().ranking()), i.id),
			None => (Reverse(i32::MIN), ServiceId(u64::MAX)),
		}
	}

	fn addr(&self) -> *const RegistrationInner {
		self.inner.as_ref().map_or(std::ptr::null(), Arc::as_ptr)
	}
}

/// Sorts into best-match-first order using one ranking snapshot per reference.
pub fn sort_references(refs: &mut [ServiceReference]) {
	refs.sort_by_cached_key(ServiceReference::rank_key);
}

impl PartialEq for ServiceReference {
	fn eq(&self, other: &Self) -> bool {
		self.addr() == other.addr()
	}
}

impl Eq for ServiceReference {}

impl Hash for ServiceReference {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.addr().hash(state);
	}
}

impl PartialOrd for ServiceReference {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for ServiceReference {
	/// Best match first: `Less` means `self` ranks ahead of `other`.
	fn cmp(&self, other: &Self) -> Ordering {
		if self == other {
			return Ordering::Equal;
		}
		self.rank_key().cmp(&other.rank_key())
	}
}

impl fmt::Debug for ServiceReference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.inner {
			Some(i) => f
				.debug_struct("ServiceReference")
				.field("id", &i.id)
				.field("interfaces", &i.interfaces)
				.field("available", &i.is_available())
				.finish(),
			None => f.write_str("ServiceReference(invalid)"),
		}
	}
}
