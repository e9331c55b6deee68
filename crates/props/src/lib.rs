//! Identifiers, property values and property snapshots shared by the service layer.
//!
//! # Role
//!
//! This crate holds the leaf data types every other keel crate agrees on: the
//! identity newtypes ([`BundleId`], [`ServiceId`]), the dynamically typed
//! [`Value`], and [`Properties`], the metadata snapshot attached to a service
//! registration.
//!
//! # Invariants
//!
//! - Property keys are unique ignoring ASCII case.
//!   - Enforced in: [`Properties::insert`].
//!   - Failure symptom: a filter on `Service.Ranking` and one on `service.ranking` disagree.
//! - A snapshot is never mutated after it has been published by a registration; updates
//!   build a new [`Properties`] and swap it in whole.

mod id;
pub mod keys;
mod properties;
mod scope;
mod value;

pub use id::{BundleId, ServiceId};
pub use properties::{Properties, PropertyError};
pub use scope::ServiceScope;
pub use value::Value;
