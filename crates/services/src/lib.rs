//! In-process service registry.
//!
//! # Role
//!
//! Bundles publish objects under interface names with a property snapshot, look them up
//! by interface and filter, obtain them under one of three instantiation scopes and
//! observe their lifecycle through synchronously delivered events.
//!
//! - [`ServiceRegistry`]: id assignment, lookup, listener list, bundle cleanup.
//! - [`ServiceRegistration`]: publisher handle (properties, unregistration, consumer bookkeeping).
//! - [`ServiceReference`]: consumer handle to metadata that outlives unregistration.
//! - [`BundleContext`]: per-bundle capability wrapping the above.
//!
//! # Scopes
//!
//! | Source                            | Scope     | Object per            |
//! |-----------------------------------|-----------|-----------------------|
//! | [`ServiceSource::Instance`]         | singleton | registration          |
//! | [`ServiceSource::BundleFactory`]    | bundle    | consuming bundle      |
//! | [`ServiceSource::PrototypeFactory`] | prototype | `get_service` call    |
//!
//! # Callbacks
//!
//! Listener and factory callbacks run on the mutating thread while no registry-wide lock
//! is held, and may call back into the registry. Errors and panics raised by them are
//! contained by [`run_hook`].

mod config;
mod context;
mod error;
mod event;
mod factory;
mod hook;
mod listeners;
mod object;
mod reference;
mod registration;
mod registry;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_fixtures;

pub use config::{ConfigError, RegistryConfig};
pub use context::{BundleContext, ServiceObjects};
pub use error::{Result, ServiceError};
pub use event::{ListenerToken, ServiceEvent, ServiceEventKind, ServiceListener};
pub use factory::{ServiceFactory, ServiceSource};
pub use hook::run_hook;
pub use keel_filter::{Filter, FilterError};
pub use keel_props::{BundleId, Properties, ServiceId, ServiceScope, Value, keys};
pub use object::{InterfaceMap, ServiceObject, downcast};
pub use reference::{ServiceReference, sort_references};
pub use registration::ServiceRegistration;
pub use registry::ServiceRegistry;
