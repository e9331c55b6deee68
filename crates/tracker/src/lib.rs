//! Service trackers: live, customized views of the services matching a filter.
//!
//! # Role
//!
//! A [`ServiceTracker`] subscribes to a [`keel_services::ServiceRegistry`] for one
//! interface or filter and keeps a table from each matching
//! [`keel_services::ServiceReference`] to the object its [`TrackerCustomizer`] produced
//! for it. The table follows registrations, property changes and unregistrations as
//! they are delivered.
//!
//! # Lifecycle
//!
//! Closed → open → closed, repeatable. [`ServiceTracker::open`] subscribes and then
//! scans the services already registered; [`ServiceTracker::close`] unsubscribes and
//! hands every tracked object back to the customizer before returning.
//!
//! # Invariants
//!
//! - Table entries exist only while the tracker is open and the service matches.
//!   - Enforced in: [`ServiceTracker::close`], `TrackerShared::handle`.
//!   - Tested by: [`crate::invariants::test_close_releases_everything`], [`crate::invariants::test_end_match_untracks`]
//!   - Failure symptom: consumers keep using services they no longer match, or leak them.
//! - Opening against existing matches adds each of them before `open` returns.
//!   - Enforced in: [`ServiceTracker::open`].
//!   - Tested by: [`crate::invariants::test_open_scans_existing`]
//!   - Failure symptom: services registered before the tracker opened are never seen.

mod customizer;
mod tracker;

#[cfg(test)]
mod invariants;

pub use customizer::{ObjectCustomizer, TrackerCustomizer};
pub use tracker::ServiceTracker;
