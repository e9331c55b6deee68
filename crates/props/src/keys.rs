//! Reserved property keys stamped by the registry.

/// Interface names a service is published under (list of strings).
pub const OBJECTCLASS: &str = "objectclass";
/// Registry-assigned id (integer).
pub const SERVICE_ID: &str = "service.id";
/// Selection ranking (integer, default 0).
pub const SERVICE_RANKING: &str = "service.ranking";
/// Instantiation scope: `singleton`, `bundle` or `prototype`.
pub const SERVICE_SCOPE: &str = "service.scope";
/// Id of the publishing bundle (integer).
pub const SERVICE_BUNDLE_ID: &str = "service.bundleid";

/// Keys a caller cannot override through registration or update.
pub const STAMPED: &[&str] = &[OBJECTCLASS, SERVICE_ID, SERVICE_SCOPE, SERVICE_BUNDLE_ID];
