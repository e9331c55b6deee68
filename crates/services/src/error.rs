use keel_filter::FilterError;
use keel_props::ServiceId;

/// Errors returned by registry, registration and reference operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
	/// Operation not permitted in the registration's current lifecycle state
	/// (double unregister, mutation after unregister).
	#[error("illegal state for service {id}: {reason}")]
	IllegalState { id: ServiceId, reason: &'static str },

	/// The service is no longer (or not yet) obtainable.
	#[error("service {id} is unavailable")]
	ServiceUnavailable { id: ServiceId },

	/// Malformed filter expression.
	#[error(transparent)]
	InvalidSyntax(#[from] FilterError),

	/// Operation not supported by this kind of registration.
	#[error("invalid use of service {id}: {reason}")]
	InvalidUse { id: ServiceId, reason: &'static str },

	/// Caller supplied arguments the registry cannot accept.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// A user factory failed or panicked while producing a service object.
	#[error("factory for service {id} failed: {message}")]
	Factory { id: ServiceId, message: String },
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
