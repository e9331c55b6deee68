//! Boundary for user-supplied callbacks.
//!
//! Factories, release hooks, listeners and tracker customizers are foreign code. A
//! failure inside one must surface only to the call that triggered it, never unwind
//! through the registry's bookkeeping or into other subscribers' deliveries.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use keel_props::ServiceId;

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_owned()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_owned()
	}
}

/// Runs `f`, logging and flattening any error or panic into a message.
pub fn run_hook<R>(hook: &'static str, service: ServiceId, f: impl FnOnce() -> anyhow::Result<R>) -> Result<R, String> {
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(err)) => {
			let message = format!("{err:#}");
			tracing::error!(hook, service.id = %service, error = %message, "service.hook_failed");
			Err(message)
		}
		Err(payload) => {
			let message = panic_message(payload.as_ref());
			tracing::error!(hook, service.id = %service, panic = %message, "service.hook_panicked");
			Err(message)
		}
	}
}
