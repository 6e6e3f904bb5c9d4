//! Error kinds and the error-reporting collaborator.
//!
//! Nothing in this crate propagates errors through its streams.
//! Failures are instead handed to the reporter installed with [`set_error_reporter`],
//! which by default logs them through [`tracing`].

use core::{any::Any, cell::RefCell, fmt::Debug};
use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	rc::Rc,
};
use thiserror::Error;
use tracing::{debug, error};

/// Failure of a single host (DOM) operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
	#[error("mutation observer setup failed: {0}")]
	Observe(String),
	#[error("event listener setup failed: {0}")]
	Listen(String),
	#[error("DOM operation `{operation}` failed: {message}")]
	Operation { operation: &'static str, message: String },
}

/// Everything that can be reported to the error collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WatchError {
	/// Internal plumbing failed for one watcher instance. That instance completes early.
	#[error("failed to set up observation: {0}")]
	ObserverSetup(#[source] HostError),
	/// A DOM write requested by a view or the arbiter failed.
	#[error(transparent)]
	HostOperation(#[from] HostError),
	/// A caller-supplied predicate, mapper or consumer panicked while handling one event.
	#[error("callback `{context}` panicked: {message}")]
	CallbackPanicked { context: &'static str, message: String },
	/// A stopper teardown callback panicked. The remaining teardowns still ran.
	#[error("stopper teardown panicked: {message}")]
	TeardownPanicked { message: String },
}

thread_local! {
	static REPORTER: RefCell<Option<Rc<dyn Fn(&WatchError)>>> = RefCell::new(None);
}

/// Replaces the error-reporting collaborator for the current thread.
///
/// Passing [`None`] restores the default, which logs at [`tracing::Level::ERROR`].
pub fn set_error_reporter(reporter: Option<Rc<dyn Fn(&WatchError)>>) {
	REPORTER.with(|slot| *slot.borrow_mut() = reporter);
}

/// Hands `error` to the current reporter.
pub fn report(error: &WatchError) {
	// The reporter is cloned out so that it may itself replace the reporter.
	let reporter = REPORTER.with(|slot| slot.borrow().clone());
	match reporter {
		Some(reporter) => reporter(error),
		None => error!(%error, "dom-watch error"),
	}
}

/// Runs `f`, isolating a panic inside it.
///
/// A panic is reported as [`WatchError::CallbackPanicked`] and turns into [`None`].
pub fn guarded<R>(context: &'static str, f: impl FnOnce() -> R) -> Option<R> {
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(value) => Some(value),
		Err(payload) => {
			report(&WatchError::CallbackPanicked {
				context,
				message: panic_message(payload.as_ref()),
			});
			None
		}
	}
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&'static str>() {
		(*message).to_owned()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"<non-string panic payload>".to_owned()
	}
}

/// Lifecycle misuse is a no-op by contract, but leaves a trace for debugging.
pub(crate) fn lifecycle_noop(what: &'static str) {
	debug!("Ignoring lifecycle misuse: {}", what);
}

/// Formats a node for log fields, unless that could leak page content.
pub(crate) fn node_field(node: &impl Debug) -> String {
	if cfg!(feature = "dangerous-logging") {
		format!("{:?}", node)
	} else {
		"<node>".to_owned()
	}
}
