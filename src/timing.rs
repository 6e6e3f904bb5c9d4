//! Host-driven event sources: timers and DOM events.

use crate::{
	host::Host,
	report::{report, WatchError},
	stream::{noop_teardown, EventStream},
};
use std::rc::Rc;

/// Emits `value` once after `delay_ms`, then ends. Unsubscribing cancels the timer.
pub fn later<H: Host, T: Clone + 'static>(host: &H, delay_ms: u32, value: T) -> EventStream<T> {
	let host = host.clone();
	EventStream::from_binder(move |emitter| {
		let value = value.clone();
		host.set_timeout(
			delay_ms,
			Box::new(move || {
				emitter.emit(value);
				emitter.end();
			}),
		)
	})
}

/// Emits `()` each time `event` fires on `target`.
///
/// If the listener can't be attached, the failure is reported and the stream ends.
pub fn from_host_event<H: Host>(host: &H, target: &H::Node, event: &str) -> EventStream<()> {
	let host = host.clone();
	let target = target.clone();
	let event = event.to_owned();
	EventStream::from_binder(move |emitter| {
		let handler = {
			let emitter = emitter.clone();
			Rc::new(move || {
				emitter.emit(());
			})
		};
		match host.listen(&target, &event, handler) {
			Ok(remove_listener) => remove_listener,
			Err(error) => {
				report(&WatchError::ObserverSetup(error));
				emitter.end();
				noop_teardown()
			}
		}
	})
}

/// Emits `()` once, on the first `transitionend` of `target` or after `timeout_ms`, whichever comes first.
///
/// The timeout covers transitions that never finish, for example on hidden elements.
pub fn transition_end_or_timeout<H: Host>(host: &H, target: &H::Node, timeout_ms: u32) -> EventStream<()> {
	from_host_event(host, target, "transitionend").merge_with(later(host, timeout_ms, ())).take(1)
}
