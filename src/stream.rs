//! A minimal push-based event sequence.
//!
//! An [`EventStream`] is nothing more than a subscribe function: It is handed an [`Emitter`]
//! and returns a [`Teardown`] that undoes whatever the subscription set up.
//! Streams are cold and restartable: Every [`subscribe`](`EventStream::subscribe`) call runs the binder anew.

use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use std::rc::Rc;

/// Undoes a subscription, observation, listener or timer. Runs at most once.
pub type Teardown = Box<dyn FnOnce()>;

#[must_use]
pub fn noop_teardown() -> Teardown {
	Box::new(|| ())
}

/// One delivery to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<T> {
	Value(T),
	/// Natural completion. Nothing is delivered afterwards.
	End,
}

pub struct EventStream<T: 'static> {
	binder: Rc<dyn Fn(Emitter<T>) -> Teardown>,
}

impl<T: 'static> Clone for EventStream<T> {
	fn clone(&self) -> Self {
		Self { binder: self.binder.clone() }
	}
}

impl<T: 'static> Debug for EventStream<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventStream").finish_non_exhaustive()
	}
}

struct Channel<T> {
	sink: RefCell<Option<Rc<dyn Fn(Event<T>)>>>,
	teardown: RefCell<Option<Teardown>>,
	closed: Cell<bool>,
}

impl<T> Channel<T> {
	fn run_teardown(&self) {
		let teardown = self.teardown.borrow_mut().take();
		if let Some(teardown) = teardown {
			teardown()
		}
	}
}

trait Closable {
	fn close(&self);
	fn is_closed(&self) -> bool;
}

impl<T> Closable for Channel<T> {
	fn close(&self) {
		if self.closed.replace(true) {
			return;
		}
		let sink = self.sink.borrow_mut().take();
		drop(sink);
		self.run_teardown();
	}

	fn is_closed(&self) -> bool {
		self.closed.get()
	}
}

/// The producer side of one subscription.
pub struct Emitter<T> {
	channel: Rc<Channel<T>>,
}

impl<T> Clone for Emitter<T> {
	fn clone(&self) -> Self {
		Self { channel: self.channel.clone() }
	}
}

impl<T> Debug for Emitter<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Emitter").field("closed", &self.channel.closed.get()).finish()
	}
}

impl<T> Emitter<T> {
	/// Delivers `value`, unless the subscription is closed.
	///
	/// Returns whether the subscriber still wants more values afterwards.
	pub fn emit(&self, value: T) -> bool {
		if self.channel.closed.get() {
			return false;
		}
		// Cloned out so the subscriber may re-enter this channel.
		let sink = self.channel.sink.borrow().clone();
		if let Some(sink) = sink {
			sink(Event::Value(value))
		}
		!self.channel.closed.get()
	}

	/// Completes the subscription and runs its teardown.
	pub fn end(&self) {
		if self.channel.closed.replace(true) {
			return;
		}
		let sink = self.channel.sink.borrow_mut().take();
		if let Some(sink) = sink {
			sink(Event::End)
		}
		self.channel.run_teardown();
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.channel.closed.get()
	}
}

/// The consumer side of one subscription.
///
/// Dropping this handle does **not** unsubscribe.
/// Subscriptions end when their stream ends, when [`unsubscribe`](`Subscription::unsubscribe`) is called,
/// or, for gated streams, when the governing [`Stopper`](`crate::Stopper`) is destroyed.
#[derive(Clone)]
pub struct Subscription {
	channel: Rc<dyn Closable>,
}

impl Subscription {
	/// Idempotent.
	pub fn unsubscribe(&self) {
		self.channel.close()
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.channel.is_closed()
	}
}

impl Debug for Subscription {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription").field("closed", &self.is_closed()).finish()
	}
}

impl<T: 'static> EventStream<T> {
	/// Creates a stream from its subscribe function.
	pub fn from_binder(binder: impl Fn(Emitter<T>) -> Teardown + 'static) -> Self {
		Self { binder: Rc::new(binder) }
	}

	/// A stream that never emits and never ends.
	#[must_use]
	pub fn never() -> Self {
		Self::from_binder(|_| noop_teardown())
	}

	/// A stream that ends immediately.
	#[must_use]
	pub fn empty() -> Self {
		Self::from_binder(|emitter| {
			emitter.end();
			noop_teardown()
		})
	}

	/// Emits each item synchronously on subscription, then ends.
	pub fn from_iter(items: impl IntoIterator<Item = T>) -> Self
	where
		T: Clone,
	{
		let items: Vec<T> = items.into_iter().collect();
		Self::from_binder(move |emitter| {
			for item in &items {
				if !emitter.emit(item.clone()) {
					break;
				}
			}
			emitter.end();
			noop_teardown()
		})
	}

	pub fn once(value: T) -> Self
	where
		T: Clone,
	{
		Self::from_iter(Some(value))
	}

	/// Subscribes `sink` to a new run of this stream.
	///
	/// Values may be delivered synchronously before this returns.
	pub fn subscribe(&self, sink: impl Fn(Event<T>) + 'static) -> Subscription {
		let channel = Rc::new(Channel {
			sink: RefCell::new(Some(Rc::new(sink) as Rc<dyn Fn(Event<T>)>)),
			teardown: RefCell::new(None),
			closed: Cell::new(false),
		});

		let teardown = (self.binder)(Emitter { channel: channel.clone() });
		if channel.closed.get() {
			// Ended or unsubscribed while binding.
			teardown()
		} else {
			*channel.teardown.borrow_mut() = Some(teardown);
		}

		Subscription { channel }
	}

	pub fn on_value(&self, f: impl Fn(T) + 'static) -> Subscription {
		self.subscribe(move |event| {
			if let Event::Value(value) = event {
				f(value)
			}
		})
	}

	pub fn on_end(&self, f: impl Fn() + 'static) -> Subscription {
		self.subscribe(move |event| {
			if let Event::End = event {
				f()
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn teardown_runs_once_on_unsubscribe() {
		let teardowns = Rc::new(Cell::new(0));
		let stream = {
			let teardowns = teardowns.clone();
			EventStream::<u8>::from_binder(move |_| {
				let teardowns = teardowns.clone();
				Box::new(move || teardowns.set(teardowns.get() + 1))
			})
		};

		let subscription = stream.on_value(|_| ());
		subscription.unsubscribe();
		subscription.unsubscribe();
		assert_eq!(teardowns.get(), 1);
		assert!(subscription.is_closed());
	}

	#[test]
	fn synchronous_end_runs_teardown_after_binding() {
		let torn_down = Rc::new(Cell::new(false));
		let stream = {
			let torn_down = torn_down.clone();
			EventStream::<u8>::from_binder(move |emitter| {
				emitter.emit(1);
				emitter.end();
				let torn_down = torn_down.clone();
				Box::new(move || torn_down.set(true))
			})
		};

		let seen = Rc::new(RefCell::new(Vec::new()));
		let subscription = {
			let seen = seen.clone();
			stream.subscribe(move |event| seen.borrow_mut().push(event))
		};
		assert!(torn_down.get());
		assert!(subscription.is_closed());
		assert_eq!(*seen.borrow(), vec![Event::Value(1), Event::End]);
	}
}
