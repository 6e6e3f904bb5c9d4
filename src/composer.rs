//! Combinators for deriving higher-level event streams.
//!
//! Every combinator tears its upstream subscription(s) down together with its own,
//! so gating the outermost stream with [`take_until`](`EventStream::take_until`) is enough
//! to release everything beneath it.
//!
//! Caller-supplied closures run [guarded](`crate::report::guarded`):
//! A panic drops that one event and is reported, but the stream continues.

use crate::{
	report::guarded,
	stopper::Stopper,
	stream::{noop_teardown, Emitter, Event, EventStream, Subscription, Teardown},
};
use core::cell::{Cell, RefCell};
use hashbrown::HashMap;
use std::rc::Rc;

fn unsubscribing(subscription: Subscription) -> Teardown {
	Box::new(move || subscription.unsubscribe())
}

impl<T: 'static> EventStream<T> {
	pub fn map<U: 'static>(self, f: impl Fn(T) -> U + 'static) -> EventStream<U> {
		let f = Rc::new(f);
		EventStream::from_binder(move |emitter: Emitter<U>| {
			let f = f.clone();
			unsubscribing(self.subscribe(move |event| match event {
				Event::Value(value) => {
					if emitter.is_closed() {
						return;
					}
					if let Some(mapped) = guarded("map", || f(value)) {
						emitter.emit(mapped);
					}
				}
				Event::End => emitter.end(),
			}))
		})
	}

	pub fn filter(self, predicate: impl Fn(&T) -> bool + 'static) -> EventStream<T> {
		let predicate = Rc::new(predicate);
		EventStream::from_binder(move |emitter: Emitter<T>| {
			let predicate = predicate.clone();
			unsubscribing(self.subscribe(move |event| match event {
				Event::Value(value) => {
					if !emitter.is_closed() && guarded("filter", || predicate(&value)) == Some(true) {
						emitter.emit(value);
					}
				}
				Event::End => emitter.end(),
			}))
		})
	}

	pub fn filter_map<U: 'static>(self, f: impl Fn(T) -> Option<U> + 'static) -> EventStream<U> {
		let f = Rc::new(f);
		EventStream::from_binder(move |emitter: Emitter<U>| {
			let f = f.clone();
			unsubscribing(self.subscribe(move |event| match event {
				Event::Value(value) => {
					if emitter.is_closed() {
						return;
					}
					if let Some(Some(mapped)) = guarded("filter_map", || f(value)) {
						emitter.emit(mapped);
					}
				}
				Event::End => emitter.end(),
			}))
		})
	}

	/// Forwards the first `count` values, then ends.
	#[must_use]
	pub fn take(self, count: usize) -> EventStream<T> {
		EventStream::from_binder(move |emitter: Emitter<T>| {
			if count == 0 {
				emitter.end();
				return noop_teardown();
			}
			let taken = Cell::new(0);
			unsubscribing(self.subscribe(move |event| match event {
				Event::Value(value) => {
					if emitter.is_closed() {
						return;
					}
					taken.set(taken.get() + 1);
					emitter.emit(value);
					if taken.get() >= count {
						emitter.end()
					}
				}
				Event::End => emitter.end(),
			}))
		})
	}

	/// Ends as soon as `stopper` is destroyed.
	///
	/// Every delivery re-checks the stopper, so nothing gets through once it has fired,
	/// even events that were already scheduled.
	#[must_use]
	pub fn take_until(self, stopper: &Stopper) -> EventStream<T> {
		let stopper = stopper.clone();
		EventStream::from_binder(move |emitter: Emitter<T>| {
			if stopper.is_destroyed() {
				emitter.end();
				return noop_teardown();
			}

			let key = {
				let emitter = emitter.clone();
				stopper.on_destroy(move || emitter.end())
			};

			let gate = stopper.clone();
			let subscription = self.subscribe(move |event| {
				if gate.is_destroyed() {
					return emitter.end();
				}
				match event {
					Event::Value(value) => {
						emitter.emit(value);
					}
					Event::End => emitter.end(),
				}
			});

			let stopper = stopper.clone();
			Box::new(move || {
				subscription.unsubscribe();
				if let Some(key) = key {
					stopper.cancel(key);
				}
			})
		})
	}

	/// Ends when `until` emits its first value.
	#[must_use]
	pub fn take_until_by<U: 'static>(self, until: EventStream<U>) -> EventStream<T> {
		EventStream::from_binder(move |emitter: Emitter<T>| {
			let until_subscription = {
				let emitter = emitter.clone();
				until.on_value(move |_| emitter.end())
			};
			if emitter.is_closed() {
				until_subscription.unsubscribe();
				return noop_teardown();
			}

			let subscription = self.subscribe(move |event| match event {
				Event::Value(value) => {
					emitter.emit(value);
				}
				Event::End => emitter.end(),
			});

			Box::new(move || {
				subscription.unsubscribe();
				until_subscription.unsubscribe();
			})
		})
	}

	/// Interleaves the values of `streams` in delivery order. Ends once all of them have ended.
	pub fn merge(streams: impl IntoIterator<Item = EventStream<T>>) -> EventStream<T> {
		let streams: Vec<EventStream<T>> = streams.into_iter().collect();
		EventStream::from_binder(move |emitter: Emitter<T>| {
			if streams.is_empty() {
				emitter.end();
				return noop_teardown();
			}

			let live = Rc::new(Cell::new(streams.len()));
			let mut subscriptions = Vec::with_capacity(streams.len());
			for stream in &streams {
				if emitter.is_closed() {
					break;
				}
				let emitter = emitter.clone();
				let live = live.clone();
				subscriptions.push(stream.subscribe(move |event| match event {
					Event::Value(value) => {
						emitter.emit(value);
					}
					Event::End => {
						live.set(live.get() - 1);
						if live.get() == 0 {
							emitter.end()
						}
					}
				}));
			}

			Box::new(move || subscriptions.iter().for_each(Subscription::unsubscribe))
		})
	}

	#[must_use]
	pub fn merge_with(self, other: EventStream<T>) -> EventStream<T> {
		EventStream::merge(vec![self, other])
	}

	/// Subscribes to a new inner stream per value, keeping all inner streams live.
	///
	/// Ends once this stream and every inner stream have ended.
	pub fn flat_map<U: 'static>(self, f: impl Fn(T) -> EventStream<U> + 'static) -> EventStream<U> {
		let f = Rc::new(f);
		EventStream::from_binder(move |emitter: Emitter<U>| {
			let state = Rc::new(FlatMapState {
				inners: RefCell::new(HashMap::new()),
				next_id: Cell::new(0),
				live_inners: Cell::new(0),
				outer_ended: Cell::new(false),
			});

			let outer = {
				let (f, state, emitter) = (f.clone(), state.clone(), emitter.clone());
				self.subscribe(move |event| match event {
					Event::Value(value) => {
						if emitter.is_closed() {
							return;
						}
						let inner = match guarded("flat_map", || f(value)) {
							Some(inner) => inner,
							None => return,
						};

						let id = state.next_id.get();
						state.next_id.set(id + 1);
						state.live_inners.set(state.live_inners.get() + 1);

						let subscription = {
							let (state, emitter) = (state.clone(), emitter.clone());
							inner.subscribe(move |event| match event {
								Event::Value(value) => {
									emitter.emit(value);
								}
								Event::End => {
									let finished = state.inners.borrow_mut().remove(&id);
									drop(finished);
									state.live_inners.set(state.live_inners.get() - 1);
									if state.outer_ended.get() && state.live_inners.get() == 0 {
										emitter.end()
									}
								}
							})
						};
						if !subscription.is_closed() {
							state.inners.borrow_mut().insert(id, subscription);
						}
					}
					Event::End => {
						state.outer_ended.set(true);
						if state.live_inners.get() == 0 {
							emitter.end()
						}
					}
				})
			};

			Box::new(move || {
				outer.unsubscribe();
				let inners: Vec<Subscription> = state.inners.borrow_mut().drain().map(|(_, s)| s).collect();
				inners.iter().for_each(Subscription::unsubscribe);
			})
		})
	}

	/// Like [`flat_map`](`EventStream::flat_map`), but each new value unsubscribes the previous inner stream first.
	pub fn flat_map_latest<U: 'static>(self, f: impl Fn(T) -> EventStream<U> + 'static) -> EventStream<U> {
		let f = Rc::new(f);
		EventStream::from_binder(move |emitter: Emitter<U>| {
			let current: Rc<RefCell<Option<(u64, Subscription)>>> = Rc::default();
			let next_id = Rc::new(Cell::new(0_u64));
			let outer_ended = Rc::new(Cell::new(false));

			let outer = {
				let (f, current, outer_ended, emitter) = (f.clone(), current.clone(), outer_ended.clone(), emitter.clone());
				self.subscribe(move |event| match event {
					Event::Value(value) => {
						if emitter.is_closed() {
							return;
						}
						let previous = current.borrow_mut().take();
						if let Some((_, previous)) = previous {
							previous.unsubscribe()
						}

						let inner = match guarded("flat_map_latest", || f(value)) {
							Some(inner) => inner,
							None => return,
						};

						let id = next_id.get();
						next_id.set(id + 1);
						let subscription = {
							let (current, outer_ended, emitter) = (current.clone(), outer_ended.clone(), emitter.clone());
							inner.subscribe(move |event| match event {
								Event::Value(value) => {
									emitter.emit(value);
								}
								Event::End => {
									let is_current = matches!(&*current.borrow(), Some((current_id, _)) if *current_id == id);
									if is_current {
										let finished = current.borrow_mut().take();
										drop(finished);
									}
									if outer_ended.get() && current.borrow().is_none() {
										emitter.end()
									}
								}
							})
						};
						if !subscription.is_closed() {
							*current.borrow_mut() = Some((id, subscription));
						}
					}
					Event::End => {
						outer_ended.set(true);
						if current.borrow().is_none() {
							emitter.end()
						}
					}
				})
			};

			Box::new(move || {
				outer.unsubscribe();
				let inner = current.borrow_mut().take();
				if let Some((_, inner)) = inner {
					inner.unsubscribe()
				}
			})
		})
	}
}

struct FlatMapState {
	inners: RefCell<HashMap<u64, Subscription>>,
	next_id: Cell<u64>,
	live_inners: Cell<usize>,
	outer_ended: Cell<bool>,
}

impl<T: 'static> EventStream<Vec<T>> {
	/// Re-emits each batch item by item.
	///
	/// Stops in the middle of a batch as soon as the subscriber closes.
	#[must_use]
	pub fn flatten(self) -> EventStream<T> {
		EventStream::from_binder(move |emitter: Emitter<T>| {
			unsubscribing(self.subscribe(move |event| match event {
				Event::Value(items) => {
					for item in items {
						if !emitter.emit(item) {
							break;
						}
					}
				}
				Event::End => emitter.end(),
			}))
		})
	}
}
