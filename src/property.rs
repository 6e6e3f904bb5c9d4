use crate::{
	report::guarded,
	stream::{Emitter, Event, EventStream, Subscription},
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use std::rc::{Rc, Weak};
use tracing::trace;

/// A shared, lazily activated stream that remembers its latest value.
///
/// New subscribers receive the latest value immediately, then everything that follows.
/// The upstream subscription is live while at least one subscriber is.
pub struct Property<T: 'static> {
	state: Rc<PropertyState<T>>,
}

impl<T: 'static> Clone for Property<T> {
	fn clone(&self) -> Self {
		Self { state: self.state.clone() }
	}
}

impl<T: Debug + 'static> Debug for Property<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Property")
			.field("current", &self.state.current.try_borrow().ok())
			.field("subscribers", &self.state.subscribers.try_borrow().map(|s| s.len()).ok())
			.field("ended", &self.state.ended.get())
			.finish()
	}
}

struct PropertyState<T: 'static> {
	source: EventStream<T>,
	initial: Option<Rc<dyn Fn() -> T>>,
	current: RefCell<Option<T>>,
	subscribers: RefCell<Vec<(u64, Emitter<T>)>>,
	upstream: RefCell<Option<Subscription>>,
	next_id: Cell<u64>,
	ended: Cell<bool>,
}

impl<T: Clone + 'static> EventStream<T> {
	/// Remembers the latest value and replays it to each new subscriber.
	#[must_use]
	pub fn to_latest_value(self) -> Property<T> {
		Property::new(self, None)
	}

	/// Like [`to_latest_value`](`EventStream::to_latest_value`), but seeded with `initial()`
	/// if no value arrived yet when the property activates.
	pub fn to_property(self, initial: impl Fn() -> T + 'static) -> Property<T> {
		Property::new(self, Some(Rc::new(initial)))
	}
}

impl<T: Clone + 'static> Property<T> {
	fn new(source: EventStream<T>, initial: Option<Rc<dyn Fn() -> T>>) -> Self {
		Self {
			state: Rc::new(PropertyState {
				source,
				initial,
				current: RefCell::new(None),
				subscribers: RefCell::new(Vec::new()),
				upstream: RefCell::new(None),
				next_id: Cell::new(0),
				ended: Cell::new(false),
			}),
		}
	}

	/// The latest value, if there is one.
	#[must_use]
	pub fn get(&self) -> Option<T> {
		self.state.current.borrow().clone()
	}

	/// A view of this property as a plain stream.
	#[must_use]
	pub fn stream(&self) -> EventStream<T> {
		let state = self.state.clone();
		EventStream::from_binder(move |emitter| {
			if state.ended.get() {
				let current = state.current.borrow().clone();
				if let Some(current) = current {
					emitter.emit(current);
				}
				emitter.end();
				return Box::new(|| ());
			}

			let id = state.next_id.get();
			state.next_id.set(id + 1);
			state.subscribers.borrow_mut().push((id, emitter.clone()));

			if state.current.borrow().is_none() {
				if let Some(initial) = &state.initial {
					let seeded = guarded("to_property initial", || initial());
					*state.current.borrow_mut() = seeded;
				}
			}
			let current = state.current.borrow().clone();
			if let Some(current) = current {
				emitter.emit(current);
			}

			if state.upstream.borrow().is_none() && !emitter.is_closed() {
				PropertyState::activate(&state);
			}

			let state = state.clone();
			Box::new(move || {
				let now_unobserved = {
					let mut subscribers = state.subscribers.borrow_mut();
					subscribers.retain(|(other, _)| *other != id);
					subscribers.is_empty()
				};
				if now_unobserved {
					let upstream = state.upstream.borrow_mut().take();
					if let Some(upstream) = upstream {
						trace!("Property deactivated.");
						upstream.unsubscribe()
					}
				}
			})
		})
	}
}

impl<T: Clone + 'static> PropertyState<T> {
	fn activate(state: &Rc<Self>) {
		trace!("Property activated.");
		let weak: Weak<Self> = Rc::downgrade(state);
		let upstream = state.source.subscribe(move |event| {
			let state = match weak.upgrade() {
				Some(state) => state,
				None => return,
			};
			// Snapshot, since subscribers may unsubscribe while being notified.
			let subscribers: Vec<Emitter<T>> = state.subscribers.borrow().iter().map(|(_, e)| e.clone()).collect();
			match event {
				Event::Value(value) => {
					*state.current.borrow_mut() = Some(value.clone());
					for subscriber in subscribers {
						subscriber.emit(value.clone());
					}
				}
				Event::End => {
					state.ended.set(true);
					for subscriber in subscribers {
						subscriber.end();
					}
				}
			}
		});
		if !upstream.is_closed() && !state.subscribers.borrow().is_empty() {
			*state.upstream.borrow_mut() = Some(upstream);
		} else {
			upstream.unsubscribe()
		}
	}
}
