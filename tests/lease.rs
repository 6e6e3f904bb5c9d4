use dom_watch::{lease::SharedLeases, report::HostError};
use std::{
	cell::{Cell, RefCell},
	rc::Rc,
};

/// Creates numbered resources and logs their teardowns.
#[derive(Default)]
struct Factory {
	created: Cell<u32>,
	torn_down: RefCell<Vec<u32>>,
}

impl Factory {
	fn acquire(self: &Rc<Self>, leases: &SharedLeases<&'static str, u32>, key: &'static str) -> dom_watch::lease::Lease<&'static str, u32> {
		leases
			.acquire(key, |stopper| {
				let id = self.created.get() + 1;
				self.created.set(id);
				let this = self.clone();
				stopper.on_destroy(move || this.torn_down.borrow_mut().push(id));
				Ok::<_, HostError>(id)
			})
			.unwrap()
	}
}

#[test]
fn shared_resource_is_created_once_and_torn_down_after_the_last_release() {
	let factory = Rc::new(Factory::default());
	let leases = SharedLeases::new();

	let a = factory.acquire(&leases, "root");
	let b = factory.acquire(&leases, "root");
	assert_eq!(factory.created.get(), 1);
	assert_eq!((*a.resource(), *b.resource()), (1, 1));
	assert_eq!(leases.lease_count(&"root"), 2);

	a.release();
	assert_eq!(leases.lease_count(&"root"), 1);
	assert!(factory.torn_down.borrow().is_empty());
	assert!(!b.stopper().is_destroyed());

	b.release();
	assert_eq!(leases.lease_count(&"root"), 0);
	assert_eq!(*factory.torn_down.borrow(), [1]);
	assert!(b.stopper().is_destroyed());

	let c = factory.acquire(&leases, "root");
	assert_eq!(*c.resource(), 2);
	c.release();
	assert_eq!(*factory.torn_down.borrow(), [1, 2]);
}

#[test]
fn keys_are_leased_separately() {
	let factory = Rc::new(Factory::default());
	let leases = SharedLeases::new();

	let left = factory.acquire(&leases, "left");
	let right = factory.acquire(&leases, "right");
	assert_eq!((*left.resource(), *right.resource()), (1, 2));
	left.release();
	assert_eq!(*factory.torn_down.borrow(), [1]);
	assert_eq!(leases.lease_count(&"right"), 1);
	right.release();
}

#[test]
fn release_is_idempotent() {
	let factory = Rc::new(Factory::default());
	let leases = SharedLeases::new();

	let a = factory.acquire(&leases, "root");
	let b = factory.acquire(&leases, "root");
	a.release();
	a.release();
	assert_eq!(leases.lease_count(&"root"), 1);
	assert!(factory.torn_down.borrow().is_empty());
	b.release();
	assert_eq!(*factory.torn_down.borrow(), [1]);
}

#[test]
fn destroying_the_resource_stopper_retires_it_early() {
	let factory = Rc::new(Factory::default());
	let leases = SharedLeases::new();

	let old = factory.acquire(&leases, "root");
	old.stopper().destroy();
	assert_eq!(*factory.torn_down.borrow(), [1]);
	assert_eq!(leases.lease_count(&"root"), 0);

	let new = factory.acquire(&leases, "root");
	assert_eq!(*new.resource(), 2);

	// The retired lease must not count against the new resource.
	old.release();
	assert_eq!(leases.lease_count(&"root"), 1);
	assert!(!new.stopper().is_destroyed());

	new.release();
	assert_eq!(*factory.torn_down.borrow(), [1, 2]);
}

#[test]
fn failed_creation_inserts_nothing() {
	let leases = SharedLeases::<&'static str, u32>::new();
	let error = leases
		.acquire("root", |_| {
			Err(HostError::Operation {
				operation: "create_element",
				message: "nope".to_owned(),
			})
		})
		.unwrap_err();
	assert!(matches!(error, HostError::Operation { operation: "create_element", .. }));
	assert_eq!(leases.lease_count(&"root"), 0);

	let lease = leases.acquire("root", |_| Ok::<_, HostError>(7)).unwrap();
	assert_eq!(*lease.resource(), 7);
}

#[test]
fn creation_may_lease_from_the_same_registry() {
	let factory = Rc::new(Factory::default());
	let leases = SharedLeases::new();

	let inner = RefCell::new(None);
	let outer = leases
		.acquire("outer", |_| {
			*inner.borrow_mut() = Some(factory.acquire(&leases, "inner"));
			Ok::<_, HostError>(100)
		})
		.unwrap();
	assert_eq!(*outer.resource(), 100);
	assert_eq!(leases.lease_count(&"outer"), 1);
	assert_eq!(leases.lease_count(&"inner"), 1);
	drop(inner);
}

#[test]
fn a_resource_created_during_its_own_creation_wins() {
	let factory = Rc::new(Factory::default());
	let leases = SharedLeases::new();

	let nested = RefCell::new(None);
	let discarded = Rc::new(Cell::new(false));
	let outer = leases
		.acquire("root", |stopper| {
			let discarded = discarded.clone();
			stopper.on_destroy(move || discarded.set(true));
			*nested.borrow_mut() = Some(factory.acquire(&leases, "root"));
			Ok::<_, HostError>(100)
		})
		.unwrap();

	assert!(discarded.get());
	assert_eq!(*outer.resource(), 1);
	assert_eq!(leases.lease_count(&"root"), 2);
	drop(nested);
}
