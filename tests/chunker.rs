use dom_watch::{
	chunker::{watch_attribute_mutations, watch_mutations, MutationBatch},
	host::{Host, MutationKind, ObserveOptions},
	report::{set_error_reporter, WatchError},
	virtual_dom::{VirtualDom, VirtualNode},
	Event, Stopper,
};
use std::{cell::RefCell, rc::Rc};

type Log = Rc<RefCell<Vec<Event<MutationBatch<VirtualNode>>>>>;

fn init_logging() {
	let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_test_writer().try_init();
}

fn added(batch: &MutationBatch<VirtualNode>) -> Vec<VirtualNode> {
	batch.iter().flat_map(|record| record.added_nodes().to_vec()).collect()
}

fn batches(log: &Log) -> Vec<MutationBatch<VirtualNode>> {
	log.borrow()
		.iter()
		.filter_map(|event| match event {
			Event::Value(batch) => Some(batch.clone()),
			Event::End => None,
		})
		.collect()
}

fn ended(log: &Log) -> bool {
	log.borrow().last() == Some(&Event::End)
}

#[test]
fn records_of_one_turn_form_one_ordered_batch() {
	init_logging();
	let dom = VirtualDom::new();
	let body = dom.body().unwrap();

	let log = Log::default();
	watch_mutations(&dom, &body, ObserveOptions::child_list()).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});

	let nodes: Vec<_> = (0..3).map(|_| dom.element("div", &[])).collect();
	for node in &nodes {
		dom.append_child(&body, node).unwrap();
	}
	assert!(batches(&log).is_empty());

	dom.run_until_idle();
	let delivered = batches(&log);
	assert_eq!(delivered.len(), 1);
	assert_eq!(added(&delivered[0]), nodes);
}

#[test]
fn separate_turns_give_separate_batches_in_order() {
	let dom = VirtualDom::new();
	let body = dom.body().unwrap();

	let log = Log::default();
	watch_mutations(&dom, &body, ObserveOptions::child_list()).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});

	let first = dom.element("div", &[]);
	let second = dom.element("div", &[]);
	dom.append_child(&body, &first).unwrap();
	dom.run_until_idle();
	dom.append_child(&body, &second).unwrap();
	dom.remove(&first);
	dom.run_until_idle();

	let delivered = batches(&log);
	assert_eq!(delivered.len(), 2);
	assert_eq!(added(&delivered[0]), [first]);
	assert_eq!(delivered[1].len(), 2);
	assert_eq!(added(&delivered[1]), [second]);
	assert_eq!(
		delivered[1].records()[1].kind,
		MutationKind::ChildList {
			added: vec![],
			removed: vec![first]
		}
	);
}

#[test]
fn attribute_filter_is_honored() {
	let dom = VirtualDom::new();
	let body = dom.body().unwrap();
	let target = dom.element("div", &[]);
	dom.append_child(&body, &target).unwrap();

	let stopper = Stopper::new();
	let log = Log::default();
	watch_attribute_mutations(&dom, &target, &["class"], &stopper).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});

	dom.set_attribute(&target, "title", "ignored").unwrap();
	dom.run_until_idle();
	assert!(batches(&log).is_empty());

	dom.add_class(&target, "x");
	dom.set_attribute(&target, "title", "still ignored").unwrap();
	dom.remove_class(&target, "x");
	dom.run_until_idle();
	let delivered = batches(&log);
	assert_eq!(delivered.len(), 1);
	assert!(delivered[0].iter().all(|record| record.attribute_name() == Some("class")));
	assert_eq!(delivered[0].len(), 2);
}

#[test]
fn detached_target_completes_normally() {
	let errors = Rc::new(RefCell::new(Vec::<WatchError>::new()));
	set_error_reporter(Some(Rc::new({
		let errors = errors.clone();
		move |error: &WatchError| errors.borrow_mut().push(error.clone())
	})));

	let dom = VirtualDom::new();
	let body = dom.body().unwrap();
	let target = dom.element("div", &[]);
	dom.append_child(&body, &target).unwrap();

	let log = Log::default();
	watch_mutations(&dom, &target, ObserveOptions::child_list()).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});

	dom.remove(&target);
	let late = dom.element("span", &[]);
	dom.append_child(&target, &late).unwrap();
	dom.run_until_idle();

	let delivered = batches(&log);
	assert_eq!(delivered.len(), 1);
	assert_eq!(added(&delivered[0]), [late]);
	assert!(ended(&log));
	assert_eq!(dom.observer_count(), 0);
	assert!(errors.borrow().is_empty());
	set_error_reporter(None);
}

#[test]
fn the_batch_flushed_on_detachment_is_delivered_before_the_end() {
	let dom = VirtualDom::new();
	let target = dom.element("div", &[]);
	dom.append_child(&dom.body().unwrap(), &target).unwrap();

	let log = Log::default();
	watch_mutations(&dom, &target, ObserveOptions::child_list()).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});

	let child = dom.element("span", &[]);
	dom.append_child(&target, &child).unwrap();
	dom.remove(&target);
	dom.run_until_idle();

	assert_eq!(log.borrow().len(), 2);
	assert_eq!(added(&batches(&log)[0]), [child]);
	assert!(ended(&log));
	assert_eq!(dom.observer_count(), 0);
}

#[test]
fn unattached_target_ends_right_away() {
	let dom = VirtualDom::new();
	let loose = dom.element("div", &[]);

	let log = Log::default();
	watch_mutations(&dom, &loose, ObserveOptions::child_list()).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});
	assert_eq!(*log.borrow(), [Event::End]);
	assert_eq!(dom.observer_count(), 0);
}

#[test]
fn destroying_the_stopper_drops_a_batch_in_flight() {
	let dom = VirtualDom::new();
	let body = dom.body().unwrap();
	let target = dom.element("div", &[]);
	dom.append_child(&body, &target).unwrap();

	let stopper = Stopper::new();
	let log = Log::default();
	watch_attribute_mutations(&dom, &target, &["class"], &stopper).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});

	dom.add_class(&target, "x");
	assert!(dom.pending_microtasks() > 0);
	stopper.destroy();
	dom.run_until_idle();

	assert!(batches(&log).is_empty());
	assert!(ended(&log));
	assert_eq!(dom.observer_count(), 0);
}

#[test]
fn destroying_the_stopper_between_delivery_and_flush_drops_the_batch() {
	let dom = VirtualDom::new();
	let body = dom.body().unwrap();

	let stopper = Stopper::new();
	let log = Log::default();
	watch_mutations(&dom, &body, ObserveOptions::child_list()).take_until(&stopper).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});

	// Queued behind the observer callback, so it runs before the flush that callback schedules.
	dom.append_child(&body, &dom.element("div", &[])).unwrap();
	dom.queue_microtask(Box::new(move || stopper.destroy()));
	dom.run_until_idle();

	assert!(batches(&log).is_empty());
	assert!(ended(&log));
}

#[test]
fn observer_setup_failure_is_reported_and_ends_the_stream() {
	let errors = Rc::new(RefCell::new(Vec::<WatchError>::new()));
	set_error_reporter(Some(Rc::new({
		let errors = errors.clone();
		move |error: &WatchError| errors.borrow_mut().push(error.clone())
	})));

	let dom = VirtualDom::new();
	let body = dom.body().unwrap();
	let log = Log::default();
	watch_mutations(&dom, &body, ObserveOptions::default()).subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});

	assert_eq!(*log.borrow(), [Event::End]);
	assert!(matches!(errors.borrow().as_slice(), [WatchError::ObserverSetup(_)]));
	set_error_reporter(None);
}

#[test]
fn each_subscription_observes_on_its_own() {
	let dom = VirtualDom::new();
	let body = dom.body().unwrap();
	let stream = watch_mutations(&dom, &body, ObserveOptions::child_list());

	let first = stream.on_value(|_| ());
	let second = stream.on_value(|_| ());
	assert_eq!(dom.observer_count(), 2);
	first.unsubscribe();
	second.unsubscribe();
	assert_eq!(dom.observer_count(), 0);
}
