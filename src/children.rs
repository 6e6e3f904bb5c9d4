//! Streams of the children of one parent node, existing and future.

use crate::{
	chunker::watch_mutations,
	host::{Host, NodeKey, ObserveOptions},
	report::{guarded, node_field},
	stopper::Stopper,
	stream::{Emitter, Event, EventStream},
};
use core::cell::{Cell, RefCell};
use hashbrown::HashSet;
use std::rc::Rc;
use tracing::{instrument, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildOrigin {
	/// The child was already present when the watch started.
	Preexisting,
	/// The child was appended while the watch was running.
	Inserted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEvent<N> {
	pub element: N,
	pub origin: ChildOrigin,
}

/// An opaque test applied to candidate nodes.
///
/// Implemented for all `Fn(&N) -> bool` closures.
pub trait NodePredicate<N> {
	fn test(&self, node: &N) -> bool;
}

impl<N, F: Fn(&N) -> bool> NodePredicate<N> for F {
	fn test(&self, node: &N) -> bool {
		self(node)
	}
}

/// Reports each child of `parent` that matches `predicate`, at most once per node.
///
/// Children present at subscription time are reported first, synchronously and in document order.
/// Children inserted afterwards follow in arrival order, judged by the state after their batch,
/// so a child that was added and removed again within one turn isn't reported.
///
/// A panicking predicate only skips its candidate.
///
/// The stream ends once `parent` is detached from the document. A parent that is unattached from the start
/// still has its current children listed before the end.
pub fn child_stream<H: Host>(host: &H, parent: &H::Node, predicate: impl NodePredicate<H::Node> + 'static) -> EventStream<ChildEvent<H::Node>> {
	let host = host.clone();
	let parent = parent.clone();
	let predicate: Rc<dyn NodePredicate<H::Node>> = Rc::new(predicate);
	let batches = watch_mutations(&host, &parent, ObserveOptions::child_list());

	EventStream::from_binder(move |emitter| {
		let scan = Rc::new(Scan {
			host: host.clone(),
			predicate: predicate.clone(),
			seen: RefCell::new(HashSet::new()),
			emitter: emitter.clone(),
			scanning: Cell::new(true),
			end_deferred: Cell::new(false),
		});

		// Observe before scanning, so that nothing slips through in between.
		let parent_key = host.node_key(&parent);
		let subscription = {
			let scan = scan.clone();
			batches.subscribe(move |event| match event {
				Event::Value(batch) => {
					for record in batch.iter().filter(|record| scan.host.node_key(&record.target) == parent_key) {
						for node in record.added_nodes() {
							if scan.emitter.is_closed() {
								return;
							}
							let still_attached = scan.host.parent(node).map_or(false, |current| scan.host.node_key(&current) == parent_key);
							if still_attached {
								scan.offer(node, ChildOrigin::Inserted)
							} else {
								trace!("Skipping a child that is gone again.");
							}
						}
					}
				}
				// An unattached parent ends observation right away, but its children are still listed.
				Event::End if scan.scanning.get() => scan.end_deferred.set(true),
				Event::End => scan.emitter.end(),
			})
		};

		for child in host.children(&parent) {
			if emitter.is_closed() {
				break;
			}
			scan.offer(&child, ChildOrigin::Preexisting);
		}
		scan.scanning.set(false);
		if scan.end_deferred.get() {
			emitter.end();
		}

		Box::new(move || subscription.unsubscribe())
	})
}

/// [`child_stream`], ending when `stopper` is destroyed.
#[must_use]
#[instrument(skip(host, parent, predicate, stopper), fields(parent = %node_field(parent)))]
pub fn watch_children<H: Host>(host: &H, parent: &H::Node, predicate: impl NodePredicate<H::Node> + 'static, stopper: &Stopper) -> EventStream<ChildEvent<H::Node>> {
	child_stream(host, parent, predicate).take_until(stopper)
}

struct Scan<H: Host> {
	host: H,
	predicate: Rc<dyn NodePredicate<H::Node>>,
	seen: RefCell<HashSet<NodeKey>>,
	emitter: Emitter<ChildEvent<H::Node>>,
	scanning: Cell<bool>,
	end_deferred: Cell<bool>,
}

impl<H: Host> Scan<H> {
	fn offer(&self, node: &H::Node, origin: ChildOrigin) {
		let key = self.host.node_key(node);
		if self.seen.borrow().contains(&key) {
			return;
		}
		if guarded("child predicate", || self.predicate.test(node)) == Some(true) {
			self.seen.borrow_mut().insert(key);
			self.emitter.emit(ChildEvent { element: node.clone(), origin });
		}
	}
}
