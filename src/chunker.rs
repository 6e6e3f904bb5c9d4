//! Coalescing of raw mutation records into per-turn batches.

use crate::{
	host::{Host, MutationRecord, ObserveOptions},
	report::{node_field, report, WatchError},
	stopper::Stopper,
	stream::{noop_teardown, EventStream},
};
use core::{
	cell::{Cell, RefCell},
	mem,
};
use std::rc::Rc;
use tracing::{debug, instrument, trace, trace_span, warn};

/// All mutation records that arrived within one scheduling turn, in delivery order.
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch<N> {
	records: Vec<MutationRecord<N>>,
}

impl<N> MutationBatch<N> {
	#[must_use]
	pub fn records(&self) -> &[MutationRecord<N>] {
		&self.records
	}

	#[must_use]
	pub fn into_records(self) -> Vec<MutationRecord<N>> {
		self.records
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Always `false`, since empty batches are never delivered.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &MutationRecord<N>> {
		self.records.iter()
	}
}

impl<N> IntoIterator for MutationBatch<N> {
	type Item = MutationRecord<N>;
	type IntoIter = std::vec::IntoIter<MutationRecord<N>>;

	fn into_iter(self) -> Self::IntoIter {
		self.records.into_iter()
	}
}

/// Observes `target` and delivers one [`MutationBatch`] per scheduling turn in which records arrived.
///
/// Each subscription registers its own observer.
/// The stream ends (normally) if `target` is or becomes detached from the document,
/// or if the observer can't be set up, in which case the failure is also [reported](`crate::report::report`).
///
/// Detachment is noticed when a batch is flushed. That batch is still delivered in full before the end.
#[must_use]
pub fn watch_mutations<H: Host>(host: &H, target: &H::Node, options: ObserveOptions) -> EventStream<MutationBatch<H::Node>> {
	let host = host.clone();
	let target = target.clone();
	EventStream::from_binder(move |emitter| {
		let span = trace_span!("watch_mutations", target = %node_field(&target), ?options);
		let _enter = span.enter();

		if !host.is_connected(&target) {
			warn!("Observation target is not connected. Ending right away.");
			emitter.end();
			return noop_teardown();
		}

		let pending: Rc<RefCell<Vec<MutationRecord<H::Node>>>> = Rc::default();
		let flush_scheduled = Rc::new(Cell::new(false));

		let callback = {
			let (host, target, emitter) = (host.clone(), target.clone(), emitter.clone());
			Rc::new(move |records: Vec<MutationRecord<H::Node>>| {
				if records.is_empty() || emitter.is_closed() {
					return;
				}
				pending.borrow_mut().extend(records);
				if flush_scheduled.replace(true) {
					return;
				}

				let (pending, flush_scheduled, emitter, flush_host, target) = (pending.clone(), flush_scheduled.clone(), emitter.clone(), host.clone(), target.clone());
				host.queue_microtask(Box::new(move || {
					flush_scheduled.set(false);
					let records = mem::take(&mut *pending.borrow_mut());
					if emitter.is_closed() || records.is_empty() {
						return;
					}
					trace!("Flushing a batch of {} mutation record(s).", records.len());
					emitter.emit(MutationBatch { records });
					if !emitter.is_closed() && !flush_host.is_connected(&target) {
						debug!("Observation target was detached. Ending.");
						emitter.end();
					}
				}));
			})
		};

		match host.observe(&target, &options, callback) {
			Ok(disconnect) => disconnect,
			Err(error) => {
				report(&WatchError::ObserverSetup(error));
				emitter.end();
				noop_teardown()
			}
		}
	})
}

/// Batches of changes to `attribute_names` on `target` itself, until `stopper` is destroyed.
#[must_use]
#[instrument(skip(host, target, stopper), fields(target = %node_field(target)))]
pub fn watch_attribute_mutations<H: Host>(host: &H, target: &H::Node, attribute_names: &[&str], stopper: &Stopper) -> EventStream<MutationBatch<H::Node>> {
	watch_mutations(host, target, ObserveOptions::attributes(attribute_names)).take_until(stopper)
}
