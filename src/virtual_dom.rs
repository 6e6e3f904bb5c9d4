//! An in-memory [`Host`] with an explicit event loop.
//!
//! Nothing happens "later" on its own. Microtasks, including mutation observer deliveries, run on
//! [`VirtualDom::run_until_idle`]. Timers wait for [`VirtualDom::advance`].
//! Events are fired with [`VirtualDom::dispatch`].

use crate::{
	host::{Host, MutationCallback, MutationKind, MutationRecord, NodeKey, ObserveOptions},
	report::HostError,
	stream::Teardown,
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
	mem,
};
use std::{collections::VecDeque, rc::Rc};
use tracing::trace;

const ROOT: usize = 0;
const BODY: usize = 1;

/// A handle to one node of a [`VirtualDom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualNode(usize);

struct NodeData {
	tag: String,
	parent: Option<usize>,
	children: Vec<usize>,
	attributes: Vec<(String, String)>,
	styles: Vec<(String, String)>,
	text: String,
}

impl NodeData {
	fn new(tag: &str) -> Self {
		Self {
			tag: tag.to_owned(),
			parent: None,
			children: Vec::new(),
			attributes: Vec::new(),
			styles: Vec::new(),
			text: String::new(),
		}
	}

	fn classes(&self) -> impl Iterator<Item = &str> {
		self.attributes
			.iter()
			.find(|(name, _)| name == "class")
			.map_or("", |(_, value)| value.as_str())
			.split_whitespace()
	}
}

struct Observer {
	id: u64,
	target: usize,
	options: ObserveOptions,
	callback: MutationCallback<VirtualNode>,
	pending: RefCell<Vec<MutationRecord<VirtualNode>>>,
	scheduled: Cell<bool>,
	connected: Cell<bool>,
}

struct Timer {
	id: u64,
	due_ms: u64,
	task: Box<dyn FnOnce()>,
}

struct Listener {
	id: u64,
	target: usize,
	event: String,
	handler: Rc<dyn Fn()>,
	active: Cell<bool>,
}

struct Inner {
	nodes: RefCell<Vec<NodeData>>,
	observers: RefCell<Vec<Rc<Observer>>>,
	microtasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
	timers: RefCell<Vec<Timer>>,
	listeners: RefCell<Vec<Rc<Listener>>>,
	now_ms: Cell<u64>,
	next_id: Cell<u64>,
	layouts: Cell<usize>,
}

/// An in-memory document: `<html><body></body></html>`, plus an event loop you step by hand.
#[derive(Clone)]
pub struct VirtualDom {
	inner: Rc<Inner>,
}

impl Default for VirtualDom {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for VirtualDom {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("VirtualDom")
			.field("nodes", &self.inner.nodes.try_borrow().map(|n| n.len()).ok())
			.field("now_ms", &self.inner.now_ms.get())
			.field("observers", &self.observer_count())
			.field("pending_microtasks", &self.pending_microtasks())
			.finish()
	}
}

impl VirtualDom {
	#[must_use]
	pub fn new() -> Self {
		let mut html = NodeData::new("html");
		html.children.push(BODY);
		let mut body = NodeData::new("body");
		body.parent = Some(ROOT);

		Self {
			inner: Rc::new(Inner {
				nodes: RefCell::new(vec![html, body]),
				observers: RefCell::new(Vec::new()),
				microtasks: RefCell::new(VecDeque::new()),
				timers: RefCell::new(Vec::new()),
				listeners: RefCell::new(Vec::new()),
				now_ms: Cell::new(0),
				next_id: Cell::new(0),
				layouts: Cell::new(0),
			}),
		}
	}

	fn next_id(&self) -> u64 {
		let id = self.inner.next_id.get();
		self.inner.next_id.set(id + 1);
		id
	}

	/// Creates a detached element carrying `classes`.
	#[must_use]
	pub fn element(&self, tag: &str, classes: &[&str]) -> VirtualNode {
		let mut data = NodeData::new(tag);
		if !classes.is_empty() {
			data.attributes.push(("class".to_owned(), classes.join(" ")));
		}
		let mut nodes = self.inner.nodes.borrow_mut();
		nodes.push(data);
		VirtualNode(nodes.len() - 1)
	}

	/// Runs queued microtasks until there are none left, returning how many ran.
	pub fn run_until_idle(&self) -> usize {
		let mut ran = 0;
		loop {
			let task = self.inner.microtasks.borrow_mut().pop_front();
			match task {
				Some(task) => {
					task();
					ran += 1;
				}
				None => break ran,
			}
		}
	}

	/// Moves the clock forward by `ms`, running due timers in order, each as its own turn.
	pub fn advance(&self, ms: u64) {
		let target = self.inner.now_ms.get() + ms;
		loop {
			let next = {
				let mut timers = self.inner.timers.borrow_mut();
				let due = timers.iter().enumerate().filter(|(_, timer)| timer.due_ms <= target).min_by_key(|(_, timer)| (timer.due_ms, timer.id)).map(|(index, _)| index);
				due.map(|index| timers.remove(index))
			};
			match next {
				Some(timer) => {
					self.inner.now_ms.set(self.inner.now_ms.get().max(timer.due_ms));
					(timer.task)();
					self.run_until_idle();
				}
				None => break,
			}
		}
		self.inner.now_ms.set(target);
		self.run_until_idle();
	}

	/// Fires `event` on `target`'s listeners, then runs microtasks like the end of a task would.
	pub fn dispatch(&self, target: VirtualNode, event: &str) {
		let listeners: Vec<Rc<Listener>> = self.inner.listeners.borrow().iter().filter(|listener| listener.target == target.0 && listener.event == event).cloned().collect();
		trace!(?target, event, "Dispatching to {} listener(s).", listeners.len());
		for listener in listeners {
			if listener.active.get() {
				(listener.handler)()
			}
		}
		self.run_until_idle();
	}

	#[must_use]
	pub fn now_ms(&self) -> u64 {
		self.inner.now_ms.get()
	}

	#[must_use]
	pub fn pending_microtasks(&self) -> usize {
		self.inner.microtasks.try_borrow().map_or(0, |m| m.len())
	}

	#[must_use]
	pub fn observer_count(&self) -> usize {
		self.inner.observers.try_borrow().map_or(0, |o| o.len())
	}

	#[must_use]
	pub fn listener_count(&self) -> usize {
		self.inner.listeners.borrow().len()
	}

	#[must_use]
	pub fn timer_count(&self) -> usize {
		self.inner.timers.borrow().len()
	}

	/// How often [`Host::force_layout`] was called.
	#[must_use]
	pub fn layout_count(&self) -> usize {
		self.inner.layouts.get()
	}

	#[must_use]
	pub fn tag(&self, node: VirtualNode) -> String {
		self.inner.nodes.borrow()[node.0].tag.clone()
	}

	#[must_use]
	pub fn text(&self, node: VirtualNode) -> String {
		self.inner.nodes.borrow()[node.0].text.clone()
	}

	/// The concatenated text of `node` and its descendants, in document order.
	#[must_use]
	pub fn text_content(&self, node: VirtualNode) -> String {
		let nodes = self.inner.nodes.borrow();
		let mut text = String::new();
		let mut stack = vec![node.0];
		while let Some(index) = stack.pop() {
			text.push_str(&nodes[index].text);
			stack.extend(nodes[index].children.iter().rev());
		}
		text
	}

	fn is_ancestor(&self, ancestor: usize, mut node: usize) -> bool {
		let nodes = self.inner.nodes.borrow();
		while let Some(parent) = nodes[node].parent {
			if parent == ancestor {
				return true;
			}
			node = parent;
		}
		false
	}

	fn observes(&self, observer: &Observer, record: &MutationRecord<VirtualNode>) -> bool {
		let in_scope = record.target.0 == observer.target || (observer.options.subtree && self.is_ancestor(observer.target, record.target.0));
		in_scope
			&& match &record.kind {
				MutationKind::ChildList { .. } => observer.options.child_list,
				MutationKind::Attributes { name } => observer.options.accepts_attribute(name),
			}
	}

	fn queue_record(&self, record: MutationRecord<VirtualNode>) {
		let observers: Vec<Rc<Observer>> = self.inner.observers.borrow().clone();
		for observer in observers {
			if !observer.connected.get() || !self.observes(&observer, &record) {
				continue;
			}
			observer.pending.borrow_mut().push(record.clone());
			if observer.scheduled.replace(true) {
				continue;
			}
			self.queue_microtask(Box::new(move || {
				observer.scheduled.set(false);
				let records = mem::take(&mut *observer.pending.borrow_mut());
				if observer.connected.get() && !records.is_empty() {
					(observer.callback)(records)
				}
			}));
		}
	}

	fn set_attribute_value(&self, node: usize, name: &str, value: Option<String>) {
		{
			let mut nodes = self.inner.nodes.borrow_mut();
			let attributes = &mut nodes[node].attributes;
			let existing = attributes.iter().position(|(n, _)| n == name);
			match (existing, value) {
				(Some(index), Some(value)) => attributes[index].1 = value,
				(None, Some(value)) => attributes.push((name.to_owned(), value)),
				(Some(index), None) => {
					attributes.remove(index);
				}
				(None, None) => return,
			}
		}
		self.queue_record(MutationRecord {
			target: VirtualNode(node),
			kind: MutationKind::Attributes { name: name.to_owned() },
		});
	}

	fn detach(&self, node: usize) {
		let parent = {
			let mut nodes = self.inner.nodes.borrow_mut();
			let parent = match nodes[node].parent.take() {
				Some(parent) => parent,
				None => return,
			};
			nodes[parent].children.retain(|&child| child != node);
			parent
		};
		self.queue_record(MutationRecord {
			target: VirtualNode(parent),
			kind: MutationKind::ChildList {
				added: Vec::new(),
				removed: vec![VirtualNode(node)],
			},
		});
	}
}

impl Host for VirtualDom {
	type Node = VirtualNode;

	fn node_key(&self, node: &VirtualNode) -> NodeKey {
		NodeKey(node.0 as u64)
	}

	fn observe(&self, target: &VirtualNode, options: &ObserveOptions, callback: MutationCallback<VirtualNode>) -> Result<Teardown, HostError> {
		if !(options.child_list || options.attributes || options.attribute_filter.is_some()) {
			return Err(HostError::Observe("The options must request child list or attribute changes.".to_owned()));
		}

		let id = self.next_id();
		self.inner.observers.borrow_mut().push(Rc::new(Observer {
			id,
			target: target.0,
			options: options.clone(),
			callback,
			pending: RefCell::new(Vec::new()),
			scheduled: Cell::new(false),
			connected: Cell::new(true),
		}));

		let dom = self.clone();
		Ok(Box::new(move || {
			let removed = {
				let mut observers = dom.inner.observers.borrow_mut();
				observers.iter().position(|observer| observer.id == id).map(|index| observers.remove(index))
			};
			if let Some(observer) = removed {
				observer.connected.set(false);
				observer.pending.borrow_mut().clear();
			}
		}))
	}

	fn queue_microtask(&self, task: Box<dyn FnOnce()>) {
		self.inner.microtasks.borrow_mut().push_back(task);
	}

	fn set_timeout(&self, delay_ms: u32, task: Box<dyn FnOnce()>) -> Teardown {
		let id = self.next_id();
		self.inner.timers.borrow_mut().push(Timer {
			id,
			due_ms: self.inner.now_ms.get() + u64::from(delay_ms),
			task,
		});

		let dom = self.clone();
		Box::new(move || {
			let cancelled = {
				let mut timers = dom.inner.timers.borrow_mut();
				timers.iter().position(|timer| timer.id == id).map(|index| timers.remove(index))
			};
			drop(cancelled);
		})
	}

	fn listen(&self, target: &VirtualNode, event: &str, handler: Rc<dyn Fn()>) -> Result<Teardown, HostError> {
		let id = self.next_id();
		self.inner.listeners.borrow_mut().push(Rc::new(Listener {
			id,
			target: target.0,
			event: event.to_owned(),
			handler,
			active: Cell::new(true),
		}));

		let dom = self.clone();
		Ok(Box::new(move || {
			let removed = {
				let mut listeners = dom.inner.listeners.borrow_mut();
				listeners.iter().position(|listener| listener.id == id).map(|index| listeners.remove(index))
			};
			if let Some(listener) = removed {
				listener.active.set(false)
			}
		}))
	}

	fn body(&self) -> Option<VirtualNode> {
		Some(VirtualNode(BODY))
	}

	fn children(&self, parent: &VirtualNode) -> Vec<VirtualNode> {
		self.inner.nodes.borrow()[parent.0].children.iter().copied().map(VirtualNode).collect()
	}

	fn parent(&self, node: &VirtualNode) -> Option<VirtualNode> {
		self.inner.nodes.borrow()[node.0].parent.map(VirtualNode)
	}

	fn is_connected(&self, node: &VirtualNode) -> bool {
		node.0 == ROOT || self.is_ancestor(ROOT, node.0)
	}

	fn find_by_class(&self, root: &VirtualNode, class: &str) -> Option<VirtualNode> {
		let nodes = self.inner.nodes.borrow();
		let mut stack: Vec<usize> = nodes[root.0].children.iter().rev().copied().collect();
		while let Some(index) = stack.pop() {
			if nodes[index].classes().any(|c| c == class) {
				return Some(VirtualNode(index));
			}
			stack.extend(nodes[index].children.iter().rev());
		}
		None
	}

	fn create_element(&self, tag: &str) -> Result<VirtualNode, HostError> {
		Ok(self.element(tag, &[]))
	}

	fn append_child(&self, parent: &VirtualNode, child: &VirtualNode) -> Result<(), HostError> {
		self.insert_before(parent, child, None)
	}

	fn insert_before(&self, parent: &VirtualNode, child: &VirtualNode, reference: Option<&VirtualNode>) -> Result<(), HostError> {
		if parent == child || self.is_ancestor(child.0, parent.0) {
			return Err(HostError::Operation {
				operation: "insertBefore",
				message: "The new child is an ancestor of the parent.".to_owned(),
			});
		}
		if let Some(reference) = reference {
			if self.parent(reference) != Some(*parent) {
				return Err(HostError::Operation {
					operation: "insertBefore",
					message: "The reference node is not a child of the parent.".to_owned(),
				});
			}
		}

		self.detach(child.0);
		{
			let mut nodes = self.inner.nodes.borrow_mut();
			let index = match reference {
				Some(reference) => nodes[parent.0].children.iter().position(|&c| c == reference.0).unwrap_or(nodes[parent.0].children.len()),
				None => nodes[parent.0].children.len(),
			};
			nodes[parent.0].children.insert(index, child.0);
			nodes[child.0].parent = Some(parent.0);
		}
		self.queue_record(MutationRecord {
			target: *parent,
			kind: MutationKind::ChildList {
				added: vec![*child],
				removed: Vec::new(),
			},
		});
		Ok(())
	}

	fn remove(&self, node: &VirtualNode) {
		self.detach(node.0)
	}

	fn set_text(&self, node: &VirtualNode, text: &str) {
		self.inner.nodes.borrow_mut()[node.0].text = text.to_owned();
	}

	fn attribute(&self, node: &VirtualNode, name: &str) -> Option<String> {
		self.inner.nodes.borrow()[node.0].attributes.iter().find(|(n, _)| n == name).map(|(_, value)| value.clone())
	}

	fn set_attribute(&self, node: &VirtualNode, name: &str, value: &str) -> Result<(), HostError> {
		self.set_attribute_value(node.0, name, Some(value.to_owned()));
		Ok(())
	}

	fn remove_attribute(&self, node: &VirtualNode, name: &str) {
		self.set_attribute_value(node.0, name, None)
	}

	fn has_class(&self, node: &VirtualNode, class: &str) -> bool {
		self.inner.nodes.borrow()[node.0].classes().any(|c| c == class)
	}

	fn add_class(&self, node: &VirtualNode, class: &str) {
		if self.has_class(node, class) {
			return;
		}
		let classes = {
			let nodes = self.inner.nodes.borrow();
			let mut classes: Vec<&str> = nodes[node.0].classes().collect();
			classes.push(class);
			classes.join(" ")
		};
		self.set_attribute_value(node.0, "class", Some(classes))
	}

	fn remove_class(&self, node: &VirtualNode, class: &str) {
		if !self.has_class(node, class) {
			return;
		}
		let classes = {
			let nodes = self.inner.nodes.borrow();
			nodes[node.0].classes().filter(|&c| c != class).collect::<Vec<_>>().join(" ")
		};
		self.set_attribute_value(node.0, "class", Some(classes))
	}

	fn style(&self, node: &VirtualNode, property: &str) -> Option<String> {
		self.inner.nodes.borrow()[node.0].styles.iter().find(|(p, _)| p == property).map(|(_, value)| value.clone())
	}

	fn set_style(&self, node: &VirtualNode, property: &str, value: &str) {
		{
			let mut nodes = self.inner.nodes.borrow_mut();
			let styles = &mut nodes[node.0].styles;
			match styles.iter_mut().find(|(p, _)| p == property) {
				Some(existing) => existing.1 = value.to_owned(),
				None => styles.push((property.to_owned(), value.to_owned())),
			}
		}
		self.queue_record(MutationRecord {
			target: *node,
			kind: MutationKind::Attributes { name: "style".to_owned() },
		});
	}

	fn remove_style(&self, node: &VirtualNode, property: &str) {
		let removed = {
			let mut nodes = self.inner.nodes.borrow_mut();
			let styles = &mut nodes[node.0].styles;
			let before = styles.len();
			styles.retain(|(p, _)| p != property);
			styles.len() != before
		};
		if removed {
			self.queue_record(MutationRecord {
				target: *node,
				kind: MutationKind::Attributes { name: "style".to_owned() },
			});
		}
	}

	fn computed_style(&self, node: &VirtualNode, property: &str) -> Option<String> {
		self.style(node, property)
	}

	fn force_layout(&self, _node: &VirtualNode) {
		self.inner.layouts.set(self.inner.layouts.get() + 1)
	}
}
