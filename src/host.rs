//! The boundary to the live document.
//!
//! Everything this crate knows about the DOM goes through [`Host`].
//! [`WebHost`](`crate::web::WebHost`) implements it on top of `web-sys`,
//! [`VirtualDom`](`crate::virtual_dom::VirtualDom`) as an in-memory tree with an explicit turn stepper.

use crate::{report::HostError, stream::Teardown};
use core::fmt::Debug;
use std::rc::Rc;

/// Stable identity of a node, for de-duplication and keyed bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub u64);

/// Options for [`Host::observe`], mirroring [***MutationObserverInit***](https://developer.mozilla.org/en-US/docs/Web/API/MutationObserver/observe#options).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserveOptions {
	pub child_list: bool,
	pub attributes: bool,
	pub subtree: bool,
	/// If set, only these attributes are reported. Implies `attributes`.
	pub attribute_filter: Option<Vec<String>>,
}

impl ObserveOptions {
	/// Direct child additions and removals.
	#[must_use]
	pub fn child_list() -> Self {
		Self { child_list: true, ..Self::default() }
	}

	/// Changes to the named attributes of the target itself.
	#[must_use]
	pub fn attributes(names: &[&str]) -> Self {
		Self {
			attributes: true,
			attribute_filter: Some(names.iter().map(|&name| name.to_owned()).collect()),
			..Self::default()
		}
	}

	#[must_use]
	pub fn with_subtree(mut self) -> Self {
		self.subtree = true;
		self
	}

	/// Whether a change to `attribute` should be reported under these options.
	#[must_use]
	pub fn accepts_attribute(&self, attribute: &str) -> bool {
		match &self.attribute_filter {
			Some(filter) => filter.iter().any(|name| name == attribute),
			None => self.attributes,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind<N> {
	ChildList { added: Vec<N>, removed: Vec<N> },
	Attributes { name: String },
}

/// One raw change record as delivered by the observation primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord<N> {
	pub target: N,
	pub kind: MutationKind<N>,
}

impl<N> MutationRecord<N> {
	#[must_use]
	pub fn added_nodes(&self) -> &[N] {
		match &self.kind {
			MutationKind::ChildList { added, .. } => added,
			MutationKind::Attributes { .. } => &[],
		}
	}

	#[must_use]
	pub fn attribute_name(&self) -> Option<&str> {
		match &self.kind {
			MutationKind::Attributes { name } => Some(name),
			MutationKind::ChildList { .. } => None,
		}
	}
}

pub type MutationCallback<N> = Rc<dyn Fn(Vec<MutationRecord<N>>)>;

/// A live document, as seen by this crate.
///
/// Hosts are cheap handles: Cloning one must not copy the document.
/// Implementations only ever run on one thread, and no method may block it.
pub trait Host: Clone + 'static {
	type Node: Clone + PartialEq + Debug + 'static;

	fn node_key(&self, node: &Self::Node) -> NodeKey;

	/// Starts observing `target`. `callback` receives record lists in the order they occurred.
	///
	/// The returned [`Teardown`] disconnects the observer.
	fn observe(&self, target: &Self::Node, options: &ObserveOptions, callback: MutationCallback<Self::Node>) -> Result<Teardown, HostError>;

	/// Runs `task` after the current synchronous work and after mutation callbacks that are already queued.
	fn queue_microtask(&self, task: Box<dyn FnOnce()>);

	/// The returned [`Teardown`] cancels the timer if it hasn't fired yet.
	fn set_timeout(&self, delay_ms: u32, task: Box<dyn FnOnce()>) -> Teardown;

	/// The returned [`Teardown`] removes the listener.
	fn listen(&self, target: &Self::Node, event: &str, handler: Rc<dyn Fn()>) -> Result<Teardown, HostError>;

	fn body(&self) -> Option<Self::Node>;
	/// Element children of `parent`, in document order.
	fn children(&self, parent: &Self::Node) -> Vec<Self::Node>;
	fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
	fn is_connected(&self, node: &Self::Node) -> bool;
	/// The first descendant of `root` that carries `class`.
	fn find_by_class(&self, root: &Self::Node, class: &str) -> Option<Self::Node>;

	fn create_element(&self, tag: &str) -> Result<Self::Node, HostError>;
	fn append_child(&self, parent: &Self::Node, child: &Self::Node) -> Result<(), HostError>;
	fn insert_before(&self, parent: &Self::Node, child: &Self::Node, reference: Option<&Self::Node>) -> Result<(), HostError>;
	/// Detaches `node` from its parent, if it has one.
	fn remove(&self, node: &Self::Node);
	fn set_text(&self, node: &Self::Node, text: &str);

	fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;
	fn set_attribute(&self, node: &Self::Node, name: &str, value: &str) -> Result<(), HostError>;
	fn remove_attribute(&self, node: &Self::Node, name: &str);
	fn has_class(&self, node: &Self::Node, class: &str) -> bool;
	fn add_class(&self, node: &Self::Node, class: &str);
	fn remove_class(&self, node: &Self::Node, class: &str);

	/// The inline style value of `property`, or [`None`] if there is no explicit value.
	fn style(&self, node: &Self::Node, property: &str) -> Option<String>;
	fn set_style(&self, node: &Self::Node, property: &str, value: &str);
	fn remove_style(&self, node: &Self::Node, property: &str);
	fn computed_style(&self, node: &Self::Node, property: &str) -> Option<String>;
	/// Flushes pending style changes, so that a following class change transitions.
	fn force_layout(&self, node: &Self::Node);
}

/// Walks from `node` (inclusive) up through its ancestors and returns the first one matching `predicate`.
pub fn find_ancestor<H: Host>(host: &H, node: &H::Node, predicate: impl Fn(&H::Node) -> bool) -> Option<H::Node> {
	let mut current = Some(node.clone());
	while let Some(candidate) = current {
		if predicate(&candidate) {
			return Some(candidate);
		}
		current = host.parent(&candidate);
	}
	None
}
