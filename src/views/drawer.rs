//! A modal drawer that slides in over (part of) the page, above a shared dimming backdrop.

use crate::{
	arbiter::{InlineStyles, OwnerId, StyleArbiter, StyleKey},
	host::{find_ancestor, Host, NodeKey},
	lease::{Lease, SharedLeases},
	report::{node_field, HostError},
	stopper::Stopper,
	stream::EventStream,
	timing::{from_host_event, transition_end_or_timeout},
};
use core::fmt::{self, Debug, Formatter};
use tracing::{debug, instrument, trace};

/// Stacking index of the target root. The anchor, backdrop and container stack relative to it.
pub const BASE_Z_INDEX: u32 = 500;
/// How long closing waits for the slide-out transition before removing the drawer anyway.
pub const CLOSE_FALLBACK_MS: u32 = 200;

pub const CONTAINER_CLASS: &str = "dom_watch__drawer_view_container";
pub const VIEW_CLASS: &str = "dom_watch__drawer_view";
pub const TITLE_BAR_CLASS: &str = "dom_watch__drawer_title_bar";
pub const TITLE_CLASS: &str = "dom_watch__drawer_title";
pub const CLOSE_BUTTON_CLASS: &str = "dom_watch__close_button";
pub const BACKDROP_CLASS: &str = "dom_watch__backdrop";
pub const ACTIVE_CLASS: &str = "dom_watch__active";

pub struct DrawerOptions<N> {
	pub title: String,
	/// Moved into the drawer.
	pub content: N,
	/// Whether to render the title bar with a close button.
	pub chrome: bool,
	/// An element the drawer should stack above, instead of opening over the whole body.
	pub anchor: Option<N>,
}

impl<N> DrawerOptions<N> {
	pub fn new(title: impl Into<String>, content: N) -> Self {
		Self {
			title: title.into(),
			content,
			chrome: true,
			anchor: None,
		}
	}

	#[must_use]
	pub fn with_anchor(mut self, anchor: N) -> Self {
		self.anchor = Some(anchor);
		self
	}

	#[must_use]
	pub fn without_chrome(mut self) -> Self {
		self.chrome = false;
		self
	}
}

/// Shared state of all drawers on one host: the style arbiter and the backdrop registry.
pub struct DrawerContext<H: Host> {
	host: H,
	styles: StyleArbiter<H>,
	backdrops: SharedLeases<NodeKey, H::Node>,
}

impl<H: Host> Clone for DrawerContext<H> {
	fn clone(&self) -> Self {
		Self {
			host: self.host.clone(),
			styles: self.styles.clone(),
			backdrops: self.backdrops.clone(),
		}
	}
}

impl<H: Host + Debug> Debug for DrawerContext<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("DrawerContext").field("host", &self.host).field("styles", &self.styles).field("backdrops", &self.backdrops).finish()
	}
}

impl<H: Host> DrawerContext<H> {
	#[must_use]
	pub fn new(host: H) -> Self {
		Self {
			styles: StyleArbiter::<H>::new(InlineStyles::new(host.clone())),
			backdrops: SharedLeases::new(),
			host,
		}
	}

	/// Uses `styles` for z-index claims, so that drawers can coordinate with other views that use it too.
	#[must_use]
	pub fn with_style_arbiter(host: H, styles: StyleArbiter<H>) -> Self {
		Self {
			host,
			styles,
			backdrops: SharedLeases::new(),
		}
	}

	pub fn host(&self) -> &H {
		&self.host
	}

	pub fn styles(&self) -> &StyleArbiter<H> {
		&self.styles
	}

	pub fn backdrops(&self) -> &SharedLeases<NodeKey, H::Node> {
		&self.backdrops
	}

	/// The element a drawer for `anchor` is attached to: the nearest positioned ancestor, else the body.
	fn target_root(&self, anchor: Option<&H::Node>) -> Option<H::Node> {
		let explicit_z_index = |node: &H::Node| self.host.computed_style(node, "z-index").map_or(false, |z_index| !z_index.is_empty() && z_index != "auto");
		anchor
			.and_then(|anchor| self.host.parent(anchor))
			.and_then(|parent| find_ancestor(&self.host, &parent, explicit_z_index))
			.or_else(|| self.host.body())
	}

	fn acquire_backdrop(&self, target: &H::Node) -> Result<Lease<NodeKey, H::Node>, HostError> {
		let host = self.host.clone();
		let target = target.clone();
		self.backdrops.acquire(self.host.node_key(&target), move |stopper| {
			let backdrop = host.create_element("div")?;
			host.add_class(&backdrop, BACKDROP_CLASS);
			host.set_style(&backdrop, "z-index", &BASE_Z_INDEX.to_string());
			host.append_child(&target, &backdrop)?;
			host.force_layout(&backdrop);
			host.add_class(&backdrop, ACTIVE_CLASS);

			// Clicking the backdrop dismisses every drawer that shares it.
			from_host_event(&host, &backdrop, "click").take_until(stopper).on_value({
				let stopper = stopper.clone();
				move |()| stopper.destroy()
			});
			stopper.on_destroy({
				let (host, backdrop) = (host.clone(), backdrop.clone());
				move || {
					trace!("Removing backdrop.");
					host.remove(&backdrop)
				}
			});
			Ok(backdrop)
		})
	}

	/// Opens a drawer.
	///
	/// If a DOM operation fails, everything set up so far is undone before the error is returned.
	#[instrument(skip(self, options), fields(title = %options.title, anchor = ?options.anchor.as_ref().map(node_field)))]
	pub fn open(&self, options: DrawerOptions<H::Node>) -> Result<DrawerView<H>, HostError> {
		let closing = Stopper::new();
		let closed = Stopper::new();
		let mut container = None;

		let result = self.build(&options, &closing, &closed, &mut container);
		if result.is_err() {
			debug!("Opening the drawer failed. Undoing.");
			closing.destroy();
			closed.destroy();
			if let Some(container) = container {
				self.host.remove(&container)
			}
		}
		result
	}

	fn build(&self, options: &DrawerOptions<H::Node>, closing: &Stopper, closed: &Stopper, container_slot: &mut Option<H::Node>) -> Result<DrawerView<H>, HostError> {
		let host = &self.host;
		let target = self.target_root(options.anchor.as_ref()).ok_or_else(|| HostError::Operation {
			operation: "open drawer",
			message: "There is no body to attach to.".to_owned(),
		})?;

		if let Some(anchor) = &options.anchor {
			let owner = OwnerId::new();
			self.styles.claim_until(StyleKey::new(host, &target, "z-index"), owner, BASE_Z_INDEX.to_string(), closed);
			self.styles.claim_until(StyleKey::new(host, anchor, "z-index"), owner, (BASE_Z_INDEX + 1).to_string(), closed);
		}

		let backdrop = self.acquire_backdrop(&target)?;
		let backdrop_stopper = backdrop.stopper().clone();
		closing.on_destroy(move || backdrop.release());
		// Another drawer's backdrop click retires the shared backdrop, which closes this drawer too.
		backdrop_stopper.stream().take_until(closing).on_value({
			let closing = closing.clone();
			move |()| closing.destroy()
		});

		let container = host.create_element("div")?;
		*container_slot = Some(container.clone());
		host.add_class(&container, CONTAINER_CLASS);
		host.set_style(&container, "z-index", &(BASE_Z_INDEX + 2).to_string());

		let element = host.create_element("div")?;
		host.set_attribute(&element, "role", "dialog")?;
		host.set_attribute(&element, "tabindex", "0")?;
		host.add_class(&element, VIEW_CLASS);
		host.append_child(&container, &element)?;

		if options.chrome {
			let title_bar = host.create_element("div")?;
			host.add_class(&title_bar, TITLE_BAR_CLASS);

			let close_button = host.create_element("button")?;
			host.set_attribute(&close_button, "type", "button")?;
			host.set_attribute(&close_button, "title", "Close")?;
			host.add_class(&close_button, CLOSE_BUTTON_CLASS);
			from_host_event(host, &close_button, "click").take_until(closing).on_value({
				let closing = closing.clone();
				move |()| closing.destroy()
			});
			host.append_child(&title_bar, &close_button)?;

			let title = host.create_element("div")?;
			host.add_class(&title, TITLE_CLASS);
			host.set_attribute(&title, "role", "heading")?;
			host.set_text(&title, &options.title);
			host.append_child(&title_bar, &title)?;

			host.append_child(&element, &title_bar)?;
		}

		host.append_child(&element, &options.content)?;
		host.append_child(&target, &container)?;

		closing.on_destroy({
			let (host, element, container, closed) = (host.clone(), element.clone(), container.clone(), closed.clone());
			move || {
				host.remove_class(&element, ACTIVE_CLASS);
				let remove = host.clone();
				transition_end_or_timeout(&host, &element, CLOSE_FALLBACK_MS).on_value(move |()| {
					closed.destroy();
					remove.remove(&container);
				});
			}
		});

		// Without a layout in between, adding the class wouldn't transition.
		host.force_layout(&element);
		host.add_class(&element, ACTIVE_CLASS);

		Ok(DrawerView {
			host: host.clone(),
			slide_animation_done: from_host_event(host, &element, "transitionend").take(1).take_until(closing),
			container,
			element,
			closing: closing.clone(),
			closed: closed.clone(),
		})
	}
}

/// An open (or closing) drawer.
pub struct DrawerView<H: Host> {
	host: H,
	container: H::Node,
	element: H::Node,
	closing: Stopper,
	closed: Stopper,
	slide_animation_done: EventStream<()>,
}

impl<H: Host> Debug for DrawerView<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("DrawerView")
			.field("element", &node_field(&self.element))
			.field("closing", &self.closing)
			.field("closed", &self.closed)
			.finish_non_exhaustive()
	}
}

impl<H: Host> DrawerView<H> {
	/// The outermost element, carrying the drawer's stacking index.
	pub fn container(&self) -> &H::Node {
		&self.container
	}

	/// The `role=dialog` element that slides in.
	pub fn element(&self) -> &H::Node {
		&self.element
	}

	/// Destroyed as soon as the drawer starts closing.
	pub fn closing(&self) -> &Stopper {
		&self.closing
	}

	/// Destroyed once the drawer is gone and its z-index claims are released.
	pub fn closed(&self) -> &Stopper {
		&self.closed
	}

	/// Emits once when the slide-in transition ends, unless the drawer starts closing first.
	#[must_use]
	pub fn slide_animation_done(&self) -> EventStream<()> {
		self.slide_animation_done.clone()
	}

	#[must_use]
	pub fn is_open(&self) -> bool {
		!self.closing.is_destroyed() && self.host.is_connected(&self.container)
	}

	/// Starts closing. Idempotent.
	pub fn close(&self) {
		self.closing.destroy()
	}
}
