//! Adds an app's keyboard shortcuts to the host page's shortcut help overlay.
//!
//! The overlay is a body child with the class `wa`. It is hidden (rather than removed) while
//! it carries `aou`, and its first section heading carries `aov`.

use crate::{
	children::child_stream,
	chunker::watch_mutations,
	host::{Host, ObserveOptions},
	report::{node_field, report, HostError, WatchError},
	stopper::Stopper,
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
	sync::atomic::{AtomicU64, Ordering},
};
use std::rc::{Rc, Weak};
use tracing::{debug, instrument, trace, warn};

pub const OVERLAY_CLASS: &str = "wa";
pub const HIDDEN_CLASS: &str = "aou";
pub const SECTION_HEADING_CLASS: &str = "aov";
pub const TITLE_CLASS: &str = "dom_watch__shortcutHelp_title";
pub const TABLE_CLASS: &str = "dom_watch__shortcutHelp_table";
pub const ICON_CLASS: &str = "dom_watch__icon";

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identifies one registered shortcut, for [`ShortcutHelpModifier::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortcutHandle(u64);

impl ShortcutHandle {
	#[must_use]
	#[allow(clippy::new_without_default)]
	pub fn new() -> Self {
		Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutDescriptor {
	/// Keys separated by `+` (pressed together) or whitespace (pressed in sequence), like `"ctrl+shift+k"` or `"g i"`.
	pub chord: String,
	pub description: Option<String>,
}

/// Who the listed shortcuts belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdentity {
	pub id: String,
	pub name: Option<String>,
	pub icon_url: Option<String>,
}

impl AppIdentity {
	/// Fills each field that is still empty from `other`. The first non-empty value wins.
	fn fill_from(&mut self, other: &AppIdentity) {
		if self.id.is_empty() {
			self.id = other.id.clone();
		}
		if self.name.as_deref().map_or(true, str::is_empty) {
			self.name = other.name.clone();
		}
		if self.icon_url.as_deref().map_or(true, str::is_empty) {
			self.icon_url = other.icon_url.clone();
		}
	}

	fn display_name(&self) -> &str {
		match self.name.as_deref() {
			Some(name) if !name.is_empty() => name,
			_ => &self.id,
		}
	}
}

/// One rendered piece of a chord.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChordPart {
	Key(String),
	/// The keys before and after are pressed in sequence.
	Then,
	/// The keys before and after are pressed together.
	Plus,
}

fn display_key(key: &str) -> String {
	match key.to_lowercase().as_str() {
		"shift" => "<Shift>".to_owned(),
		"ctrl" => "<Ctrl>".to_owned(),
		"meta" | "command" => "<\u{2318}>".to_owned(),
		_ => key.to_owned(),
	}
}

/// Splits `chord` on whitespace and `+`, with modifier keys in their display form.
///
/// Whitespace other than a plain space separates keys, but isn't rendered.
#[must_use]
pub fn chord_parts(chord: &str) -> Vec<ChordPart> {
	let mut parts = Vec::new();
	let mut key = String::new();
	for c in chord.chars() {
		if c == '+' || c.is_whitespace() {
			parts.push(ChordPart::Key(display_key(&key)));
			key.clear();
			match c {
				' ' => parts.push(ChordPart::Then),
				'+' => parts.push(ChordPart::Plus),
				_ => (),
			}
		} else {
			key.push(c);
		}
	}
	parts.push(ChordPart::Key(display_key(&key)));
	parts
}

/// The chord as plain text, like `"<Ctrl> + k :"`.
#[must_use]
pub fn chord_text(chord: &str) -> String {
	let mut text: String = chord_parts(chord)
		.into_iter()
		.map(|part| match part {
			ChordPart::Key(key) => key,
			ChordPart::Then => " then ".to_owned(),
			ChordPart::Plus => " + ".to_owned(),
		})
		.collect();
	text.push_str(" :");
	text
}

struct ModifierInner<H: Host> {
	host: H,
	stopper: Stopper,
	app: RefCell<AppIdentity>,
	shortcuts: RefCell<Vec<(ShortcutHandle, ShortcutDescriptor)>>,
	/// What the last render inserted, so that re-rendering replaces it.
	rendered: RefCell<Vec<H::Node>>,
}

/// Keeps the app's shortcuts listed in the host's shortcut help overlay while it is shown.
pub struct ShortcutHelpModifier<H: Host> {
	inner: Rc<ModifierInner<H>>,
}

impl<H: Host> Debug for ShortcutHelpModifier<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ShortcutHelpModifier")
			.field("app", &self.inner.app.try_borrow().ok())
			.field("shortcuts", &self.inner.shortcuts.try_borrow().map(|s| s.len()).ok())
			.field("stopper", &self.inner.stopper)
			.finish()
	}
}

impl<H: Host> ShortcutHelpModifier<H> {
	/// Starts watching the body for the overlay.
	#[must_use]
	#[instrument(skip(host))]
	pub fn new(host: H) -> Self {
		let inner = Rc::new(ModifierInner {
			host,
			stopper: Stopper::new(),
			app: RefCell::default(),
			shortcuts: RefCell::default(),
			rendered: RefCell::default(),
		});
		Self::monitor(&inner);
		Self { inner }
	}

	fn monitor(inner: &Rc<ModifierInner<H>>) {
		let host = inner.host.clone();
		let body = match host.body() {
			Some(body) => body,
			None => return warn!("There is no body to watch for the shortcut help overlay."),
		};

		let is_overlay = {
			let host = host.clone();
			move |node: &H::Node| host.has_class(node, OVERLAY_CLASS)
		};
		let weak: Weak<ModifierInner<H>> = Rc::downgrade(inner);
		child_stream(&host, &body, is_overlay)
			.flat_map(move |event| {
				let overlay = event.element;
				// Seeded, so that an overlay that appears already shown renders right away.
				watch_mutations(&host, &overlay, ObserveOptions::attributes(&["class"]))
					.filter({
						let (host, overlay) = (host.clone(), overlay.clone());
						move |_| !host.has_class(&overlay, HIDDEN_CLASS)
					})
					.map(|_| ())
					.to_property(|| ())
					.stream()
					.map(move |()| overlay.clone())
			})
			.take_until(&inner.stopper)
			.on_value(move |overlay| {
				if let Some(inner) = weak.upgrade() {
					inner.render(&overlay)
				}
			});
	}

	/// Registers or replaces the shortcut under `handle`.
	///
	/// `app` fills in the identity fields that are still empty.
	pub fn set(&self, handle: ShortcutHandle, descriptor: ShortcutDescriptor, app: &AppIdentity) {
		self.inner.app.borrow_mut().fill_from(app);
		let mut shortcuts = self.inner.shortcuts.borrow_mut();
		match shortcuts.iter_mut().find(|(existing, _)| *existing == handle) {
			Some((_, existing)) => *existing = descriptor,
			None => shortcuts.push((handle, descriptor)),
		}
	}

	/// Returns whether there was a shortcut under `handle`.
	pub fn delete(&self, handle: ShortcutHandle) -> bool {
		let mut shortcuts = self.inner.shortcuts.borrow_mut();
		let before = shortcuts.len();
		shortcuts.retain(|(existing, _)| *existing != handle);
		shortcuts.len() != before
	}

	#[must_use]
	pub fn shortcut_count(&self) -> usize {
		self.inner.shortcuts.borrow().len()
	}

	#[must_use]
	pub fn app(&self) -> AppIdentity {
		self.inner.app.borrow().clone()
	}

	pub fn stopper(&self) -> &Stopper {
		&self.inner.stopper
	}

	/// Stops watching and forgets all shortcuts. Sections already rendered stay until the host replaces them.
	pub fn destroy(&self) {
		self.inner.stopper.destroy();
		self.inner.shortcuts.borrow_mut().clear();
	}
}

impl<H: Host> ModifierInner<H> {
	fn render(&self, overlay: &H::Node) {
		if self.shortcuts.borrow().is_empty() {
			return trace!("No shortcuts to list.");
		}
		if let Err(error) = self.try_render(overlay) {
			report(&WatchError::HostOperation(error))
		}
	}

	fn try_render(&self, overlay: &H::Node) -> Result<(), HostError> {
		let host = &self.host;
		// The previous header carries the heading class too.
		for stale in self.rendered.borrow_mut().drain(..) {
			host.remove(&stale)
		}

		let first_heading = host.find_by_class(overlay, SECTION_HEADING_CLASS).ok_or_else(|| HostError::Operation {
			operation: "render shortcut help",
			message: "The overlay has no section heading.".to_owned(),
		})?;
		let parent = host.parent(&first_heading).ok_or_else(|| HostError::Operation {
			operation: "render shortcut help",
			message: "The section heading has no parent.".to_owned(),
		})?;

		let header = self.render_header()?;
		let (table, bodies) = self.render_table()?;
		for (index, (_, descriptor)) in self.shortcuts.borrow().iter().enumerate() {
			self.render_shortcut(&bodies[index % 2], descriptor)?;
		}

		host.insert_before(&parent, &header, Some(&first_heading))?;
		host.insert_before(&parent, &table, Some(&first_heading))?;
		debug!(overlay = %node_field(overlay), "Rendered {} shortcut(s).", self.shortcuts.borrow().len());
		self.rendered.borrow_mut().extend([header, table]);
		Ok(())
	}

	fn element(&self, tag: &str, class: &str) -> Result<H::Node, HostError> {
		let element = self.host.create_element(tag)?;
		if !class.is_empty() {
			self.host.set_attribute(&element, "class", class)?;
		}
		Ok(element)
	}

	fn render_header(&self) -> Result<H::Node, HostError> {
		let host = &self.host;
		let app = self.app.borrow();

		let header = self.element("div", "aov  aox")?;
		let wrapper = self.element("div", "aow")?;
		let title = self.element("span", TITLE_CLASS)?;
		if let Some(icon_url) = app.icon_url.as_deref().filter(|url| !url.is_empty()) {
			let icon = self.element("img", ICON_CLASS)?;
			host.set_attribute(&icon, "src", icon_url)?;
			host.append_child(&title, &icon)?;
		}
		let text = self.element("span", "")?;
		host.set_text(&text, &format!("{} keyboard shortcuts", app.display_name()));
		host.append_child(&title, &text)?;
		host.append_child(&wrapper, &title)?;
		host.append_child(&header, &wrapper)?;
		Ok(header)
	}

	/// A two-column table. Returns it along with the body of each column.
	fn render_table(&self) -> Result<(H::Node, [H::Node; 2]), HostError> {
		let host = &self.host;
		let table = self.element("table", &format!("cf wd {}", TABLE_CLASS))?;
		host.set_attribute(&table, "cellpadding", "0")?;
		let body = self.element("tbody", "")?;
		let row = self.element("tr", "")?;

		let column = || -> Result<H::Node, HostError> {
			let cell = self.element("td", "Dn")?;
			let inner = self.element("table", "cf")?;
			host.set_attribute(&inner, "cellpadding", "0")?;
			let inner_body = self.element("tbody", "")?;
			let heading_row = self.element("tr", "")?;
			for _ in 0..2 {
				let heading = self.element("th", "")?;
				host.set_text(&heading, "\u{a0}");
				host.append_child(&heading_row, &heading)?;
			}
			host.append_child(&inner_body, &heading_row)?;
			host.append_child(&inner, &inner_body)?;
			host.append_child(&cell, &inner)?;
			host.append_child(&row, &cell)?;
			Ok(inner_body)
		};
		let bodies = [column()?, column()?];

		host.append_child(&body, &row)?;
		host.append_child(&table, &body)?;
		Ok((table, bodies))
	}

	fn render_shortcut(&self, table_body: &H::Node, descriptor: &ShortcutDescriptor) -> Result<(), HostError> {
		let host = &self.host;
		let row = self.element("tr", "")?;

		let chord = self.element("td", "wg Dn")?;
		for part in chord_parts(&descriptor.chord) {
			let (class, text) = match part {
				ChordPart::Key(key) => ("wh", key),
				ChordPart::Then => ("wb", "then".to_owned()),
				ChordPart::Plus => ("wb", "+".to_owned()),
			};
			let span = self.element("span", class)?;
			host.set_text(&span, &text);
			host.append_child(&chord, &span)?;
		}
		let suffix = self.element("span", "")?;
		host.set_text(&suffix, " :");
		host.append_child(&chord, &suffix)?;

		let description = self.element("td", "we Dn")?;
		host.set_text(&description, descriptor.description.as_deref().unwrap_or_default());

		host.append_child(&row, &chord)?;
		host.append_child(&row, &description)?;
		host.append_child(table_body, &row)?;
		Ok(())
	}
}
