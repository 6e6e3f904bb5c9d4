//! [`Host`] for the browser DOM, through `web-sys`.

use crate::{
	host::{Host, MutationCallback, MutationKind, MutationRecord, NodeKey, ObserveOptions},
	report::HostError,
	stream::{noop_teardown, Teardown},
};
use core::cell::Cell;
use js_sys::{Array, Function, Object, WeakMap};
use std::rc::Rc;
use tracing::{trace, warn};
use wasm_bindgen::{closure::Closure, prelude::wasm_bindgen, JsCast, JsValue};
use web_sys::{Document, Element, HtmlElement, MutationObserver, MutationObserverInit, NodeList, Window};

#[wasm_bindgen]
extern "C" {
	#[wasm_bindgen(js_name = "queueMicrotask")]
	fn queue_microtask_js(callback: &JsValue);
}

fn js_message(value: &JsValue) -> String {
	value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

/// Drops `closure` in a later microtask.
///
/// Teardowns often run from inside the very callback they remove,
/// and a [`Closure`] mustn't be freed while it is executing.
fn drop_later<T: ?Sized + 'static>(closure: Closure<T>) {
	let dropper = Closure::once_into_js(move || drop(closure));
	queue_microtask_js(&dropper);
}

struct WebInner {
	window: Window,
	document: Document,
	keys: WeakMap,
	next_key: Cell<u64>,
}

/// The live page's document.
#[derive(Clone)]
pub struct WebHost {
	inner: Rc<WebInner>,
}

impl core::fmt::Debug for WebHost {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("WebHost").field("assigned_keys", &self.inner.next_key.get()).finish_non_exhaustive()
	}
}

impl WebHost {
	/// Attaches to the current window's document.
	pub fn new() -> Result<Self, HostError> {
		let window = web_sys::window().ok_or_else(|| HostError::Operation {
			operation: "window",
			message: "There is no global `window`.".to_owned(),
		})?;
		let document = window.document().ok_or_else(|| HostError::Operation {
			operation: "document",
			message: "The window has no document.".to_owned(),
		})?;
		Ok(Self {
			inner: Rc::new(WebInner {
				window,
				document,
				keys: WeakMap::new(),
				next_key: Cell::new(0),
			}),
		})
	}

	#[must_use]
	pub fn document(&self) -> &Document {
		&self.inner.document
	}

	fn elements(list: &NodeList) -> Vec<Element> {
		(0..list.length()).filter_map(|i| list.item(i)).filter_map(|node| node.dyn_into::<Element>().ok()).collect()
	}

	fn convert_record(record: &web_sys::MutationRecord) -> Option<MutationRecord<Element>> {
		let target = record.target()?.dyn_into::<Element>().ok()?;
		let kind = match record.type_().as_str() {
			"childList" => MutationKind::ChildList {
				added: Self::elements(&record.added_nodes()),
				removed: Self::elements(&record.removed_nodes()),
			},
			"attributes" => MutationKind::Attributes { name: record.attribute_name()? },
			_ => return None,
		};
		Some(MutationRecord { target, kind })
	}
}

impl Host for WebHost {
	type Node = Element;

	fn node_key(&self, node: &Element) -> NodeKey {
		let object: &Object = node.as_ref();
		if let Some(key) = self.inner.keys.get(object).as_f64() {
			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			let key = key as u64;
			return NodeKey(key);
		}

		let key = self.inner.next_key.get();
		self.inner.next_key.set(key + 1);
		#[allow(clippy::cast_precision_loss)]
		let value = JsValue::from_f64(key as f64);
		self.inner.keys.set(object, &value);
		NodeKey(key)
	}

	fn observe(&self, target: &Element, options: &ObserveOptions, callback: MutationCallback<Element>) -> Result<Teardown, HostError> {
		let closure = Closure::wrap(Box::new(move |records: Array, _observer: MutationObserver| {
			let records: Vec<MutationRecord<Element>> = records
				.iter()
				.filter_map(|record| record.dyn_into::<web_sys::MutationRecord>().ok())
				.filter_map(|record| Self::convert_record(&record))
				.collect();
			trace!("Mutation observer delivered {} record(s).", records.len());
			callback(records)
		}) as Box<dyn FnMut(Array, MutationObserver)>);

		let observer = MutationObserver::new(closure.as_ref().unchecked_ref()).map_err(|error| HostError::Observe(js_message(&error)))?;

		let mut init = MutationObserverInit::new();
		init.child_list(options.child_list).attributes(options.attributes || options.attribute_filter.is_some()).subtree(options.subtree);
		if let Some(filter) = &options.attribute_filter {
			let filter: Array = filter.iter().map(|name| JsValue::from_str(name)).collect();
			init.attribute_filter(&filter);
		}
		observer.observe_with_options(target, &init).map_err(|error| HostError::Observe(js_message(&error)))?;

		Ok(Box::new(move || {
			observer.disconnect();
			drop_later(closure);
		}))
	}

	fn queue_microtask(&self, task: Box<dyn FnOnce()>) {
		queue_microtask_js(&Closure::once_into_js(task));
	}

	fn set_timeout(&self, delay_ms: u32, task: Box<dyn FnOnce()>) -> Teardown {
		let closure = Closure::once(task);
		let handle = self
			.inner
			.window
			.set_timeout_with_callback_and_timeout_and_arguments_0(closure.as_ref().unchecked_ref::<Function>(), i32::try_from(delay_ms).unwrap_or(i32::MAX));
		match handle {
			Ok(handle) => {
				let window = self.inner.window.clone();
				Box::new(move || {
					window.clear_timeout_with_handle(handle);
					drop_later(closure);
				})
			}
			Err(error) => {
				warn!(error = %js_message(&error), "Could not set a timeout. It won't fire.");
				noop_teardown()
			}
		}
	}

	fn listen(&self, target: &Element, event: &str, handler: Rc<dyn Fn()>) -> Result<Teardown, HostError> {
		let closure = Closure::wrap(Box::new(move || handler()) as Box<dyn Fn()>);
		target
			.add_event_listener_with_callback(event, closure.as_ref().unchecked_ref())
			.map_err(|error| HostError::Listen(js_message(&error)))?;

		let (target, event) = (target.clone(), event.to_owned());
		Ok(Box::new(move || {
			if let Err(error) = target.remove_event_listener_with_callback(&event, closure.as_ref().unchecked_ref()) {
				warn!(error = %js_message(&error), "Could not remove an event listener.");
			}
			drop_later(closure);
		}))
	}

	fn body(&self) -> Option<Element> {
		self.inner.document.body().map(Into::into)
	}

	fn children(&self, parent: &Element) -> Vec<Element> {
		let children = parent.children();
		(0..children.length()).filter_map(|i| children.item(i)).collect()
	}

	fn parent(&self, node: &Element) -> Option<Element> {
		node.parent_element()
	}

	fn is_connected(&self, node: &Element) -> bool {
		node.is_connected()
	}

	fn find_by_class(&self, root: &Element, class: &str) -> Option<Element> {
		match root.query_selector(&format!(".{}", class)) {
			Ok(found) => found,
			Err(error) => {
				warn!(class, error = %js_message(&error), "Invalid class selector.");
				None
			}
		}
	}

	fn create_element(&self, tag: &str) -> Result<Element, HostError> {
		self.inner.document.create_element(tag).map_err(|error| HostError::Operation {
			operation: "createElement",
			message: js_message(&error),
		})
	}

	fn append_child(&self, parent: &Element, child: &Element) -> Result<(), HostError> {
		parent.append_child(child).map(drop).map_err(|error| HostError::Operation {
			operation: "appendChild",
			message: js_message(&error),
		})
	}

	fn insert_before(&self, parent: &Element, child: &Element, reference: Option<&Element>) -> Result<(), HostError> {
		parent.insert_before(child, reference.map(|reference| &**reference)).map(drop).map_err(|error| HostError::Operation {
			operation: "insertBefore",
			message: js_message(&error),
		})
	}

	fn remove(&self, node: &Element) {
		node.remove()
	}

	fn set_text(&self, node: &Element, text: &str) {
		node.set_text_content(Some(text))
	}

	fn attribute(&self, node: &Element, name: &str) -> Option<String> {
		node.get_attribute(name)
	}

	fn set_attribute(&self, node: &Element, name: &str, value: &str) -> Result<(), HostError> {
		node.set_attribute(name, value).map_err(|error| HostError::Operation {
			operation: "setAttribute",
			message: js_message(&error),
		})
	}

	fn remove_attribute(&self, node: &Element, name: &str) {
		if let Err(error) = node.remove_attribute(name) {
			warn!(name, error = %js_message(&error), "Could not remove attribute.");
		}
	}

	fn has_class(&self, node: &Element, class: &str) -> bool {
		node.class_list().contains(class)
	}

	fn add_class(&self, node: &Element, class: &str) {
		if let Err(error) = node.class_list().add_1(class) {
			warn!(class, error = %js_message(&error), "Could not add class.");
		}
	}

	fn remove_class(&self, node: &Element, class: &str) {
		if let Err(error) = node.class_list().remove_1(class) {
			warn!(class, error = %js_message(&error), "Could not remove class.");
		}
	}

	fn style(&self, node: &Element, property: &str) -> Option<String> {
		let value = node.dyn_ref::<HtmlElement>()?.style().get_property_value(property).ok()?;
		if value.is_empty() {
			None
		} else {
			Some(value)
		}
	}

	fn set_style(&self, node: &Element, property: &str, value: &str) {
		match node.dyn_ref::<HtmlElement>() {
			Some(element) => {
				if let Err(error) = element.style().set_property(property, value) {
					warn!(property, error = %js_message(&error), "Could not set style.");
				}
			}
			None => warn!(property, "Can't style a non-HTML element."),
		}
	}

	fn remove_style(&self, node: &Element, property: &str) {
		if let Some(element) = node.dyn_ref::<HtmlElement>() {
			if let Err(error) = element.style().remove_property(property) {
				warn!(property, error = %js_message(&error), "Could not remove style.");
			}
		}
	}

	fn computed_style(&self, node: &Element, property: &str) -> Option<String> {
		let style = self.inner.window.get_computed_style(node).ok()??;
		style.get_property_value(property).ok()
	}

	fn force_layout(&self, node: &Element) {
		if let Some(element) = node.dyn_ref::<HtmlElement>() {
			let _ = element.offset_height();
		}
	}
}
