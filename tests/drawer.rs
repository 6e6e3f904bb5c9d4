use dom_watch::{
	host::Host,
	report::HostError,
	views::drawer::{DrawerContext, DrawerOptions, ACTIVE_CLASS, BACKDROP_CLASS, CLOSE_BUTTON_CLASS, CONTAINER_CLASS, TITLE_BAR_CLASS, TITLE_CLASS, VIEW_CLASS},
	virtual_dom::{VirtualDom, VirtualNode},
	Event,
};
use std::{cell::RefCell, rc::Rc};

fn setup() -> (VirtualDom, DrawerContext<VirtualDom>, VirtualNode) {
	let dom = VirtualDom::new();
	let context = DrawerContext::new(dom.clone());
	let body = dom.body().unwrap();
	(dom, context, body)
}

/// A positioned root with an anchor inside it.
fn anchored(dom: &VirtualDom) -> (VirtualNode, VirtualNode) {
	let root = dom.element("div", &[]);
	dom.set_style(&root, "z-index", "3");
	dom.append_child(&dom.body().unwrap(), &root).unwrap();
	let anchor = dom.element("div", &[]);
	dom.append_child(&root, &anchor).unwrap();
	(root, anchor)
}

fn backdrops_in(dom: &VirtualDom, parent: &VirtualNode) -> usize {
	dom.children(parent).iter().filter(|child| dom.has_class(child, BACKDROP_CLASS)).count()
}

#[test]
fn open_builds_the_drawer_over_a_backdrop() {
	let (dom, context, body) = setup();
	let content = dom.element("p", &[]);
	let view = context.open(DrawerOptions::new("Inbox", content)).unwrap();

	let children = dom.children(&body);
	assert_eq!(children.len(), 2);
	let (backdrop, container) = (children[0], children[1]);

	assert!(dom.has_class(&backdrop, BACKDROP_CLASS));
	assert!(dom.has_class(&backdrop, ACTIVE_CLASS));
	assert_eq!(dom.style(&backdrop, "z-index").as_deref(), Some("500"));

	assert_eq!(&container, view.container());
	assert!(dom.has_class(&container, CONTAINER_CLASS));
	assert_eq!(dom.style(&container, "z-index").as_deref(), Some("502"));

	let element = *view.element();
	assert_eq!(dom.children(&container), [element]);
	assert!(dom.has_class(&element, VIEW_CLASS));
	assert!(dom.has_class(&element, ACTIVE_CLASS));
	assert_eq!(dom.attribute(&element, "role").as_deref(), Some("dialog"));
	assert_eq!(dom.attribute(&element, "tabindex").as_deref(), Some("0"));

	let parts = dom.children(&element);
	assert_eq!(parts.len(), 2);
	assert!(dom.has_class(&parts[0], TITLE_BAR_CLASS));
	assert_eq!(parts[1], content);

	let title_bar = dom.children(&parts[0]);
	assert!(dom.has_class(&title_bar[0], CLOSE_BUTTON_CLASS));
	assert_eq!(dom.attribute(&title_bar[0], "title").as_deref(), Some("Close"));
	assert!(dom.has_class(&title_bar[1], TITLE_CLASS));
	assert_eq!(dom.attribute(&title_bar[1], "role").as_deref(), Some("heading"));
	assert_eq!(dom.text(title_bar[1]), "Inbox");

	// One for the backdrop and one for the drawer, each before its active class.
	assert_eq!(dom.layout_count(), 2);
	assert!(view.is_open());
	assert_eq!(body_z_index(&dom), None);
}

fn body_z_index(dom: &VirtualDom) -> Option<String> {
	dom.style(&dom.body().unwrap(), "z-index")
}

#[test]
fn drawers_without_chrome_hold_only_their_content() {
	let (dom, context, _) = setup();
	let content = dom.element("p", &[]);
	let view = context.open(DrawerOptions::new("Bare", content).without_chrome()).unwrap();
	assert_eq!(dom.children(view.element()), [content]);
}

#[test]
fn closing_waits_for_the_transition_or_the_fallback_timeout() {
	let (dom, context, body) = setup();
	let view = context.open(DrawerOptions::new("Inbox", dom.element("p", &[]))).unwrap();
	let element = *view.element();

	view.close();
	assert!(!view.is_open());
	assert!(view.closing().is_destroyed());
	assert!(!dom.has_class(&element, ACTIVE_CLASS));
	assert_eq!(backdrops_in(&dom, &body), 0);
	assert_eq!(dom.children(&body), [*view.container()]);

	dom.advance(199);
	assert!(!view.closed().is_destroyed());
	dom.advance(1);
	assert!(view.closed().is_destroyed());
	assert!(dom.children(&body).is_empty());
	assert_eq!(dom.listener_count(), 0);
	assert_eq!(dom.timer_count(), 0);

	// Idempotent.
	view.close();
}

#[test]
fn transition_end_finishes_closing_early() {
	let (dom, context, body) = setup();
	let view = context.open(DrawerOptions::new("Inbox", dom.element("p", &[]))).unwrap();

	view.close();
	dom.dispatch(*view.element(), "transitionend");
	assert!(view.closed().is_destroyed());
	assert!(dom.children(&body).is_empty());
	assert_eq!(dom.timer_count(), 0);
}

#[test]
fn drawers_on_one_root_share_a_backdrop() {
	let (dom, context, body) = setup();
	let first = context.open(DrawerOptions::new("First", dom.element("p", &[]))).unwrap();
	let second = context.open(DrawerOptions::new("Second", dom.element("p", &[]))).unwrap();

	assert_eq!(backdrops_in(&dom, &body), 1);
	assert_eq!(context.backdrops().lease_count(&dom.node_key(&body)), 2);

	first.close();
	assert_eq!(backdrops_in(&dom, &body), 1);
	assert!(second.is_open());

	second.close();
	assert_eq!(backdrops_in(&dom, &body), 0);
	assert_eq!(context.backdrops().lease_count(&dom.node_key(&body)), 0);
}

#[test]
fn clicking_the_backdrop_closes_every_drawer_above_it() {
	let (dom, context, body) = setup();
	let first = context.open(DrawerOptions::new("First", dom.element("p", &[]))).unwrap();
	let second = context.open(DrawerOptions::new("Second", dom.element("p", &[]))).unwrap();
	let backdrop = dom.find_by_class(&body, BACKDROP_CLASS).unwrap();

	dom.dispatch(backdrop, "click");
	assert!(first.closing().is_destroyed());
	assert!(second.closing().is_destroyed());
	assert_eq!(dom.parent(&backdrop), None);

	// A new drawer gets a new backdrop.
	let third = context.open(DrawerOptions::new("Third", dom.element("p", &[]))).unwrap();
	let new_backdrop = dom.find_by_class(&body, BACKDROP_CLASS).unwrap();
	assert_ne!(new_backdrop, backdrop);
	assert!(third.is_open());
}

#[test]
fn the_close_button_closes_only_its_drawer() {
	let (dom, context, body) = setup();
	let first = context.open(DrawerOptions::new("First", dom.element("p", &[]))).unwrap();
	let second = context.open(DrawerOptions::new("Second", dom.element("p", &[]))).unwrap();

	let close_button = dom.find_by_class(first.element(), CLOSE_BUTTON_CLASS).unwrap();
	dom.dispatch(close_button, "click");
	assert!(first.closing().is_destroyed());
	assert!(second.is_open());
	assert_eq!(backdrops_in(&dom, &body), 1);
}

#[test]
fn anchored_drawers_lift_their_root_and_anchor_until_closed() {
	let (dom, context, _) = setup();
	let (root, anchor) = anchored(&dom);
	let view = context.open(DrawerOptions::new("Details", dom.element("p", &[])).with_anchor(anchor)).unwrap();

	assert_eq!(dom.parent(view.container()), Some(root));
	assert_eq!(backdrops_in(&dom, &root), 1);
	assert_eq!(dom.style(&root, "z-index").as_deref(), Some("500"));
	assert_eq!(dom.style(&anchor, "z-index").as_deref(), Some("501"));

	view.close();
	// Still lifted while sliding out.
	assert_eq!(dom.style(&root, "z-index").as_deref(), Some("500"));
	dom.advance(200);
	assert_eq!(dom.style(&root, "z-index").as_deref(), Some("3"));
	assert_eq!(dom.style(&anchor, "z-index"), None);
}

#[test]
fn overlapping_anchored_drawers_restore_the_original_stacking() {
	let (dom, context, _) = setup();
	let (root, anchor) = anchored(&dom);
	let first = context.open(DrawerOptions::new("First", dom.element("p", &[])).with_anchor(anchor)).unwrap();
	let second = context.open(DrawerOptions::new("Second", dom.element("p", &[])).with_anchor(anchor)).unwrap();
	assert_eq!(backdrops_in(&dom, &root), 1);

	first.close();
	dom.advance(200);
	assert_eq!(dom.style(&root, "z-index").as_deref(), Some("500"));
	assert_eq!(dom.style(&anchor, "z-index").as_deref(), Some("501"));

	second.close();
	dom.advance(200);
	assert_eq!(dom.style(&root, "z-index").as_deref(), Some("3"));
	assert_eq!(dom.style(&anchor, "z-index"), None);
}

#[test]
fn unanchored_drawers_leave_styles_alone() {
	let (dom, context, _) = setup();
	let view = context.open(DrawerOptions::new("Inbox", dom.element("p", &[]))).unwrap();
	assert_eq!(body_z_index(&dom), None);
	view.close();
	dom.advance(200);
	assert_eq!(body_z_index(&dom), None);
}

#[test]
fn slide_animation_done_fires_once() {
	let (dom, context, _) = setup();
	let view = context.open(DrawerOptions::new("Inbox", dom.element("p", &[]))).unwrap();

	let log = Rc::new(RefCell::new(Vec::new()));
	view.slide_animation_done().subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});
	dom.dispatch(*view.element(), "transitionend");
	dom.dispatch(*view.element(), "transitionend");
	assert_eq!(*log.borrow(), [Event::Value(()), Event::End]);
}

#[test]
fn slide_animation_done_ends_silently_when_closed_first() {
	let (dom, context, _) = setup();
	let view = context.open(DrawerOptions::new("Inbox", dom.element("p", &[]))).unwrap();

	let log = Rc::new(RefCell::new(Vec::new()));
	view.slide_animation_done().subscribe({
		let log = log.clone();
		move |event| log.borrow_mut().push(event)
	});
	view.close();
	assert_eq!(*log.borrow(), [Event::End]);
}

#[test]
fn a_failed_open_undoes_its_work() {
	let (dom, context, _) = setup();
	let (root, anchor) = anchored(&dom);

	// Moving the target root into the drawer makes attaching the drawer to it impossible.
	let error = context.open(DrawerOptions::new("Broken", root).with_anchor(anchor)).unwrap_err();
	assert!(matches!(error, HostError::Operation { operation: "insertBefore", .. }));

	assert_eq!(context.backdrops().lease_count(&dom.node_key(&root)), 0);
	assert_eq!(backdrops_in(&dom, &root), 0);
	assert_eq!(dom.style(&root, "z-index").as_deref(), Some("3"));
	assert_eq!(dom.style(&anchor, "z-index"), None);
}
