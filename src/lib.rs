#![doc(html_root_url = "https://docs.rs/dom-watch/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod arbiter;
pub mod children;
pub mod chunker;
mod composer;
pub mod host;
pub mod lease;
pub mod property;
pub mod rc_hash_map;
pub mod report;
pub mod stopper;
pub mod stream;
pub mod timing;
pub mod views;
pub mod virtual_dom;
pub mod web;

pub use arbiter::{OwnerId, ResourceArbiter, ResourceClaim};
pub use children::{watch_children, ChildEvent, ChildOrigin};
pub use chunker::{watch_attribute_mutations, MutationBatch};
pub use host::Host;
pub use property::Property;
pub use stopper::Stopper;
pub use stream::{Event, EventStream, Subscription};
