//! Feature views injected into the host page.

pub mod drawer;
pub mod shortcut_help;
