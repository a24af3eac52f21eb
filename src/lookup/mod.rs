//! Lookup module.
//!
//! This module resolves a resource identifier to the provider's canonical
//! state, reporting "not found" as a distinct outcome rather than an error.

mod finder;
mod list;

pub use finder::{finder_for, find_visible, probe, DirectFinder, Finder, Lookup};
pub use list::ListFinder;
