//! Realtime drop-in lookup

pub mod locator;

pub use locator::{locate_drop_in, DropInLocator, DropInRequest, NO_DROP_IN_TARGET};
