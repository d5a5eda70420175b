//! Data structures for temperature samples.
//!
//! This module contains the sample type, the persisted sample store and the
//! time-window filter used to derive the visible subset.

pub mod filter;
pub mod sample;
pub mod store;
pub mod window;

pub use sample::Sample;
pub use store::{PersistPolicy, SampleStore, DEFAULT_PERSIST_DEBOUNCE, HISTORY_FORMAT_VERSION};
pub use window::TimeWindow;
