//! Platform-specific helpers.

pub mod thread_priority;

pub use thread_priority::{ThreadPriority, raise_current_thread_priority};
