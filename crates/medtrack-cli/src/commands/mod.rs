pub mod cache;
pub mod common;
pub mod completions;
pub mod queue;
pub mod status;
pub mod sync;
