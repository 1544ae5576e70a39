//! Lifecycle job queue backends.

pub mod file;
pub mod memory;

pub use file::FileJobQueue;
pub use memory::InMemoryJobQueue;
