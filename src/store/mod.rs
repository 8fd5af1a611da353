//! Persistence layer — one atomically-saved JSON document per ledger.

pub mod json_file;
pub mod memory;
pub mod traits;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use traits::{Document, StateStore};
