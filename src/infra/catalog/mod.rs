//! Model catalog backends.

pub mod memory;

pub use memory::InMemoryModelCatalog;
