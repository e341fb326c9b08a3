//! Infrastructure adapters for artifact storage and model lookup.

pub mod catalog;
pub mod store;

pub use catalog::InMemoryModelCatalog;
pub use store::{FsArtifactStore, InMemoryArtifactStore};
