//! In-memory model catalog.

use std::collections::BTreeMap;

use crate::core::{ModelCatalog, ModelDescriptor};

/// Fixed set of known models.
#[derive(Debug, Clone, Default)]
pub struct InMemoryModelCatalog {
    models: BTreeMap<String, ModelDescriptor>,
}

impl InMemoryModelCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog knowing `names`, with no class information.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::new();
        for name in names {
            catalog.insert(ModelDescriptor {
                name: name.into(),
                class: None,
            });
        }
        catalog
    }

    /// Add or replace a model.
    pub fn insert(&mut self, model: ModelDescriptor) {
        self.models.insert(model.name.clone(), model);
    }

    /// Known model names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Number of known models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelCatalog for InMemoryModelCatalog {
    fn resolve(&self, name: &str) -> Option<ModelDescriptor> {
        self.models.get(name.trim()).cloned()
    }
}
