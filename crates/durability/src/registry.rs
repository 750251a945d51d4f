//! Store type registry
//!
//! Maps exception store type names to constructors so the snapshot layer can
//! create a store from the name given in its table.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = StoreTypeRegistry::with_builtin_types();
//! let store = registry.create("P", device, &StoreConfig::default())?;
//! ```

use crate::config::StoreConfig;
use crate::persistent::{PersistentStore, PERSISTENT_STORE_TYPE};
use crate::store::ExceptionStore;
use crate::transient::{TransientStore, TRANSIENT_STORE_TYPE};
use snapstore_core::{Result, StoreError};
use snapstore_storage::BlockDevice;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds an unloaded store of one type.
pub type StoreConstructor = fn(Arc<dyn BlockDevice>, &StoreConfig) -> Result<Box<dyn ExceptionStore>>;

fn create_persistent(
    device: Arc<dyn BlockDevice>,
    config: &StoreConfig,
) -> Result<Box<dyn ExceptionStore>> {
    Ok(Box::new(PersistentStore::new(device, config.clone())?))
}

fn create_transient(
    device: Arc<dyn BlockDevice>,
    config: &StoreConfig,
) -> Result<Box<dyn ExceptionStore>> {
    Ok(Box::new(TransientStore::new(device, config)?))
}

struct Registration {
    name: String,
    constructor: StoreConstructor,
}

/// Registry of exception store types.
///
/// Names and aliases are matched case-insensitively.
pub struct StoreTypeRegistry {
    types: Vec<Registration>,
    /// Lowercased name or alias -> index into `types`
    lookup: HashMap<String, usize>,
}

impl StoreTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        StoreTypeRegistry {
            types: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Registry holding the persistent (`"P"`) and transient (`"N"`) stores.
    pub fn with_builtin_types() -> Self {
        let mut registry = StoreTypeRegistry::new();
        registry.register(PERSISTENT_STORE_TYPE, &["P"], create_persistent);
        registry.register(TRANSIENT_STORE_TYPE, &["N"], create_transient);
        registry
    }

    /// Register a store type under `name` and any short `aliases`.
    ///
    /// Re-registering a name replaces its constructor.
    pub fn register(&mut self, name: &str, aliases: &[&str], constructor: StoreConstructor) {
        let index = match self.lookup.get(&name.to_ascii_lowercase()) {
            Some(&index) => {
                self.types[index].constructor = constructor;
                index
            }
            None => {
                self.types.push(Registration {
                    name: name.to_string(),
                    constructor,
                });
                self.types.len() - 1
            }
        };

        for key in std::iter::once(&name).chain(aliases.iter()) {
            self.lookup.insert(key.to_ascii_lowercase(), index);
        }
    }

    /// Check if a name or alias is registered
    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered type names (aliases excluded), in registration order
    pub fn names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }

    /// Create an unloaded store of the named type.
    pub fn create(
        &self,
        name: &str,
        device: Arc<dyn BlockDevice>,
        config: &StoreConfig,
    ) -> Result<Box<dyn ExceptionStore>> {
        let index = self
            .lookup
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| StoreError::UnknownStoreType(name.to_string()))?;
        (self.types[*index].constructor)(device, config)
    }
}

impl Default for StoreTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
