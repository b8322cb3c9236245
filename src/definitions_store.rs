use std::sync::{Arc, RwLock};

use crate::models::FlagDefinitions;

/// `DefinitionsStore` holds the currently published [`FlagDefinitions`] snapshot and allows
/// concurrent access for readers (flag evaluation) and a writer (definitions fetch).
///
/// A snapshot is never mutated once published, only replaced as a whole. Readers clone the `Arc`
/// once and keep using that snapshot for the rest of the operation.
#[derive(Default)]
pub struct DefinitionsStore {
    definitions: RwLock<Option<Arc<FlagDefinitions>>>,
}

impl DefinitionsStore {
    /// Create an empty store.
    pub fn new() -> Self {
        DefinitionsStore::default()
    }

    /// Get the current snapshot. Returns `None` until definitions have been fetched at least once.
    pub fn get_definitions(&self) -> Option<Arc<FlagDefinitions>> {
        // self.definitions.read() should always return Ok(). Err() is possible only if the lock is
        // poisoned (writer panicked while holding the lock), which should never happen.
        let definitions = self
            .definitions
            .read()
            .expect("thread holding definitions lock should not panic");

        definitions.clone()
    }

    /// Publish a new snapshot, returning the previous one.
    pub fn set_definitions(&self, definitions: FlagDefinitions) -> Option<Arc<FlagDefinitions>> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Some(Arc::new(definitions));

        let mut slot = self
            .definitions
            .write()
            .expect("thread holding definitions lock should not panic");

        std::mem::replace(&mut slot, new_value)
    }

    /// `true` once a snapshot has been published.
    pub fn is_ready(&self) -> bool {
        self.get_definitions().is_some()
    }
}
