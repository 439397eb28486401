//! ViewRepository - Typed accessor for view documents.

use std::marker::PhantomData;

use super::{Charged, DocumentKey, DocumentStore, Precondition, StoreError, Versioned};
use crate::view::ViewDocument;

/// Typed repository wrapper for reading and writing views of a specific type.
///
/// Handles the JSON (de)serialization so callers work with view structs
/// rather than raw documents. Charges are passed through untouched.
pub struct ViewRepository<'a, S: ?Sized, V> {
    store: &'a S,
    _marker: PhantomData<V>,
}

impl<'a, S: DocumentStore + ?Sized, V: ViewDocument> ViewRepository<'a, S, V> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    /// Get a view by id and partition. Returns None if it does not exist.
    pub async fn get(
        &self,
        id: &str,
        partition: &str,
    ) -> Result<Charged<Option<Versioned<V>>>, StoreError> {
        let key = DocumentKey::new(id, partition);
        let Charged { value, charge } = self.store.get(&key).await?;

        let view = match value {
            Some(stored) => Some(Versioned {
                data: serde_json::from_value::<V>(stored.body)?,
                version: stored.version,
            }),
            None => None,
        };

        Ok(Charged::new(view, charge))
    }

    /// Create or replace a view, subject to `precondition`.
    pub async fn upsert(
        &self,
        view: &V,
        precondition: Precondition,
    ) -> Result<Charged<Versioned<V>>, StoreError> {
        let body = serde_json::to_value(view)?;
        let Charged { value, charge } = self.store.upsert(&view.key(), body, precondition).await?;

        Ok(Charged::new(
            Versioned {
                data: view.clone(),
                version: value,
            },
            charge,
        ))
    }
}

/// Extension trait for typed view access on any DocumentStore.
pub trait ViewsExt: DocumentStore {
    /// Get a typed view repository.
    fn views<V: ViewDocument>(&self) -> ViewRepository<'_, Self, V> {
        ViewRepository::new(self)
    }
}

impl<S: DocumentStore + ?Sized> ViewsExt for S {}
