//! Data connectors
//!
//! A [`DataConnector`] is the storage seam under the state database and
//! the restorable pools. Keys are `namespace:identifier` strings; listing
//! by namespace matches the colon-delimited first token exactly.

use crate::error::StateResult;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;

/// Entries returned by [`DataConnector::list`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Listing<T> {
    /// Entry ids, in storage order
    pub ids: Vec<String>,
    /// Entry values, parallel to `ids`
    pub values: Vec<T>,
}

impl<T> Listing<T> {
    /// Create empty listing
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the listing is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate over `(id, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.ids.iter().map(String::as_str).zip(self.values.iter())
    }
}

/// Namespaced key/value storage
#[async_trait]
pub trait DataConnector<T: Send + 'static>: Send + Sync {
    /// Fetch one entry
    async fn fetch(&self, id: &str) -> StateResult<Option<T>>;

    /// List entries in a namespace; an empty query lists everything
    async fn list(&self, query: &str) -> StateResult<Listing<T>>;

    /// Store an entry, replacing any previous value
    async fn save(&self, id: &str, value: T) -> StateResult<()>;

    /// Remove an entry; removing a missing id is not an error
    async fn remove(&self, id: &str) -> StateResult<()>;
}

/// Colon-delimited first token of an id
#[inline]
#[must_use]
pub fn namespace_of(id: &str) -> &str {
    id.split(':').next().unwrap_or_default()
}

/// Whether `id` belongs to the namespace named by `query`
#[inline]
#[must_use]
pub fn matches_query(id: &str, query: &str) -> bool {
    query.is_empty() || namespace_of(id) == query
}

/// In-memory string connector
///
/// The default backend for [`crate::StateDB`]; insertion order is kept so
/// listings are stable.
#[derive(Debug, Default)]
pub struct InMemoryConnector {
    storage: Mutex<IndexMap<String, String>>,
}

impl InMemoryConnector {
    /// Create empty connector
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    /// Whether nothing is stored
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.storage.lock().is_empty()
    }

    /// Raw stored string for an id
    #[must_use]
    pub fn raw(&self, id: &str) -> Option<String> {
        self.storage.lock().get(id).cloned()
    }
}

#[async_trait]
impl DataConnector<String> for InMemoryConnector {
    async fn fetch(&self, id: &str) -> StateResult<Option<String>> {
        Ok(self.storage.lock().get(id).cloned())
    }

    async fn list(&self, query: &str) -> StateResult<Listing<String>> {
        let storage = self.storage.lock();
        let mut listing = Listing::new();
        for (id, value) in storage.iter().filter(|(id, _)| matches_query(id, query)) {
            listing.ids.push(id.clone());
            listing.values.push(value.clone());
        }
        Ok(listing)
    }

    async fn save(&self, id: &str, value: String) -> StateResult<()> {
        self.storage.lock().insert(id.to_string(), value);
        Ok(())
    }

    async fn remove(&self, id: &str) -> StateResult<()> {
        self.storage.lock().shift_remove(id);
        Ok(())
    }
}
