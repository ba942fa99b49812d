//! Namespaced state database
//!
//! [`StateDB`] stores JSON values under `namespace:identifier` keys on top
//! of a string [`DataConnector`]. Each value is wrapped in a `{"v": value}`
//! envelope before it reaches the connector, so the database's own format
//! stays independent of whatever else the connector stores.
//!
//! Every operation first waits for the database to become ready, which
//! happens once the optional initial [`DataTransform`] has been applied.

use crate::connector::{DataConnector, InMemoryConnector, Listing};
use crate::error::{StateError, StateResult};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use nbclient_core::Signal;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Initial transform applied before the database becomes ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Leave the stored data untouched
    Cancel,
    /// Remove everything
    Clear,
    /// Save the supplied contents over the existing data
    Merge,
    /// Clear, then save the supplied contents
    Overwrite,
}

/// Transform request with its seed data
#[derive(Debug, Clone)]
pub struct DataTransform {
    /// Transform kind
    pub kind: TransformKind,
    /// Seed entries, keyed by full id
    pub contents: Option<Map<String, Value>>,
}

impl DataTransform {
    /// Transform that does nothing
    #[inline]
    #[must_use]
    pub fn cancel() -> Self {
        Self {
            kind: TransformKind::Cancel,
            contents: None,
        }
    }

    /// Transform that clears the database
    #[inline]
    #[must_use]
    pub fn clear() -> Self {
        Self {
            kind: TransformKind::Clear,
            contents: None,
        }
    }

    /// Transform that merges seed data
    #[inline]
    #[must_use]
    pub fn merge(contents: Map<String, Value>) -> Self {
        Self {
            kind: TransformKind::Merge,
            contents: Some(contents),
        }
    }

    /// Transform that replaces everything with seed data
    #[inline]
    #[must_use]
    pub fn overwrite(contents: Map<String, Value>) -> Self {
        Self {
            kind: TransformKind::Overwrite,
            contents: Some(contents),
        }
    }
}

/// Kind of change reported by [`StateDB::changed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeKind {
    /// A value was saved
    Save,
    /// A value was removed
    Remove,
}

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Affected id
    pub id: String,
    /// What happened
    pub kind: StateChangeKind,
}

type Ready = Shared<BoxFuture<'static, Result<(), String>>>;

/// Namespaced JSON state database
pub struct StateDB {
    connector: Arc<dyn DataConnector<String>>,
    ready: Ready,
    changed: Signal<StateDB, StateChange>,
}

impl StateDB {
    /// Create database over a connector, ready immediately
    #[must_use]
    pub fn new(connector: Arc<dyn DataConnector<String>>) -> Self {
        Self::with_transform(connector, async { DataTransform::cancel() })
    }

    /// Create database backed by a fresh [`InMemoryConnector`]
    #[inline]
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryConnector::new()))
    }

    /// Create database that applies `transform` before serving requests
    ///
    /// The transform future may resolve at any time; operations issued
    /// before then wait for it.
    pub fn with_transform<F>(connector: Arc<dyn DataConnector<String>>, transform: F) -> Self
    where
        F: Future<Output = DataTransform> + Send + 'static,
    {
        let backend = Arc::clone(&connector);
        let ready = async move {
            let transform = transform.await;
            apply_transform(backend.as_ref(), transform)
                .await
                .map_err(|e| e.to_string())
        }
        .boxed()
        .shared();

        Self {
            connector,
            ready,
            changed: Signal::new(),
        }
    }

    /// Signal emitted after every save and remove
    #[inline]
    #[must_use]
    pub fn changed(&self) -> &Signal<StateDB, StateChange> {
        &self.changed
    }

    /// Remove every entry
    ///
    /// # Errors
    /// Propagates connector failures and a failed initial transform.
    pub async fn clear(&self) -> StateResult<()> {
        self.wait_ready().await?;
        clear_connector(self.connector.as_ref()).await
    }

    /// Every entry as one JSON object keyed by id
    ///
    /// # Errors
    /// Propagates connector failures and malformed entries.
    pub async fn to_json(&self) -> StateResult<Map<String, Value>> {
        let listing = self.list("").await?;
        Ok(listing.ids.into_iter().zip(listing.values).collect())
    }

    async fn wait_ready(&self) -> StateResult<()> {
        self.ready.clone().await.map_err(StateError::Transform)
    }
}

#[async_trait]
impl DataConnector<Value> for StateDB {
    async fn fetch(&self, id: &str) -> StateResult<Option<Value>> {
        self.wait_ready().await?;
        match self.connector.fetch(id).await? {
            Some(raw) => unwrap_envelope(id, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn list(&self, query: &str) -> StateResult<Listing<Value>> {
        self.wait_ready().await?;
        let raw = self.connector.list(query).await?;
        let mut listing = Listing::new();
        for (id, value) in raw.ids.into_iter().zip(raw.values) {
            listing.values.push(unwrap_envelope(&id, &value)?);
            listing.ids.push(id);
        }
        Ok(listing)
    }

    async fn save(&self, id: &str, value: Value) -> StateResult<()> {
        self.wait_ready().await?;
        self.connector.save(id, wrap_envelope(value)?).await?;
        self.changed.emit(
            self,
            &StateChange {
                id: id.to_string(),
                kind: StateChangeKind::Save,
            },
        );
        Ok(())
    }

    async fn remove(&self, id: &str) -> StateResult<()> {
        self.wait_ready().await?;
        self.connector.remove(id).await?;
        self.changed.emit(
            self,
            &StateChange {
                id: id.to_string(),
                kind: StateChangeKind::Remove,
            },
        );
        Ok(())
    }
}

impl fmt::Debug for StateDB {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDB")
            .field("changed", &self.changed)
            .finish_non_exhaustive()
    }
}

fn wrap_envelope(value: Value) -> StateResult<String> {
    let mut envelope = Map::new();
    envelope.insert("v".to_string(), value);
    Ok(serde_json::to_string(&Value::Object(envelope))?)
}

fn unwrap_envelope(id: &str, raw: &str) -> StateResult<Value> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(mut envelope) => envelope
            .remove("v")
            .ok_or_else(|| StateError::MalformedEntry(id.to_string())),
        _ => Err(StateError::MalformedEntry(id.to_string())),
    }
}

async fn clear_connector(connector: &dyn DataConnector<String>) -> StateResult<()> {
    let listing = connector.list("").await?;
    futures::future::try_join_all(listing.ids.iter().map(|id| connector.remove(id))).await?;
    Ok(())
}

async fn merge_into(
    connector: &dyn DataConnector<String>,
    contents: Map<String, Value>,
) -> StateResult<()> {
    for (id, value) in contents {
        connector.save(&id, wrap_envelope(value)?).await?;
    }
    Ok(())
}

async fn apply_transform(
    connector: &dyn DataConnector<String>,
    transform: DataTransform,
) -> StateResult<()> {
    tracing::debug!("applying state transform: {:?}", transform.kind);
    match transform.kind {
        TransformKind::Cancel => Ok(()),
        TransformKind::Clear => clear_connector(connector).await,
        TransformKind::Merge => merge_into(connector, transform.contents.unwrap_or_default()).await,
        TransformKind::Overwrite => {
            clear_connector(connector).await?;
            merge_into(connector, transform.contents.unwrap_or_default()).await
        }
    }
}
