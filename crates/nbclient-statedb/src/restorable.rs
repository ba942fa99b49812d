//! Restorable object pools
//!
//! A [`RestorablePool`] tracks a set of disposable objects (typically open
//! documents or panels) and persists enough data about each one to reopen
//! it after a reload:
//!
//! ```text
//! add(obj) ──name(obj)──▶ connector.save("namespace:name", {"data": args(obj)})
//! restore() ──list(namespace)──▶ registry.execute(command, data) per entry
//!                                  └─ failure ─▶ connector.remove(id)
//! obj disposed ──▶ removed from pool, entry deleted (unless injected)
//! ```

use crate::command::CommandRegistry;
use crate::connector::DataConnector;
use crate::error::PoolError;
use nbclient_core::{DisposalState, ObservableDisposable, Signal, SlotId};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Weak};

type ArgsFn<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
type NameFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// How pooled objects are persisted and restored
pub struct RestoreOptions<T> {
    /// Command that recreates an object from its persisted args
    pub command: String,
    /// Arguments persisted for an object
    pub args: ArgsFn<T>,
    /// Restoration name of an object; empty means "do not persist"
    pub name: NameFn<T>,
    /// Registry used to execute `command`
    pub registry: Arc<dyn CommandRegistry>,
    /// Where restoration entries live
    pub connector: Arc<dyn DataConnector<Value>>,
}

impl<T> RestoreOptions<T> {
    /// Create options; args default to `null`
    pub fn new<N>(
        command: impl Into<String>,
        registry: Arc<dyn CommandRegistry>,
        connector: Arc<dyn DataConnector<Value>>,
        name: N,
    ) -> Self
    where
        N: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self {
            command: command.into(),
            args: Arc::new(|_| Value::Null),
            name: Arc::new(name),
            registry,
            connector,
        }
    }

    /// With args function
    #[must_use]
    pub fn with_args<A>(mut self, args: A) -> Self
    where
        A: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.args = Arc::new(args);
        self
    }
}

impl<T> Clone for RestoreOptions<T> {
    fn clone(&self) -> Self {
        Self {
            command: self.command.clone(),
            args: Arc::clone(&self.args),
            name: Arc::clone(&self.name),
            registry: Arc::clone(&self.registry),
            connector: Arc::clone(&self.connector),
        }
    }
}

impl<T> fmt::Debug for RestoreOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreOptions")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Result of [`RestorablePool::restore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Entries whose command succeeded
    pub restored: Vec<String>,
    /// Entries deleted because they were unusable or their command failed
    pub removed: Vec<String>,
}

struct Entry<T> {
    object: Arc<T>,
    injected: bool,
    /// Full persisted id (`namespace:name`), empty when not persisted
    name: String,
    slot: SlotId,
}

struct PoolState<T> {
    entries: Vec<Entry<T>>,
    current: Option<Arc<T>>,
    restore: Option<RestoreOptions<T>>,
    restored: bool,
}

/// Tracked set of restorable objects
pub struct RestorablePool<T: ObservableDisposable + 'static> {
    namespace: String,
    this: Weak<Self>,
    state: Mutex<PoolState<T>>,
    disposal: DisposalState,
    added: Signal<Self, Arc<T>>,
    updated: Signal<Self, Arc<T>>,
    current_changed: Signal<Self, Option<Arc<T>>>,
}

impl<T: ObservableDisposable + 'static> RestorablePool<T> {
    /// Create empty pool for a namespace
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Arc<Self> {
        let namespace = namespace.into();
        Arc::new_cyclic(|this| Self {
            namespace,
            this: this.clone(),
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                current: None,
                restore: None,
                restored: false,
            }),
            disposal: DisposalState::new(),
            added: Signal::new(),
            updated: Signal::new(),
            current_changed: Signal::new(),
        })
    }

    /// Pool namespace
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Emitted after an object is added (not for injected objects)
    #[inline]
    #[must_use]
    pub fn added(&self) -> &Signal<Self, Arc<T>> {
        &self.added
    }

    /// Emitted when an object's restoration name changes on save
    #[inline]
    #[must_use]
    pub fn updated(&self) -> &Signal<Self, Arc<T>> {
        &self.updated
    }

    /// Emitted when the current object changes
    #[inline]
    #[must_use]
    pub fn current_changed(&self) -> &Signal<Self, Option<Arc<T>>> {
        &self.current_changed
    }

    /// Add an object
    ///
    /// When restoration is configured and the object's name is not empty,
    /// its args are persisted under `namespace:name` before `added` fires.
    ///
    /// # Errors
    /// - `PoolError::Disposed` if the object is already disposed
    /// - `PoolError::AlreadyTracked` if the object is already in the pool
    /// - `PoolError::State` if persisting fails; the object is not tracked
    pub async fn add(&self, object: Arc<T>) -> Result<(), PoolError> {
        self.track(object, false).await
    }

    /// Track an object managed elsewhere
    ///
    /// Injected objects are never persisted and their disposal never
    /// deletes restoration data.
    ///
    /// # Errors
    /// Same as [`RestorablePool::add`].
    pub async fn inject(&self, object: Arc<T>) -> Result<(), PoolError> {
        self.track(object, true).await
    }

    async fn track(&self, object: Arc<T>, injected: bool) -> Result<(), PoolError> {
        if self.disposal.is_disposed() {
            return Err(PoolError::PoolDisposed);
        }
        if object.is_disposed() {
            tracing::warn!("pool '{}': refusing disposed object", self.namespace);
            return Err(PoolError::Disposed);
        }

        let restore = {
            let mut state = self.state.lock();
            if state.entries.iter().any(|e| Arc::ptr_eq(&e.object, &object)) {
                tracing::warn!("pool '{}': object already tracked", self.namespace);
                return Err(PoolError::AlreadyTracked);
            }

            let pool = self.this.clone();
            let slot = object.disposed().connect(move |sender, _| {
                if let Some(pool) = pool.upgrade() {
                    pool.on_instance_disposed(sender);
                }
            });
            state.entries.push(Entry {
                object: Arc::clone(&object),
                injected,
                name: String::new(),
                slot,
            });
            state.restore.clone()
        };

        if injected {
            return Ok(());
        }

        if let Some(restore) = restore {
            let short = (restore.name)(&object);
            if !short.is_empty() {
                let name = self.qualify(&short);
                let data = (restore.args)(&object);
                self.set_name(&object, &name);
                if let Err(e) = restore.connector.save(&name, json!({ "data": data })).await {
                    tracing::warn!("pool '{}': persisting '{}' failed: {}", self.namespace, name, e);
                    self.untrack(&object);
                    return Err(e.into());
                }
            }
        }

        self.added.emit(self, &object);
        Ok(())
    }

    /// Whether the object is tracked
    #[must_use]
    pub fn has(&self, object: &Arc<T>) -> bool {
        self.state
            .lock()
            .entries
            .iter()
            .any(|e| Arc::ptr_eq(&e.object, object))
    }

    /// Number of tracked objects
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Current object, if any
    #[must_use]
    pub fn current(&self) -> Option<Arc<T>> {
        self.state.lock().current.clone()
    }

    /// Make a tracked object current
    ///
    /// Returns `false` (and changes nothing) for untracked objects.
    pub fn set_current(&self, object: &Arc<T>) -> bool {
        {
            let mut state = self.state.lock();
            if state
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, object))
            {
                return true;
            }
            if !state.entries.iter().any(|e| Arc::ptr_eq(&e.object, object)) {
                return false;
            }
            state.current = Some(Arc::clone(object));
        }
        self.current_changed.emit(self, &Some(Arc::clone(object)));
        true
    }

    /// First tracked object matching the predicate
    pub fn find<P>(&self, mut predicate: P) -> Option<Arc<T>>
    where
        P: FnMut(&T) -> bool,
    {
        self.snapshot().into_iter().find(|object| predicate(object))
    }

    /// Every tracked object matching the predicate
    pub fn filter<P>(&self, mut predicate: P) -> Vec<Arc<T>>
    where
        P: FnMut(&T) -> bool,
    {
        self.snapshot()
            .into_iter()
            .filter(|object| predicate(object))
            .collect()
    }

    /// Visit every tracked object in insertion order
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<T>),
    {
        for object in self.snapshot() {
            f(&object);
        }
    }

    /// Configure restoration and re-run the command for every persisted entry
    ///
    /// Entries without a `data` key or whose command fails are deleted; a
    /// `null` payload is passed to the command as is. One bad
    /// entry never aborts the rest of the batch.
    ///
    /// # Errors
    /// - `PoolError::AlreadyRestored` on a second call
    /// - `PoolError::State` if listing the namespace fails
    pub async fn restore(&self, options: RestoreOptions<T>) -> Result<RestoreReport, PoolError> {
        {
            let mut state = self.state.lock();
            if state.restored {
                return Err(PoolError::AlreadyRestored);
            }
            state.restored = true;
            state.restore = Some(options.clone());
        }

        let saved = options.connector.list(&self.namespace).await?;
        tracing::debug!(
            "pool '{}': restoring {} entries",
            self.namespace,
            saved.len()
        );

        let outcomes = futures::future::join_all(saved.ids.iter().zip(saved.values.iter()).map(
            |(id, value)| {
                let options = &options;
                async move {
                    let Some(args) = value.get("data") else {
                        return (id.clone(), false);
                    };
                    match options.registry.execute(&options.command, args).await {
                        Ok(_) => (id.clone(), true),
                        Err(e) => {
                            tracing::warn!("restoring '{}' failed: {}", id, e);
                            (id.clone(), false)
                        }
                    }
                }
            },
        ))
        .await;

        let mut report = RestoreReport::default();
        for (id, ok) in outcomes {
            if ok {
                report.restored.push(id);
            } else {
                if let Err(e) = options.connector.remove(&id).await {
                    tracing::warn!("removing stale restore entry '{}' failed: {}", id, e);
                }
                report.removed.push(id);
            }
        }
        Ok(report)
    }

    /// Re-persist an object's restoration data
    ///
    /// If the object's name changed, the entry under the old name is
    /// deleted and `updated` fires.
    ///
    /// # Errors
    /// Propagates connector failures.
    pub async fn save(&self, object: &Arc<T>) -> Result<(), PoolError> {
        let (restore, old_name) = {
            let state = self.state.lock();
            let Some(restore) = state.restore.clone() else {
                return Ok(());
            };
            match state.entries.iter().find(|e| Arc::ptr_eq(&e.object, object)) {
                Some(entry) if !entry.injected => (restore, entry.name.clone()),
                _ => return Ok(()),
            }
        };

        let short = (restore.name)(object);
        let new_name = if short.is_empty() {
            String::new()
        } else {
            self.qualify(&short)
        };

        if !old_name.is_empty() && old_name != new_name {
            restore.connector.remove(&old_name).await?;
        }
        self.set_name(object, &new_name);

        if !new_name.is_empty() {
            let data = (restore.args)(object);
            restore
                .connector
                .save(&new_name, json!({ "data": data }))
                .await?;
        }

        if old_name != new_name {
            self.updated.emit(self, object);
        }
        Ok(())
    }

    /// Whether the pool is disposed
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposal.is_disposed()
    }

    /// Stop tracking every object
    ///
    /// Tracked objects are not disposed; their disposal listeners are
    /// disconnected and the pool's signals are cleared.
    pub fn dispose(&self) {
        if !self.disposal.begin() {
            return;
        }
        let entries = {
            let mut state = self.state.lock();
            state.current = None;
            std::mem::take(&mut state.entries)
        };
        for entry in entries {
            entry.object.disposed().disconnect(entry.slot);
        }
        self.added.disconnect_all();
        self.updated.disconnect_all();
        self.current_changed.disconnect_all();
    }

    fn qualify(&self, name: &str) -> String {
        format!("{}:{}", self.namespace, name)
    }

    fn set_name(&self, object: &Arc<T>, name: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| Arc::ptr_eq(&e.object, object))
        {
            entry.name = name.to_string();
        }
    }

    fn untrack(&self, object: &Arc<T>) {
        let entry = {
            let mut state = self.state.lock();
            let Some(idx) = state
                .entries
                .iter()
                .position(|e| Arc::ptr_eq(&e.object, object))
            else {
                return;
            };
            state.entries.remove(idx)
        };
        object.disposed().disconnect(entry.slot);
    }

    fn snapshot(&self) -> Vec<Arc<T>> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|e| Arc::clone(&e.object))
            .collect()
    }

    fn on_instance_disposed(&self, object: &T) {
        let (entry, current_cleared, connector) = {
            let mut state = self.state.lock();
            let Some(idx) = state
                .entries
                .iter()
                .position(|e| std::ptr::eq(Arc::as_ptr(&e.object), object))
            else {
                return;
            };
            let entry = state.entries.remove(idx);
            let current_cleared = state
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &entry.object));
            if current_cleared {
                state.current = None;
            }
            let connector = state.restore.as_ref().map(|r| Arc::clone(&r.connector));
            (entry, current_cleared, connector)
        };

        if current_cleared {
            self.current_changed.emit(self, &None);
        }
        if entry.injected || entry.name.is_empty() {
            return;
        }
        let Some(connector) = connector else {
            return;
        };

        let name = entry.name;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = connector.remove(&name).await {
                        tracing::warn!("removing restore entry '{}' failed: {}", name, e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("no runtime to remove restore entry '{}'", name);
            }
        }
    }
}

impl<T: ObservableDisposable + 'static> fmt::Debug for RestorablePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestorablePool")
            .field("namespace", &self.namespace)
            .field("size", &self.size())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Listing;
    use crate::error::{CommandError, StateError, StateResult};
    use crate::statedb::StateDB;
    use async_trait::async_trait;
    use mockall::mock;
    use nbclient_core::Disposable;
    use pretty_assertions::assert_eq;

    mock! {
        pub Commands {}

        #[async_trait]
        impl CommandRegistry for Commands {
            async fn execute(&self, command: &str, args: &Value) -> Result<Value, CommandError>;
        }
    }

    #[derive(Debug)]
    struct Panel {
        path: Mutex<String>,
        state: DisposalState,
        disposed: Signal<Panel, ()>,
    }

    impl Panel {
        fn new(path: &str) -> Arc<Self> {
            Arc::new(Self {
                path: Mutex::new(path.to_string()),
                state: DisposalState::new(),
                disposed: Signal::new(),
            })
        }

        fn path(&self) -> String {
            self.path.lock().clone()
        }
    }

    impl Disposable for Panel {
        fn is_disposed(&self) -> bool {
            self.state.is_disposed()
        }

        fn dispose(&self) {
            if self.state.begin() {
                self.disposed.emit(self, &());
            }
        }
    }

    impl ObservableDisposable for Panel {
        fn disposed(&self) -> &Signal<Self, ()> {
            &self.disposed
        }
    }

    struct ReadOnlyConnector;

    #[async_trait]
    impl DataConnector<Value> for ReadOnlyConnector {
        async fn fetch(&self, _id: &str) -> StateResult<Option<Value>> {
            Ok(None)
        }

        async fn list(&self, _query: &str) -> StateResult<Listing<Value>> {
            Ok(Listing::default())
        }

        async fn save(&self, _id: &str, _value: Value) -> StateResult<()> {
            Err(StateError::Connector("read-only".to_string()))
        }

        async fn remove(&self, _id: &str) -> StateResult<()> {
            Ok(())
        }
    }

    fn options(db: &Arc<StateDB>, commands: MockCommands) -> RestoreOptions<Panel> {
        RestoreOptions::new("docs:open", Arc::new(commands), db.clone(), |p: &Panel| {
            p.path()
        })
        .with_args(|p: &Panel| json!({ "path": p.path() }))
    }

    async fn restored_pool(db: &Arc<StateDB>) -> Arc<RestorablePool<Panel>> {
        let pool = RestorablePool::new("editor");
        pool.restore(options(db, MockCommands::new())).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn add_rejects_disposed_and_duplicates() {
        let pool = RestorablePool::new("editor");
        let panel = Panel::new("a.md");

        pool.add(Arc::clone(&panel)).await.unwrap();
        assert!(matches!(
            pool.add(Arc::clone(&panel)).await,
            Err(PoolError::AlreadyTracked)
        ));

        let dead = Panel::new("b.md");
        dead.dispose();
        assert!(matches!(pool.add(dead).await, Err(PoolError::Disposed)));
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn add_persists_restoration_data() {
        let db = Arc::new(StateDB::in_memory());
        let pool = restored_pool(&db).await;
        let panel = Panel::new("notes.md");

        pool.add(Arc::clone(&panel)).await.unwrap();

        assert_eq!(
            db.fetch("editor:notes.md").await.unwrap(),
            Some(json!({ "data": { "path": "notes.md" } }))
        );
    }

    #[tokio::test]
    async fn failed_persist_leaves_object_untracked() {
        let pool = RestorablePool::new("editor");
        let options = RestoreOptions::new(
            "docs:open",
            Arc::new(MockCommands::new()),
            Arc::new(ReadOnlyConnector),
            |p: &Panel| p.path(),
        );
        pool.restore(options).await.unwrap();
        let added = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&added);
        pool.added().connect(move |_, _| *counter.lock() += 1);

        let panel = Panel::new("locked.md");
        assert!(matches!(
            pool.add(Arc::clone(&panel)).await,
            Err(PoolError::State(StateError::Connector(_)))
        ));

        assert!(!pool.has(&panel));
        assert_eq!(pool.size(), 0);
        assert_eq!(*added.lock(), 0);
        assert_eq!(panel.disposed.slot_count(), 0);

        pool.inject(Arc::clone(&panel)).await.unwrap();
        assert!(pool.has(&panel));
    }

    #[tokio::test]
    async fn injected_objects_are_not_persisted() {
        let db = Arc::new(StateDB::in_memory());
        let pool = restored_pool(&db).await;
        let added = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&added);
        pool.added().connect(move |_, _| *counter.lock() += 1);

        let panel = Panel::new("shared.md");
        pool.inject(Arc::clone(&panel)).await.unwrap();

        assert!(pool.has(&panel));
        assert_eq!(*added.lock(), 0);
        assert!(db.to_json().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disposal_removes_object_and_entry() {
        let db = Arc::new(StateDB::in_memory());
        let pool = restored_pool(&db).await;
        let panel = Panel::new("gone.md");
        pool.add(Arc::clone(&panel)).await.unwrap();
        assert!(pool.set_current(&panel));

        panel.dispose();

        assert!(!pool.has(&panel));
        assert!(pool.current().is_none());
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(db.fetch("editor:gone.md").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_renames_entry_and_emits_updated() {
        let db = Arc::new(StateDB::in_memory());
        let pool = restored_pool(&db).await;
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        pool.updated().connect(move |_, panel: &Arc<Panel>| sink.lock().push(panel.path()));

        let panel = Panel::new("draft.md");
        pool.add(Arc::clone(&panel)).await.unwrap();
        *panel.path.lock() = "final.md".to_string();
        pool.save(&panel).await.unwrap();

        assert_eq!(db.fetch("editor:draft.md").await.unwrap(), None);
        assert_eq!(
            db.fetch("editor:final.md").await.unwrap(),
            Some(json!({ "data": { "path": "final.md" } }))
        );
        assert_eq!(*updates.lock(), vec!["final.md".to_string()]);

        pool.save(&panel).await.unwrap();
        assert_eq!(updates.lock().len(), 1);
    }

    #[tokio::test]
    async fn restore_executes_and_prunes_failures() {
        let db = Arc::new(StateDB::in_memory());
        db.save("editor:good.md", json!({ "data": { "path": "good.md" } }))
            .await
            .unwrap();
        db.save("editor:bad.md", json!({ "data": { "path": "bad.md" } }))
            .await
            .unwrap();
        db.save("editor:empty", json!({ "other": 1 })).await.unwrap();
        db.save("terminal:1", json!({ "data": {} })).await.unwrap();

        let mut commands = MockCommands::new();
        commands
            .expect_execute()
            .times(2)
            .returning(|command, args| {
                assert_eq!(command, "docs:open");
                if args["path"] == "bad.md" {
                    Err(CommandError::failed(command, "no such file"))
                } else {
                    Ok(Value::Null)
                }
            });

        let pool: Arc<RestorablePool<Panel>> = RestorablePool::new("editor");
        let report = pool.restore(options(&db, commands)).await.unwrap();

        assert_eq!(report.restored, vec!["editor:good.md".to_string()]);
        assert_eq!(
            report.removed,
            vec!["editor:bad.md".to_string(), "editor:empty".to_string()]
        );
        let remaining = db.to_json().await.unwrap();
        assert!(remaining.contains_key("editor:good.md"));
        assert!(remaining.contains_key("terminal:1"));
        assert_eq!(remaining.len(), 2);

        assert!(matches!(
            pool.restore(options(&db, MockCommands::new())).await,
            Err(PoolError::AlreadyRestored)
        ));
    }

    #[tokio::test]
    async fn restore_passes_null_data_through() {
        let db = Arc::new(StateDB::in_memory());
        db.save("editor:scratch", json!({ "data": null })).await.unwrap();

        let mut commands = MockCommands::new();
        commands
            .expect_execute()
            .times(1)
            .withf(|command, args| command == "docs:open" && args.is_null())
            .returning(|_, _| Ok(Value::Null));

        let pool: Arc<RestorablePool<Panel>> = RestorablePool::new("editor");
        let report = pool.restore(options(&db, commands)).await.unwrap();

        assert_eq!(report.restored, vec!["editor:scratch".to_string()]);
        assert!(report.removed.is_empty());
        assert_eq!(
            db.fetch("editor:scratch").await.unwrap(),
            Some(json!({ "data": null }))
        );
    }

    #[tokio::test]
    async fn dispose_stops_tracking_without_disposing() {
        let pool = RestorablePool::new("editor");
        let panel = Panel::new("kept.md");
        pool.add(Arc::clone(&panel)).await.unwrap();

        pool.dispose();

        assert_eq!(pool.size(), 0);
        assert!(!panel.is_disposed());
        assert_eq!(panel.disposed.slot_count(), 0);
        assert!(matches!(
            pool.add(Panel::new("late.md")).await,
            Err(PoolError::PoolDisposed)
        ));
    }
}
