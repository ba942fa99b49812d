//! Session manager
//!
//! Keeps a cached list of running session models and kernel specs in sync
//! with the server through two polls, and tracks the sessions it starts or
//! connects to.
//!
//! Readiness: construction spawns one refresh of the specs followed by one
//! refresh of the running sessions; [`SessionManager::ready`] resolves when
//! that finishes (whether or not it succeeded).

use super::default::DefaultSession;
use super::model::{SessionModel, SessionOptions};
use super::registry::RunningSessions;
use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::kernel::{get_specs, KernelSpecs};
use crate::settings::ServerSettings;
use futures::FutureExt;
use nbclient_core::{
    Disposable, DisposalState, FlagGuard, Poll, PollError, PollOptions, Signal, SlotId, Standby,
};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};

/// Session manager tuning
#[derive(Debug, Clone)]
pub struct SessionManagerOptions {
    /// Running-session refresh interval
    pub running_interval: Duration,
    /// Kernel spec refresh interval
    pub specs_interval: Duration,
    /// Skips poll ticks while active
    pub standby: Standby,
}

impl Default for SessionManagerOptions {
    fn default() -> Self {
        Self {
            running_interval: Duration::from_secs(10),
            specs_interval: Duration::from_secs(61),
            standby: Standby::Never,
        }
    }
}

impl SessionManagerOptions {
    /// Intervals from configuration
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            running_interval: config.running_interval(),
            specs_interval: config.specs_interval(),
            standby: Standby::Never,
        }
    }

    /// With standby predicate
    #[must_use]
    pub fn with_standby(mut self, standby: Standby) -> Self {
        self.standby = standby;
        self
    }
}

struct Tracked {
    session: Arc<DefaultSession>,
    terminated: SlotId,
    property: SlotId,
    kernel: SlotId,
}

impl Tracked {
    fn disconnect(&self) {
        self.session.terminated().disconnect(self.terminated);
        self.session.property_changed().disconnect(self.property);
        self.session.kernel_changed().disconnect(self.kernel);
    }
}

/// Polled view of the server's sessions
pub struct SessionManager {
    this: Weak<Self>,
    settings: ServerSettings,
    registry: Arc<RunningSessions>,
    models: RwLock<Vec<SessionModel>>,
    specs: RwLock<Option<KernelSpecs>>,
    tracked: Mutex<Vec<Tracked>>,
    refresh_lock: AsyncMutex<()>,
    /// Set while `refresh_running` is between fetch and publish
    refreshing: AtomicBool,
    /// A termination changed the list while `refreshing` was set
    pending_change: AtomicBool,
    ready: OnceCell<()>,
    running_poll: Poll,
    specs_poll: Poll,
    disposal: DisposalState,
    running_changed: Signal<SessionManager, Vec<SessionModel>>,
    specs_changed: Signal<SessionManager, KernelSpecs>,
}

fn poll_factory<F, Fut>(
    manager: Weak<SessionManager>,
    refresh: F,
) -> impl Fn() -> futures::future::BoxFuture<'static, Result<(), PollError>> + Send + Sync + 'static
where
    F: Fn(Arc<SessionManager>) -> Fut + Send + Sync + Copy + 'static,
    Fut: Future<Output = Result<(), SessionError>> + Send + 'static,
{
    move || {
        let manager = manager.clone();
        async move {
            match manager.upgrade() {
                Some(manager) => refresh(manager).await.map_err(|e| Box::new(e) as PollError),
                None => Ok(()),
            }
        }
        .boxed()
    }
}

impl SessionManager {
    /// Create manager and start polling
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        settings: ServerSettings,
        registry: Arc<RunningSessions>,
        options: SessionManagerOptions,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|this: &Weak<Self>| {
            let running_poll = Poll::start(
                PollOptions::new("sessions", options.running_interval)
                    .with_standby(options.standby.clone()),
                poll_factory(this.clone(), |m| async move {
                    m.refresh_running().await.map(drop)
                }),
            );
            let specs_poll = Poll::start(
                PollOptions::new("kernelspecs", options.specs_interval)
                    .with_standby(options.standby.clone()),
                poll_factory(this.clone(), |m| async move { m.refresh_specs().await.map(drop) }),
            );
            Self {
                this: this.clone(),
                settings,
                registry,
                models: RwLock::new(Vec::new()),
                specs: RwLock::new(None),
                tracked: Mutex::new(Vec::new()),
                refresh_lock: AsyncMutex::new(()),
                refreshing: AtomicBool::new(false),
                pending_change: AtomicBool::new(false),
                ready: OnceCell::new(),
                running_poll,
                specs_poll,
                disposal: DisposalState::new(),
                running_changed: Signal::new(),
                specs_changed: Signal::new(),
            }
        });

        let weak = Arc::downgrade(&manager);
        tokio::spawn(async move {
            if let Some(manager) = weak.upgrade() {
                manager.ready().await;
            }
        });
        manager
    }

    /// Wait for the initial specs and running-session refresh
    pub async fn ready(&self) {
        self.ready
            .get_or_init(|| async {
                if let Err(e) = self.refresh_specs().await {
                    tracing::warn!("initial kernel spec refresh failed: {}", e);
                }
                if let Err(e) = self.refresh_running().await {
                    tracing::warn!("initial session refresh failed: {}", e);
                }
            })
            .await;
    }

    /// Whether the initial refresh has finished
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.initialized()
    }

    /// Server settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Session registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<RunningSessions> {
        &self.registry
    }

    /// Last known running sessions
    #[must_use]
    pub fn running(&self) -> Vec<SessionModel> {
        self.models.read().clone()
    }

    /// Last known kernel specs
    #[must_use]
    pub fn specs(&self) -> Option<KernelSpecs> {
        self.specs.read().clone()
    }

    /// Emitted with the full model list whenever it changes
    #[inline]
    #[must_use]
    pub fn running_changed(&self) -> &Signal<SessionManager, Vec<SessionModel>> {
        &self.running_changed
    }

    /// Emitted when the kernel specs change
    #[inline]
    #[must_use]
    pub fn specs_changed(&self) -> &Signal<SessionManager, KernelSpecs> {
        &self.specs_changed
    }

    /// Number of sessions this manager tracks
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Start a new session and track it
    ///
    /// # Errors
    /// `SessionError::ManagerDisposed` or any server error.
    pub async fn start_new(&self, options: &SessionOptions) -> Result<Arc<DefaultSession>, SessionError> {
        self.ensure_live()?;
        let session = DefaultSession::start_new(&self.settings, &self.registry, options).await?;
        self.on_started(&session);
        Ok(session)
    }

    /// Connect to a running session and track it
    ///
    /// # Errors
    /// `SessionError::ManagerDisposed`.
    pub fn connect_to(&self, model: &SessionModel) -> Result<Arc<DefaultSession>, SessionError> {
        self.ensure_live()?;
        let session = DefaultSession::connect_to(&self.settings, &self.registry, model);
        self.on_started(&session);
        Ok(session)
    }

    /// Session model by id
    ///
    /// # Errors
    /// `SessionError::ManagerDisposed`, `SessionError::NotFound` or any
    /// server error.
    pub async fn find_by_id(&self, id: &str) -> Result<SessionModel, SessionError> {
        self.ensure_live()?;
        DefaultSession::find_by_id(&self.settings, &self.registry, id).await
    }

    /// Session model by path
    ///
    /// # Errors
    /// `SessionError::ManagerDisposed`, `SessionError::NotFound` or any
    /// server error.
    pub async fn find_by_path(&self, path: &str) -> Result<SessionModel, SessionError> {
        self.ensure_live()?;
        DefaultSession::find_by_path(&self.settings, &self.registry, path).await
    }

    /// Shut a session down
    ///
    /// The model is removed from the running list, and `running_changed`
    /// fires, before the request is sent. Tracked sessions with the id are
    /// disposed once the server confirms.
    ///
    /// # Errors
    /// `SessionError::ManagerDisposed` or any server error.
    pub async fn shutdown(&self, id: &str) -> Result<(), SessionError> {
        self.ensure_live()?;
        let remaining = {
            let mut models = self.models.write();
            let before = models.len();
            models.retain(|m| m.id != id);
            (models.len() != before).then(|| models.clone())
        };
        if let Some(models) = remaining {
            self.running_changed.emit(self, &models);
        }

        DefaultSession::shutdown_by_id(&self.settings, &self.registry, id).await?;

        let sessions: Vec<Arc<DefaultSession>> = self
            .tracked
            .lock()
            .iter()
            .filter(|t| t.session.id() == id)
            .map(|t| Arc::clone(&t.session))
            .collect();
        for session in sessions {
            session.dispose();
        }
        Ok(())
    }

    /// Shut every running session down
    ///
    /// # Errors
    /// The first failure; every shutdown is still attempted.
    pub async fn shutdown_all(&self) -> Result<(), SessionError> {
        let models = self.refresh_running().await?;
        let results = futures::future::join_all(
            models
                .iter()
                .map(|m| DefaultSession::shutdown_by_id(&self.settings, &self.registry, &m.id)),
        )
        .await;
        self.refresh_running().await?;
        results.into_iter().collect()
    }

    /// Shut down the session bound to `path`, if exactly one exists
    ///
    /// Never fails; errors are logged.
    pub async fn stop_if_needed(&self, path: &str) {
        let models = match DefaultSession::list_running(&self.settings, &self.registry).await {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!("could not list sessions for {}: {}", path, e);
                return;
            }
        };
        let matches: Vec<&SessionModel> = models.iter().filter(|m| m.path == path).collect();
        if let [only] = matches.as_slice() {
            if let Err(e) = self.shutdown(&only.id).await {
                tracing::warn!("could not stop session for {}: {}", path, e);
            }
        }
    }

    /// Fetch the running sessions now
    ///
    /// When the list differs from the cached one, tracked sessions that
    /// disappeared are disposed and `running_changed` fires once.
    /// Refreshes run one at a time.
    ///
    /// # Errors
    /// `SessionError::ManagerDisposed` or any server error.
    pub async fn refresh_running(&self) -> Result<Vec<SessionModel>, SessionError> {
        self.ensure_live()?;
        let _serial = self.refresh_lock.lock().await;
        let _refreshing = FlagGuard::raise(&self.refreshing);

        let fetched = DefaultSession::list_running(&self.settings, &self.registry).await;
        let pending = self.pending_change.swap(false, Ordering::AcqRel);
        let models = match fetched {
            Ok(models) => models,
            Err(e) => {
                if pending {
                    let current = self.models.read().clone();
                    self.running_changed.emit(self, &current);
                }
                return Err(e);
            }
        };
        if !pending && *self.models.read() == models {
            return Ok(models);
        }

        *self.models.write() = models.clone();
        let stale: Vec<Arc<DefaultSession>> = self
            .tracked
            .lock()
            .iter()
            .filter(|t| !models.iter().any(|m| m.id == t.session.id()))
            .map(|t| Arc::clone(&t.session))
            .collect();
        for session in stale {
            session.dispose();
        }

        tracing::debug!("{} running sessions", models.len());
        self.running_changed.emit(self, &models);
        Ok(models)
    }

    /// Fetch the kernel specs now
    ///
    /// # Errors
    /// `SessionError::ManagerDisposed` or any server error.
    pub async fn refresh_specs(&self) -> Result<KernelSpecs, SessionError> {
        self.ensure_live()?;
        let specs = get_specs(&self.settings).await?;
        let changed = {
            let mut current = self.specs.write();
            if current.as_ref() == Some(&specs) {
                false
            } else {
                *current = Some(specs.clone());
                true
            }
        };
        if changed {
            self.specs_changed.emit(self, &specs);
        }
        Ok(specs)
    }

    /// Whether the manager is disposed
    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposal.is_disposed()
    }

    /// Stop polling and forget tracked sessions without disposing them
    pub fn dispose(&self) {
        if !self.disposal.begin() {
            return;
        }
        self.running_poll.dispose();
        self.specs_poll.dispose();
        for tracked in self.tracked.lock().drain(..) {
            tracked.disconnect();
        }
        self.models.write().clear();
        self.running_changed.disconnect_all();
        self.specs_changed.disconnect_all();
        tracing::debug!("session manager disposed");
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_disposed() {
            Err(SessionError::ManagerDisposed)
        } else {
            Ok(())
        }
    }

    fn on_started(&self, session: &Arc<DefaultSession>) {
        let terminated = session.terminated().connect({
            let manager = self.this.clone();
            move |session, _| {
                if let Some(manager) = manager.upgrade() {
                    manager.on_terminated(session);
                }
            }
        });
        let property = session.property_changed().connect({
            let manager = self.this.clone();
            move |session, _| {
                if let Some(manager) = manager.upgrade() {
                    manager.on_changed(session);
                }
            }
        });
        let kernel = session.kernel_changed().connect({
            let manager = self.this.clone();
            move |session, _| {
                if let Some(manager) = manager.upgrade() {
                    manager.on_changed(session);
                }
            }
        });
        self.tracked.lock().push(Tracked {
            session: Arc::clone(session),
            terminated,
            property,
            kernel,
        });

        let added = {
            let mut models = self.models.write();
            if models.iter().any(|m| m.id == session.id()) {
                None
            } else {
                models.push(session.model());
                Some(models.clone())
            }
        };
        if let Some(models) = added {
            self.running_changed.emit(self, &models);
        }
    }

    fn on_terminated(&self, session: &DefaultSession) {
        self.tracked
            .lock()
            .retain(|t| !std::ptr::eq(Arc::as_ptr(&t.session), session));
        let remaining = {
            let mut models = self.models.write();
            let before = models.len();
            models.retain(|m| m.id != session.id());
            (models.len() != before).then(|| models.clone())
        };
        if let Some(models) = remaining {
            if self.refreshing.load(Ordering::Acquire) {
                self.pending_change.store(true, Ordering::Release);
            } else {
                self.running_changed.emit(self, &models);
            }
        }
    }

    fn on_changed(&self, session: &DefaultSession) {
        let updated = {
            let mut models = self.models.write();
            let fresh = session.model();
            match models.iter_mut().find(|m| m.id == fresh.id) {
                Some(slot) if *slot != fresh => {
                    *slot = fresh;
                    Some(models.clone())
                }
                _ => None,
            }
        };
        if let Some(models) = updated {
            self.running_changed.emit(self, &models);
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.settings.base_url().as_str())
            .field("running", &self.models.read().len())
            .field("ready", &self.is_ready())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
