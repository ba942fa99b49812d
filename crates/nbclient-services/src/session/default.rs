//! Kernel sessions
//!
//! A [`DefaultSession`] pairs a document path with a running kernel. It is
//! always constructed with a kernel attached and forwards that kernel's
//! status and messages as its own signals.
//!
//! Lifecycle:
//! 1. created from a server model, registered in [`RunningSessions`]
//! 2. `update(model)` reconciles local fields with the server; a new
//!    kernel id rebuilds the kernel wiring and emits `kernel_changed`
//! 3. `dispose()` disposes the kernel, emits a dead status and
//!    `terminated`, and unregisters the session
//!
//! While a PATCH issued by this session is in flight, `update` is a no-op,
//! so a concurrent server push cannot clobber the pending write.

use super::model::{
    KernelChange, KernelRequest, SessionModel, SessionOptions, SessionProperty,
};
use super::registry::RunningSessions;
use crate::error::{ServerError, SessionError};
use crate::kernel::{KernelConnection, KernelMessage, KernelStatus};
use crate::settings::ServerSettings;
use nbclient_core::{
    Disposable, DisposalState, FlagGuard, ObservableDisposable, Signal, SlotId,
};
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

const SESSIONS: [&str; 2] = ["api", "sessions"];

struct KernelSlots {
    status: SlotId,
    iopub: SlotId,
    unhandled: SlotId,
    any: SlotId,
}

struct SessionState {
    path: String,
    name: String,
    kind: String,
    kernel: Arc<KernelConnection>,
    slots: Option<KernelSlots>,
}

/// One kernel session
pub struct DefaultSession {
    this: Weak<Self>,
    id: String,
    settings: ServerSettings,
    registry: Arc<RunningSessions>,
    state: Mutex<SessionState>,
    updating: AtomicBool,
    disposal: DisposalState,
    status_changed: Signal<DefaultSession, KernelStatus>,
    iopub_message: Signal<DefaultSession, KernelMessage>,
    unhandled_message: Signal<DefaultSession, KernelMessage>,
    any_message: Signal<DefaultSession, KernelMessage>,
    kernel_changed: Signal<DefaultSession, KernelChange>,
    property_changed: Signal<DefaultSession, SessionProperty>,
    terminated: Signal<DefaultSession, ()>,
    disposed: Signal<DefaultSession, ()>,
}

impl DefaultSession {
    fn create(
        model: &SessionModel,
        settings: &ServerSettings,
        registry: &Arc<RunningSessions>,
    ) -> Arc<Self> {
        let kernel = KernelConnection::new(model.kernel.clone(), settings.clone());
        let session = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            id: model.id.clone(),
            settings: settings.clone(),
            registry: Arc::clone(registry),
            state: Mutex::new(SessionState {
                path: model.path.clone(),
                name: model.name.clone(),
                kind: model.kind.clone(),
                kernel: Arc::clone(&kernel),
                slots: None,
            }),
            updating: AtomicBool::new(false),
            disposal: DisposalState::new(),
            status_changed: Signal::new(),
            iopub_message: Signal::new(),
            unhandled_message: Signal::new(),
            any_message: Signal::new(),
            kernel_changed: Signal::new(),
            property_changed: Signal::new(),
            terminated: Signal::new(),
            disposed: Signal::new(),
        });
        session.setup_kernel(kernel);
        registry.register(Arc::clone(&session));
        tracing::info!("session {} attached to {}", session.id, session.path());
        session
    }

    /// Start a new session on the server
    ///
    /// # Errors
    /// Any server error, or a validation error for a malformed reply.
    pub async fn start_new(
        settings: &ServerSettings,
        registry: &Arc<RunningSessions>,
        options: &SessionOptions,
    ) -> Result<Arc<Self>, SessionError> {
        let url = settings.url(&SESSIONS, "")?;
        let body = serde_json::to_value(options).map_err(ServerError::from)?;
        let resp = settings
            .request(Method::POST, url, Some(body), &[201])
            .await?;
        let model = SessionModel::from_value(resp.decode::<Value>("session model")?)?;
        registry.update_from_server(settings.base_url().as_str(), &model);
        Ok(Self::create(&model, settings, registry))
    }

    /// Connect to a session the server already runs
    ///
    /// Connecting to an id that already has a local session returns a
    /// clone of it sharing the same model.
    #[must_use]
    pub fn connect_to(
        settings: &ServerSettings,
        registry: &Arc<RunningSessions>,
        model: &SessionModel,
    ) -> Arc<Self> {
        let existing = registry
            .sessions_for(settings.base_url().as_str())
            .into_iter()
            .find(|s| s.id == model.id && !s.is_disposed());
        match existing {
            Some(session) => session.clone_session(),
            None => Self::create(model, settings, registry),
        }
    }

    /// Model of a session by id, preferring local knowledge
    ///
    /// # Errors
    /// `SessionError::NotFound` if the server does not know the id.
    pub async fn find_by_id(
        settings: &ServerSettings,
        registry: &Arc<RunningSessions>,
        id: &str,
    ) -> Result<SessionModel, SessionError> {
        let base = settings.base_url().as_str();
        if let Some(model) = registry.find_model(base, id) {
            return Ok(model);
        }
        let url = settings.url(&SESSIONS, id)?;
        let resp = match settings.request(Method::GET, url, None, &[200]).await {
            Ok(resp) => resp,
            Err(ServerError::Response { status: 404, .. }) => {
                return Err(SessionError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let model = SessionModel::from_value(resp.decode::<Value>("session model")?)?;
        registry.update_from_server(base, &model);
        Ok(model)
    }

    /// Model of the session bound to a path
    ///
    /// # Errors
    /// `SessionError::NotFound` if no running session has the path.
    pub async fn find_by_path(
        settings: &ServerSettings,
        registry: &Arc<RunningSessions>,
        path: &str,
    ) -> Result<SessionModel, SessionError> {
        if let Some(model) = registry.find_model_by_path(settings.base_url().as_str(), path) {
            return Ok(model);
        }
        Self::list_running(settings, registry)
            .await?
            .into_iter()
            .find(|m| m.path == path)
            .ok_or_else(|| SessionError::NotFound(path.to_string()))
    }

    /// Every session the server runs
    ///
    /// Local sessions missing from the listing are disposed.
    ///
    /// # Errors
    /// Any server error, or a validation error if any entry is malformed.
    pub async fn list_running(
        settings: &ServerSettings,
        registry: &Arc<RunningSessions>,
    ) -> Result<Vec<SessionModel>, SessionError> {
        let url = settings.url(&SESSIONS, "")?;
        let resp = settings.request(Method::GET, url, None, &[200]).await?;
        let raw: Vec<Value> = resp.decode("session list")?;
        let models = raw
            .into_iter()
            .map(SessionModel::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        registry.update_running(settings.base_url().as_str(), &models);
        Ok(models)
    }

    /// Shut a session down by id
    ///
    /// A 404 means the session is already gone: local sessions with the id
    /// are disposed and the call succeeds.
    ///
    /// # Errors
    /// `SessionError::KernelGone` on 410, or any other server error.
    pub async fn shutdown_by_id(
        settings: &ServerSettings,
        registry: &Arc<RunningSessions>,
        id: &str,
    ) -> Result<(), SessionError> {
        let base = settings.base_url().as_str();
        let url = settings.url(&SESSIONS, id)?;
        match settings.request(Method::DELETE, url, None, &[204]).await {
            Ok(_) => {}
            Err(ServerError::Response { status: 404, .. }) => {
                tracing::warn!("session {} was already gone", id);
            }
            Err(ServerError::Response {
                status: 410,
                message,
                ..
            }) => return Err(SessionError::KernelGone(message)),
            Err(e) => return Err(e.into()),
        }
        registry.kill(base, id);
        Ok(())
    }

    /// Session id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Document path
    #[must_use]
    pub fn path(&self) -> String {
        self.state.lock().path.clone()
    }

    /// Session name
    #[must_use]
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Session type
    #[must_use]
    pub fn kind(&self) -> String {
        self.state.lock().kind.clone()
    }

    /// Current kernel connection
    #[must_use]
    pub fn kernel(&self) -> Arc<KernelConnection> {
        Arc::clone(&self.state.lock().kernel)
    }

    /// Kernel status; `Dead` once disposed
    #[must_use]
    pub fn status(&self) -> KernelStatus {
        if self.is_disposed() {
            return KernelStatus::Dead;
        }
        self.kernel().status()
    }

    /// Current model
    #[must_use]
    pub fn model(&self) -> SessionModel {
        let state = self.state.lock();
        SessionModel {
            id: self.id.clone(),
            path: state.path.clone(),
            name: state.name.clone(),
            kind: state.kind.clone(),
            kernel: state.kernel.model().clone(),
        }
    }

    /// Server settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Kernel status changes
    #[inline]
    #[must_use]
    pub fn status_changed(&self) -> &Signal<DefaultSession, KernelStatus> {
        &self.status_changed
    }

    /// Kernel iopub messages
    #[inline]
    #[must_use]
    pub fn iopub_message(&self) -> &Signal<DefaultSession, KernelMessage> {
        &self.iopub_message
    }

    /// Kernel messages on other channels
    #[inline]
    #[must_use]
    pub fn unhandled_message(&self) -> &Signal<DefaultSession, KernelMessage> {
        &self.unhandled_message
    }

    /// Every kernel message
    #[inline]
    #[must_use]
    pub fn any_message(&self) -> &Signal<DefaultSession, KernelMessage> {
        &self.any_message
    }

    /// Kernel swaps
    #[inline]
    #[must_use]
    pub fn kernel_changed(&self) -> &Signal<DefaultSession, KernelChange> {
        &self.kernel_changed
    }

    /// Name, type or path changes
    #[inline]
    #[must_use]
    pub fn property_changed(&self) -> &Signal<DefaultSession, SessionProperty> {
        &self.property_changed
    }

    /// Emitted once when the session ends
    #[inline]
    #[must_use]
    pub fn terminated(&self) -> &Signal<DefaultSession, ()> {
        &self.terminated
    }

    /// Whether a PATCH from this session is in flight
    #[inline]
    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    /// Move the session to a new path
    ///
    /// # Errors
    /// `SessionError::Disposed` or any server error.
    pub async fn set_path(&self, path: &str) -> Result<(), SessionError> {
        self.patch(json!({ "path": path })).await
    }

    /// Rename the session
    ///
    /// # Errors
    /// `SessionError::Disposed` or any server error.
    pub async fn set_name(&self, name: &str) -> Result<(), SessionError> {
        self.patch(json!({ "name": name })).await
    }

    /// Change the session type
    ///
    /// # Errors
    /// `SessionError::Disposed` or any server error.
    pub async fn set_type(&self, kind: &str) -> Result<(), SessionError> {
        self.patch(json!({ "type": kind })).await
    }

    /// Switch to another kernel, keeping the session id and path
    ///
    /// # Errors
    /// `SessionError::Disposed` or any server error.
    pub async fn change_kernel(
        &self,
        kernel: &KernelRequest,
    ) -> Result<Arc<KernelConnection>, SessionError> {
        let body = json!({ "kernel": serde_json::to_value(kernel).map_err(ServerError::from)? });
        self.patch(body).await?;
        Ok(self.kernel())
    }

    /// Shut the session down on the server
    ///
    /// # Errors
    /// `SessionError::Disposed` or any server error.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        Self::shutdown_by_id(&self.settings, &self.registry, &self.id).await?;
        self.dispose();
        Ok(())
    }

    /// Reconcile with a fresh server model
    ///
    /// Ignored while a PATCH from this session is in flight or after
    /// disposal.
    pub fn update(&self, model: &SessionModel) {
        if self.is_updating() || self.is_disposed() {
            return;
        }

        let (changed, swap) = {
            let mut state = self.state.lock();
            let mut changed = Vec::new();
            if state.name != model.name {
                state.name.clone_from(&model.name);
                changed.push(SessionProperty::Name);
            }
            if state.kind != model.kind {
                state.kind.clone_from(&model.kind);
                changed.push(SessionProperty::Type);
            }
            if state.path != model.path {
                state.path.clone_from(&model.path);
                changed.push(SessionProperty::Path);
            }
            let swap = state.kernel.is_disposed() || state.kernel.id() != model.kernel.id;
            (changed, swap)
        };

        if swap {
            let new_value = KernelConnection::new(model.kernel.clone(), self.settings.clone());
            let old_value = self.setup_kernel(Arc::clone(&new_value));
            tracing::info!(
                "session {} kernel changed {} -> {}",
                self.id,
                old_value.id(),
                new_value.id()
            );
            self.kernel_changed.emit(
                self,
                &KernelChange {
                    old_value: Arc::clone(&old_value),
                    new_value,
                },
            );
            old_value.dispose();
        }

        for property in changed {
            self.property_changed.emit(self, &property);
        }
    }

    async fn patch(&self, body: Value) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        let url = self.settings.url(&SESSIONS, &self.id)?;

        let result = {
            let _updating = FlagGuard::raise(&self.updating);
            self.settings
                .request(Method::PATCH, url, Some(body), &[200])
                .await
        };

        let model = SessionModel::from_value(result?.decode::<Value>("session model")?)?;
        self.registry
            .update_from_server(self.settings.base_url().as_str(), &model);
        Ok(())
    }

    fn clone_session(&self) -> Arc<Self> {
        Self::create(&self.model(), &self.settings, &self.registry)
    }

    /// Wire a kernel's signals to this session, returning the previous kernel
    fn setup_kernel(&self, kernel: Arc<KernelConnection>) -> Arc<KernelConnection> {
        let weak = self.this.clone();
        let status = kernel.status_changed().connect({
            let weak = weak.clone();
            move |_, status| {
                if let Some(session) = weak.upgrade() {
                    session.status_changed.emit(&session, status);
                }
            }
        });
        let iopub = kernel.iopub_message().connect({
            let weak = weak.clone();
            move |_, msg| {
                if let Some(session) = weak.upgrade() {
                    session.iopub_message.emit(&session, msg);
                }
            }
        });
        let unhandled = kernel.unhandled_message().connect({
            let weak = weak.clone();
            move |_, msg| {
                if let Some(session) = weak.upgrade() {
                    session.unhandled_message.emit(&session, msg);
                }
            }
        });
        let any = kernel.any_message().connect(move |_, msg| {
            if let Some(session) = weak.upgrade() {
                session.any_message.emit(&session, msg);
            }
        });

        let (old, old_slots) = {
            let mut state = self.state.lock();
            let old = std::mem::replace(&mut state.kernel, kernel);
            let old_slots = state.slots.replace(KernelSlots {
                status,
                iopub,
                unhandled,
                any,
            });
            (old, old_slots)
        };
        if let Some(slots) = old_slots {
            disconnect_kernel(&old, &slots);
        }
        old
    }
}

fn disconnect_kernel(kernel: &KernelConnection, slots: &KernelSlots) {
    kernel.status_changed().disconnect(slots.status);
    kernel.iopub_message().disconnect(slots.iopub);
    kernel.unhandled_message().disconnect(slots.unhandled);
    kernel.any_message().disconnect(slots.any);
}

impl Disposable for DefaultSession {
    fn is_disposed(&self) -> bool {
        self.disposal.is_disposed()
    }

    fn dispose(&self) {
        if !self.disposal.begin() {
            return;
        }
        tracing::info!("session {} disposed", self.id);

        let (kernel, slots) = {
            let mut state = self.state.lock();
            (Arc::clone(&state.kernel), state.slots.take())
        };
        if let Some(slots) = slots {
            disconnect_kernel(&kernel, &slots);
        }
        kernel.dispose();

        self.status_changed.emit(self, &KernelStatus::Dead);
        self.terminated.emit(self, &());
        self.disposed.emit(self, &());

        self.status_changed.disconnect_all();
        self.iopub_message.disconnect_all();
        self.unhandled_message.disconnect_all();
        self.any_message.disconnect_all();
        self.kernel_changed.disconnect_all();
        self.property_changed.disconnect_all();
        self.terminated.disconnect_all();
        self.disposed.disconnect_all();

        self.registry.unregister(self);
    }
}

impl ObservableDisposable for DefaultSession {
    fn disposed(&self) -> &Signal<Self, ()> {
        &self.disposed
    }
}

impl fmt::Debug for DefaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultSession")
            .field("id", &self.id)
            .field("path", &self.path())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
