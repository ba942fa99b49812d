//! Kernel connections
//!
//! A [`KernelConnection`] is the client's handle on one running kernel.
//! Messages are pushed in through [`KernelConnection::handle_message`] and
//! fanned out to the message signals; lifecycle requests go over REST.

use super::model::{Channel, KernelMessage, KernelModel, KernelStatus};
use crate::error::{KernelError, ServerError};
use crate::settings::ServerSettings;
use nbclient_core::{Disposable, DisposalState, ObservableDisposable, Signal};
use parking_lot::Mutex;
use reqwest::Method;
use std::fmt;
use std::sync::Arc;

/// Handle on one running kernel
pub struct KernelConnection {
    model: KernelModel,
    client_id: String,
    settings: ServerSettings,
    status: Mutex<KernelStatus>,
    disposal: DisposalState,
    status_changed: Signal<KernelConnection, KernelStatus>,
    iopub_message: Signal<KernelConnection, KernelMessage>,
    unhandled_message: Signal<KernelConnection, KernelMessage>,
    any_message: Signal<KernelConnection, KernelMessage>,
    disposed: Signal<KernelConnection, ()>,
}

impl KernelConnection {
    /// Connect to a running kernel
    #[must_use]
    pub fn new(model: KernelModel, settings: ServerSettings) -> Arc<Self> {
        tracing::debug!("connecting to kernel {} ({})", model.id, model.name);
        Arc::new(Self {
            model,
            client_id: uuid::Uuid::new_v4().to_string(),
            settings,
            status: Mutex::new(KernelStatus::Unknown),
            disposal: DisposalState::new(),
            status_changed: Signal::new(),
            iopub_message: Signal::new(),
            unhandled_message: Signal::new(),
            any_message: Signal::new(),
            disposed: Signal::new(),
        })
    }

    /// Kernel id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.model.id
    }

    /// Kernel spec name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.model.name
    }

    /// Kernel model
    #[inline]
    #[must_use]
    pub fn model(&self) -> &KernelModel {
        &self.model
    }

    /// Client session id used in message headers
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Server settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> KernelStatus {
        *self.status.lock()
    }

    /// Emitted on every status change
    #[inline]
    #[must_use]
    pub fn status_changed(&self) -> &Signal<KernelConnection, KernelStatus> {
        &self.status_changed
    }

    /// Emitted for every iopub message
    #[inline]
    #[must_use]
    pub fn iopub_message(&self) -> &Signal<KernelConnection, KernelMessage> {
        &self.iopub_message
    }

    /// Emitted for messages on other channels
    #[inline]
    #[must_use]
    pub fn unhandled_message(&self) -> &Signal<KernelConnection, KernelMessage> {
        &self.unhandled_message
    }

    /// Emitted for every message, before the channel-specific signal
    #[inline]
    #[must_use]
    pub fn any_message(&self) -> &Signal<KernelConnection, KernelMessage> {
        &self.any_message
    }

    /// Dispatch one incoming message
    ///
    /// `status` messages on iopub update the connection status. Messages
    /// arriving after disposal are dropped.
    pub fn handle_message(&self, msg: &KernelMessage) {
        if self.is_disposed() {
            return;
        }
        self.any_message.emit(self, msg);
        match msg.channel {
            Channel::Iopub => {
                if let Some(state) = msg.execution_state() {
                    self.set_status(state);
                }
                self.iopub_message.emit(self, msg);
            }
            _ => self.unhandled_message.emit(self, msg),
        }
    }

    /// Interrupt the kernel
    ///
    /// # Errors
    /// `KernelError::Disposed` or any server error.
    pub async fn interrupt(&self) -> Result<(), KernelError> {
        self.ensure_live()?;
        let url = self.kernel_url(&["interrupt"])?;
        self.settings
            .request(Method::POST, url, None, &[204])
            .await?;
        Ok(())
    }

    /// Restart the kernel
    ///
    /// # Errors
    /// `KernelError::Disposed` or any server error.
    pub async fn restart(&self) -> Result<(), KernelError> {
        self.ensure_live()?;
        let url = self.kernel_url(&["restart"])?;
        self.set_status(KernelStatus::Restarting);
        let resp = self
            .settings
            .request(Method::POST, url, None, &[200])
            .await?;
        let model: KernelModel = resp.decode("kernel model")?;
        if model.id != self.model.id {
            return Err(ServerError::validation(
                "kernel model",
                format!("restart returned kernel {}", model.id),
            )
            .into());
        }
        Ok(())
    }

    /// Shut the kernel down, then dispose the connection
    ///
    /// A kernel the server no longer knows about counts as shut down.
    ///
    /// # Errors
    /// `KernelError::Disposed` or any server error.
    pub async fn shutdown(&self) -> Result<(), KernelError> {
        self.ensure_live()?;
        let url = self.kernel_url(&[])?;
        match self.settings.request(Method::DELETE, url, None, &[204]).await {
            Ok(_) => {}
            Err(ServerError::Response { status: 404, .. }) => {
                tracing::warn!("kernel {} was already gone", self.model.id);
            }
            Err(e) => return Err(e.into()),
        }
        self.dispose();
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), KernelError> {
        if self.is_disposed() {
            Err(KernelError::Disposed)
        } else {
            Ok(())
        }
    }

    fn kernel_url(&self, suffix: &[&str]) -> Result<reqwest::Url, ServerError> {
        let mut path = self.model.id.clone();
        for part in suffix {
            path.push('/');
            path.push_str(part);
        }
        self.settings.url(&["api", "kernels"], &path)
    }

    fn set_status(&self, status: KernelStatus) {
        {
            let mut current = self.status.lock();
            if *current == status {
                return;
            }
            *current = status;
        }
        self.status_changed.emit(self, &status);
    }
}

impl Disposable for KernelConnection {
    fn is_disposed(&self) -> bool {
        self.disposal.is_disposed()
    }

    fn dispose(&self) {
        if !self.disposal.begin() {
            return;
        }
        tracing::debug!("kernel connection {} disposed", self.model.id);
        self.set_status(KernelStatus::Dead);
        self.disposed.emit(self, &());
        self.status_changed.disconnect_all();
        self.iopub_message.disconnect_all();
        self.unhandled_message.disconnect_all();
        self.any_message.disconnect_all();
        self.disposed.disconnect_all();
    }
}

impl ObservableDisposable for KernelConnection {
    fn disposed(&self) -> &Signal<Self, ()> {
        &self.disposed
    }
}

impl fmt::Debug for KernelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelConnection")
            .field("id", &self.model.id)
            .field("name", &self.model.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerResult;
    use crate::transport::{HttpRequest, HttpResponse, Transport};
    use async_trait::async_trait;
    use serde_json::json;

    struct Replies(Mutex<Vec<(Method, String)>>, u16);

    #[async_trait]
    impl Transport for Replies {
        async fn send(&self, request: HttpRequest) -> ServerResult<HttpResponse> {
            self.0
                .lock()
                .push((request.method, request.url.path().to_string()));
            Ok(HttpResponse::new(self.1, ""))
        }
    }

    fn kernel(status: u16) -> (Arc<KernelConnection>, Arc<Replies>) {
        let transport = Arc::new(Replies(Mutex::new(Vec::new()), status));
        let settings = ServerSettings::new("http://localhost:8888/", transport.clone()).unwrap();
        (
            KernelConnection::new(KernelModel::new("k1", "python3"), settings),
            transport,
        )
    }

    #[test]
    fn iopub_status_updates_status() {
        let (kernel, _) = kernel(204);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        kernel
            .status_changed()
            .connect(move |_, status| sink.lock().push(*status));

        kernel.handle_message(&KernelMessage::status(KernelStatus::Busy));
        kernel.handle_message(&KernelMessage::status(KernelStatus::Busy));
        kernel.handle_message(&KernelMessage::status(KernelStatus::Idle));

        assert_eq!(*seen.lock(), vec![KernelStatus::Busy, KernelStatus::Idle]);
        assert_eq!(kernel.status(), KernelStatus::Idle);
    }

    #[test]
    fn shell_messages_are_unhandled() {
        let (kernel, _) = kernel(204);
        let counts = Arc::new(Mutex::new((0, 0, 0)));
        let (a, b, c) = (counts.clone(), counts.clone(), counts.clone());
        kernel.any_message().connect(move |_, _| a.lock().0 += 1);
        kernel.iopub_message().connect(move |_, _| b.lock().1 += 1);
        kernel.unhandled_message().connect(move |_, _| c.lock().2 += 1);

        kernel.handle_message(&KernelMessage::new(Channel::Shell, "execute_reply", json!({})));
        kernel.handle_message(&KernelMessage::new(Channel::Iopub, "stream", json!({})));

        assert_eq!(*counts.lock(), (2, 1, 1));
    }

    #[tokio::test]
    async fn interrupt_posts_to_kernel() {
        let (kernel, transport) = kernel(204);
        kernel.interrupt().await.unwrap();
        assert_eq!(
            *transport.0.lock(),
            vec![(Method::POST, "/api/kernels/k1/interrupt".to_string())]
        );
    }

    #[tokio::test]
    async fn shutdown_disposes_and_blocks_further_requests() {
        let (kernel, transport) = kernel(204);
        let disposed = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&disposed);
        kernel.disposed().connect(move |_, _| *flag.lock() = true);

        kernel.shutdown().await.unwrap();

        assert!(*disposed.lock());
        assert_eq!(kernel.status(), KernelStatus::Dead);
        assert!(matches!(kernel.interrupt().await, Err(KernelError::Disposed)));
        assert_eq!(transport.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn unexpected_status_is_an_error() {
        let (kernel, _) = kernel(500);
        assert!(matches!(
            kernel.interrupt().await,
            Err(KernelError::Server(ServerError::Response { status: 500, .. }))
        ));
    }
}
