//! The stack service object.
//!
//! `UaStack` ties the collaborators together: it owns the refresh
//! manager and the dialog list, vends client connections, and opens
//! listeners after consulting the permission policy. It is explicitly
//! constructed and shared as `Arc<UaStack>`; there is no global state.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uasip_sip_core::Request;

use crate::client::ClientConnection;
use crate::dialog::SharedDialog;
use crate::error::{Error, Result};
use crate::identity::IdentityStore;
use crate::refresh::RefreshManager;
use crate::security::PermissionCheck;
use crate::server::ServerConnection;
use crate::timer::TimerService;
use crate::transport::Transport;

/// Depth of a listener's pending-request queue.
const ACCEPT_QUEUE_DEPTH: usize = 16;

/// The user-agent service object.
pub struct UaStack {
    identity: Arc<dyn IdentityStore>,
    permissions: Arc<dyn PermissionCheck>,
    refresh: Arc<RefreshManager>,
    dialogs: Mutex<Vec<SharedDialog>>,
}

impl UaStack {
    pub fn new(
        identity: Arc<dyn IdentityStore>,
        permissions: Arc<dyn PermissionCheck>,
        timer: Box<dyn TimerService>,
    ) -> Arc<Self> {
        Arc::new(UaStack {
            identity,
            permissions,
            refresh: Arc::new(RefreshManager::new(timer)),
            dialogs: Mutex::new(Vec::new()),
        })
    }

    /// The refresh registry.
    pub fn refresh(&self) -> &Arc<RefreshManager> {
        &self.refresh
    }

    /// A fresh client connection bound to `transport`.
    pub fn client_connection(&self, transport: Arc<dyn Transport>) -> ClientConnection {
        ClientConnection::new(transport, self.identity.clone(), self.refresh.clone())
    }

    /// Tracks a dialog for later lookup.
    pub fn register_dialog(&self, dialog: SharedDialog) {
        self.dialogs.lock().unwrap().push(dialog);
    }

    /// The dialog matching `call_id` and our `local_tag`, if tracked.
    pub fn find_dialog(&self, call_id: &str, local_tag: &str) -> Option<SharedDialog> {
        self.dialogs
            .lock()
            .unwrap()
            .iter()
            .find(|shared| {
                let d = shared.lock().unwrap();
                d.call_id == call_id && d.local_tag == local_tag
            })
            .cloned()
    }

    /// Drops terminated dialogs from the registry.
    pub fn prune_dialogs(&self) {
        self.dialogs.lock().unwrap().retain(|shared| {
            shared.lock().unwrap().state() != crate::dialog::DialogState::Terminated
        });
    }

    /// Opens a listening point on `transport`, subject to the permission
    /// policy. The returned sink is handed to the transport demultiplexer.
    pub fn listener(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        scheme: &str,
        shared_mode: bool,
    ) -> Result<(Listener, RequestSink)> {
        let local = transport.local_contact();
        if !self
            .permissions
            .allow_listen(&local.host, local.port, scheme)
        {
            return Err(Error::NotPermitted(format!(
                "{scheme}:{}:{}",
                local.host, local.port
            )));
        }
        debug!(host = %local.host, port = local.port, scheme, "listener opened");
        let (tx, rx) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        let listener = Listener {
            transport,
            shared_mode,
            rx: tokio::sync::Mutex::new(rx),
        };
        Ok((listener, RequestSink { tx }))
    }
}

/// Feeds received requests into a listener's accept queue.
#[derive(Clone)]
pub struct RequestSink {
    tx: mpsc::Sender<Request>,
}

impl std::fmt::Debug for RequestSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSink").finish_non_exhaustive()
    }
}

impl RequestSink {
    /// Queues one parsed request. Dropped with a warning when the accept
    /// queue is full or the listener is closed.
    pub fn push(&self, request: Request) {
        use mpsc::error::TrySendError;
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(method = %dropped.method, "accept queue full, request dropped");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// A listening point accepting inbound requests.
pub struct Listener {
    transport: Arc<dyn Transport>,
    shared_mode: bool,
    rx: tokio::sync::Mutex<mpsc::Receiver<Request>>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("shared_mode", &self.shared_mode)
            .finish_non_exhaustive()
    }
}

impl Listener {
    /// Waits for the next request and wraps it in a server connection.
    /// `None` after the listener closed (every sink dropped).
    pub async fn accept(&self) -> Option<ServerConnection> {
        let request = self.rx.lock().await.recv().await?;
        Some(ServerConnection::new(
            request,
            self.transport.clone(),
            self.shared_mode,
        ))
    }
}
