//! Server (UAS) connection state machine.
//!
//! One connection answers one received request. Responses are staged
//! with `init_response` and committed with `send`; the connection
//! enforces the one-final rule, allowing only 2xx retransmissions after
//! completion.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::debug;
use uasip_sip_core::{
    Address, Header, Method, Request, Response, SipUri, StatusCode, Uri,
};

use crate::dialog::{Dialog, SharedDialog};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::util::{classify_host, new_tag};

/// Server connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// A request arrived, nothing staged yet.
    RequestReceived,
    /// A response is staged.
    Initialized,
    /// A response is staged on an open stream.
    StreamOpen,
    /// A final response was sent (ACKs start here).
    Completed,
    Terminated,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::RequestReceived => "RequestReceived",
            ServerState::Initialized => "Initialized",
            ServerState::StreamOpen => "StreamOpen",
            ServerState::Completed => "Completed",
            ServerState::Terminated => "Terminated",
        };
        f.write_str(s)
    }
}

/// A single inbound request/response exchange.
pub struct ServerConnection {
    transport: Arc<dyn Transport>,
    request: Request,
    /// Shared-listening mode: several ports multiplexed onto one
    /// binding, where non-dialog responses must not advertise it.
    shared_mode: bool,

    state: Mutex<ServerState>,
    response: Mutex<Option<Response>>,
    dialog: Mutex<Option<SharedDialog>>,
    /// The To tag this connection mints, stable across its responses.
    local_tag: Mutex<Option<String>>,
    sent_100: AtomicBool,
    resend_2xx_allowed: AtomicBool,
}

impl ServerConnection {
    pub fn new(request: Request, transport: Arc<dyn Transport>, shared_mode: bool) -> Self {
        let initial = if request.method == Method::Ack {
            ServerState::Completed
        } else {
            ServerState::RequestReceived
        };
        ServerConnection {
            transport,
            request,
            shared_mode,
            state: Mutex::new(initial),
            response: Mutex::new(None),
            dialog: Mutex::new(None),
            local_tag: Mutex::new(None),
            sent_100: AtomicBool::new(false),
            resend_2xx_allowed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: ServerState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            debug!(from = %*state, to = %next, "server state change");
            *state = next;
        }
    }

    /// The request this connection answers.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The response as currently staged.
    pub fn response(&self) -> Option<Response> {
        self.response.lock().unwrap().clone()
    }

    pub fn dialog(&self) -> Option<SharedDialog> {
        self.dialog.lock().unwrap().clone()
    }

    /// Attaches a dialog unless one is already present; an UPDATE answer
    /// must not clobber the INVITE-established dialog.
    pub fn attach_dialog(&self, dialog: SharedDialog) {
        let mut guard = self.dialog.lock().unwrap();
        if guard.is_none() {
            *guard = Some(dialog);
        }
    }

    /// Stages a response with `status`, copying the transaction headers
    /// from the request. A repeated 100 after one was already sent is
    /// silently suppressed.
    pub fn init_response(&self, status: StatusCode) -> Result<()> {
        match self.state() {
            ServerState::RequestReceived
            | ServerState::Initialized
            | ServerState::StreamOpen
            | ServerState::Completed => {}
            other => {
                return Err(Error::invalid_state(format!("init_response in {other}")));
            }
        }
        if status == StatusCode::TRYING && self.sent_100.load(Ordering::SeqCst) {
            debug!("repeated 100 suppressed");
            return Ok(());
        }

        let mut response = Response::new(status);
        for header in self.request.headers.iter() {
            match header {
                Header::Via(_) | Header::From(_) | Header::CallId(_) | Header::CSeq { .. } => {
                    response.headers.push(header.clone());
                }
                Header::To(to) => {
                    let mut to = to.clone();
                    // Non-100 responses carry a stable local tag.
                    if to.tag().is_none() && status != StatusCode::TRYING {
                        let mut minted = self.local_tag.lock().unwrap();
                        let tag = minted.get_or_insert_with(new_tag).clone();
                        to.set_tag(tag);
                    }
                    response.headers.push(Header::To(to));
                }
                _ => {}
            }
        }
        if self.should_advertise_contact() && status.is_final() {
            let local = self.transport.local_contact();
            let mut contact_uri = SipUri::new(classify_host(&local.host));
            contact_uri.port = Some(local.port);
            response
                .headers
                .push(Header::Contact(vec![Address::new(Uri::Sip(contact_uri))]));
        }
        response.headers.push(Header::ContentLength(0));

        *self.response.lock().unwrap() = Some(response);
        if self.state() == ServerState::RequestReceived {
            self.set_state(ServerState::Initialized);
        }
        Ok(())
    }

    fn should_advertise_contact(&self) -> bool {
        self.request.method.establishes_dialog() || !self.shared_mode
    }

    /// Commits the staged response.
    pub async fn send(&self) -> Result<()> {
        let (frame, status) = {
            let guard = self.response.lock().unwrap();
            let response = guard
                .as_ref()
                .ok_or_else(|| Error::invalid_state("send without a staged response"))?;
            (Bytes::from(response.to_string()), response.status)
        };

        if self.state() == ServerState::Completed {
            // Only a 2xx retransmission may follow completion.
            if !(status.is_success() && self.resend_2xx_allowed.load(Ordering::SeqCst)) {
                return Err(Error::invalid_state(format!(
                    "{status} after a final response"
                )));
            }
        } else if !matches!(
            self.state(),
            ServerState::Initialized | ServerState::StreamOpen
        ) {
            return Err(Error::invalid_state(format!("send in {}", self.state())));
        }

        if let Err(err) = self.transport.send(frame).await {
            self.close();
            return Err(Error::Io(err));
        }

        if status == StatusCode::TRYING {
            self.sent_100.store(true, Ordering::SeqCst);
        }
        if status.is_final() {
            if status.is_success() {
                self.resend_2xx_allowed.store(true, Ordering::SeqCst);
                self.update_dialog_on_success();
            }
            self.set_state(ServerState::Completed);
        }
        Ok(())
    }

    fn update_dialog_on_success(&self) {
        if !self.request.method.establishes_dialog() {
            return;
        }
        let remote_tag = self
            .request
            .headers
            .from_addr()
            .and_then(Address::tag)
            .unwrap_or("")
            .to_string();
        let remote_target = self.request.headers.contacts().next().map(|c| c.uri.clone());

        let mut guard = self.dialog.lock().unwrap();
        let shared = guard.get_or_insert_with(|| {
            let call_id = self.request.headers.call_id().unwrap_or("").to_string();
            let local_tag = self.local_tag.lock().unwrap().clone().unwrap_or_default();
            Arc::new(Mutex::new(Dialog::new(call_id, local_tag)))
        });
        let mut dialog = shared.lock().unwrap();
        dialog.confirm(&remote_tag, remote_target);
        if self.request.method == Method::Invite {
            dialog.set_wait_for_bye();
        }
    }

    /// Applies a received NOTIFY to the attached dialog: a terminated
    /// Subscription-State removes the subscription usage, anything else
    /// confirms the dialog.
    pub fn apply_notify(&self) -> Result<()> {
        if self.request.method != Method::Notify {
            return Err(Error::invalid_operation(format!(
                "apply_notify on {}",
                self.request.method
            )));
        }
        let shared = self
            .dialog()
            .ok_or_else(|| Error::invalid_operation("NOTIFY outside any dialog"))?;
        let mut event = None;
        let mut subscription_state = None;
        for header in self.request.headers.iter() {
            match header {
                Header::Event(tp) => event = Some(tp.value.clone()),
                Header::SubscriptionState(tp) => subscription_state = Some(tp.clone()),
                _ => {}
            }
        }
        let event = event.ok_or_else(|| Error::invalid_operation("NOTIFY without Event"))?;
        shared
            .lock()
            .unwrap()
            .on_notify(&event, subscription_state.as_ref());
        Ok(())
    }

    pub fn close(&self) {
        self.set_state(ServerState::Terminated);
    }
}
