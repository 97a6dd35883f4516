//! Client (UAC) connection state machine.
//!
//! One connection drives one client transaction at a time: build the
//! request, send it, then consume responses from a bounded FIFO queue.
//! Digest challenges are answered transparently when credentials are
//! provisioned; dialog-establishing responses create or update the
//! connection's dialog; successful refreshable requests arm the refresh
//! manager.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uasip_sip_core::{
    Address, Auth, Header, HeaderName, Headers, Method, Params, Request, Response, SipUri, Uri,
    ViaHop,
};

use crate::auth::answer_challenge;
use crate::dialog::{Dialog, SharedDialog};
use crate::error::{Error, Result};
use crate::identity::IdentityStore;
use crate::refresh::{RefreshId, RefreshListener, RefreshManager};
use crate::transport::Transport;
use crate::util::{bump_for_resend, classify_host, new_branch, new_call_id, new_tag};

/// How many automatic digest re-originations a connection will attempt.
const MAX_AUTH_ATTEMPTS: u32 = 2;
/// Depth of the incoming response queue.
const RESPONSE_QUEUE_DEPTH: usize = 10;
/// Registration interval assumed when the peer states none.
const DEFAULT_EXPIRES_SECS: u32 = 3600;

/// Client connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No request built yet.
    Created,
    /// Request built, not sent.
    Initialized,
    /// Request staged on an open stream, not yet committed.
    StreamOpen,
    /// Request sent, awaiting responses.
    Proceeding,
    /// A challenge is being answered internally.
    Unauthorized,
    /// A final response arrived (or an ACK was sent).
    Completed,
    Terminated,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Created => "Created",
            ClientState::Initialized => "Initialized",
            ClientState::StreamOpen => "StreamOpen",
            ClientState::Proceeding => "Proceeding",
            ClientState::Unauthorized => "Unauthorized",
            ClientState::Completed => "Completed",
            ClientState::Terminated => "Terminated",
        };
        f.write_str(s)
    }
}

/// A single outbound request/response exchange.
pub struct ClientConnection {
    transport: Arc<dyn Transport>,
    identity: Arc<dyn IdentityStore>,
    refresh: Arc<RefreshManager>,

    state: Mutex<ClientState>,
    /// Staged request, shared with the refresh manager so a timer resend
    /// and the connection always agree on the current CSeq.
    request: Arc<Mutex<Option<Request>>>,
    dialog: Mutex<Option<SharedDialog>>,
    final_response: Mutex<Option<Response>>,
    received: Mutex<Option<Response>>,

    queue_tx: Mutex<Option<mpsc::Sender<Response>>>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<Response>>,

    /// Serializes sends against refresh-timer resends.
    update_latch: Arc<tokio::sync::Mutex<()>>,

    provisional_seen: AtomicBool,
    final_seen: AtomicBool,
    auth_attempts: AtomicU32,
    auth_failed: AtomicBool,

    refresh_listener: Mutex<Option<Arc<dyn RefreshListener>>>,
    refresh_id: Mutex<Option<RefreshId>>,
}

impl ClientConnection {
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: Arc<dyn IdentityStore>,
        refresh: Arc<RefreshManager>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(RESPONSE_QUEUE_DEPTH);
        ClientConnection {
            transport,
            identity,
            refresh,
            state: Mutex::new(ClientState::Created),
            request: Arc::new(Mutex::new(None)),
            dialog: Mutex::new(None),
            final_response: Mutex::new(None),
            received: Mutex::new(None),
            queue_tx: Mutex::new(Some(tx)),
            queue_rx: tokio::sync::Mutex::new(rx),
            update_latch: Arc::new(tokio::sync::Mutex::new(())),
            provisional_seen: AtomicBool::new(false),
            final_seen: AtomicBool::new(false),
            auth_attempts: AtomicU32::new(0),
            auth_failed: AtomicBool::new(false),
            refresh_listener: Mutex::new(None),
            refresh_id: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: ClientState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            debug!(from = %*state, to = %next, "client state change");
            *state = next;
        }
    }

    /// The request as currently staged, for inspection.
    pub fn request(&self) -> Option<Request> {
        self.request.lock().unwrap().clone()
    }

    /// The dialog this connection established or was attached to.
    pub fn dialog(&self) -> Option<SharedDialog> {
        self.dialog.lock().unwrap().clone()
    }

    /// The response most recently popped by [`ClientConnection::receive`].
    pub fn last_response(&self) -> Option<Response> {
        self.received.lock().unwrap().clone()
    }

    /// Runs subsequent in-dialog requests against an existing dialog.
    pub fn attach_dialog(&self, dialog: SharedDialog) {
        *self.dialog.lock().unwrap() = Some(dialog);
    }

    /// Enables automatic refreshing for this connection's request.
    pub fn set_refresh_listener(&self, listener: Arc<dyn RefreshListener>) {
        *self.refresh_listener.lock().unwrap() = Some(listener);
    }

    /// Builds the initial request. Legal exactly once, from `Created`.
    pub fn init_request(&self, method: Method, to_uri: Uri) -> Result<()> {
        if self.state() != ClientState::Created {
            return Err(Error::invalid_state(format!(
                "init_request in {}",
                self.state()
            )));
        }
        let dialog = self.dialog();
        if method.requires_dialog() && dialog.is_none() {
            return Err(Error::invalid_operation(format!(
                "{method} requires an established dialog"
            )));
        }

        let local = self.transport.local_contact();
        let identity_uri = self.identity.default_identity();

        let mut to = Address::new(to_uri.clone());
        let mut from_uri = identity_uri.clone().unwrap_or_else(anonymous_uri);
        let mut call_id = new_call_id(&local.host);
        let mut local_tag = new_tag();
        if let Some(shared) = &dialog {
            let d = shared.lock().unwrap();
            call_id = d.call_id.clone();
            local_tag = d.local_tag.clone();
            if let Some(remote) = &d.remote_tag {
                to.set_tag(remote.clone());
            }
        }
        // REGISTER binds the identity itself, so To mirrors From.
        if method == Method::Register {
            if let Some(aor) = &identity_uri {
                to = Address::new(aor.clone());
                from_uri = aor.clone();
            }
        }
        let mut from = Address::new(from_uri);
        from.set_tag(local_tag);

        let mut request = Request::new(method.clone(), to_uri);
        let mut via_params = Params::new();
        via_params.set("branch", Some(new_branch()));
        request.headers.push(Header::Via(vec![ViaHop {
            protocol: "SIP".into(),
            version: "2.0".into(),
            transport: local.transport.clone(),
            host: classify_host(&local.host),
            port: Some(local.port),
            params: via_params,
        }]));
        request.headers.push(Header::MaxForwards(70));
        request.headers.push(Header::To(to));
        request.headers.push(Header::From(from));
        request.headers.push(Header::CallId(call_id));
        request.headers.push(Header::CSeq {
            seq: 1,
            method: method.clone(),
        });
        // MESSAGE and PUBLISH do not establish a reachable contact.
        if !matches!(method, Method::Message | Method::Publish) {
            let mut contact_uri = SipUri::new(classify_host(&local.host));
            contact_uri.port = Some(local.port);
            contact_uri.user = self
                .identity
                .default_identity()
                .and_then(|u| u.as_sip().and_then(|s| s.user.clone()));
            request
                .headers
                .push(Header::Contact(vec![Address::new(Uri::Sip(contact_uri))]));
        }
        request.headers.push(Header::ContentLength(0));

        *self.request.lock().unwrap() = Some(request);
        self.set_state(ClientState::Initialized);
        Ok(())
    }

    /// Appends a header to the staged request, for method-specific
    /// headers such as Event or Expires.
    pub fn add_header(&self, header: Header) -> Result<()> {
        if !matches!(
            self.state(),
            ClientState::Initialized | ClientState::StreamOpen
        ) {
            return Err(Error::invalid_state(format!(
                "add_header in {}",
                self.state()
            )));
        }
        let mut guard = self.request.lock().unwrap();
        let request = guard
            .as_mut()
            .ok_or_else(|| Error::invalid_state("no staged request"))?;
        request.headers.push(header);
        Ok(())
    }

    /// Marks the underlying stream as opened ahead of `send`, for
    /// transports that separate connection setup from the first write.
    pub fn open_stream(&self) -> Result<()> {
        if self.state() != ClientState::Initialized {
            return Err(Error::invalid_state(format!(
                "open_stream in {}",
                self.state()
            )));
        }
        self.set_state(ClientState::StreamOpen);
        Ok(())
    }

    /// Commits the staged request to the transport.
    pub async fn send(&self) -> Result<()> {
        if !matches!(
            self.state(),
            ClientState::Initialized | ClientState::StreamOpen
        ) {
            return Err(Error::invalid_state(format!("send in {}", self.state())));
        }
        let _update = self.update_latch.lock().await;

        let (frame, method) = {
            let mut guard = self.request.lock().unwrap();
            let request = guard
                .as_mut()
                .ok_or_else(|| Error::invalid_state("send without a staged request"))?;

            validate_mandatory(&request.headers)?;
            for header in request.headers.iter_mut() {
                if let Header::From(addr) = header {
                    if addr.tag().is_none() {
                        addr.set_tag(new_tag());
                    }
                }
            }
            // A REGISTER Request-URI addresses the registrar, never a user.
            if request.method == Method::Register {
                if let Some(sip) = request.uri.as_sip_mut() {
                    sip.user = None;
                    sip.password = None;
                }
            }
            self.check_via(&request.headers)?;
            (Bytes::from(request.to_string()), request.method.clone())
        };

        if let Err(err) = self.transport.send(frame).await {
            self.close();
            return Err(Error::Io(err));
        }
        if method == Method::Ack {
            self.set_state(ClientState::Completed);
        } else {
            self.set_state(ClientState::Proceeding);
        }
        Ok(())
    }

    fn check_via(&self, headers: &Headers) -> Result<()> {
        let local = self.transport.local_contact();
        let hop = headers
            .via_top()
            .ok_or_else(|| Error::invalid_operation("request without Via"))?;
        let port = hop.port.unwrap_or(5060);
        if hop.host.as_str() != local.host || port != local.port {
            return Err(Error::invalid_operation(format!(
                "Via sent-by {}:{port} does not match local binding {}:{}",
                hop.host, local.host, local.port
            )));
        }
        Ok(())
    }

    /// Waits up to `timeout` for a queued response. `Ok(false)` when the
    /// queue stayed empty or the connection closed; on `Ok(true)` the
    /// popped response is available via
    /// [`ClientConnection::last_response`].
    pub async fn receive(&self, timeout: Duration) -> Result<bool> {
        let mut rx = self.queue_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => Ok(false),
            Ok(None) => Ok(false),
            Ok(Some(response)) => {
                if response.status.is_auth_challenge() && self.auth_failed.load(Ordering::SeqCst)
                {
                    *self.received.lock().unwrap() = Some(response);
                    return Err(Error::AuthenticationFailed {
                        attempts: self.auth_attempts.load(Ordering::SeqCst),
                    });
                }
                *self.received.lock().unwrap() = Some(response);
                Ok(true)
            }
        }
    }

    /// Feeds one incoming response into the connection. Called from the
    /// transport demultiplexer.
    pub async fn process_response(&self, response: Response) -> Result<()> {
        if self.state() == ClientState::Terminated {
            return Ok(());
        }
        let (current_seq, method) = {
            let guard = self.request.lock().unwrap();
            match guard.as_ref().and_then(|r| r.headers.cseq()) {
                Some((seq, method)) => (seq, method.clone()),
                None => return Ok(()),
            }
        };
        match response.headers.cseq() {
            Some((seq, _)) if seq == current_seq => {}
            other => {
                debug!(
                    got = ?other.map(|(s, _)| s),
                    expected = current_seq,
                    "stale or tagless CSeq, response ignored"
                );
                return Ok(());
            }
        }

        if response.status.is_auth_challenge() {
            return self.process_challenge(response, &method).await;
        }

        if response.status.is_provisional() {
            self.provisional_seen.store(true, Ordering::SeqCst);
            if method.establishes_dialog() {
                if let Some(tag) = response.headers.to_addr().and_then(Address::tag) {
                    let shared = self.ensure_dialog();
                    // Only INVITE dialogs have an early phase; subscription
                    // dialogs wait for the 2xx or the first NOTIFY.
                    if method == Method::Invite {
                        shared.lock().unwrap().on_early(tag);
                    }
                }
            }
            self.enqueue(response);
            return Ok(());
        }

        // Final response.
        self.final_seen.store(true, Ordering::SeqCst);
        if response.status.is_success() {
            self.on_success(&method, &response);
        }
        *self.final_response.lock().unwrap() = Some(response.clone());
        self.set_state(ClientState::Completed);
        self.enqueue(response);
        Ok(())
    }

    async fn process_challenge(&self, response: Response, method: &Method) -> Result<()> {
        // A challenge for a realm with no provisioned credentials is the
        // application's to answer; it is queued like any other final.
        let provisioned = challenge_of(&response)
            .and_then(|(challenge, _)| challenge.get("realm"))
            .map(|realm| self.identity.credentials_for(realm).is_some())
            .unwrap_or(false);
        if !provisioned {
            debug!(status = %response.status, "no credentials for challenge, surfaced");
            self.final_seen.store(true, Ordering::SeqCst);
            self.set_state(ClientState::Completed);
            self.enqueue(response);
            return Ok(());
        }

        let attempts = self.auth_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts <= MAX_AUTH_ATTEMPTS {
            if let Some(frame) = self.stage_auth_resend(&response, method)? {
                self.set_state(ClientState::Unauthorized);
                let _update = self.update_latch.lock().await;
                if let Err(err) = self.transport.send(frame).await {
                    self.close();
                    return Err(Error::Io(err));
                }
                debug!(attempt = attempts, "challenge answered, request re-sent");
                self.set_state(ClientState::Proceeding);
                return Ok(());
            }
        }
        warn!(attempts, "authentication attempts exhausted");
        self.auth_failed.store(true, Ordering::SeqCst);
        self.final_seen.store(true, Ordering::SeqCst);
        self.set_state(ClientState::Completed);
        self.enqueue(response);
        Ok(())
    }

    /// Rewrites the staged request with fresh credentials. `None` when no
    /// usable challenge or credentials exist.
    fn stage_auth_resend(&self, response: &Response, method: &Method) -> Result<Option<Bytes>> {
        let Some((challenge, proxy)) = challenge_of(response) else {
            return Ok(None);
        };
        let Some(realm) = challenge.get("realm") else {
            return Ok(None);
        };
        let Some(creds) = self.identity.credentials_for(realm) else {
            return Ok(None);
        };

        let mut guard = self.request.lock().unwrap();
        let request = match guard.as_mut() {
            Some(r) => r,
            None => return Ok(None),
        };
        let answer = answer_challenge(challenge, &creds, method, &request.uri.to_string())?;
        bump_for_resend(request);
        if proxy {
            request.headers.set(Header::ProxyAuthorization(answer));
        } else {
            request.headers.set(Header::Authorization(answer));
        }
        Ok(Some(Bytes::from(request.to_string())))
    }

    fn on_success(&self, method: &Method, response: &Response) {
        if method.establishes_dialog() {
            let shared = self.ensure_dialog();
            let remote_tag = response
                .headers
                .to_addr()
                .and_then(Address::tag)
                .unwrap_or("")
                .to_string();
            let remote_target = response.headers.contacts().next().map(|c| c.uri.clone());
            let mut dialog = shared.lock().unwrap();
            dialog.confirm(&remote_tag, remote_target);
            match method {
                Method::Invite => dialog.set_wait_for_bye(),
                Method::Subscribe => dialog.add_subscription(&self.event_package()),
                Method::Refer => dialog.add_subscription("refer"),
                _ => {}
            }
        }
        if *method == Method::Bye {
            if let Some(shared) = self.dialog() {
                shared.lock().unwrap().on_bye_success();
            }
        }
        if method.is_refreshable() {
            self.arm_refresh(method, response);
        }
    }

    fn arm_refresh(&self, method: &Method, response: &Response) {
        let listener = match self.refresh_listener.lock().unwrap().clone() {
            Some(l) => l,
            None => return,
        };
        let id = {
            let mut slot = self.refresh_id.lock().unwrap();
            *slot.get_or_insert_with(|| {
                self.refresh.create_refresh_task(
                    self.request.clone(),
                    self.transport.clone(),
                    self.update_latch.clone(),
                    listener,
                )
            })
        };
        let delay = refresh_expiry(method, &response.headers);
        if let Err(err) = self.refresh.schedule_task(id, delay) {
            warn!(refresh_id = id, error = %err, "refresh scheduling failed");
        }
    }

    fn event_package(&self) -> String {
        self.request()
            .and_then(|r| {
                r.headers.iter().find_map(|h| match h {
                    Header::Event(tp) => Some(tp.value.clone()),
                    _ => None,
                })
            })
            .unwrap_or_else(|| "presence".into())
    }

    fn ensure_dialog(&self) -> SharedDialog {
        let mut guard = self.dialog.lock().unwrap();
        guard
            .get_or_insert_with(|| {
                let request = self.request.lock().unwrap();
                let (call_id, local_tag) = request
                    .as_ref()
                    .map(|r| {
                        (
                            r.headers.call_id().unwrap_or("").to_string(),
                            r.headers
                                .from_addr()
                                .and_then(Address::tag)
                                .unwrap_or("")
                                .to_string(),
                        )
                    })
                    .unwrap_or_default();
                Arc::new(Mutex::new(Dialog::new(call_id, local_tag)))
            })
            .clone()
    }

    fn enqueue(&self, response: Response) {
        let guard = self.queue_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            match tx.try_send(response) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    warn!(status = %dropped.status, "response queue full, newest dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    /// Creates a CANCEL connection for the pending request. Legal only
    /// while proceeding: at least one provisional seen, no final yet.
    pub fn init_cancel(&self) -> Result<ClientConnection> {
        if self.state() != ClientState::Proceeding {
            return Err(Error::invalid_state(format!(
                "init_cancel in {}",
                self.state()
            )));
        }
        if !self.provisional_seen.load(Ordering::SeqCst) {
            return Err(Error::invalid_state(
                "init_cancel before any provisional response",
            ));
        }
        if self.final_seen.load(Ordering::SeqCst) {
            return Err(Error::invalid_state("init_cancel after a final response"));
        }
        let original = self
            .request()
            .ok_or_else(|| Error::invalid_state("no request to cancel"))?;

        let mut cancel = Request::new(Method::Cancel, original.uri.clone());
        for header in original.headers.iter() {
            match header {
                // CANCEL matches the pending transaction: same branch,
                // same sequence number.
                Header::Via(_) | Header::To(_) | Header::From(_) | Header::CallId(_) => {
                    cancel.headers.push(header.clone());
                }
                Header::CSeq { seq, .. } => cancel.headers.push(Header::CSeq {
                    seq: *seq,
                    method: Method::Cancel,
                }),
                _ => {}
            }
        }
        cancel.headers.push(Header::MaxForwards(70));
        cancel.headers.push(Header::ContentLength(0));

        let conn = ClientConnection::new(
            self.transport.clone(),
            self.identity.clone(),
            self.refresh.clone(),
        );
        *conn.request.lock().unwrap() = Some(cancel);
        conn.set_state(ClientState::Initialized);
        Ok(conn)
    }

    /// Stages the ACK for a completed INVITE, re-entering `Initialized`.
    pub fn init_ack(&self) -> Result<()> {
        if self.state() != ClientState::Completed {
            return Err(Error::invalid_state(format!(
                "init_ack in {}",
                self.state()
            )));
        }
        let original = self
            .request()
            .ok_or_else(|| Error::invalid_state("no request to acknowledge"))?;
        if original.method != Method::Invite {
            return Err(Error::invalid_operation(format!(
                "init_ack after {}",
                original.method
            )));
        }
        let final_response = self
            .final_response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::invalid_state("init_ack before a final response"))?;

        let target = self
            .dialog()
            .and_then(|d| d.lock().unwrap().remote_target.clone())
            .unwrap_or_else(|| original.uri.clone());
        let mut ack = Request::new(Method::Ack, target);
        for header in original.headers.iter() {
            match header {
                Header::Via(hops) => {
                    let mut hops = hops.clone();
                    if let Some(hop) = hops.first_mut() {
                        hop.params.set("branch", Some(new_branch()));
                    }
                    ack.headers.push(Header::Via(hops));
                }
                Header::From(_) | Header::CallId(_) => ack.headers.push(header.clone()),
                Header::CSeq { seq, .. } => ack.headers.push(Header::CSeq {
                    seq: *seq,
                    method: Method::Ack,
                }),
                _ => {}
            }
        }
        // To carries the peer's tag from the final response.
        if let Some(to) = final_response.headers.to_addr() {
            ack.headers.push(Header::To(to.clone()));
        }
        ack.headers.push(Header::MaxForwards(70));
        ack.headers.push(Header::ContentLength(0));

        *self.request.lock().unwrap() = Some(ack);
        self.set_state(ClientState::Initialized);
        Ok(())
    }

    /// Terminates the connection, waking any `receive` waiter.
    pub fn close(&self) {
        self.set_state(ClientState::Terminated);
        self.queue_tx.lock().unwrap().take();
        if let Some(id) = self.refresh_id.lock().unwrap().take() {
            self.refresh.cancel(id);
        }
    }
}

fn validate_mandatory(headers: &Headers) -> Result<()> {
    if headers.to_addr().is_none() {
        return Err(Error::invalid_operation("request without To"));
    }
    if headers.from_addr().is_none() {
        return Err(Error::invalid_operation("request without From"));
    }
    if headers.cseq().is_none() {
        return Err(Error::invalid_operation("request without CSeq"));
    }
    if headers.call_id().is_none() {
        return Err(Error::invalid_operation("request without Call-ID"));
    }
    if headers.get(&HeaderName::MaxForwards).is_none() {
        return Err(Error::invalid_operation("request without Max-Forwards"));
    }
    Ok(())
}

fn anonymous_uri() -> Uri {
    let mut uri = SipUri::new(uasip_sip_core::Host::Domain("anonymous.invalid".into()));
    uri.user = Some("anonymous".into());
    Uri::Sip(uri)
}

fn challenge_of(response: &Response) -> Option<(&Auth, bool)> {
    response.headers.iter().find_map(|h| match h {
        Header::WwwAuthenticate(a) => Some((a, false)),
        Header::ProxyAuthenticate(a) => Some((a, true)),
        _ => None,
    })
}

/// Seconds until the binding created by `headers` should be refreshed:
/// the smallest positive Contact `expires` (ignored for SUBSCRIBE, whose
/// Contact mirrors the notifier) and the Expires header, defaulting to
/// one hour when neither speaks.
fn refresh_expiry(method: &Method, headers: &Headers) -> i64 {
    let mut candidates: Vec<u32> = Vec::new();
    if *method != Method::Subscribe {
        if let Some(min) = headers
            .contacts()
            .filter_map(|c| c.params.expires())
            .filter(|e| *e > 0)
            .min()
        {
            candidates.push(min);
        }
    }
    if let Some(expires) = headers.expires() {
        if expires > 0 {
            candidates.push(expires);
        }
    }
    i64::from(candidates.into_iter().min().unwrap_or(DEFAULT_EXPIRES_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DigestCredentials;
    use crate::dialog::DialogState;
    use crate::identity::InMemoryIdentityStore;
    use crate::timer::TokioTimer;
    use crate::transport::LoopbackTransport;
    use uasip_sip_core::{parse_request, parse_response, parse_uri};

    struct Fixture {
        transport: Arc<LoopbackTransport>,
        identity: Arc<InMemoryIdentityStore>,
        refresh: Arc<RefreshManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let identity = InMemoryIdentityStore::with_identity(
                parse_uri("sip:alice@example.com", 0).unwrap(),
            );
            Fixture {
                transport: Arc::new(LoopbackTransport::new("192.0.2.1", 5060)),
                identity: Arc::new(identity),
                refresh: Arc::new(RefreshManager::new(Box::new(TokioTimer))),
            }
        }

        fn connection(&self) -> ClientConnection {
            ClientConnection::new(
                self.transport.clone(),
                self.identity.clone(),
                self.refresh.clone(),
            )
        }
    }

    fn uri(s: &str) -> Uri {
        parse_uri(s, 0).unwrap()
    }

    fn response_for(conn: &ClientConnection, status_line: &str, extra: &str) -> Response {
        let request = conn.request().unwrap();
        let (seq, method) = request.headers.cseq().unwrap();
        let method = method.clone();
        let from = request.headers.from_addr().unwrap().clone();
        let to_uri = request.headers.to_addr().unwrap().uri.clone();
        let call_id = request.headers.call_id().unwrap().to_string();
        let text = format!(
            "{status_line}\r\nFrom: {from}\r\nTo: <{to_uri}>;tag=remote\r\n\
             Call-ID: {call_id}\r\nCSeq: {seq} {method}\r\n{extra}\r\n",
        );
        parse_response(text.as_bytes()).unwrap()
    }

    #[tokio::test]
    async fn init_request_is_single_shot() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Options, uri("sip:bob@example.net"))
            .unwrap();
        let err = conn
            .init_request(Method::Options, uri("sip:bob@example.net"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn dialog_only_methods_need_a_dialog() {
        let fx = Fixture::new();
        let conn = fx.connection();
        let err = conn
            .init_request(Method::Bye, uri("sip:bob@example.net"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert_eq!(conn.state(), ClientState::Created);
    }

    #[tokio::test]
    async fn built_request_carries_the_mandatory_headers() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Invite, uri("sip:bob@example.net"))
            .unwrap();
        let request = conn.request().unwrap();
        assert_eq!(request.headers.cseq().unwrap().0, 1);
        assert!(request.headers.from_addr().unwrap().tag().is_some());
        assert!(request.headers.via_top().unwrap().branch().unwrap().starts_with("z9hG4bK"));
        assert_eq!(request.headers.contacts().count(), 1);
    }

    #[tokio::test]
    async fn message_requests_omit_contact() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Message, uri("sip:bob@example.net"))
            .unwrap();
        assert_eq!(conn.request().unwrap().headers.contacts().count(), 0);
    }

    #[tokio::test]
    async fn register_strips_the_request_uri_user() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Register, uri("sip:alice@example.com"))
            .unwrap();
        conn.send().await.unwrap();
        assert_eq!(conn.state(), ClientState::Proceeding);

        let frame = fx.transport.last_frame_text().unwrap();
        assert!(frame.starts_with("REGISTER sip:example.com SIP/2.0\r\n"));
        let sent = parse_request(frame.as_bytes()).unwrap();
        assert_eq!(
            sent.headers.to_addr().unwrap().uri.to_string(),
            "sip:alice@example.com"
        );
    }

    #[tokio::test]
    async fn transport_failure_closes_the_connection() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Options, uri("sip:bob@example.net"))
            .unwrap();
        fx.transport.fail_next_sends(true);
        let err = conn.send().await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(conn.state(), ClientState::Terminated);
    }

    #[tokio::test]
    async fn cancel_is_legal_only_between_provisional_and_final() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Invite, uri("sip:bob@example.net"))
            .unwrap();
        conn.send().await.unwrap();

        assert!(conn.init_cancel().is_err());

        conn.process_response(response_for(&conn, "SIP/2.0 180 Ringing", ""))
            .await
            .unwrap();
        let cancel = conn.init_cancel().unwrap();
        assert_eq!(cancel.state(), ClientState::Initialized);
        let staged = cancel.request().unwrap();
        assert_eq!(staged.method, Method::Cancel);
        let original = conn.request().unwrap();
        assert_eq!(
            staged.headers.via_top().unwrap().branch(),
            original.headers.via_top().unwrap().branch()
        );
        assert_eq!(staged.headers.cseq().unwrap().0, 1);

        conn.process_response(response_for(&conn, "SIP/2.0 200 OK", ""))
            .await
            .unwrap();
        assert!(conn.init_cancel().is_err());
    }

    #[tokio::test]
    async fn ack_reenters_initialized_and_targets_the_contact() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Invite, uri("sip:bob@example.net"))
            .unwrap();
        conn.send().await.unwrap();
        conn.process_response(response_for(
            &conn,
            "SIP/2.0 200 OK",
            "Contact: <sip:bob@198.51.100.7:5062>\r\n",
        ))
        .await
        .unwrap();
        assert_eq!(conn.state(), ClientState::Completed);

        conn.init_ack().unwrap();
        assert_eq!(conn.state(), ClientState::Initialized);
        let ack = conn.request().unwrap();
        assert_eq!(ack.method, Method::Ack);
        assert_eq!(ack.uri.to_string(), "sip:bob@198.51.100.7:5062");
        assert_eq!(ack.headers.to_addr().unwrap().tag(), Some("remote"));
        assert_eq!(ack.headers.cseq().unwrap(), (1, &Method::Ack));

        conn.send().await.unwrap();
        assert_eq!(conn.state(), ClientState::Completed);
    }

    #[tokio::test]
    async fn invite_success_confirms_a_wait_for_bye_dialog() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Invite, uri("sip:bob@example.net"))
            .unwrap();
        conn.send().await.unwrap();
        conn.process_response(response_for(&conn, "SIP/2.0 180 Ringing", ""))
            .await
            .unwrap();
        {
            let dialog = conn.dialog().unwrap();
            assert_eq!(dialog.lock().unwrap().state(), DialogState::Early);
        }
        conn.process_response(response_for(&conn, "SIP/2.0 200 OK", ""))
            .await
            .unwrap();
        let dialog = conn.dialog().unwrap();
        let dialog = dialog.lock().unwrap();
        assert_eq!(dialog.state(), DialogState::Confirmed);
        assert!(dialog.wait_for_bye());
        assert_eq!(dialog.remote_tag.as_deref(), Some("remote"));
    }

    #[tokio::test]
    async fn stale_cseq_responses_are_ignored() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Options, uri("sip:bob@example.net"))
            .unwrap();
        conn.send().await.unwrap();
        let mut stale = response_for(&conn, "SIP/2.0 200 OK", "");
        stale.headers.set(Header::CSeq {
            seq: 99,
            method: Method::Options,
        });
        conn.process_response(stale).await.unwrap();
        assert_eq!(conn.state(), ClientState::Proceeding);
        assert!(!conn.receive(Duration::from_millis(10)).await.unwrap());
    }

    #[tokio::test]
    async fn challenge_is_answered_transparently_then_exhausts() {
        let fx = Fixture::new();
        fx.identity
            .set_fallback(DigestCredentials::new("alice", "secret"));
        let conn = fx.connection();
        conn.init_request(Method::Register, uri("sip:alice@example.com"))
            .unwrap();
        conn.send().await.unwrap();

        let challenge = |conn: &ClientConnection| {
            response_for(
                conn,
                "SIP/2.0 401 Unauthorized",
                "WWW-Authenticate: Digest realm=\"example.com\", nonce=\"n1\"\r\n",
            )
        };

        conn.process_response(challenge(&conn)).await.unwrap();
        let frame = fx.transport.last_frame_text().unwrap();
        let resent = parse_request(frame.as_bytes()).unwrap();
        assert_eq!(resent.headers.cseq().unwrap().0, 2);
        assert!(frame.contains("Authorization: Digest"));
        assert!(!conn.receive(Duration::from_millis(10)).await.unwrap());

        conn.process_response(challenge(&conn)).await.unwrap();
        assert_eq!(
            conn.request().unwrap().headers.cseq().unwrap().0,
            3,
            "second re-origination"
        );

        conn.process_response(challenge(&conn)).await.unwrap();
        let err = conn.receive(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::AuthenticationFailed { attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn challenge_without_credentials_is_queued_for_the_application() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Register, uri("sip:alice@example.com"))
            .unwrap();
        conn.send().await.unwrap();
        conn.process_response(response_for(
            &conn,
            "SIP/2.0 401 Unauthorized",
            "WWW-Authenticate: Digest realm=\"example.com\", nonce=\"n1\"\r\n",
        ))
        .await
        .unwrap();

        // No resend happened, and the 401 pops like any other final.
        assert_eq!(fx.transport.sent_frames().len(), 1);
        assert!(conn.receive(Duration::from_secs(1)).await.unwrap());
        let popped = conn.last_response().unwrap();
        assert!(popped.status.is_auth_challenge());
        assert_eq!(conn.state(), ClientState::Completed);
    }

    #[tokio::test]
    async fn subscribe_provisionals_do_not_enter_early() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Subscribe, uri("sip:bob@example.net"))
            .unwrap();
        conn.send().await.unwrap();
        conn.process_response(response_for(&conn, "SIP/2.0 180 Ringing", ""))
            .await
            .unwrap();
        {
            let dialog = conn.dialog().unwrap();
            assert_eq!(dialog.lock().unwrap().state(), DialogState::Initialized);
        }
        conn.process_response(response_for(&conn, "SIP/2.0 200 OK", ""))
            .await
            .unwrap();
        let dialog = conn.dialog().unwrap();
        let dialog = dialog.lock().unwrap();
        assert_eq!(dialog.state(), DialogState::Confirmed);
        assert_eq!(dialog.subscriptions(), ["presence"]);
    }

    #[tokio::test(start_paused = true)]
    async fn register_success_arms_the_refresh_manager() {
        let fx = Fixture::new();
        let conn = fx.connection();
        struct Quiet;
        impl RefreshListener for Quiet {
            fn on_refresh_response(&self, _: RefreshId, _: Response) {}
        }
        conn.set_refresh_listener(Arc::new(Quiet));
        conn.init_request(Method::Register, uri("sip:alice@example.com"))
            .unwrap();
        conn.send().await.unwrap();
        conn.process_response(response_for(
            &conn,
            "SIP/2.0 200 OK",
            "Contact: <sip:alice@192.0.2.1>;expires=120\r\nExpires: 300\r\n",
        ))
        .await
        .unwrap();
        assert_eq!(fx.refresh.len(), 1);

        let before = fx.transport.sent_frames().len();
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(fx.transport.sent_frames().len(), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_rearms_after_each_successful_cycle() {
        let fx = Fixture::new();
        let conn = fx.connection();
        struct Quiet;
        impl RefreshListener for Quiet {
            fn on_refresh_response(&self, _: RefreshId, _: Response) {}
        }
        conn.set_refresh_listener(Arc::new(Quiet));
        conn.init_request(Method::Register, uri("sip:alice@example.com"))
            .unwrap();
        conn.send().await.unwrap();
        conn.process_response(response_for(&conn, "SIP/2.0 200 OK", "Expires: 60\r\n"))
            .await
            .unwrap();
        assert!(conn.receive(Duration::from_millis(10)).await.unwrap());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fx.transport.sent_frames().len(), 2);
        assert_eq!(conn.request().unwrap().headers.cseq().unwrap().0, 2);

        // The 200 answering the refresh matches the resent CSeq, pops
        // normally, and re-arms the timer for another cycle.
        conn.process_response(response_for(&conn, "SIP/2.0 200 OK", "Expires: 60\r\n"))
            .await
            .unwrap();
        assert!(conn.receive(Duration::from_millis(10)).await.unwrap());
        assert!(conn.last_response().unwrap().status.is_success());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fx.transport.sent_frames().len(), 3);
        assert_eq!(conn.request().unwrap().headers.cseq().unwrap().0, 3);
    }

    #[tokio::test]
    async fn send_rejects_a_request_missing_max_forwards() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Options, uri("sip:bob@example.net"))
            .unwrap();
        conn.request
            .lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .headers
            .remove(&HeaderName::MaxForwards);
        let err = conn.send().await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert!(fx.transport.sent_frames().is_empty());
    }

    #[test]
    fn refresh_expiry_prefers_the_smallest_positive() {
        let resp = parse_response(
            b"SIP/2.0 200 OK\r\nContact: <sip:a@h>;expires=120\r\nExpires: 300\r\n\r\n",
        )
        .unwrap();
        assert_eq!(refresh_expiry(&Method::Register, &resp.headers), 120);
        // SUBSCRIBE ignores Contact expires; the peer's Contact is the
        // notifier, not the binding.
        assert_eq!(refresh_expiry(&Method::Subscribe, &resp.headers), 300);

        let bare = parse_response(b"SIP/2.0 200 OK\r\n\r\n").unwrap();
        assert_eq!(refresh_expiry(&Method::Register, &bare.headers), 3600);

        let zero = parse_response(b"SIP/2.0 200 OK\r\nExpires: 0\r\n\r\n").unwrap();
        assert_eq!(refresh_expiry(&Method::Register, &zero.headers), 3600);
    }

    #[tokio::test]
    async fn queue_overflow_drops_the_newest() {
        let fx = Fixture::new();
        let conn = fx.connection();
        conn.init_request(Method::Invite, uri("sip:bob@example.net"))
            .unwrap();
        conn.send().await.unwrap();
        for _ in 0..12 {
            conn.process_response(response_for(&conn, "SIP/2.0 180 Ringing", ""))
                .await
                .unwrap();
        }
        let mut popped = 0;
        while conn.receive(Duration::from_millis(5)).await.unwrap() {
            popped += 1;
        }
        assert_eq!(popped, 10);
    }

    #[tokio::test]
    async fn close_wakes_a_pending_receive() {
        let fx = Fixture::new();
        let conn = Arc::new(fx.connection());
        conn.init_request(Method::Options, uri("sip:bob@example.net"))
            .unwrap();
        conn.send().await.unwrap();

        let waiter = conn.clone();
        let handle =
            tokio::spawn(async move { waiter.receive(Duration::from_secs(30)).await });
        tokio::task::yield_now().await;
        conn.close();
        let got = handle.await.unwrap().unwrap();
        assert!(!got);
        assert_eq!(conn.state(), ClientState::Terminated);
    }
}
