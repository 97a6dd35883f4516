//! Automatic re-registration and re-subscription.
//!
//! The manager keeps a registry of refreshable requests. Each entry
//! shares the owning connection's staged-request slot; arming it starts a
//! one-shot timer, and when the timer fires the staged request is re-sent
//! in place with a bumped CSeq and a fresh Via branch, so the connection
//! recognizes the response to the refresh. Each rearm invalidates the
//! previous timer through a generation token taken under the registry
//! lock, so a stale timer that races a replacement observes the token
//! mismatch and does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use uasip_sip_core::{Header, Headers, Request, Response, StatusCode};

use crate::error::{Error, Result};
use crate::timer::{TimerHandle, TimerService};
use crate::transport::Transport;
use crate::util::bump_for_resend;

/// Opaque handle to a registered refresh task.
pub type RefreshId = u64;

/// Receives the outcome of refresh attempts.
///
/// Real responses arrive through the owning connection; the manager only
/// reports synthesized failures here, plus the id so the embedder can
/// correlate.
pub trait RefreshListener: Send + Sync {
    fn on_refresh_response(&self, id: RefreshId, response: Response);
}

struct RefreshEntry {
    /// The connection's staged request, mutated in place on resend.
    request: Arc<Mutex<Option<Request>>>,
    transport: Arc<dyn Transport>,
    listener: Arc<dyn RefreshListener>,
    /// Serializes refresh sends against application-initiated updates on
    /// the same connection.
    update_latch: Arc<tokio::sync::Mutex<()>>,
    generation: u64,
    timer: Option<TimerHandle>,
}

struct Inner {
    timer: Box<dyn TimerService>,
    next_id: AtomicU64,
    entries: Mutex<HashMap<RefreshId, RefreshEntry>>,
}

/// Registry of refresh tasks, owned by the stack.
pub struct RefreshManager {
    inner: Arc<Inner>,
}

impl RefreshManager {
    pub fn new(timer: Box<dyn TimerService>) -> Self {
        RefreshManager {
            inner: Arc::new(Inner {
                timer,
                next_id: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a connection's staged-request slot for refreshing. The
    /// entry is inert until [`RefreshManager::schedule_task`] arms it.
    pub fn create_refresh_task(
        &self,
        request: Arc<Mutex<Option<Request>>>,
        transport: Arc<dyn Transport>,
        update_latch: Arc<tokio::sync::Mutex<()>>,
        listener: Arc<dyn RefreshListener>,
    ) -> RefreshId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().unwrap().insert(
            id,
            RefreshEntry {
                request,
                transport,
                listener,
                update_latch,
                generation: 0,
                timer: None,
            },
        );
        debug!(refresh_id = id, "refresh task registered");
        id
    }

    /// Arms (or re-arms) task `id` to fire after `delay_secs`. A negative
    /// delay is a no-op; re-arming replaces any pending timer.
    pub fn schedule_task(&self, id: RefreshId, delay_secs: i64) -> Result<()> {
        if delay_secs < 0 {
            return Ok(());
        }
        let mut entries = self.inner.entries.lock().unwrap();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| Error::invalid_operation(format!("unknown refresh task {id}")))?;
        entry.generation += 1;
        let generation = entry.generation;
        if let Some(old) = entry.timer.take() {
            old.cancel();
        }
        let inner = self.inner.clone();
        let handle = self.inner.timer.schedule(
            Duration::from_secs(delay_secs as u64),
            Box::pin(async move {
                Inner::fire(inner, id, generation).await;
            }),
        );
        entry.timer = Some(handle);
        debug!(refresh_id = id, delay_secs, "refresh armed");
        Ok(())
    }

    /// Deregisters task `id`, cancelling any pending timer.
    pub fn cancel(&self, id: RefreshId) {
        if let Some(entry) = self.inner.entries.lock().unwrap().remove(&id) {
            if let Some(timer) = entry.timer {
                timer.cancel();
            }
            debug!(refresh_id = id, "refresh task removed");
        }
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    async fn fire(inner: Arc<Inner>, id: RefreshId, generation: u64) {
        // Stage the resend under the lock, then send without it.
        let staged = {
            let mut entries = inner.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(&id) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            let request = {
                let mut slot = entry.request.lock().unwrap();
                let Some(request) = slot.as_mut() else {
                    return;
                };
                bump_for_resend(request);
                request.clone()
            };
            (
                request,
                entry.transport.clone(),
                entry.listener.clone(),
                entry.update_latch.clone(),
            )
        };
        let (request, transport, listener, latch) = staged;

        let _update = latch.lock().await;
        let frame = Bytes::from(request.to_string());
        match transport.send(frame).await {
            Ok(()) => {
                debug!(refresh_id = id, method = %request.method, "refresh sent");
            }
            Err(err) => {
                warn!(refresh_id = id, error = %err, "refresh send failed");
                if let Some(entry) = inner.entries.lock().unwrap().remove(&id) {
                    if let Some(timer) = entry.timer {
                        timer.cancel();
                    }
                }
                listener.on_refresh_response(id, synthesize_failure(&request));
            }
        }
    }
}

/// A locally generated 503 standing in for the response the network
/// never produced.
fn synthesize_failure(request: &Request) -> Response {
    let mut headers = Headers::new();
    for header in request.headers.iter() {
        if matches!(header, Header::CSeq { .. } | Header::CallId(_)) {
            headers.push(header.clone());
        }
    }
    Response {
        status: StatusCode::SERVICE_UNAVAILABLE,
        reason: "Service Unavailable".into(),
        headers,
        body: Bytes::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TokioTimer;
    use crate::transport::LoopbackTransport;
    use uasip_sip_core::parse_request;

    struct Recorder {
        events: Mutex<Vec<(RefreshId, Response)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Recorder {
                events: Mutex::new(Vec::new()),
            })
        }
    }

    impl RefreshListener for Recorder {
        fn on_refresh_response(&self, id: RefreshId, response: Response) {
            self.events.lock().unwrap().push((id, response));
        }
    }

    fn register_request() -> Arc<Mutex<Option<Request>>> {
        Arc::new(Mutex::new(Some(staged_register())))
    }

    fn staged_register() -> Request {
        parse_request(
            b"REGISTER sip:example.com SIP/2.0\r\n\
              Via: SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bKinitial\r\n\
              From: <sip:alice@example.com>;tag=abc\r\n\
              To: <sip:alice@example.com>\r\n\
              Call-ID: 1@127.0.0.1\r\n\
              CSeq: 1 REGISTER\r\n\
              Max-Forwards: 70\r\n\
              Content-Length: 0\r\n\r\n",
        )
        .unwrap()
    }

    fn manager() -> RefreshManager {
        RefreshManager::new(Box::new(TokioTimer))
    }

    #[tokio::test(start_paused = true)]
    async fn fire_resends_with_bumped_cseq_and_fresh_branch() {
        let mgr = manager();
        let transport = Arc::new(LoopbackTransport::new("127.0.0.1", 5060));
        let slot = register_request();
        let id = mgr.create_refresh_task(
            slot.clone(),
            transport.clone(),
            Arc::new(tokio::sync::Mutex::new(())),
            Recorder::new(),
        );
        mgr.schedule_task(id, 30).unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;

        let sent = transport.last_frame_text().expect("a resend");
        let resent = parse_request(sent.as_bytes()).unwrap();
        assert_eq!(resent.headers.cseq().unwrap().0, 2);
        let branch = resent.headers.via_top().unwrap().branch().unwrap().to_string();
        assert_ne!(branch, "z9hG4bKinitial");
        assert!(branch.starts_with("z9hG4bK"));

        // The owner sees the same CSeq as the wire.
        let staged = slot.lock().unwrap();
        assert_eq!(staged.as_ref().unwrap().headers.cseq().unwrap().0, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn negative_delay_is_a_no_op() {
        let mgr = manager();
        let transport = Arc::new(LoopbackTransport::new("127.0.0.1", 5060));
        let id = mgr.create_refresh_task(
            register_request(),
            transport.clone(),
            Arc::new(tokio::sync::Mutex::new(())),
            Recorder::new(),
        );
        mgr.schedule_task(id, -1).unwrap();
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(transport.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_the_pending_timer() {
        let mgr = manager();
        let transport = Arc::new(LoopbackTransport::new("127.0.0.1", 5060));
        let id = mgr.create_refresh_task(
            register_request(),
            transport.clone(),
            Arc::new(tokio::sync::Mutex::new(())),
            Recorder::new(),
        );
        mgr.schedule_task(id, 10).unwrap();
        mgr.schedule_task(id, 100).unwrap();
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(transport.sent_frames().is_empty());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.sent_frames().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_failure_synthesizes_a_503_and_deregisters() {
        let mgr = manager();
        let transport = Arc::new(LoopbackTransport::new("127.0.0.1", 5060));
        transport.fail_next_sends(true);
        let listener = Recorder::new();
        let id = mgr.create_refresh_task(
            register_request(),
            transport.clone(),
            Arc::new(tokio::sync::Mutex::new(())),
            listener.clone(),
        );
        mgr.schedule_task(id, 5).unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let events = listener.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, id);
        assert_eq!(events[0].1.status, StatusCode::SERVICE_UNAVAILABLE);
        drop(events);
        assert!(mgr.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_removes_and_silences() {
        let mgr = manager();
        let transport = Arc::new(LoopbackTransport::new("127.0.0.1", 5060));
        let id = mgr.create_refresh_task(
            register_request(),
            transport.clone(),
            Arc::new(tokio::sync::Mutex::new(())),
            Recorder::new(),
        );
        mgr.schedule_task(id, 10).unwrap();
        mgr.cancel(id);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(transport.sent_frames().is_empty());
        assert!(mgr.is_empty());
    }
}
