//! The transport collaborator seam.
//!
//! The stack does not open sockets; it writes rendered messages into
//! whatever implements [`Transport`] and is fed parsed messages back by
//! the owner of that transport. [`LoopbackTransport`] is an in-memory
//! implementation used by the test suites and by embedders that want to
//! observe outbound traffic.

use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

/// Where a transport is actually bound, for Via sent-by validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalContact {
    /// Local host name or address literal, as it appears in Via.
    pub host: String,
    /// Local port.
    pub port: u16,
    /// Transport token (`UDP`, `TCP`, `TLS`).
    pub transport: String,
}

/// A byte sink plus knowledge of its own binding.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one rendered SIP message.
    async fn send(&self, frame: Bytes) -> io::Result<()>;

    /// The local binding this transport writes from.
    fn local_contact(&self) -> LocalContact;
}

/// An in-memory transport that records every frame it is asked to send.
#[derive(Debug)]
pub struct LoopbackTransport {
    contact: LocalContact,
    sent: Mutex<Vec<Bytes>>,
    fail_sends: Mutex<bool>,
}

impl LoopbackTransport {
    /// A loopback transport bound to `host:port` over UDP.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        LoopbackTransport {
            contact: LocalContact {
                host: host.into(),
                port,
                transport: "UDP".into(),
            },
            sent: Mutex::new(Vec::new()),
            fail_sends: Mutex::new(false),
        }
    }

    /// Every frame sent so far, in order.
    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// The most recently sent frame, decoded as text.
    pub fn last_frame_text(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Makes every subsequent send fail, for fault-injection tests.
    pub fn fail_next_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, frame: Bytes) -> io::Result<()> {
        if *self.fail_sends.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "send failed"));
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    fn local_contact(&self) -> LocalContact {
        self.contact.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_records_frames() {
        let transport = LoopbackTransport::new("127.0.0.1", 5060);
        transport.send(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(transport.sent_frames().len(), 1);
        transport.fail_next_sends(true);
        assert!(transport.send(Bytes::from_static(b"y")).await.is_err());
    }
}
