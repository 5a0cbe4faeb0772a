//! In-memory transport for exercising the connection controller

use super::traits::{Link, LinkEvent, Transport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use simiot_shared::{protocol, Session};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One outbound event as the server would have seen it
#[derive(Debug, Clone)]
pub(crate) struct SentFrame {
    pub at: Instant,
    pub event: String,
    pub data: Option<Value>,
}

struct Shared {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<LinkEvent>>,
    sent: Mutex<Vec<SentFrame>>,
    cookies: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    refuse: AtomicBool,
}

/// Every link greets with `Connected`, then replays events pushed through the handle
pub(crate) struct MockTransport {
    shared: Arc<Shared>,
}

/// Test-side view of a [`MockTransport`]
pub(crate) struct MockHandle {
    pub inbound: mpsc::UnboundedSender<LinkEvent>,
    shared: Arc<Shared>,
}

impl MockTransport {
    pub fn new() -> (Self, MockHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inbound: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        });
        let handle = MockHandle {
            inbound: tx,
            shared: shared.clone(),
        };
        (Self { shared }, handle)
    }
}

impl MockHandle {
    /// Deliver a remote command as the server's `m` event
    pub fn send_command(&self, command: Value) {
        let envelope = serde_json::json!({ (protocol::ENVELOPE_PAYLOAD_FIELD): command.to_string() });
        self.push(LinkEvent::Event {
            name: protocol::EVENT_MESSAGE.into(),
            args: vec![envelope],
        });
    }

    pub fn push(&self, event: LinkEvent) {
        let _ = self.inbound.send(event);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.shared.sent.lock().unwrap().clone()
    }

    pub fn sent_named(&self, event: &str) -> Vec<SentFrame> {
        self.sent().into_iter().filter(|f| f.event == event).collect()
    }

    pub fn cookies(&self) -> Vec<String> {
        self.shared.cookies.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, session: &Session) -> Result<Box<dyn Link>> {
        let n = self.shared.connects.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.cookies.lock().unwrap().push(session.cookie());
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        Ok(Box::new(MockLink {
            shared: self.shared.clone(),
            greeting: Some(format!("mock-{}", n)),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockLink {
    shared: Arc<Shared>,
    greeting: Option<String>,
}

#[async_trait]
impl Link for MockLink {
    async fn emit(&mut self, event: &str, data: Option<Value>) -> Result<()> {
        self.shared.sent.lock().unwrap().push(SentFrame {
            at: Instant::now(),
            event: event.to_string(),
            data,
        });
        Ok(())
    }

    async fn recv(&mut self) -> LinkEvent {
        if let Some(sid) = self.greeting.take() {
            return LinkEvent::Connected { sid: Some(sid) };
        }
        let mut inbound = self.shared.inbound.lock().await;
        match inbound.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
