//! The session client: connection lifecycle state machine and non-blocking
//! control surface.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::Result;
use crate::attempt::{Attempt, Outcome};
use crate::config::{ConnectionParams, EndpointConfig};
use crate::error::{AbnormalClosure, Error, Fault};
use crate::message::Message;
use crate::settings::{SettingsProvider, TemplateExpander};
use crate::transport::{
    SessionEvents, SessionHandle, Transport, TungsteniteTransport, close_code,
};

/// Close reason sent for caller-initiated disconnects.
const DISCONNECT_REASON: &str = "session disconnect";
/// Close reason sent during disposal.
const DISPOSE_REASON: &str = "session disposed";

/// Asynchronous WebSocket session client.
///
/// Owns one logical connection attempt or session at a time. Every operation
/// returns immediately; completion is observed by polling [`is_connected`],
/// [`is_available`] and [`is_faulty`] from the driving loop while the
/// transport reports progress through event callbacks on its own tasks.
///
/// [`is_connected`]: SessionClient::is_connected
/// [`is_available`]: SessionClient::is_available
/// [`is_faulty`]: SessionClient::is_faulty
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: EndpointConfig,
    transport: Arc<dyn Transport>,
    /// Runtime captured at construction so control calls may come from any
    /// thread.
    runtime: Handle,
    /// Live session; present only between the open and close callbacks.
    session: Mutex<Option<Arc<dyn SessionHandle>>>,
    /// Last recorded failure; cleared by connect, send and dispose.
    fault: ArcSwapOption<Error>,
    /// Last tracked connect or send attempt.
    attempt: Mutex<Option<Attempt>>,
    queue_tx: mpsc::UnboundedSender<Message>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl SessionClient {
    /// Build a client for `params` over the default transport.
    ///
    /// Fails synchronously only on a malformed target URI; every other
    /// configuration problem surfaces when a connect attempt is made. Must be
    /// called within a tokio runtime, whose handle is captured for the
    /// lifetime of the client.
    pub fn new(
        params: &ConnectionParams,
        settings: &dyn SettingsProvider,
        expander: &dyn TemplateExpander,
    ) -> Result<Self> {
        let endpoint = EndpointConfig::assemble(params, settings, expander)?;
        Ok(Self::with_transport(endpoint, Arc::new(TungsteniteTransport)))
    }

    /// Build a client over a custom [`Transport`].
    #[must_use]
    pub fn with_transport(endpoint: EndpointConfig, transport: Arc<dyn Transport>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                endpoint,
                transport,
                runtime: Handle::current(),
                session: Mutex::new(None),
                fault: ArcSwapOption::from(None),
                attempt: Mutex::new(None),
                queue_tx,
                queue_rx: Mutex::new(queue_rx),
            }),
        }
    }

    /// Start an asynchronous connection attempt.
    ///
    /// No-op while a session is open. Clears any prior fault and tracks the
    /// attempt; a failed attempt records its error as the fault, so the
    /// failure is observable through [`is_faulty`](Self::is_faulty) even
    /// before the next availability poll. The recorded fault keeps the full
    /// source chain; the deepest cause is reachable through
    /// [`Error::root_cause`](crate::Error::root_cause).
    pub fn connect(&self) {
        if self.is_connected() {
            return;
        }
        self.inner.fault.store(None);

        let events = Arc::clone(&self.inner) as Arc<dyn SessionEvents>;
        let work = self.inner.transport.connect(&self.inner.endpoint, events);
        let inner = Arc::clone(&self.inner);
        let attempt = Attempt::spawn(&self.inner.runtime, async move {
            work.await.map_err(|e| {
                let fault = Fault::new(e);
                tracing::error!(error = %fault, "websocket connect failed");
                inner.fault.store(Some(Arc::clone(&fault)));
                fault
            })
        });
        *self.inner.attempt.lock() = Some(attempt);
    }

    /// Dispatch one outbound frame asynchronously.
    ///
    /// No-op without a live open session. Clears the prior fault and tracks
    /// the send as the new pending attempt, superseding the previous one;
    /// send failures surface later through [`is_available`](Self::is_available)
    /// polling, never synchronously.
    pub fn send_message(&self, message: Message) {
        let session = self.inner.session.lock().clone();
        let Some(session) = session else { return };
        if !session.is_open() {
            return;
        }

        self.inner.fault.store(None);
        tracing::debug!(variant = message.variant(), bytes = message.len(), "sending message");
        let work = session.send(message);
        let attempt = Attempt::spawn(&self.inner.runtime, async move {
            work.await.map_err(Fault::new)
        });
        *self.inner.attempt.lock() = Some(attempt);
    }

    /// Close the session.
    ///
    /// Graceful (`harsh == false`) sends a normal-closure signal and keeps the
    /// session reference until the close callback clears it, letting in-flight
    /// messages drain. Harsh sends a protocol-error closure and clears the
    /// local reference immediately, so the client is observably disconnected
    /// before the transport confirms.
    pub fn disconnect(&self, harsh: bool) {
        let session = self.inner.session.lock().clone();
        let Some(session) = session else { return };
        if harsh {
            session.close(close_code::PROTOCOL_ERROR, DISCONNECT_REASON);
            *self.inner.session.lock() = None;
        } else {
            session.close(close_code::NORMAL, DISCONNECT_REASON);
        }
    }

    /// Interrupt the last tracked attempt, if any.
    ///
    /// Connection state is not transitioned here; an interrupted attempt
    /// resolves as a cancelled fault on a later availability poll.
    pub fn cancel(&self) {
        if let Some(attempt) = self.inner.attempt.lock().as_ref() {
            attempt.cancel();
        }
    }

    /// Idempotent final teardown.
    ///
    /// Best-effort close of any live session (close failures are logged by
    /// the transport, never surfaced), then clears session, fault and attempt
    /// state. A disposed client should not be reused.
    pub fn dispose(&self) {
        if let Some(session) = self.inner.session.lock().take() {
            session.close(close_code::NORMAL, DISPOSE_REASON);
        }
        if let Some(attempt) = self.inner.attempt.lock().take() {
            attempt.cancel();
        }
        self.inner.fault.store(None);
    }

    /// True iff a live session is present and reports itself open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .is_some_and(|session| session.is_open())
    }

    /// True iff a fault is currently recorded.
    #[must_use]
    pub fn is_faulty(&self) -> bool {
        self.inner.fault.load().is_some()
    }

    /// The recorded fault, if any. Cleared by the next connect or send, or by
    /// disposal.
    #[must_use]
    pub fn fault(&self) -> Option<Fault> {
        self.inner.fault.load_full()
    }

    /// Non-blocking poll of the last tracked attempt.
    ///
    /// No tracked attempt means available. A pending attempt means busy. A
    /// finished attempt is consumed exactly once: success reports available,
    /// failure records the fault and reports unavailable for that poll.
    /// Afterwards the client is available again while the fault stays
    /// queryable until the next connect, send or dispose.
    pub fn is_available(&self) -> bool {
        let mut slot = self.inner.attempt.lock();
        let Some(attempt) = slot.as_mut() else {
            return true;
        };
        match attempt.poll_outcome() {
            Outcome::Pending => false,
            Outcome::Succeeded => {
                *slot = None;
                true
            }
            Outcome::Failed(fault) => {
                tracing::warn!(error = %fault, "tracked attempt failed");
                self.inner.fault.store(Some(fault));
                *slot = None;
                false
            }
        }
    }

    /// Remove and return all queued received messages, in arrival order.
    #[must_use]
    pub fn drain_messages(&self) -> Vec<Message> {
        let mut queue = self.inner.queue_rx.lock();
        let mut drained = Vec::new();
        while let Ok(message) = queue.try_recv() {
            drained.push(message);
        }
        drained
    }
}

impl Inner {
    fn clear_queue(&self) {
        let mut queue = self.queue_rx.lock();
        while queue.try_recv().is_ok() {}
    }
}

impl SessionEvents for Inner {
    fn on_open(&self, session: Arc<dyn SessionHandle>, subprotocol: Option<String>) {
        tracing::info!(
            subprotocol = subprotocol.as_deref().unwrap_or("none"),
            "websocket connection opened"
        );
        *self.session.lock() = Some(session);
    }

    fn on_message(&self, message: Message) {
        // the receiver lives as long as this client; send cannot fail
        let _ = self.queue_tx.send(message);
    }

    fn on_error(&self, cause: Error) {
        tracing::error!(error = %cause, "websocket error");
        self.fault.store(Some(Fault::new(cause)));
    }

    fn on_close(&self, code: u16, reason: String) {
        tracing::info!(code, reason = %reason, "websocket connection closed");
        // a closed session's backlog is not meaningful to a fresh session
        self.clear_queue();
        if code > close_code::NORMAL {
            self.fault
                .store(Some(Fault::new(AbnormalClosure { code, reason }.into())));
        }
        *self.session.lock() = None;
    }
}
