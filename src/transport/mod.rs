//! Seam between the session client and the underlying WebSocket
//! implementation.
//!
//! The client never drives sockets itself: a [`Transport`] performs the
//! handshake, hands back a [`SessionHandle`] through
//! [`SessionEvents::on_open`], and keeps invoking [`SessionEvents`] callbacks
//! from its own tasks for the lifetime of the session.

pub mod tungstenite;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::Result;
use crate::config::EndpointConfig;
use crate::error::Error;
use crate::message::Message;

pub use tungstenite::TungsteniteTransport;

/// WebSocket close codes this crate inspects (RFC 6455 section 7.4.1).
pub mod close_code {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Protocol error; sent for harsh disconnects.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// Peer closed without a status code.
    pub const NO_STATUS: u16 = 1005;
    /// Connection dropped without a close handshake.
    pub const ABNORMAL: u16 = 1006;
}

/// Event callbacks invoked by the transport from its own execution context.
///
/// Calls are fire-and-forget: implementations must not block and must not
/// assume callbacks are serialized relative to caller-thread reads. The only
/// ordering a transport guarantees is that `on_open` precedes `on_close` for
/// a given session.
pub trait SessionEvents: Send + Sync + 'static {
    /// A connection attempt completed its handshake.
    fn on_open(&self, session: Arc<dyn SessionHandle>, subprotocol: Option<String>);

    /// A whole text or binary frame arrived.
    fn on_message(&self, message: Message);

    /// The transport reported an error; the session may still be open.
    fn on_error(&self, cause: Error);

    /// The session finished closing.
    fn on_close(&self, code: u16, reason: String);
}

/// Handle to a live transport session.
pub trait SessionHandle: Send + Sync + 'static {
    /// Whether the session still reports itself open.
    fn is_open(&self) -> bool;

    /// Queue one outbound frame; the returned future resolves with the send
    /// result and never blocks the caller.
    fn send(&self, message: Message) -> BoxFuture<'static, Result<()>>;

    /// Request closure with the given code. Fire-and-forget; failures are
    /// logged by the transport, never surfaced.
    fn close(&self, code: u16, reason: &str);
}

/// Connection factory driven by the session client.
pub trait Transport: Send + Sync + 'static {
    /// Start a single connection attempt.
    ///
    /// The returned future resolves when the handshake completes or fails; on
    /// success [`SessionEvents::on_open`] has been invoked before resolution.
    /// No retry or reconnection happens here; one call, one attempt.
    fn connect(
        &self,
        endpoint: &EndpointConfig,
        events: Arc<dyn SessionEvents>,
    ) -> BoxFuture<'static, Result<()>>;
}
