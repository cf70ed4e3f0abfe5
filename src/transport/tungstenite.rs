//! Production transport backed by `tokio-tungstenite`.
//!
//! One spawned socket task per session owns both halves of the stream: it
//! forwards incoming frames to [`SessionEvents`] and executes queued send and
//! close commands from [`SessionHandle`] callers. Proxy negotiation is
//! delegated to the transport environment; a configured proxy only
//! contributes its authorization header to the handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use futures::{FutureExt as _, SinkExt as _, StreamExt as _};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message as WsFrame};
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
};

use super::{SessionEvents, SessionHandle, Transport, close_code};
use crate::Result;
use crate::config::{EndpointConfig, TlsConfig};
use crate::error::{ConnectionClosed, Error, Kind};
use crate::message::Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on redirect hops during the handshake.
const MAX_REDIRECTS: u8 = 5;

/// Default [`Transport`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn connect(
        &self,
        endpoint: &EndpointConfig,
        events: Arc<dyn SessionEvents>,
    ) -> BoxFuture<'static, Result<()>> {
        let endpoint = endpoint.clone();
        async move { connect_session(endpoint, events).await }.boxed()
    }
}

async fn connect_session(endpoint: EndpointConfig, events: Arc<dyn SessionEvents>) -> Result<()> {
    let connector = endpoint.tls.as_ref().map(build_connector).transpose()?;
    if let Some(proxy) = &endpoint.proxy {
        // negotiation is left to the environment; only the header travels
        tracing::debug!(proxy = %proxy.uri, "proxy configured for this endpoint");
    }

    let mut target = endpoint.uri.to_string();
    let mut redirects = 0_u8;
    let (stream, response) = loop {
        let request = handshake_request(&target, &endpoint)?;
        match connect_async_tls_with_config(request, None, false, connector.clone()).await {
            Ok(established) => break established,
            Err(tungstenite::Error::Http(response))
                if endpoint.follow_redirects
                    && response.status().is_redirection()
                    && redirects < MAX_REDIRECTS =>
            {
                let Some(location) = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                else {
                    return Err(Error::connect_failure(
                        "redirect response without a location header",
                    ));
                };
                tracing::debug!(%location, "following handshake redirect");
                target = resolve_redirect(&target, location)?;
                redirects += 1;
            }
            Err(e) => return Err(Error::with_source(Kind::Connect, e)),
        }
    };

    let subprotocol = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let session = Arc::new(TungsteniteSession {
        cmd_tx,
        open: AtomicBool::new(true),
    });
    events.on_open(
        Arc::clone(&session) as Arc<dyn SessionHandle>,
        subprotocol,
    );
    tokio::spawn(socket_loop(stream, cmd_rx, session, events));
    Ok(())
}

fn resolve_redirect(current: &str, location: &str) -> Result<String> {
    let base = url::Url::parse(current).map_err(|e| Error::with_source(Kind::Connect, e))?;
    let next = base
        .join(location)
        .map_err(|e| Error::with_source(Kind::Connect, e))?;
    Ok(next.to_string())
}

fn handshake_request(
    target: &str,
    endpoint: &EndpointConfig,
) -> Result<tungstenite::handshake::client::Request> {
    let mut request = target
        .into_client_request()
        .map_err(|e| Error::with_source(Kind::Connect, e))?;
    let headers = request.headers_mut();

    if !endpoint.subprotocols.is_empty() {
        let offered = endpoint.subprotocols.join(", ");
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, header_value(&offered)?);
    }
    if let Some(credentials) = &endpoint.credentials {
        headers.insert(
            header::AUTHORIZATION,
            header_value(&credentials.header_value())?,
        );
    }
    if let Some(authorization) = endpoint
        .proxy
        .as_ref()
        .and_then(|proxy| proxy.authorization.as_deref())
    {
        headers.insert(header::PROXY_AUTHORIZATION, header_value(authorization)?);
    }

    Ok(request)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| Error::with_source(Kind::Configuration, e))
}

/// Build a rustls connector: system trust roots plus the client certificate
/// and key from the configured PEM keystore.
fn build_connector(tls: &TlsConfig) -> Result<Connector> {
    // repeated installs are fine; only the first one wins
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!(%error, "skipping unreadable system root certificate");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            tracing::warn!(error = %e, "skipping invalid system root certificate");
        }
    }

    let pem = std::fs::read(&tls.keystore).map_err(|e| Error::with_source(Kind::Configuration, e))?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::with_source(Kind::Configuration, e))?;
    if certs.is_empty() {
        return Err(Error::configuration("keystore holds no client certificate"));
    }
    let key = rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| Error::with_source(Kind::Configuration, e))?
        .ok_or_else(|| {
            if tls.password.is_some() {
                Error::configuration(
                    "keystore key is unreadable; encrypted keys are not supported, \
                     provide an unencrypted PEM key",
                )
            } else {
                Error::configuration("keystore holds no private key")
            }
        })?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| Error::with_source(Kind::Configuration, e))?;
    Ok(Connector::Rustls(Arc::new(config)))
}

enum Command {
    Send(Message, oneshot::Sender<Result<()>>),
    Close(u16, String),
}

struct TungsteniteSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    open: AtomicBool,
}

impl SessionHandle for TungsteniteSession {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn send(&self, message: Message) -> BoxFuture<'static, Result<()>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let queued = self.cmd_tx.send(Command::Send(message, ack_tx)).is_ok();
        async move {
            if !queued {
                return Err(ConnectionClosed.into());
            }
            // the socket task drops the ack when it terminates mid-send
            ack_rx.await.map_err(|_| Error::from(ConnectionClosed))?
        }
        .boxed()
    }

    fn close(&self, code: u16, reason: &str) {
        if self
            .cmd_tx
            .send(Command::Close(code, reason.to_owned()))
            .is_err()
        {
            tracing::debug!("close requested on a terminated session");
        }
    }
}

async fn socket_loop(
    stream: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    session: Arc<TungsteniteSession>,
    events: Arc<dyn SessionEvents>,
) {
    let (mut write, mut read) = stream.split();
    let close_frame;

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(WsFrame::Text(text))) => {
                    events.on_message(Message::Text(text.as_str().to_owned()));
                }
                Some(Ok(WsFrame::Binary(payload))) => {
                    events.on_message(Message::Binary(payload.to_vec()));
                }
                Some(Ok(WsFrame::Close(frame))) => {
                    close_frame = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or_else(|| (close_code::NO_STATUS, String::new()));
                    break;
                }
                // ping/pong control frames are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    events.on_error(Error::with_source(Kind::Transport, e));
                    close_frame = (close_code::ABNORMAL, "websocket transport failed".to_owned());
                    break;
                }
                None => {
                    close_frame = (
                        close_code::ABNORMAL,
                        "connection dropped without close handshake".to_owned(),
                    );
                    break;
                }
            },
            command = cmd_rx.recv() => match command {
                Some(Command::Send(message, ack)) => {
                    let result = match message {
                        Message::Text(text) => write.send(WsFrame::Text(text.into())).await,
                        Message::Binary(payload) => write.send(WsFrame::Binary(payload.into())).await,
                    };
                    let _ = ack.send(result.map_err(|e| Error::with_source(Kind::Transport, e)));
                }
                Some(Command::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = write.send(WsFrame::Close(Some(frame))).await {
                        tracing::debug!(error = %e, "failed to send close frame");
                    }
                    // keep reading until the peer acknowledges the closure
                }
                None => {
                    close_frame = (close_code::ABNORMAL, "session handle dropped".to_owned());
                    break;
                }
            },
        }
    }

    session.open.store(false, Ordering::Release);
    let (code, reason) = close_frame;
    events.on_close(code, reason);
}
