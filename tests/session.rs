#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use ws_session::settings::{NoSettings, VerbatimExpander};
use ws_session::{ConnectionParams, Kind, Message, SessionClient};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Mock WebSocket server accepting a single connection.
///
/// The handshake callback echoes the first offered subprotocol back to the
/// client. Frames pushed into `outbound_tx` are written to the client; every
/// frame the client sends (close frames included) lands in `received_rx`.
struct MockWsServer {
    addr: SocketAddr,
    outbound_tx: mpsc::UnboundedSender<WsFrame>,
    received_rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockWsServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsFrame>();
        let (received_tx, received_rx) = mpsc::unbounded_channel::<WsFrame>();

        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let negotiate = |request: &Request, mut response: Response| {
                if let Some(offered) = request
                    .headers()
                    .get("sec-websocket-protocol")
                    .and_then(|value| value.to_str().ok())
                {
                    let first = offered.split(',').next().unwrap().trim();
                    response
                        .headers_mut()
                        .insert("sec-websocket-protocol", first.parse().unwrap());
                }
                Ok(response)
            };
            let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, negotiate).await
            else {
                return;
            };
            let (mut write, mut read) = ws_stream.split();

            loop {
                tokio::select! {
                    frame = read.next() => match frame {
                        Some(Ok(WsFrame::Close(close))) => {
                            drop(received_tx.send(WsFrame::Close(close.clone())));
                            // acknowledge and stop serving; the explicit send
                            // may be rejected because tungstenite already
                            // queued its own reply, so flush to get the
                            // acknowledgment onto the wire either way
                            let _ = write.send(WsFrame::Close(close)).await;
                            let _ = write.flush().await;
                            break;
                        }
                        Some(Ok(frame)) => {
                            drop(received_tx.send(frame));
                        }
                        _ => break,
                    },
                    frame = outbound_rx.recv() => match frame {
                        Some(frame) => {
                            if write.send(frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            addr,
            outbound_tx,
            received_rx,
        }
    }

    fn client(&self) -> SessionClient {
        let params = ConnectionParams::builder()
            .uri(format!("ws://{}/session", self.addr))
            .subprotocols("chat, fallback")
            .build();
        SessionClient::new(&params, &NoSettings, &VerbatimExpander).unwrap()
    }

    fn send(&self, frame: WsFrame) {
        self.outbound_tx.send(frame).unwrap();
    }

    fn close(&self, code: u16, reason: &str) {
        self.send(WsFrame::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        })));
    }

    async fn recv(&mut self) -> WsFrame {
        timeout(Duration::from_secs(2), self.received_rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server connection ended")
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within two seconds");
}

async fn connected_client(server: &MockWsServer) -> SessionClient {
    let client = server.client();
    client.connect();
    wait_until(|| client.is_connected()).await;
    assert!(!client.is_faulty());
    client
}

#[tokio::test]
async fn connect_opens_a_session() {
    init_tracing();
    let server = MockWsServer::start().await;

    let client = connected_client(&server).await;

    wait_until(|| client.is_available()).await;
    assert!(client.drain_messages().is_empty());
}

#[tokio::test]
async fn messages_travel_both_ways() {
    init_tracing();
    let mut server = MockWsServer::start().await;
    let client = connected_client(&server).await;

    client.send_message(Message::Text("question".to_owned()));
    let frame = server.recv().await;
    assert_eq!(frame, WsFrame::Text("question".into()));

    client.send_message(Message::Binary(vec![0x01, 0x02, 0x03]));
    let frame = server.recv().await;
    assert_eq!(frame, WsFrame::Binary(vec![0x01, 0x02, 0x03].into()));
    wait_until(|| client.is_available()).await;
    assert!(!client.is_faulty());

    server.send(WsFrame::Text("answer".into()));
    server.send(WsFrame::Binary(vec![0xAA].into()));
    let mut drained = Vec::new();
    wait_until(|| {
        drained.extend(client.drain_messages());
        drained.len() == 2
    })
    .await;
    assert_eq!(
        drained,
        [Message::Text("answer".to_owned()), Message::Binary(vec![0xAA])]
    );
}

#[tokio::test]
async fn received_messages_keep_arrival_order() {
    init_tracing();
    let server = MockWsServer::start().await;
    let client = connected_client(&server).await;

    server.send(WsFrame::Text("first".into()));
    server.send(WsFrame::Binary(vec![0xBE, 0xEF].into()));
    server.send(WsFrame::Text("second".into()));

    let mut drained = Vec::new();
    wait_until(|| {
        drained.extend(client.drain_messages());
        drained.len() == 3
    })
    .await;
    assert_eq!(
        drained,
        [
            Message::Text("first".to_owned()),
            Message::Binary(vec![0xBE, 0xEF]),
            Message::Text("second".to_owned()),
        ]
    );
}

#[tokio::test]
async fn server_normal_close_leaves_no_fault() {
    init_tracing();
    let server = MockWsServer::start().await;
    let client = connected_client(&server).await;

    server.close(1000, "done");

    wait_until(|| !client.is_connected()).await;
    assert!(!client.is_faulty());
}

#[tokio::test]
async fn server_abnormal_close_becomes_a_fault() {
    init_tracing();
    let server = MockWsServer::start().await;
    let client = connected_client(&server).await;

    server.close(1011, "overload");

    wait_until(|| client.is_faulty()).await;
    assert!(!client.is_connected());
    let fault = client.fault().unwrap();
    assert_eq!(fault.kind(), Kind::Closed);
    assert!(fault.to_string().contains("overload"));
}

#[tokio::test]
async fn graceful_disconnect_completes_close_handshake() {
    init_tracing();
    let mut server = MockWsServer::start().await;
    let client = connected_client(&server).await;

    client.disconnect(false);

    let WsFrame::Close(Some(close)) = server.recv().await else {
        panic!("expected a close frame");
    };
    assert_eq!(u16::from(close.code), 1000);
    assert_eq!(close.reason.as_str(), "session disconnect");

    wait_until(|| !client.is_connected()).await;
    assert!(!client.is_faulty());
}

#[tokio::test]
async fn harsh_disconnect_is_immediate() {
    init_tracing();
    let mut server = MockWsServer::start().await;
    let client = connected_client(&server).await;

    client.disconnect(true);
    assert!(!client.is_connected());

    let WsFrame::Close(Some(close)) = server.recv().await else {
        panic!("expected a close frame");
    };
    assert_eq!(u16::from(close.code), 1002);
}

#[tokio::test]
async fn refused_connection_records_connect_fault() {
    init_tracing();
    // bind then drop, so the port is very likely closed
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let params = ConnectionParams::builder()
        .uri(format!("ws://{addr}"))
        .build();
    let client = SessionClient::new(&params, &NoSettings, &VerbatimExpander).unwrap();

    client.connect();
    wait_until(|| client.is_faulty()).await;

    assert!(!client.is_connected());
    assert_eq!(client.fault().unwrap().kind(), Kind::Connect);
}

#[tokio::test]
async fn dispose_tears_down_a_live_session() {
    init_tracing();
    let mut server = MockWsServer::start().await;
    let client = connected_client(&server).await;

    client.dispose();

    assert!(!client.is_connected());
    assert!(!client.is_faulty());
    let WsFrame::Close(Some(close)) = server.recv().await else {
        panic!("expected a close frame");
    };
    assert_eq!(u16::from(close.code), 1000);
    assert_eq!(close.reason.as_str(), "session disposed");
}
