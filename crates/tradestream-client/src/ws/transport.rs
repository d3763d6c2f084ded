/*
[INPUT]:  Resolved WebSocket URL
[OUTPUT]: Link (outbound frame sender + inbound transport event receiver)
[POS]:    WebSocket layer - transport seam between the connection worker and the socket
[UPDATE]: When changing socket pumping or close semantics
*/

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use crate::error::Result;

pub const NORMAL_CLOSURE: u16 = 1000;
pub const NO_STATUS_RECEIVED: u16 = 1005;
pub const ABNORMAL_CLOSURE: u16 = 1006;

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frame written by the connection worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// What the socket reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Error(String),
    /// Always the last event of a link
    Closed { code: u16, reason: String },
}

/// One open transport. Dropping `outbound` closes the socket.
#[derive(Debug)]
pub struct Link {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens transports for the connection worker
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Link>;
}

/// Production connector backed by tokio-tungstenite
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    channel_capacity: usize,
}

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
        }
    }
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Link> {
        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        let (outbound_tx, outbound_rx) = mpsc::channel(self.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.channel_capacity);

        tokio::spawn(pump(ws_stream, outbound_rx, inbound_tx));

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn pump(
    ws_stream: WsStream,
    mut outbound_rx: mpsc::Receiver<OutboundFrame>,
    inbound_tx: mpsc::Sender<TransportEvent>,
) {
    let (mut write, mut read) = ws_stream.split();

    let closed = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(OutboundFrame::Text(text)) => {
                        if let Err(err) = write.send(WsMessage::Text(text.into())).await {
                            let _ = inbound_tx.send(TransportEvent::Error(err.to_string())).await;
                            break abnormal("write failed");
                        }
                    }
                    Some(OutboundFrame::Close { code, reason }) => {
                        let _ = write.send(close_message(code, &reason)).await;
                        break TransportEvent::Closed { code, reason };
                    }
                    None => {
                        let _ = write.send(close_message(NORMAL_CLOSURE, "")).await;
                        break TransportEvent::Closed { code: NORMAL_CLOSURE, reason: String::new() };
                    }
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if inbound_tx.send(TransportEvent::Text(text.to_string())).await.is_err() {
                            let _ = write.send(close_message(NORMAL_CLOSURE, "")).await;
                            return;
                        }
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            if inbound_tx.send(TransportEvent::Text(text)).await.is_err() {
                                let _ = write.send(close_message(NORMAL_CLOSURE, "")).await;
                                return;
                            }
                        }
                        Err(_) => debug!(bytes = bytes.len(), "ws binary frame is not utf-8; dropped"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break match frame {
                            Some(frame) => TransportEvent::Closed {
                                code: u16::from(frame.code),
                                reason: frame.reason.to_string(),
                            },
                            None => TransportEvent::Closed {
                                code: NO_STATUS_RECEIVED,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let _ = inbound_tx.send(TransportEvent::Error(err.to_string())).await;
                        break abnormal("read failed");
                    }
                    None => break abnormal("stream ended"),
                }
            }
        }
    };

    let _ = inbound_tx.send(closed).await;
}

fn close_message(code: u16, reason: &str) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    }))
}

fn abnormal(reason: &str) -> TransportEvent {
    TransportEvent::Closed {
        code: ABNORMAL_CLOSURE,
        reason: reason.to_string(),
    }
}
