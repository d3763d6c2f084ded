/*
[INPUT]:  Test configuration and scripted transport behaviour
[OUTPUT]: Shared test utilities, fixtures, and an in-memory connector
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for tradestream-client tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tradestream_client::ws::{Link, OutboundFrame, TransportEvent};
use tradestream_client::{
    ConnectionStatus, Connector, Endpoint, Envelope, StreamConfig, StreamError, StreamPath,
    TradeStream,
};
use url::Url;

const WAIT_LIMIT: Duration = Duration::from_secs(600);

/// What the next connect call should do
#[derive(Debug, Clone)]
pub enum Plan {
    Accept,
    Fail(String),
    Hang,
}

/// Server side of one accepted in-memory connection
#[derive(Debug)]
pub struct MockLink {
    pub url: Url,
    pub outbound_rx: mpsc::Receiver<OutboundFrame>,
    pub inbound_tx: mpsc::Sender<TransportEvent>,
}

impl MockLink {
    pub async fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string()).await;
    }

    pub async fn push_raw(&self, text: &str) {
        self.inbound_tx
            .send(TransportEvent::Text(text.to_string()))
            .await
            .expect("client side of link dropped");
    }

    pub async fn close(&self, code: u16) {
        let _ = self
            .inbound_tx
            .send(TransportEvent::Closed {
                code,
                reason: "test close".to_string(),
            })
            .await;
    }

    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        timeout(WAIT_LIMIT, self.outbound_rx.recv())
            .await
            .expect("timed out waiting for outbound frame")
    }

    /// Next text frame decoded as an envelope, skipping nothing
    pub async fn next_envelope(&mut self) -> Envelope {
        match self.next_frame().await {
            Some(OutboundFrame::Text(text)) => Envelope::parse(&text).expect("client sent bad json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    pub fn try_next_frame(&mut self) -> Option<OutboundFrame> {
        self.outbound_rx.try_recv().ok()
    }
}

/// Scripted connector; accepted links are handed to the test through a channel
#[derive(Debug)]
pub struct MockConnector {
    plans: Mutex<VecDeque<Plan>>,
    attempts: Mutex<Vec<(Instant, Url)>>,
    links_tx: mpsc::UnboundedSender<MockLink>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockLink>) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            plans: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            links_tx,
        });
        (connector, links_rx)
    }

    pub fn plan(&self, plan: Plan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn attempt_urls(&self) -> Vec<Url> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> tradestream_client::Result<Link> {
        self.attempts
            .lock()
            .unwrap()
            .push((Instant::now(), url.clone()));
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Accept);

        match plan {
            Plan::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::channel(64);
                let (inbound_tx, inbound_rx) = mpsc::channel(64);
                let _ = self.links_tx.send(MockLink {
                    url: url.clone(),
                    outbound_rx,
                    inbound_tx,
                });
                Ok(Link {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                })
            }
            Plan::Fail(reason) => Err(StreamError::Transport(reason)),
            Plan::Hang => std::future::pending().await,
        }
    }
}

/// Route library logs to the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config pointing at a fake host with the snapshot request disabled
pub fn test_config() -> StreamConfig {
    let mut config = StreamConfig::new(Endpoint::new("stream.test", true, StreamPath::Trading));
    config.snapshot_request_type = None;
    config
}

pub fn mock_stream(config: StreamConfig) -> (TradeStream, Arc<MockConnector>, mpsc::UnboundedReceiver<MockLink>) {
    let (connector, links) = MockConnector::new();
    let stream = TradeStream::with_connector(config, connector.clone()).expect("valid config");
    (stream, connector, links)
}

pub async fn next_link(links: &mut mpsc::UnboundedReceiver<MockLink>) -> MockLink {
    timeout(WAIT_LIMIT, links.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

pub async fn wait_for_status<F>(stream: &TradeStream, mut predicate: F) -> ConnectionStatus
where
    F: FnMut(&ConnectionStatus) -> bool,
{
    let mut rx = stream.watch_status();
    let status = timeout(WAIT_LIMIT, rx.wait_for(|status| predicate(status)))
        .await
        .expect("timed out waiting for status")
        .expect("stream worker stopped")
        .clone();
    status
}

pub async fn wait_connected(stream: &TradeStream) -> ConnectionStatus {
    wait_for_status(stream, |status| status.state.is_connected()).await
}

pub fn price_frame(symbol: &str, price: i64, timestamp: i64) -> Value {
    json!({
        "type": "price_update",
        "data": {
            "symbol": symbol,
            "price": price,
            "change": 1,
            "volume": 10,
            "timestamp": timestamp
        },
        "timestamp": timestamp
    })
}

pub fn trade_frame(id: &str, status: &str) -> Value {
    json!({
        "type": "trade_update",
        "data": {
            "id": id,
            "symbol": "BTC",
            "side": "buy",
            "price": "50000",
            "amount": "0.1",
            "status": status
        },
        "timestamp": 1
    })
}

pub fn payment_frame(id: &str, status: &str) -> Value {
    json!({
        "type": "payment_update",
        "data": {
            "id": id,
            "amount": "25.5",
            "currency": "USD",
            "status": status,
            "method": "card"
        },
        "timestamp": 1
    })
}
