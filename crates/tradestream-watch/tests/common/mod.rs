/*
[INPUT]:  Runner test scenarios
[OUTPUT]: In-memory connector that records every opened link
[POS]:    Test infrastructure - shared across watcher test modules
[UPDATE]: When adding new test patterns or fixtures
*/

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tradestream_client::ws::{Link, OutboundFrame, TransportEvent};
use tradestream_client::{Connector, Envelope};
use url::Url;

const WAIT_LIMIT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct AcceptedLink {
    pub url: Url,
    pub outbound_rx: mpsc::Receiver<OutboundFrame>,
    pub inbound_tx: mpsc::Sender<TransportEvent>,
}

impl AcceptedLink {
    pub async fn push(&self, frame: Value) {
        self.inbound_tx
            .send(TransportEvent::Text(frame.to_string()))
            .await
            .expect("client side of link dropped");
    }

    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        timeout(WAIT_LIMIT, self.outbound_rx.recv())
            .await
            .expect("timed out waiting for outbound frame")
    }

    pub async fn next_envelope(&mut self) -> Envelope {
        match self.next_frame().await {
            Some(OutboundFrame::Text(text)) => Envelope::parse(&text).expect("client sent bad json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Accepts every connect and forwards the server half to the test
#[derive(Debug)]
pub struct AcceptAll {
    links_tx: mpsc::UnboundedSender<AcceptedLink>,
}

impl AcceptAll {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AcceptedLink>) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        (Arc::new(Self { links_tx }), links_rx)
    }
}

#[async_trait]
impl Connector for AcceptAll {
    async fn connect(&self, url: &Url) -> tradestream_client::Result<Link> {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let _ = self.links_tx.send(AcceptedLink {
            url: url.clone(),
            outbound_rx,
            inbound_tx,
        });
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

pub async fn next_link(links: &mut mpsc::UnboundedReceiver<AcceptedLink>) -> AcceptedLink {
    timeout(WAIT_LIMIT, links.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

pub const TWO_STREAMS: &str = r#"
snapshot_interval_secs: 5
streams:
  - id: trading
    token: secret
    channels: [prices]
    snapshot_request_type: null
    endpoint:
      host: trading.test
  - id: account
    snapshot_request_type: null
    endpoint:
      host: account.test
      stream:
        kind: account
        account_id: acc-1
"#;
