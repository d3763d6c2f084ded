/*
[INPUT]:  StreamConfig, optional bearer token, caller handlers
[OUTPUT]: Connection status, reconciled stream state and routed events
[POS]:    WebSocket layer - public facade over one logical stream
[UPDATE]: When adding facade operations or changing worker wiring
*/

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use super::connection::{Command, ConnectionStatus, ConnectionWorker, SharedRouter};
use super::message::{Envelope, EventKind, InboundEvent};
use super::router::{HandlerRef, HandlerResult, MessageRouter};
use super::state::{StateReconciler, StreamState};
use super::stats::StreamStats;
use super::transport::{Connector, TungsteniteConnector};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::types::{ConnectionState, Notification, Payment, PriceEntry, SystemAlert, Trade};

/// Client for one logical stream.
///
/// Construct one per stream and hand it to consumers explicitly. Every call
/// returns immediately; the connection itself is driven by a background task
/// that stops when this value is dropped.
#[derive(Debug)]
pub struct TradeStream {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    state_rx: watch::Receiver<StreamState>,
    stats_rx: watch::Receiver<StreamStats>,
    router: SharedRouter,
    worker_handle: Option<JoinHandle<()>>,
}

impl TradeStream {
    /// Create a stream backed by a real WebSocket connector
    pub fn new(config: StreamConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(TungsteniteConnector::new()))
    }

    /// Create a stream with a custom transport
    pub fn with_connector(config: StreamConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| StreamError::Config("TradeStream requires a Tokio runtime".to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (stats_tx, stats_rx) = watch::channel(StreamStats::default());
        let router: SharedRouter = Arc::new(RwLock::new(MessageRouter::new()));
        let reconciler = StateReconciler::new(config.caps, config.reject_stale_prices);
        let state_rx = reconciler.subscribe();

        let worker = ConnectionWorker::new(
            config,
            connector,
            cmd_rx,
            status_tx,
            stats_tx,
            Arc::clone(&router),
            reconciler,
        );
        let worker_handle = runtime.spawn(worker.run());

        Ok(Self {
            cmd_tx,
            status_rx,
            state_rx,
            stats_rx,
            router,
            worker_handle: Some(worker_handle),
        })
    }

    /// Close any existing connection and open a new one.
    ///
    /// Failures are reported through [`TradeStream::status`], never returned.
    pub fn connect(&self, auth_token: Option<String>) {
        self.command(Command::Connect { auth_token });
    }

    /// Close with a normal closure and cancel all timers. Idempotent.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Send `{type, data, timestamp}` if connected. Returns false (and drops
    /// the message) otherwise; nothing is queued.
    ///
    /// `true` means accepted for sending, not delivered: the worker still
    /// drops the message if the connection closes before it is written.
    pub fn send(&self, kind: &str, data: Value) -> bool {
        if !self.state().is_connected() {
            warn!(frame_type = kind, state = %self.state(), "send while not connected; dropped");
            return false;
        }
        self.command(Command::Send(Envelope::new(kind, data)))
    }

    /// Track channels; they are (re)sent after every successful open
    pub fn subscribe<I, S>(&self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        if !channels.is_empty() {
            self.command(Command::Subscribe(channels));
        }
    }

    pub fn unsubscribe<I, S>(&self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        if !channels.is_empty() {
            self.command(Command::Unsubscribe(channels));
        }
    }

    /// Register a handler for one event kind; handlers run in registration order
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerRef
    where
        F: Fn(&InboundEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let handler = HandlerRef::new(handler);
        match self.router.write() {
            Ok(mut router) => router.register(kind, handler.clone()),
            Err(poisoned) => poisoned.into_inner().register(kind, handler.clone()),
        }
        handler
    }

    pub fn off(&self, kind: EventKind, handler: &HandlerRef) -> bool {
        match self.router.write() {
            Ok(mut router) => router.off(kind, handler),
            Err(poisoned) => poisoned.into_inner().off(kind, handler),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    /// Subscribe to connection status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Subscribe to state changes; the receiver always holds the latest state
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state_rx.clone()
    }

    pub fn price(&self, symbol: &str) -> Option<PriceEntry> {
        self.state_rx.borrow().price(symbol).cloned()
    }

    pub fn prices(&self) -> HashMap<String, PriceEntry> {
        self.state_rx.borrow().prices.clone()
    }

    /// Newest first
    pub fn recent_trades(&self) -> Vec<Trade> {
        self.state_rx.borrow().trades.to_vec()
    }

    pub fn recent_payments(&self) -> Vec<Payment> {
        self.state_rx.borrow().payments.to_vec()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state_rx.borrow().notifications.to_vec()
    }

    pub fn system_alerts(&self) -> Vec<SystemAlert> {
        self.state_rx.borrow().system_alerts.to_vec()
    }

    pub fn stats(&self) -> StreamStats {
        *self.stats_rx.borrow()
    }

    pub fn clear_state(&self) {
        self.command(Command::ClearState);
    }

    /// Stop the worker and wait for it to close the transport
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.await;
        }
    }

    fn command(&self, cmd: Command) -> bool {
        if self.cmd_tx.send(cmd).is_err() {
            warn!(error = %StreamError::WorkerStopped, "stream command dropped");
            return false;
        }
        true
    }
}

impl Drop for TradeStream {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}
