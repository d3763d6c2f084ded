/*
[INPUT]:  Facade commands, transport events, reconnect and keepalive timers
[OUTPUT]: Connection status via `watch`, reconciled state, handler dispatch
[POS]:    WebSocket layer - connection lifecycle worker (sole owner of the transport)
[UPDATE]: When changing reconnection policy, keepalive, or generation handling
*/

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::logging::LogSampler;
use super::message::{Envelope, InboundEvent};
use super::router::{MessageRouter, dispatch_to};
use super::state::{ApplyOutcome, StateReconciler};
use super::stats::StreamStats;
use super::transport::{ABNORMAL_CLOSURE, Connector, Link, NORMAL_CLOSURE, OutboundFrame, TransportEvent};
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::types::ConnectionState;

pub type SharedRouter = Arc<RwLock<MessageRouter>>;

/// Published on every lifecycle change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful open
    pub attempt: u32,
    /// Id of the current (or last) open attempt
    pub generation: u64,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            generation: 0,
            last_error: None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Connect { auth_token: Option<String> },
    Disconnect,
    Send(Envelope),
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    ClearState,
    Shutdown,
}

#[derive(Debug)]
enum LinkEvent {
    Opened(mpsc::Sender<OutboundFrame>),
    OpenFailed(String),
    Transport(TransportEvent),
}

type TaggedLinkEvent = (u64, LinkEvent);

pub(crate) struct ConnectionWorker {
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    link_tx: mpsc::UnboundedSender<TaggedLinkEvent>,
    link_rx: mpsc::UnboundedReceiver<TaggedLinkEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    stats_tx: watch::Sender<StreamStats>,
    router: SharedRouter,
    reconciler: StateReconciler,
    generation: u64,
    attempt: u32,
    auth_token: Option<String>,
    channels: Vec<String>,
    outbound: Option<mpsc::Sender<OutboundFrame>>,
    link_task: Option<JoinHandle<()>>,
    reconnect_at: Option<Instant>,
    heartbeat: Option<Interval>,
    pong_deadline: Option<Instant>,
    sampler: LogSampler,
}

impl ConnectionWorker {
    pub(crate) fn new(
        config: StreamConfig,
        connector: Arc<dyn Connector>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<ConnectionStatus>,
        stats_tx: watch::Sender<StreamStats>,
        router: SharedRouter,
        reconciler: StateReconciler,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        Self {
            config,
            connector,
            cmd_rx,
            link_tx,
            link_rx,
            status_tx,
            stats_tx,
            router,
            reconciler,
            generation: 0,
            attempt: 0,
            auth_token: None,
            channels: Vec::new(),
            outbound: None,
            link_task: None,
            reconnect_at: None,
            heartbeat: None,
            pong_deadline: None,
            sampler: LogSampler::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Shutdown) | None => {
                            self.retire_link();
                            self.set_state(ConnectionState::Disconnected, None);
                            debug!("stream worker stopped");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
                Some((generation, event)) = self.link_rx.recv() => {
                    self.on_link_event(generation, event);
                }
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open();
                }
                _ = tick(&mut self.heartbeat) => {
                    self.send_ping();
                }
                _ = wait_until(self.pong_deadline) => {
                    warn!(generation = self.generation, "pong timeout; treating connection as dead");
                    self.retire_link();
                    self.schedule_reconnect("pong timeout".to_string());
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { auth_token } => {
                self.retire_link();
                self.auth_token = auth_token;
                self.attempt = 0;
                self.open();
            }
            Command::Disconnect => {
                self.retire_link();
                self.attempt = 0;
                if !self.status_tx.borrow().state.is_disconnected() {
                    info!("stream disconnected by caller");
                }
                self.set_state(ConnectionState::Disconnected, None);
            }
            Command::Send(envelope) => {
                if !self.status_tx.borrow().state.is_connected() {
                    warn!(frame_type = %envelope.kind, "send while not connected; dropped");
                    return;
                }
                self.write_envelope(&envelope);
            }
            Command::Subscribe(channels) => {
                let mut added: Vec<String> = Vec::new();
                for channel in channels {
                    if !self.channels.contains(&channel) && !added.contains(&channel) {
                        added.push(channel);
                    }
                }
                if added.is_empty() {
                    return;
                }
                self.channels.extend(added.iter().cloned());
                if self.outbound.is_some() {
                    let envelope = Envelope::subscribe(&added);
                    if self.write_envelope(&envelope) {
                        self.sampler.control_sent(&envelope);
                    }
                }
            }
            Command::Unsubscribe(channels) => {
                let mut removed: Vec<String> = Vec::new();
                for channel in channels {
                    if self.channels.contains(&channel) && !removed.contains(&channel) {
                        removed.push(channel);
                    }
                }
                if removed.is_empty() {
                    return;
                }
                self.channels.retain(|channel| !removed.contains(channel));
                if self.outbound.is_some() {
                    let envelope = Envelope::unsubscribe(&removed);
                    if self.write_envelope(&envelope) {
                        self.sampler.control_sent(&envelope);
                    }
                }
            }
            Command::ClearState => self.reconciler.clear(),
            Command::Shutdown => {}
        }
    }

    fn open(&mut self) {
        let url = match self.config.endpoint.url(self.auth_token.as_deref()) {
            Ok(url) => url,
            Err(err) => {
                warn!(host = %self.config.endpoint.host, error = %err, "stream endpoint invalid; not connecting");
                self.set_state(ConnectionState::Disconnected, Some(err.to_string()));
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let state = if self.attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting {
                attempt: self.attempt,
            }
        };
        let last_error = self.status_tx.borrow().last_error.clone();
        self.set_state(state, last_error);

        info!(
            generation,
            attempt = self.attempt,
            host = url.host_str().unwrap_or_default(),
            path = url.path(),
            "opening stream connection"
        );

        let connector = Arc::clone(&self.connector);
        let link_tx = self.link_tx.clone();
        let connect_timeout = self.config.connect_timeout();

        self.link_task = Some(tokio::spawn(async move {
            let link = match tokio::time::timeout(connect_timeout, connector.connect(&url)).await {
                Ok(Ok(link)) => link,
                Ok(Err(err)) => {
                    let _ = link_tx.send((generation, LinkEvent::OpenFailed(err.to_string())));
                    return;
                }
                Err(_) => {
                    let err = StreamError::ConnectTimeout {
                        duration_ms: connect_timeout.as_millis() as u64,
                    };
                    let _ = link_tx.send((generation, LinkEvent::OpenFailed(err.to_string())));
                    return;
                }
            };

            let Link {
                outbound,
                mut inbound,
            } = link;
            if link_tx.send((generation, LinkEvent::Opened(outbound))).is_err() {
                return;
            }

            while let Some(event) = inbound.recv().await {
                let last = matches!(event, TransportEvent::Closed { .. });
                if link_tx.send((generation, LinkEvent::Transport(event))).is_err() || last {
                    return;
                }
            }

            let _ = link_tx.send((
                generation,
                LinkEvent::Transport(TransportEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "transport dropped".to_string(),
                }),
            ));
        }));
    }

    fn on_link_event(&mut self, generation: u64, event: LinkEvent) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "ignoring event from retired connection");
            return;
        }
        self.handle_link_event(event);
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened(outbound) => self.on_opened(outbound),
            LinkEvent::OpenFailed(err) => {
                self.link_task = None;
                warn!(generation = self.generation, attempt = self.attempt, error = %err, "stream connect failed");
                self.schedule_reconnect(err);
            }
            LinkEvent::Transport(TransportEvent::Text(text)) => self.handle_frame(&text),
            LinkEvent::Transport(TransportEvent::Error(err)) => {
                warn!(generation = self.generation, error = %err, "stream transport error");
                let state = self.status_tx.borrow().state;
                self.set_state(state, Some(err));
            }
            LinkEvent::Transport(TransportEvent::Closed { code, reason }) => {
                self.link_task = None;
                self.outbound = None;
                self.heartbeat = None;
                self.pong_deadline = None;
                if code == NORMAL_CLOSURE {
                    info!(generation = self.generation, "stream closed normally by server");
                    self.attempt = 0;
                    self.set_state(ConnectionState::Disconnected, None);
                } else {
                    warn!(generation = self.generation, code, reason = %reason, "stream closed abnormally");
                    self.schedule_reconnect(format!("connection closed with code {code}: {reason}"));
                }
            }
        }
    }

    fn on_opened(&mut self, outbound: mpsc::Sender<OutboundFrame>) {
        self.outbound = Some(outbound);
        self.attempt = 0;
        self.pong_deadline = None;

        let period = self.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);

        self.set_state(ConnectionState::Connected, None);
        info!(generation = self.generation, channels = self.channels.len(), "stream connected");

        if !self.channels.is_empty() {
            let envelope = Envelope::subscribe(&self.channels);
            if self.write_envelope(&envelope) {
                self.sampler.control_sent(&envelope);
            }
        }
        if let Some(kind) = self.config.snapshot_request_type.clone() {
            let envelope = Envelope::snapshot_request(&kind, &self.channels);
            if self.write_envelope(&envelope) {
                self.sampler.control_sent(&envelope);
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        self.stats_tx.send_modify(StreamStats::record_frame);

        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.sampler.parse_failed(&err, text);
                self.stats_tx.send_modify(StreamStats::record_parse_failure);
                return;
            }
        };

        let kind = envelope.kind.clone();
        let event = match InboundEvent::from_envelope(envelope) {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.sampler.unknown_type(&kind, text);
                self.stats_tx.send_modify(StreamStats::record_unknown);
                return;
            }
            Err(err) => {
                self.sampler.parse_failed(&err, text);
                self.stats_tx.send_modify(StreamStats::record_parse_failure);
                return;
            }
        };

        self.sampler.message(event.kind());
        if matches!(event, InboundEvent::Pong) {
            self.pong_deadline = None;
        }

        match self.reconciler.apply(&event) {
            ApplyOutcome::Applied => self.stats_tx.send_modify(StreamStats::record_applied),
            // stale prices are not forwarded to handlers either
            ApplyOutcome::RejectedStale => {
                self.stats_tx.send_modify(StreamStats::record_stale);
                return;
            }
            ApplyOutcome::Ignored => {}
        }

        let handlers = match self.router.read() {
            Ok(router) => router.handlers_for(event.kind()),
            Err(poisoned) => poisoned.into_inner().handlers_for(event.kind()),
        };
        let report = dispatch_to(&handlers, &event);
        if report.failed > 0 {
            self.stats_tx
                .send_modify(|stats| stats.record_handler_failures(report.failed));
        }
    }

    fn send_ping(&mut self) {
        if self.write_envelope(&Envelope::ping()) {
            self.stats_tx.send_modify(StreamStats::record_ping);
            if self.pong_deadline.is_none()
                && let Some(timeout) = self.config.pong_timeout()
            {
                self.pong_deadline = Some(Instant::now() + timeout);
            }
        }
    }

    fn schedule_reconnect(&mut self, reason: String) {
        self.outbound = None;
        self.heartbeat = None;
        self.pong_deadline = None;

        let max_attempts = self.config.max_reconnect_attempts;
        if self.attempt >= max_attempts {
            warn!(attempts = self.attempt, max_attempts, error = %reason, "stream gave up reconnecting");
            self.reconnect_at = None;
            self.set_state(
                ConnectionState::Failed {
                    attempts: self.attempt,
                },
                Some(reason),
            );
            return;
        }

        self.attempt += 1;
        let delay = self.config.reconnect_delay(self.attempt);
        self.reconnect_at = Some(Instant::now() + delay);
        self.stats_tx
            .send_modify(StreamStats::record_reconnect_scheduled);
        warn!(attempt = self.attempt, max_attempts, ?delay, error = %reason, "stream reconnect scheduled");
        self.set_state(
            ConnectionState::Reconnecting {
                attempt: self.attempt,
            },
            Some(reason),
        );
    }

    /// Close the live or pending transport and stop all timers.
    /// Events still in flight from it are ignored afterwards.
    fn retire_link(&mut self) {
        if self.outbound.is_some() || self.link_task.is_some() {
            self.generation += 1;
        }
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.try_send(OutboundFrame::Close {
                code: NORMAL_CLOSURE,
                reason: "client disconnect".to_string(),
            });
        }
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        self.reconnect_at = None;
        self.heartbeat = None;
        self.pong_deadline = None;
    }

    fn write_envelope(&self, envelope: &Envelope) -> bool {
        let Some(outbound) = &self.outbound else {
            return false;
        };
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(frame_type = %envelope.kind, error = %err, "failed to serialize outbound envelope");
                return false;
            }
        };
        match outbound.try_send(OutboundFrame::Text(text)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(frame_type = %envelope.kind, "outbound buffer full; message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(frame_type = %envelope.kind, "outbound channel closed; message dropped");
                false
            }
        }
    }

    fn set_state(&self, state: ConnectionState, last_error: Option<String>) {
        let next = ConnectionStatus {
            state,
            attempt: self.attempt,
            generation: self.generation,
            last_error,
        };
        self.status_tx.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use url::Url;

    use crate::ws::endpoint::{Endpoint, StreamPath};

    struct PendingConnector;

    #[async_trait]
    impl Connector for PendingConnector {
        async fn connect(&self, _url: &Url) -> crate::Result<Link> {
            std::future::pending().await
        }
    }

    fn worker() -> (ConnectionWorker, watch::Receiver<ConnectionStatus>) {
        let mut config = StreamConfig::new(Endpoint::new("localhost:9", false, StreamPath::Trading));
        config.snapshot_request_type = None;
        let (_cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let (stats_tx, _stats_rx) = watch::channel(StreamStats::default());
        let reconciler = StateReconciler::new(config.caps, config.reject_stale_prices);
        let worker = ConnectionWorker::new(
            config,
            Arc::new(PendingConnector),
            cmd_rx,
            status_tx,
            stats_tx,
            Arc::new(RwLock::new(MessageRouter::new())),
            reconciler,
        );
        (worker, status_rx)
    }

    fn price_text(symbol: &str, timestamp: i64) -> LinkEvent {
        let frame = json!({
            "type": "price_update",
            "data": {"symbol": symbol, "price": "1", "timestamp": timestamp}
        });
        LinkEvent::Transport(TransportEvent::Text(frame.to_string()))
    }

    fn drain(worker: &mut ConnectionWorker) {
        while let Ok((generation, event)) = worker.link_rx.try_recv() {
            worker.on_link_event(generation, event);
        }
    }

    #[tokio::test]
    async fn events_from_retired_connection_are_ignored() {
        let (mut worker, status_rx) = worker();
        let (outbound_tx, _outbound_rx) = mpsc::channel(8);
        worker.generation = 1;
        worker.on_opened(outbound_tx);
        assert!(status_rx.borrow().state.is_connected());

        let retired = worker.generation;
        worker.handle_command(Command::Connect { auth_token: None });
        assert!(worker.generation > retired);

        worker.link_tx.send((retired, price_text("BTC", 1))).unwrap();
        worker
            .link_tx
            .send((
                retired,
                LinkEvent::Transport(TransportEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "late".to_string(),
                }),
            ))
            .unwrap();
        drain(&mut worker);

        assert!(worker.reconciler.snapshot().prices.is_empty());
        assert!(worker.reconnect_at.is_none());
        assert_eq!(worker.attempt, 0);
        let status = status_rx.borrow().clone();
        assert_eq!(status.state, ConnectionState::Connecting);
        assert_eq!(status.generation, worker.generation);
        assert_eq!(status.last_error, None);

        let current = worker.generation;
        worker.link_tx.send((current, price_text("ETH", 2))).unwrap();
        drain(&mut worker);
        assert!(worker.reconciler.snapshot().price("ETH").is_some());
        assert!(worker.reconciler.snapshot().price("BTC").is_none());
    }
}
