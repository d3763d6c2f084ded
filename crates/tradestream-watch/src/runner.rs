/*
[INPUT]:  WatchConfig + optional custom transport
[OUTPUT]: One connected TradeStream per configured stream, event/status logs, periodic snapshots
[POS]:    Runtime layer - owns stream lifecycles for the watcher binary
[UPDATE]: When changing startup, logging, or shutdown semantics
*/

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tradestream_client::{
    AlertLevel, ConnectionStatus, Connector, EventKind, InboundEvent, StreamConfig, TradeStream,
};

use crate::config::WatchConfig;
use crate::snapshot::StreamSnapshot;

#[derive(Debug)]
struct WatchedStream {
    id: String,
    stream: TradeStream,
}

/// Runs every configured stream until shutdown.
///
/// Streams connect as soon as the runner starts; `run` only drives the
/// periodic snapshot log.
#[derive(Debug)]
pub struct WatchRunner {
    streams: Vec<WatchedStream>,
    status_tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
    snapshot_interval: Duration,
}

impl WatchRunner {
    pub fn start(config: WatchConfig) -> anyhow::Result<Self> {
        Self::start_internal(config, TradeStream::new)
    }

    pub fn start_with_connector(
        config: WatchConfig,
        connector: Arc<dyn Connector>,
    ) -> anyhow::Result<Self> {
        Self::start_internal(config, |stream| {
            TradeStream::with_connector(stream, Arc::clone(&connector))
        })
    }

    fn start_internal<F>(config: WatchConfig, mut open: F) -> anyhow::Result<Self>
    where
        F: FnMut(StreamConfig) -> tradestream_client::Result<TradeStream>,
    {
        config.validate()?;

        let shutdown = CancellationToken::new();
        let mut streams = Vec::with_capacity(config.streams.len());
        let mut status_tasks = Vec::with_capacity(config.streams.len());

        for entry in config.streams {
            let stream = open(entry.stream).with_context(|| format!("create stream {}", entry.id))?;

            for kind in EventKind::ALL {
                let id = entry.id.clone();
                stream.on(kind, move |event| {
                    log_event(&id, event);
                    Ok(())
                });
            }

            status_tasks.push(spawn_status_logger(
                entry.id.clone(),
                &stream,
                shutdown.clone(),
            ));

            stream.subscribe(entry.channels.iter().cloned());
            stream.connect(entry.token);
            info!(stream = %entry.id, channels = entry.channels.len(), "stream started");

            streams.push(WatchedStream {
                id: entry.id,
                stream,
            });
        }

        Ok(Self {
            streams,
            status_tasks,
            shutdown,
            snapshot_interval: Duration::from_secs(config.snapshot_interval_secs),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stream(&self, id: &str) -> Option<&TradeStream> {
        self.streams
            .iter()
            .find(|watched| watched.id == id)
            .map(|watched| &watched.stream)
    }

    pub fn snapshots(&self) -> Vec<StreamSnapshot> {
        self.streams
            .iter()
            .map(|watched| StreamSnapshot::capture(&watched.id, &watched.stream))
            .collect()
    }

    /// Log snapshots every interval until the shutdown token fires
    pub async fn run(&self) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.snapshot_interval, self.snapshot_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for snapshot in self.snapshots() {
                        snapshot.log();
                    }
                }
            }
        }
    }

    /// Close every stream with a normal closure and wait for the workers
    pub async fn shutdown_and_wait(self) {
        self.shutdown.cancel();

        for snapshot in self.snapshots() {
            snapshot.log();
        }

        for watched in self.streams {
            watched.stream.shutdown().await;
            debug!(stream = %watched.id, "stream stopped");
        }
        for task in self.status_tasks {
            let _ = task.await;
        }
        info!("all streams stopped");
    }
}

fn spawn_status_logger(
    id: String,
    stream: &TradeStream,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut status_rx = stream.watch_status();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = status_rx.borrow_and_update().clone();
                    log_status(&id, &status);
                }
            }
        }
    })
}

fn log_status(id: &str, status: &ConnectionStatus) {
    let last_error = status.last_error.as_deref().unwrap_or("-");
    if status.state.is_terminal() {
        error!(stream = %id, state = %status.state, last_error, "stream gave up; restart required");
    } else if status.last_error.is_some() && !status.state.is_connected() {
        warn!(stream = %id, state = %status.state, generation = status.generation, last_error, "stream state changed");
    } else {
        info!(stream = %id, state = %status.state, generation = status.generation, "stream state changed");
    }
}

fn log_event(id: &str, event: &InboundEvent) {
    match event {
        InboundEvent::PriceUpdate(entry) => {
            debug!(stream = %id, symbol = %entry.symbol, price = %entry.price, change = %entry.change, volume = %entry.volume, "price update");
        }
        InboundEvent::TradeUpdate(trade) => {
            info!(
                stream = %id,
                trade_id = %trade.id,
                symbol = %trade.symbol,
                side = ?trade.side,
                price = %trade.price,
                amount = %trade.amount,
                status = %trade.status,
                "trade update"
            );
        }
        InboundEvent::PaymentUpdate(payment) => {
            info!(
                stream = %id,
                payment_id = %payment.id,
                amount = %payment.amount,
                currency = %payment.currency,
                status = %payment.status,
                "payment update"
            );
        }
        InboundEvent::Notification(notification) => {
            info!(stream = %id, level = ?notification.level, title = %notification.title, message = %notification.message, "notification");
        }
        InboundEvent::SystemAlert(alert) => match alert.level {
            AlertLevel::Error | AlertLevel::Critical => {
                error!(stream = %id, level = ?alert.level, message = %alert.message, "system alert");
            }
            AlertLevel::Warning => {
                warn!(stream = %id, message = %alert.message, "system alert");
            }
            AlertLevel::Info | AlertLevel::Success => {
                info!(stream = %id, message = %alert.message, "system alert");
            }
        },
        InboundEvent::ConnectionEstablished(data) => {
            info!(stream = %id, session = %data, "connection established");
        }
        InboundEvent::Pong => debug!(stream = %id, "pong"),
    }
}
