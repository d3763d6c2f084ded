/*
[INPUT]:  Live TradeStream state, connection status and counters
[OUTPUT]: Log-friendly per-stream snapshots
[POS]:    Shared runtime view between the runner loop and periodic logging
[UPDATE]: When adding/removing stream-level signals worth reporting
*/

use rust_decimal::Decimal;
use tracing::info;
use tradestream_client::{ConnectionState, StreamStats, TradeStream};

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub id: String,
    pub state: ConnectionState,
    pub attempt: u32,
    pub last_error: Option<String>,
    /// Sorted by symbol
    pub prices: Vec<(String, Decimal)>,
    pub trades: usize,
    pub payments: usize,
    pub notifications: usize,
    pub system_alerts: usize,
    pub stats: StreamStats,
}

impl StreamSnapshot {
    pub fn capture(id: &str, stream: &TradeStream) -> Self {
        let status = stream.status();
        let state = stream.watch_state();
        let state = state.borrow();

        let mut prices: Vec<(String, Decimal)> = state
            .prices
            .iter()
            .map(|(symbol, entry)| (symbol.clone(), entry.price))
            .collect();
        prices.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            id: id.to_string(),
            state: status.state,
            attempt: status.attempt,
            last_error: status.last_error,
            prices,
            trades: state.trades.len(),
            payments: state.payments.len(),
            notifications: state.notifications.len(),
            system_alerts: state.system_alerts.len(),
            stats: stream.stats(),
        }
    }

    pub fn log(&self) {
        info!(
            stream = %self.id,
            state = %self.state,
            attempt = self.attempt,
            last_error = self.last_error.as_deref().unwrap_or("-"),
            symbols = self.prices.len(),
            trades = self.trades,
            payments = self.payments,
            notifications = self.notifications,
            system_alerts = self.system_alerts,
            frames = self.stats.frames_received,
            applied = self.stats.events_applied,
            dropped = self.stats.unknown_dropped + self.stats.parse_failures,
            "stream snapshot"
        );
    }
}
