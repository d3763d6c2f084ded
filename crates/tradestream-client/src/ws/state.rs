/*
[INPUT]:  Typed inbound events from the router
[OUTPUT]: Latest-per-symbol prices and bounded recent lists, published via `watch`
[POS]:    State layer - sole writer of the local mirror of server state
[UPDATE]: When changing merge, ordering or capacity rules
*/

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use super::bounded::BoundedList;
use super::message::InboundEvent;
use crate::config::ListCaps;
use crate::types::{Notification, Payment, PriceEntry, SystemAlert, Trade};

/// Local mirror of server pushed state
#[derive(Debug, Clone, PartialEq)]
pub struct StreamState {
    pub prices: HashMap<String, PriceEntry>,
    pub trades: BoundedList<Trade>,
    pub payments: BoundedList<Payment>,
    pub notifications: BoundedList<Notification>,
    pub system_alerts: BoundedList<SystemAlert>,
    /// Payload of the latest `connection_established`
    pub session: Option<Value>,
}

impl StreamState {
    pub fn new(caps: ListCaps) -> Self {
        Self {
            prices: HashMap::new(),
            trades: BoundedList::new(caps.trades),
            payments: BoundedList::new(caps.payments),
            notifications: BoundedList::new(caps.notifications),
            system_alerts: BoundedList::new(caps.system_alerts),
            session: None,
        }
    }

    pub fn price(&self, symbol: &str) -> Option<&PriceEntry> {
        self.prices.get(symbol)
    }

    pub fn clear(&mut self) {
        self.prices.clear();
        self.trades.clear();
        self.payments.clear();
        self.notifications.clear();
        self.system_alerts.clear();
        self.session = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Price update not newer than the stored entry
    RejectedStale,
    /// Event carries no state (e.g. pong)
    Ignored,
}

/// Applies events to `StreamState` and notifies `watch` observers on change
#[derive(Debug)]
pub struct StateReconciler {
    state_tx: watch::Sender<StreamState>,
    reject_stale_prices: bool,
}

impl StateReconciler {
    pub fn new(caps: ListCaps, reject_stale_prices: bool) -> Self {
        let (state_tx, _rx) = watch::channel(StreamState::new(caps));
        Self {
            state_tx,
            reject_stale_prices,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state_tx.subscribe()
    }

    pub fn snapshot(&self) -> StreamState {
        self.state_tx.borrow().clone()
    }

    pub fn apply(&self, event: &InboundEvent) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::Ignored;
        self.state_tx.send_if_modified(|state| {
            outcome = apply_event(state, event, self.reject_stale_prices);
            outcome == ApplyOutcome::Applied
        });
        outcome
    }

    pub fn clear(&self) {
        self.state_tx.send_modify(StreamState::clear);
    }
}

fn apply_event(state: &mut StreamState, event: &InboundEvent, reject_stale: bool) -> ApplyOutcome {
    match event {
        InboundEvent::PriceUpdate(entry) => apply_price(state, entry, reject_stale),
        InboundEvent::TradeUpdate(trade) => {
            state.trades.upsert(trade.clone());
            ApplyOutcome::Applied
        }
        InboundEvent::PaymentUpdate(payment) => {
            state.payments.upsert(payment.clone());
            ApplyOutcome::Applied
        }
        InboundEvent::Notification(notification) => {
            state.notifications.push_front(notification.clone());
            ApplyOutcome::Applied
        }
        InboundEvent::SystemAlert(alert) => {
            state.system_alerts.push_front(alert.clone());
            ApplyOutcome::Applied
        }
        InboundEvent::ConnectionEstablished(session) => {
            state.session = Some(session.clone());
            ApplyOutcome::Applied
        }
        InboundEvent::Pong => ApplyOutcome::Ignored,
    }
}

// A zero timestamp means the producer sent none. Once a symbol holds a timestamped
// entry, only strictly newer timestamps replace it; untimestamped symbols stay last-write-wins.
fn apply_price(state: &mut StreamState, entry: &PriceEntry, reject_stale: bool) -> ApplyOutcome {
    if reject_stale
        && let Some(current) = state.prices.get(&entry.symbol)
        && current.timestamp > 0
        && entry.timestamp <= current.timestamp
    {
        debug!(
            symbol = %entry.symbol,
            stored = current.timestamp,
            incoming = entry.timestamp,
            "stale price update rejected"
        );
        return ApplyOutcome::RejectedStale;
    }

    state.prices.insert(entry.symbol.clone(), entry.clone());
    ApplyOutcome::Applied
}
