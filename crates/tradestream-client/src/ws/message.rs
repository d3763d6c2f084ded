/*
[INPUT]:  Raw WebSocket text frames
[OUTPUT]: Parsed Envelope and typed InboundEvent values; outbound control envelopes
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::error::{Result, StreamError};
use crate::types::{Notification, Payment, PriceEntry, SystemAlert, Trade};

pub const PING: &str = "ping";
pub const PONG: &str = "pong";
pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";

/// The wire unit: `{ "type", "data", "timestamp" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_object", deserialize_with = "deserialize_data")]
    pub data: Value,
    /// Producer time in milliseconds, not delivery time
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: now_ms(),
        }
    }

    pub fn ping() -> Self {
        Self::new(PING, empty_object())
    }

    pub fn subscribe(channels: &[String]) -> Self {
        Self::new(SUBSCRIBE, json!({ "channels": channels }))
    }

    pub fn unsubscribe(channels: &[String]) -> Self {
        Self::new(UNSUBSCRIBE, json!({ "channels": channels }))
    }

    pub fn snapshot_request(kind: &str, channels: &[String]) -> Self {
        Self::new(kind, json!({ "channels": channels }))
    }

    /// Parse one inbound frame. A missing or empty `type` is an error,
    /// as is `data` that is not an object (null reads as `{}`).
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(text)?;
        if envelope.kind.trim().is_empty() {
            return Err(StreamError::Parse("envelope type is empty".to_string()));
        }
        if !envelope.data.is_object() {
            return Err(StreamError::Parse("envelope data must be an object".to_string()));
        }
        Ok(envelope)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Discriminator of the closed inbound event set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PriceUpdate,
    TradeUpdate,
    PaymentUpdate,
    Notification,
    SystemAlert,
    ConnectionEstablished,
    Pong,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::PriceUpdate,
        EventKind::TradeUpdate,
        EventKind::PaymentUpdate,
        EventKind::Notification,
        EventKind::SystemAlert,
        EventKind::ConnectionEstablished,
        EventKind::Pong,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PriceUpdate => "price_update",
            EventKind::TradeUpdate => "trade_update",
            EventKind::PaymentUpdate => "payment_update",
            EventKind::Notification => "notification",
            EventKind::SystemAlert => "system_alert",
            EventKind::ConnectionEstablished => "connection_established",
            EventKind::Pong => PONG,
        }
    }

    pub fn from_type(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == kind)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    PriceUpdate(PriceEntry),
    TradeUpdate(Trade),
    PaymentUpdate(Payment),
    Notification(Notification),
    SystemAlert(SystemAlert),
    ConnectionEstablished(Value),
    Pong,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::PriceUpdate(_) => EventKind::PriceUpdate,
            InboundEvent::TradeUpdate(_) => EventKind::TradeUpdate,
            InboundEvent::PaymentUpdate(_) => EventKind::PaymentUpdate,
            InboundEvent::Notification(_) => EventKind::Notification,
            InboundEvent::SystemAlert(_) => EventKind::SystemAlert,
            InboundEvent::ConnectionEstablished(_) => EventKind::ConnectionEstablished,
            InboundEvent::Pong => EventKind::Pong,
        }
    }

    /// Decode the payload of a known type.
    ///
    /// Returns `Ok(None)` for types outside the closed set. Payload timestamps
    /// left at zero inherit the envelope timestamp.
    pub fn from_envelope(envelope: Envelope) -> Result<Option<Self>> {
        let Some(kind) = EventKind::from_type(&envelope.kind) else {
            return Ok(None);
        };
        let fallback = envelope.timestamp;

        let event = match kind {
            EventKind::PriceUpdate => {
                let mut entry: PriceEntry = serde_json::from_value(envelope.data)?;
                inherit_timestamp(&mut entry.timestamp, fallback);
                InboundEvent::PriceUpdate(entry)
            }
            EventKind::TradeUpdate => {
                let mut trade: Trade = serde_json::from_value(envelope.data)?;
                inherit_timestamp(&mut trade.timestamp, fallback);
                InboundEvent::TradeUpdate(trade)
            }
            EventKind::PaymentUpdate => {
                let mut payment: Payment = serde_json::from_value(envelope.data)?;
                inherit_timestamp(&mut payment.timestamp, fallback);
                InboundEvent::PaymentUpdate(payment)
            }
            EventKind::Notification => {
                let mut notification: Notification = serde_json::from_value(envelope.data)?;
                inherit_timestamp(&mut notification.timestamp, fallback);
                InboundEvent::Notification(notification)
            }
            EventKind::SystemAlert => {
                let mut alert: SystemAlert = serde_json::from_value(envelope.data)?;
                inherit_timestamp(&mut alert.timestamp, fallback);
                InboundEvent::SystemAlert(alert)
            }
            EventKind::ConnectionEstablished => InboundEvent::ConnectionEstablished(envelope.data),
            EventKind::Pong => InboundEvent::Pong,
        };

        Ok(Some(event))
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn inherit_timestamp(timestamp: &mut i64, fallback: i64) {
    if *timestamp == 0 {
        *timestamp = fallback;
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn deserialize_data<'de, D>(deserializer: D) -> std::result::Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(if value.is_null() { empty_object() } else { value })
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(0),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|ms| ms as i64))
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range")),
        _ => Err(serde::de::Error::custom("timestamp must be a number")),
    }
}
