/*
[INPUT]:  Outbound control envelopes, inbound frames, parse failures
[OUTPUT]: Rate limited tracing output for high volume stream paths
[POS]:    WebSocket layer - sampled diagnostics
[UPDATE]: When changing sample limits or log fields
*/

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info};

use super::message::{Envelope, EventKind};

const MESSAGE_SAMPLE_LIMIT: usize = 3;
const CONTROL_LOG_LIMIT: usize = 10;
const UNKNOWN_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

/// Sample counters for one stream; each stream logs its own first samples
#[derive(Debug, Default)]
pub(crate) struct LogSampler {
    messages: AtomicUsize,
    controls: AtomicUsize,
    unknown: AtomicUsize,
    parse_failures: AtomicUsize,
}

/// Index of this sample when still under `limit`
fn take_sample(counter: &AtomicUsize, limit: usize) -> Option<usize> {
    let count = counter.fetch_add(1, Ordering::Relaxed);
    (count < limit).then_some(count + 1)
}

impl LogSampler {
    pub(crate) fn control_sent(&self, envelope: &Envelope) {
        let Some(sample_index) = take_sample(&self.controls, CONTROL_LOG_LIMIT) else {
            return;
        };

        match envelope.data.get("channels").and_then(|value| value.as_array()) {
            Some(channels) => {
                info!(
                    sample_index,
                    sample_limit = CONTROL_LOG_LIMIT,
                    action = %envelope.kind,
                    channels = channels.len(),
                    "ws control message sent"
                );
            }
            None => {
                let preview = truncate_for_log(&envelope.data.to_string(), RAW_LOG_MAX_BYTES);
                info!(
                    sample_index,
                    sample_limit = CONTROL_LOG_LIMIT,
                    action = %envelope.kind,
                    data = %preview,
                    "ws control message sent"
                );
            }
        }
    }

    pub(crate) fn message(&self, kind: EventKind) {
        if let Some(sample_index) = take_sample(&self.messages, MESSAGE_SAMPLE_LIMIT) {
            info!(
                sample_index,
                sample_limit = MESSAGE_SAMPLE_LIMIT,
                event = %kind,
                "ws message sample"
            );
        }
    }

    pub(crate) fn unknown_type(&self, kind: &str, raw: &str) {
        if let Some(sample_index) = take_sample(&self.unknown, UNKNOWN_LOG_LIMIT) {
            info!(
                sample_index,
                sample_limit = UNKNOWN_LOG_LIMIT,
                frame_type = kind,
                bytes = raw.len(),
                "ws message type unrecognized"
            );
            let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
            debug!(
                sample_index,
                sample_limit = UNKNOWN_LOG_LIMIT,
                message = %preview,
                "ws message type unrecognized"
            );
        }
    }

    pub(crate) fn parse_failed(&self, err: &dyn std::fmt::Display, raw: &str) {
        if let Some(sample_index) = take_sample(&self.parse_failures, PARSE_FAIL_LOG_LIMIT) {
            info!(
                sample_index,
                sample_limit = PARSE_FAIL_LOG_LIMIT,
                error = %err,
                bytes = raw.len(),
                "ws message parse failed"
            );
            let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
            debug!(
                sample_index,
                sample_limit = PARSE_FAIL_LOG_LIMIT,
                error = %err,
                message = %preview,
                "ws message parse failed"
            );
        }
    }
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 3);
    out.push_str(&value[..cut]);
    out.push_str("...");
    out
}
