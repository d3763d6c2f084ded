/*
[INPUT]:  Worker-side frame, dispatch and reconnect events
[OUTPUT]: Snapshot-friendly stream counters for display and tests
[POS]:    Shared runtime metrics between the connection worker and callers
[UPDATE]: When adding/removing stream-level runtime signals
*/

use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_received: u64,
    pub events_applied: u64,
    pub parse_failures: u64,
    pub unknown_dropped: u64,
    pub stale_rejected: u64,
    pub handler_failures: u64,
    pub reconnects_scheduled: u64,
    pub pings_sent: u64,
    pub last_frame: Option<Instant>,
}

impl StreamStats {
    pub fn record_frame(&mut self) {
        self.frames_received += 1;
        self.last_frame = Some(Instant::now());
    }

    pub fn record_applied(&mut self) {
        self.events_applied += 1;
    }

    pub fn record_parse_failure(&mut self) {
        self.parse_failures += 1;
    }

    pub fn record_unknown(&mut self) {
        self.unknown_dropped += 1;
    }

    pub fn record_stale(&mut self) {
        self.stale_rejected += 1;
    }

    pub fn record_handler_failures(&mut self, failed: usize) {
        self.handler_failures += failed as u64;
    }

    pub fn record_reconnect_scheduled(&mut self) {
        self.reconnects_scheduled += 1;
    }

    pub fn record_ping(&mut self) {
        self.pings_sent += 1;
    }
}
