#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Event mirroring to the firmware log sink.
//!
//! `node-core` records structured events instead of printing; this module
//! tails the ring after each poll pass and emits one defmt line (stdout on
//! the host) per fresh event, so the RTT log matches the event history the
//! diagnostics channel would report.

use node_core::events::{EventDetail, EventId, EventRecorder, NodeEvent};

/// Tails an [`EventRecorder`], emitting each event exactly once.
pub struct EventMirror {
    last_seen: Option<EventId>,
}

impl EventMirror {
    /// Creates a mirror that has seen nothing.
    pub const fn new() -> Self {
        Self { last_seen: None }
    }

    /// Emits every event recorded since the previous flush.
    ///
    /// Returns how many events were mirrored.
    pub fn flush(&mut self, events: &EventRecorder) -> usize {
        let mut emitted = 0;
        for event in events.oldest_first() {
            if self.last_seen.is_some_and(|last| event.id <= last) {
                continue;
            }
            emit(event);
            self.last_seen = Some(event.id);
            emitted += 1;
        }
        emitted
    }
}

impl Default for EventMirror {
    fn default() -> Self {
        Self::new()
    }
}

fn detail_value(event: &NodeEvent) -> u32 {
    match event.detail {
        EventDetail::None => 0,
        EventDetail::LateBy(seconds) => seconds,
        EventDetail::UplinkBytes(bytes) => u32::from(bytes),
        EventDetail::Key(key) => u32::from(key.address()),
    }
}

#[cfg(target_os = "none")]
fn emit(event: &NodeEvent) {
    defmt::info!(
        "event code={=u16} detail={=u32} t={=u32}s",
        event.kind.to_raw(),
        detail_value(event),
        event.at
    );
}

#[cfg(not(target_os = "none"))]
fn emit(event: &NodeEvent) {
    println!(
        "event {} detail={} t={}s",
        event.kind,
        detail_value(event),
        event.at
    );
}
