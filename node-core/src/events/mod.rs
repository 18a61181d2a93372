//! Node event catalog and in-memory event ring.
//!
//! The core never prints; it records structured events that the owning
//! crate mirrors to its log sink (defmt on the MCU, stdout on the host).
//! Event kinds serialize to compact numeric codes so they can also ride a
//! diagnostics channel; payload details that do not fit a code travel in
//! the record next to it.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::Seconds;
use crate::app::NodeMode;
use crate::config::SensorSlot;
use crate::config::persist::SettingsKey;
use crate::schedule::ScheduleId;

/// Identifier used when tracking recorded events.
pub type EventId = u32;

/// Discriminated node events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeEventKind {
    ModeEntered(NodeMode),
    ScheduleLate(ScheduleId),
    SensorSampled(SensorSlot),
    SensorReadFailed(SensorSlot),
    SensorDisabled(SensorSlot),
    RailFault(SensorSlot),
    ScheduleFault(ScheduleId),
    RadioDisabled,
    JoinAttemptFailed,
    JoinExhausted,
    Joined,
    UplinkSent,
    SendFailed,
    PersistFailed,
    ClockFault,
    SetupDone,
    Heartbeat,
    Custom(u16),
}

impl fmt::Display for NodeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEventKind::ModeEntered(mode) => write!(f, "mode-entered {mode}"),
            NodeEventKind::ScheduleLate(id) => write!(f, "schedule-late {id}"),
            NodeEventKind::SensorSampled(slot) => write!(f, "sensor-sampled {slot}"),
            NodeEventKind::SensorReadFailed(slot) => write!(f, "sensor-read-failed {slot}"),
            NodeEventKind::SensorDisabled(slot) => write!(f, "sensor-disabled {slot}"),
            NodeEventKind::RailFault(slot) => write!(f, "rail-fault {slot}"),
            NodeEventKind::ScheduleFault(id) => write!(f, "schedule-fault {id}"),
            NodeEventKind::RadioDisabled => f.write_str("radio-disabled"),
            NodeEventKind::JoinAttemptFailed => f.write_str("join-attempt-failed"),
            NodeEventKind::JoinExhausted => f.write_str("join-exhausted"),
            NodeEventKind::Joined => f.write_str("joined"),
            NodeEventKind::UplinkSent => f.write_str("uplink-sent"),
            NodeEventKind::SendFailed => f.write_str("send-failed"),
            NodeEventKind::PersistFailed => f.write_str("persist-failed"),
            NodeEventKind::ClockFault => f.write_str("clock-fault"),
            NodeEventKind::SetupDone => f.write_str("setup-done"),
            NodeEventKind::Heartbeat => f.write_str("heartbeat"),
            NodeEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl NodeEventKind {
    const MODE_BASE: u16 = 0x0000;
    const SCHEDULE_LATE_BASE: u16 = 0x0004;
    const SENSOR_SAMPLED_BASE: u16 = 0x0008;
    const SENSOR_READ_FAILED_BASE: u16 = 0x000A;
    const SENSOR_DISABLED_BASE: u16 = 0x000C;
    const RADIO_DISABLED_CODE: u16 = 0x000E;
    const RAIL_FAULT_BASE: u16 = 0x0020;
    const SCHEDULE_FAULT_BASE: u16 = 0x0024;
    const JOIN_ATTEMPT_FAILED_CODE: u16 = 0x0010;
    const JOIN_EXHAUSTED_CODE: u16 = 0x0011;
    const JOINED_CODE: u16 = 0x0012;
    const UPLINK_SENT_CODE: u16 = 0x0013;
    const SEND_FAILED_CODE: u16 = 0x0014;
    const PERSIST_FAILED_CODE: u16 = 0x0015;
    const CLOCK_FAULT_CODE: u16 = 0x0016;
    const SETUP_DONE_CODE: u16 = 0x0017;
    const HEARTBEAT_CODE: u16 = 0x0018;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            NodeEventKind::ModeEntered(mode) => Self::MODE_BASE + mode.as_index() as u16,
            NodeEventKind::ScheduleLate(id) => Self::SCHEDULE_LATE_BASE + id.as_index() as u16,
            NodeEventKind::SensorSampled(slot) => {
                Self::SENSOR_SAMPLED_BASE + slot.as_index() as u16
            }
            NodeEventKind::SensorReadFailed(slot) => {
                Self::SENSOR_READ_FAILED_BASE + slot.as_index() as u16
            }
            NodeEventKind::SensorDisabled(slot) => {
                Self::SENSOR_DISABLED_BASE + slot.as_index() as u16
            }
            NodeEventKind::RailFault(slot) => Self::RAIL_FAULT_BASE + slot.as_index() as u16,
            NodeEventKind::ScheduleFault(id) => Self::SCHEDULE_FAULT_BASE + id.as_index() as u16,
            NodeEventKind::RadioDisabled => Self::RADIO_DISABLED_CODE,
            NodeEventKind::JoinAttemptFailed => Self::JOIN_ATTEMPT_FAILED_CODE,
            NodeEventKind::JoinExhausted => Self::JOIN_EXHAUSTED_CODE,
            NodeEventKind::Joined => Self::JOINED_CODE,
            NodeEventKind::UplinkSent => Self::UPLINK_SENT_CODE,
            NodeEventKind::SendFailed => Self::SEND_FAILED_CODE,
            NodeEventKind::PersistFailed => Self::PERSIST_FAILED_CODE,
            NodeEventKind::ClockFault => Self::CLOCK_FAULT_CODE,
            NodeEventKind::SetupDone => Self::SETUP_DONE_CODE,
            NodeEventKind::Heartbeat => Self::HEARTBEAT_CODE,
            NodeEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`Custom`].
    ///
    /// [`Custom`]: NodeEventKind::Custom
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::RADIO_DISABLED_CODE => NodeEventKind::RadioDisabled,
            Self::JOIN_ATTEMPT_FAILED_CODE => NodeEventKind::JoinAttemptFailed,
            Self::JOIN_EXHAUSTED_CODE => NodeEventKind::JoinExhausted,
            Self::JOINED_CODE => NodeEventKind::Joined,
            Self::UPLINK_SENT_CODE => NodeEventKind::UplinkSent,
            Self::SEND_FAILED_CODE => NodeEventKind::SendFailed,
            Self::PERSIST_FAILED_CODE => NodeEventKind::PersistFailed,
            Self::CLOCK_FAULT_CODE => NodeEventKind::ClockFault,
            Self::SETUP_DONE_CODE => NodeEventKind::SetupDone,
            Self::HEARTBEAT_CODE => NodeEventKind::Heartbeat,
            value if (Self::MODE_BASE..Self::MODE_BASE + 3).contains(&value) => {
                let offset = (value - Self::MODE_BASE) as usize;
                NodeMode::from_index(offset)
                    .map_or(NodeEventKind::Custom(value), NodeEventKind::ModeEntered)
            }
            value if (Self::SCHEDULE_LATE_BASE..Self::SCHEDULE_LATE_BASE + 3).contains(&value) => {
                let offset = (value - Self::SCHEDULE_LATE_BASE) as usize;
                schedule_from_index(offset)
                    .map_or(NodeEventKind::Custom(value), NodeEventKind::ScheduleLate)
            }
            value
                if (Self::SENSOR_SAMPLED_BASE..Self::SENSOR_SAMPLED_BASE + 2).contains(&value) =>
            {
                let offset = (value - Self::SENSOR_SAMPLED_BASE) as usize;
                SensorSlot::from_index(offset)
                    .map_or(NodeEventKind::Custom(value), NodeEventKind::SensorSampled)
            }
            value
                if (Self::SENSOR_READ_FAILED_BASE..Self::SENSOR_READ_FAILED_BASE + 2)
                    .contains(&value) =>
            {
                let offset = (value - Self::SENSOR_READ_FAILED_BASE) as usize;
                SensorSlot::from_index(offset).map_or(
                    NodeEventKind::Custom(value),
                    NodeEventKind::SensorReadFailed,
                )
            }
            value
                if (Self::SENSOR_DISABLED_BASE..Self::SENSOR_DISABLED_BASE + 2)
                    .contains(&value) =>
            {
                let offset = (value - Self::SENSOR_DISABLED_BASE) as usize;
                SensorSlot::from_index(offset)
                    .map_or(NodeEventKind::Custom(value), NodeEventKind::SensorDisabled)
            }
            value if (Self::RAIL_FAULT_BASE..Self::RAIL_FAULT_BASE + 2).contains(&value) => {
                let offset = (value - Self::RAIL_FAULT_BASE) as usize;
                SensorSlot::from_index(offset)
                    .map_or(NodeEventKind::Custom(value), NodeEventKind::RailFault)
            }
            value if (Self::SCHEDULE_FAULT_BASE..Self::SCHEDULE_FAULT_BASE + 3).contains(&value) => {
                let offset = (value - Self::SCHEDULE_FAULT_BASE) as usize;
                schedule_from_index(offset)
                    .map_or(NodeEventKind::Custom(value), NodeEventKind::ScheduleFault)
            }
            other => NodeEventKind::Custom(other),
        }
    }
}

fn schedule_from_index(index: usize) -> Option<ScheduleId> {
    ScheduleId::ALL.get(index).copied()
}

/// Numeric details carried next to an event kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum EventDetail {
    #[default]
    None,
    /// Seconds a schedule overran its period.
    LateBy(Seconds),
    /// Size of a transmitted uplink payload.
    UplinkBytes(u16),
    /// Settings key whose persistence failed.
    Key(SettingsKey),
}

/// One recorded event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeEvent {
    pub id: EventId,
    /// Absolute node seconds when the event was recorded.
    pub at: Seconds,
    pub kind: NodeEventKind,
    pub detail: EventDetail,
}

/// Number of events retained in memory.
pub const EVENT_RING_CAPACITY: usize = 64;

/// Fixed-capacity ring of recorded events with sequential ids.
pub struct EventRecorder {
    ring: HistoryBuf<NodeEvent, EVENT_RING_CAPACITY>,
    next_id: EventId,
}

impl EventRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_id: 0,
        }
    }

    /// Records an event without extra detail.
    pub fn record(&mut self, kind: NodeEventKind, at: Seconds) -> EventId {
        self.record_with(kind, EventDetail::None, at)
    }

    /// Records an event with its detail payload.
    pub fn record_with(&mut self, kind: NodeEventKind, detail: EventDetail, at: Seconds) -> EventId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.ring.write(NodeEvent {
            id,
            at,
            kind,
            detail,
        });
        id
    }

    /// The most recent event, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&NodeEvent> {
        self.ring.recent()
    }

    /// Iterator over recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, NodeEvent> {
        self.ring.oldest_ordered()
    }

    /// Number of events currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the recorder holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codes_round_trip() {
        let kinds = [
            NodeEventKind::ModeEntered(NodeMode::Configuration),
            NodeEventKind::ModeEntered(NodeMode::Running),
            NodeEventKind::ModeEntered(NodeMode::Error),
            NodeEventKind::ScheduleLate(ScheduleId::SensorTwo),
            NodeEventKind::SensorSampled(SensorSlot::One),
            NodeEventKind::SensorReadFailed(SensorSlot::Two),
            NodeEventKind::SensorDisabled(SensorSlot::One),
            NodeEventKind::RailFault(SensorSlot::Two),
            NodeEventKind::ScheduleFault(ScheduleId::Radio),
            NodeEventKind::RadioDisabled,
            NodeEventKind::JoinAttemptFailed,
            NodeEventKind::JoinExhausted,
            NodeEventKind::Joined,
            NodeEventKind::UplinkSent,
            NodeEventKind::SendFailed,
            NodeEventKind::PersistFailed,
            NodeEventKind::ClockFault,
            NodeEventKind::SetupDone,
            NodeEventKind::Heartbeat,
        ];
        for kind in kinds {
            assert_eq!(NodeEventKind::from_raw(kind.to_raw()), kind);
        }
    }

    #[test]
    fn unknown_codes_decode_to_custom() {
        assert_eq!(
            NodeEventKind::from_raw(0x4242),
            NodeEventKind::Custom(0x4242)
        );
    }

    #[test]
    fn recorder_assigns_sequential_ids() {
        let mut events = EventRecorder::new();
        let first = events.record(NodeEventKind::SetupDone, 10);
        let second = events.record_with(
            NodeEventKind::ScheduleLate(ScheduleId::Radio),
            EventDetail::LateBy(4),
            22,
        );

        assert_eq!(first, 0);
        assert_eq!(second, 1);

        let latest = events.latest().copied().unwrap();
        assert_eq!(latest.kind, NodeEventKind::ScheduleLate(ScheduleId::Radio));
        assert_eq!(latest.detail, EventDetail::LateBy(4));
        assert_eq!(latest.at, 22);
    }
}
