//! One-shot alarm multiplexer over the hardware timer's comparator channels.
//!
//! Each logical channel owns one hardware comparator slot. Alarms are armed
//! relative to "now" in seconds; the multiplexer converts to ticks and
//! rejects intervals the counter cannot represent in a single span. Fire
//! callbacks run in interrupt context and must only flip flags (the ISR-side
//! entry point is [`ScheduleTable::on_alarm`]).
//!
//! [`ScheduleTable::on_alarm`]: crate::schedule::ScheduleTable::on_alarm

use core::fmt;

use crate::Seconds;

/// Number of hardware comparator channels the node uses.
pub const ALARM_CHANNEL_COUNT: usize = 3;

/// Logical alarm channels, one per periodic activity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AlarmChannel {
    SensorOne,
    SensorTwo,
    Radio,
}

impl AlarmChannel {
    /// Every channel, in index order.
    pub const ALL: [AlarmChannel; ALARM_CHANNEL_COUNT] = [
        AlarmChannel::SensorOne,
        AlarmChannel::SensorTwo,
        AlarmChannel::Radio,
    ];

    /// Deterministic index for table lookups.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            AlarmChannel::SensorOne => 0,
            AlarmChannel::SensorTwo => 1,
            AlarmChannel::Radio => 2,
        }
    }

    /// Attempts to construct a channel from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(AlarmChannel::SensorOne),
            1 => Some(AlarmChannel::SensorTwo),
            2 => Some(AlarmChannel::Radio),
            _ => None,
        }
    }
}

impl fmt::Display for AlarmChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmChannel::SensorOne => f.write_str("sensor-1"),
            AlarmChannel::SensorTwo => f.write_str("sensor-2"),
            AlarmChannel::Radio => f.write_str("radio"),
        }
    }
}

/// Capability trait for the alarm-capable hardware timer.
///
/// `arm` replaces any alarm already outstanding on the channel; `cancel`
/// must be idempotent (safe on a channel with no active alarm).
pub trait AlarmTimer {
    /// Backend-specific failure type.
    type Error;

    /// Timer frequency in ticks per second.
    fn frequency_hz(&self) -> u32;

    /// Highest tick value before the counter wraps.
    fn top_value(&self) -> u32;

    /// Arms a one-shot alarm `ticks` ticks from now on the channel.
    fn arm(&mut self, channel: AlarmChannel, ticks: u32) -> Result<(), Self::Error>;

    /// Cancels the channel's outstanding alarm, if any.
    fn cancel(&mut self, channel: AlarmChannel) -> Result<(), Self::Error>;
}

/// Errors surfaced while arming or canceling alarms.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AlarmError {
    /// The requested interval converts to zero ticks.
    ZeroInterval,
    /// The interval exceeds one counter span.
    ///
    /// Single alarms are deliberately capped below one full rollover;
    /// longer periods must be chunked by the caller.
    IntervalTooLong {
        requested_ticks: u64,
        top_value: u32,
    },
    /// The timer backend rejected the request.
    Timer,
}

impl fmt::Display for AlarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmError::ZeroInterval => f.write_str("alarm interval is zero"),
            AlarmError::IntervalTooLong {
                requested_ticks,
                top_value,
            } => write!(
                f,
                "alarm interval {requested_ticks} ticks exceeds counter top {top_value}"
            ),
            AlarmError::Timer => f.write_str("timer backend fault"),
        }
    }
}

/// Multiplexes logical alarm channels onto the hardware timer.
pub struct AlarmMux<T> {
    timer: T,
}

impl<T> AlarmMux<T>
where
    T: AlarmTimer,
{
    /// Wraps the hardware timer.
    pub const fn new(timer: T) -> Self {
        Self { timer }
    }

    /// Arms a one-shot alarm `seconds` from now on the channel.
    ///
    /// Replaces any alarm already outstanding on the channel. Rejects
    /// intervals longer than one counter span.
    pub fn set_alarm(&mut self, channel: AlarmChannel, seconds: Seconds) -> Result<(), AlarmError> {
        let requested_ticks = u64::from(seconds) * u64::from(self.timer.frequency_hz());
        if requested_ticks == 0 {
            return Err(AlarmError::ZeroInterval);
        }
        let top_value = self.timer.top_value();
        if requested_ticks > u64::from(top_value) {
            return Err(AlarmError::IntervalTooLong {
                requested_ticks,
                top_value,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let ticks = requested_ticks as u32;
        self.timer.arm(channel, ticks).map_err(|_| AlarmError::Timer)
    }

    /// Cancels the channel's outstanding alarm. Idempotent.
    pub fn cancel_alarm(&mut self, channel: AlarmChannel) -> Result<(), AlarmError> {
        self.timer.cancel(channel).map_err(|_| AlarmError::Timer)
    }

    /// Read access to the wrapped timer.
    pub fn timer(&self) -> &T {
        &self.timer
    }
}
