//! Schedule registry: per-activity periodic records over the alarm mux.
//!
//! Each schedule record moves through Unregistered → Armed → Triggered →
//! Armed, with Unregistered reachable from any state via removal. The
//! ISR-facing fields (`triggered`, `last_event_seconds`) are atomics with a
//! single-writer discipline: the alarm ISR sets them, the polling context
//! clears them. Re-arming is anchored to the last absolute event time so
//! user-configured periods do not drift over weeks of uptime.

use core::fmt;

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::Seconds;
use crate::alarm::{AlarmChannel, AlarmError, AlarmMux, AlarmTimer};

/// Number of schedule records the node carries.
pub const SCHEDULE_COUNT: usize = 3;

/// Stable identifier for each periodic activity.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScheduleId {
    SensorOne,
    SensorTwo,
    Radio,
}

impl ScheduleId {
    /// Every schedule id, in index order.
    pub const ALL: [ScheduleId; SCHEDULE_COUNT] =
        [ScheduleId::SensorOne, ScheduleId::SensorTwo, ScheduleId::Radio];

    /// Deterministic index into the schedule table.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            ScheduleId::SensorOne => 0,
            ScheduleId::SensorTwo => 1,
            ScheduleId::Radio => 2,
        }
    }

    /// The hardware alarm channel backing this schedule.
    ///
    /// The allocation is deliberately 1:1; sharing one channel between
    /// schedules with a common period is not supported.
    #[must_use]
    pub const fn channel(self) -> AlarmChannel {
        match self {
            ScheduleId::SensorOne => AlarmChannel::SensorOne,
            ScheduleId::SensorTwo => AlarmChannel::SensorTwo,
            ScheduleId::Radio => AlarmChannel::Radio,
        }
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleId::SensorOne => f.write_str("sensor-1"),
            ScheduleId::SensorTwo => f.write_str("sensor-2"),
            ScheduleId::Radio => f.write_str("radio"),
        }
    }
}

/// One periodic activity record.
///
/// `triggered` and `last_event_seconds` are written by the alarm ISR and
/// cleared by the polling context; everything else is touched only by the
/// polling context.
pub struct ScheduleSlot {
    period_seconds: AtomicU32,
    scheduled: AtomicBool,
    triggered: AtomicBool,
    last_event_seconds: AtomicU32,
    one_time: AtomicBool,
}

impl ScheduleSlot {
    const fn new() -> Self {
        Self {
            period_seconds: AtomicU32::new(0),
            scheduled: AtomicBool::new(false),
            triggered: AtomicBool::new(false),
            last_event_seconds: AtomicU32::new(0),
            one_time: AtomicBool::new(false),
        }
    }

    /// Configured period in seconds; zero while unregistered.
    pub fn period_seconds(&self) -> Seconds {
        self.period_seconds.load(Ordering::Relaxed)
    }

    /// Whether a hardware alarm is currently armed for this record.
    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Whether the alarm has fired since the last reset.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Absolute clock seconds at the most recent trigger.
    pub fn last_event_seconds(&self) -> Seconds {
        self.last_event_seconds.load(Ordering::Acquire)
    }

    /// Whether an immediate first execution is pending.
    pub fn one_time_pending(&self) -> bool {
        self.one_time.load(Ordering::Relaxed)
    }

    /// Consumes the one-time trigger, returning whether it was pending.
    pub fn take_one_time(&self) -> bool {
        self.one_time.swap(false, Ordering::Relaxed)
    }
}

/// Fixed arena of schedule records, one per [`ScheduleId`].
///
/// Created by the application owner and shared by reference with the alarm
/// ISR context; multiple independent tables can coexist in tests.
pub struct ScheduleTable {
    slots: [ScheduleSlot; SCHEDULE_COUNT],
}

impl ScheduleTable {
    /// Creates a table with every record unregistered.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [ScheduleSlot::new(), ScheduleSlot::new(), ScheduleSlot::new()],
        }
    }

    /// The record for the given id.
    pub fn slot(&self, id: ScheduleId) -> &ScheduleSlot {
        &self.slots[id.as_index()]
    }

    /// ISR-side alarm fire handler.
    ///
    /// Marks every registered record mapped to the fired channel as
    /// triggered and stamps the absolute event time. Touches only atomics;
    /// never performs I/O.
    pub fn on_alarm(&self, channel: AlarmChannel, now: Seconds) {
        for id in ScheduleId::ALL {
            if id.channel() != channel {
                continue;
            }
            let slot = self.slot(id);
            if slot.scheduled.load(Ordering::Relaxed) {
                slot.last_event_seconds.store(now, Ordering::Release);
                slot.triggered.store(true, Ordering::Release);
            }
        }
    }
}

impl Default for ScheduleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// How a [`Scheduler::reset`] call re-armed the record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Rearm {
    /// The record was not triggered; nothing was armed.
    NotTriggered,
    /// Re-armed for the remainder of the period (phase preserved).
    OnPhase { delay: Seconds },
    /// The deadline was missed; re-armed a full period from now.
    PhaseReset { late_by: Seconds },
}

/// Errors surfaced by schedule registry operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScheduleError {
    /// A zero period means "inactive"; such records are never registered.
    ZeroPeriod,
    /// The alarm multiplexer rejected the request.
    Alarm(AlarmError),
}

impl From<AlarmError> for ScheduleError {
    fn from(value: AlarmError) -> Self {
        ScheduleError::Alarm(value)
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleError::ZeroPeriod => f.write_str("schedule period is zero"),
            ScheduleError::Alarm(inner) => write!(f, "alarm: {inner}"),
        }
    }
}

/// Polling-context owner of the schedule records.
pub struct Scheduler<'t, T> {
    table: &'t ScheduleTable,
    mux: AlarmMux<T>,
}

impl<'t, T> Scheduler<'t, T>
where
    T: AlarmTimer,
{
    /// Binds the record table to the alarm timer.
    pub const fn new(table: &'t ScheduleTable, timer: T) -> Self {
        Self {
            table,
            mux: AlarmMux::new(timer),
        }
    }

    /// The shared record table.
    #[must_use]
    pub fn table(&self) -> &'t ScheduleTable {
        self.table
    }

    /// Registers a record: Unregistered → Armed.
    ///
    /// Arms the backing channel for one full period. With `one_time` set the
    /// owner executes the activity immediately instead of waiting out the
    /// first period; the armed alarm then provides the second execution.
    pub fn add(
        &mut self,
        id: ScheduleId,
        period_seconds: Seconds,
        one_time: bool,
        now: Seconds,
    ) -> Result<(), ScheduleError> {
        if period_seconds == 0 {
            return Err(ScheduleError::ZeroPeriod);
        }

        let slot = self.table.slot(id);
        slot.period_seconds.store(period_seconds, Ordering::Relaxed);
        slot.triggered.store(false, Ordering::Release);
        slot.last_event_seconds.store(now, Ordering::Release);
        slot.one_time.store(one_time, Ordering::Relaxed);

        self.mux.set_alarm(id.channel(), period_seconds)?;
        slot.scheduled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Consumes a trigger and re-arms: Triggered → Armed.
    ///
    /// A record that is not triggered is left untouched (`NotTriggered`),
    /// so a stray call can never arm a duplicate alarm. Otherwise the next
    /// alarm is anchored to the last event time: a consumer that handled the
    /// trigger within the period keeps its phase; one that overran it (for
    /// example blocked on a slow radio send) restarts the period from now.
    pub fn reset(&mut self, id: ScheduleId, now: Seconds) -> Result<Rearm, ScheduleError> {
        let slot = self.table.slot(id);
        if !slot.is_triggered() {
            return Ok(Rearm::NotTriggered);
        }

        let period = slot.period_seconds();
        if period == 0 {
            return Err(ScheduleError::ZeroPeriod);
        }
        let elapsed = now.saturating_sub(slot.last_event_seconds());
        slot.triggered.store(false, Ordering::Release);

        if elapsed < period {
            let delay = period - elapsed;
            self.mux.set_alarm(id.channel(), delay)?;
            Ok(Rearm::OnPhase { delay })
        } else {
            self.mux.set_alarm(id.channel(), period)?;
            Ok(Rearm::PhaseReset {
                late_by: elapsed - period,
            })
        }
    }

    /// Unregisters a record from any state.
    ///
    /// Cancels the backing alarm and clears the flags; the record stays in
    /// the table and can be re-added later.
    pub fn remove(&mut self, id: ScheduleId) -> Result<(), ScheduleError> {
        self.mux.cancel_alarm(id.channel())?;
        let slot = self.table.slot(id);
        slot.scheduled.store(false, Ordering::Relaxed);
        slot.triggered.store(false, Ordering::Release);
        slot.one_time.store(false, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum Call {
        Arm(AlarmChannel, u32),
        Cancel(AlarmChannel),
    }

    struct FakeTimer {
        calls: Vec<Call, 16>,
    }

    impl FakeTimer {
        fn new() -> Self {
            Self { calls: Vec::new() }
        }
    }

    impl AlarmTimer for FakeTimer {
        type Error = ();

        fn frequency_hz(&self) -> u32 {
            1
        }

        fn top_value(&self) -> u32 {
            u32::MAX
        }

        fn arm(&mut self, channel: AlarmChannel, ticks: u32) -> Result<(), ()> {
            self.calls.push(Call::Arm(channel, ticks)).map_err(|_| ())
        }

        fn cancel(&mut self, channel: AlarmChannel) -> Result<(), ()> {
            self.calls.push(Call::Cancel(channel)).map_err(|_| ())
        }
    }

    fn arm_calls(sched: &Scheduler<'_, FakeTimer>) -> usize {
        sched
            .mux
            .timer()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Arm(_, _)))
            .count()
    }

    #[test]
    fn add_arms_one_full_period() {
        let table = ScheduleTable::new();
        let mut sched = Scheduler::new(&table, FakeTimer::new());

        sched.add(ScheduleId::SensorOne, 10, true, 0).unwrap();

        let slot = table.slot(ScheduleId::SensorOne);
        assert!(slot.is_scheduled());
        assert!(slot.one_time_pending());
        assert!(!slot.is_triggered());
        assert_eq!(
            sched.mux.timer().calls[0],
            Call::Arm(AlarmChannel::SensorOne, 10)
        );
    }

    #[test]
    fn add_rejects_zero_period() {
        let table = ScheduleTable::new();
        let mut sched = Scheduler::new(&table, FakeTimer::new());
        assert_eq!(
            sched.add(ScheduleId::Radio, 0, false, 0),
            Err(ScheduleError::ZeroPeriod)
        );
        assert!(!table.slot(ScheduleId::Radio).is_scheduled());
    }

    #[test]
    fn alarm_fire_marks_matching_slot() {
        let table = ScheduleTable::new();
        let mut sched = Scheduler::new(&table, FakeTimer::new());
        sched.add(ScheduleId::SensorOne, 10, false, 0).unwrap();

        table.on_alarm(AlarmChannel::SensorOne, 10);

        let slot = table.slot(ScheduleId::SensorOne);
        assert!(slot.is_triggered());
        assert_eq!(slot.last_event_seconds(), 10);
        assert!(!table.slot(ScheduleId::SensorTwo).is_triggered());
    }

    #[test]
    fn alarm_fire_ignores_unregistered_slot() {
        let table = ScheduleTable::new();
        table.on_alarm(AlarmChannel::Radio, 5);
        assert!(!table.slot(ScheduleId::Radio).is_triggered());
    }

    #[test]
    fn reset_preserves_phase_when_on_time() {
        let table = ScheduleTable::new();
        let mut sched = Scheduler::new(&table, FakeTimer::new());
        sched.add(ScheduleId::SensorTwo, 10, false, 0).unwrap();

        table.on_alarm(AlarmChannel::SensorTwo, 10);
        // Consumer handles the trigger 3 s late within the period.
        let rearm = sched.reset(ScheduleId::SensorTwo, 13).unwrap();

        assert_eq!(rearm, Rearm::OnPhase { delay: 7 });
        assert!(!table.slot(ScheduleId::SensorTwo).is_triggered());
        assert_eq!(
            *sched.mux.timer().calls.last().unwrap(),
            Call::Arm(AlarmChannel::SensorTwo, 7)
        );
    }

    #[test]
    fn reset_restarts_period_after_missed_deadline() {
        let table = ScheduleTable::new();
        let mut sched = Scheduler::new(&table, FakeTimer::new());
        sched.add(ScheduleId::Radio, 10, false, 0).unwrap();

        table.on_alarm(AlarmChannel::Radio, 10);
        // Consumer was blocked for 14 s; phase is abandoned.
        let rearm = sched.reset(ScheduleId::Radio, 24).unwrap();

        assert_eq!(rearm, Rearm::PhaseReset { late_by: 4 });
        assert_eq!(
            *sched.mux.timer().calls.last().unwrap(),
            Call::Arm(AlarmChannel::Radio, 10)
        );
    }

    #[test]
    fn reset_of_untriggered_slot_is_a_noop() {
        let table = ScheduleTable::new();
        let mut sched = Scheduler::new(&table, FakeTimer::new());
        sched.add(ScheduleId::SensorOne, 10, false, 0).unwrap();
        let armed_before = arm_calls(&sched);

        let rearm = sched.reset(ScheduleId::SensorOne, 5).unwrap();

        assert_eq!(rearm, Rearm::NotTriggered);
        assert_eq!(arm_calls(&sched), armed_before);
    }

    #[test]
    fn remove_cancels_and_clears() {
        let table = ScheduleTable::new();
        let mut sched = Scheduler::new(&table, FakeTimer::new());
        sched.add(ScheduleId::SensorOne, 10, true, 0).unwrap();
        table.on_alarm(AlarmChannel::SensorOne, 10);

        sched.remove(ScheduleId::SensorOne).unwrap();

        let slot = table.slot(ScheduleId::SensorOne);
        assert!(!slot.is_scheduled());
        assert!(!slot.is_triggered());
        assert!(!slot.one_time_pending());
        assert_eq!(
            *sched.mux.timer().calls.last().unwrap(),
            Call::Cancel(AlarmChannel::SensorOne)
        );

        // The record is reusable after removal.
        sched.add(ScheduleId::SensorOne, 20, false, 30).unwrap();
        assert!(table.slot(ScheduleId::SensorOne).is_scheduled());
    }
}
