//! Application state machine: Configuration, Running, Error.
//!
//! One `poll` pass runs the current mode's step; the owner sleeps between
//! passes ([`poll_interval_ms`]) and keeps calling for the lifetime of the
//! device. The machine owns per-sensor runtime state and the event ring;
//! configuration and the link session are borrowed each pass so the
//! configuration channel can share them from its own execution context.

use core::fmt;

use embedded_hal::delay::DelayNs;

use crate::Seconds;
use crate::alarm::AlarmTimer;
use crate::clock::{MonotonicClock, TickCounter};
use crate::config::persist::{SettingsKey, SettingsStore, persist_key};
use crate::config::{NodeConfig, SENSOR_SLOT_COUNT, SensorSlot, SupplyVoltage};
use crate::configlink::{LinkSession, ModeRequest};
use crate::events::{EventDetail, EventRecorder, NodeEventKind};
use crate::power::{BatteryMonitor, BatterySnapshot, PowerRail, RailController};
use crate::radio::{JoinError, Radio, join_with_retries};
use crate::schedule::{Rearm, ScheduleError, ScheduleId, Scheduler};
use crate::sensing::{SensorBackend, SensorRuntime, read_sample};
use crate::uplink;

/// Operating modes. There is no terminal state; the device runs until
/// power loss.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeMode {
    Configuration,
    Running,
    Error,
}

impl NodeMode {
    /// Deterministic index for compact encodings.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            NodeMode::Configuration => 0,
            NodeMode::Running => 1,
            NodeMode::Error => 2,
        }
    }

    /// Attempts to construct a mode from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(NodeMode::Configuration),
            1 => Some(NodeMode::Running),
            2 => Some(NodeMode::Error),
            _ => None,
        }
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeMode::Configuration => f.write_str("configuration"),
            NodeMode::Running => f.write_str("running"),
            NodeMode::Error => f.write_str("error"),
        }
    }
}

/// Poll cadence for a mode, in milliseconds.
#[must_use]
pub const fn poll_interval_ms(mode: NodeMode) -> u32 {
    match mode {
        NodeMode::Configuration => 500,
        NodeMode::Running | NodeMode::Error => 1_000,
    }
}

/// Why the running-state entry check failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunningEntryError {
    /// At least one enabled channel violated its invariant and was disabled.
    Misconfigured,
    /// Every sensor slot is disabled.
    NoSensorsEnabled,
    /// The radio could not join within its retry budget.
    Join(JoinError),
    /// A schedule could not be registered.
    Schedule(ScheduleError),
}

impl From<JoinError> for RunningEntryError {
    fn from(value: JoinError) -> Self {
        RunningEntryError::Join(value)
    }
}

impl From<ScheduleError> for RunningEntryError {
    fn from(value: ScheduleError) -> Self {
        RunningEntryError::Schedule(value)
    }
}

impl fmt::Display for RunningEntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningEntryError::Misconfigured => f.write_str("channel misconfigured"),
            RunningEntryError::NoSensorsEnabled => f.write_str("no sensors enabled"),
            RunningEntryError::Join(inner) => write!(f, "{inner}"),
            RunningEntryError::Schedule(inner) => write!(f, "{inner}"),
        }
    }
}

/// Hardware handed to the application loop each pass.
pub struct Peripherals<Ra, Se, Pw, Ba, De>
where
    Pw: PowerRail,
{
    pub radio: Ra,
    pub sensors: Se,
    pub rails: [RailController<Pw>; SENSOR_SLOT_COUNT],
    pub battery: Ba,
    pub delay: De,
}

const fn schedule_for(slot: SensorSlot) -> ScheduleId {
    match slot {
        SensorSlot::One => ScheduleId::SensorOne,
        SensorSlot::Two => ScheduleId::SensorTwo,
    }
}

/// Polls the error state heartbeat roughly once a minute.
const ERROR_HEARTBEAT_POLLS: u32 = 60;

/// The application state machine.
pub struct NodeApp {
    mode: NodeMode,
    runtime: [SensorRuntime; SENSOR_SLOT_COUNT],
    pub events: EventRecorder,
    battery: BatterySnapshot,
    error_polls: u32,
}

impl NodeApp {
    /// Creates the machine in Configuration mode.
    #[must_use]
    pub fn new() -> Self {
        let mut events = EventRecorder::new();
        events.record(NodeEventKind::ModeEntered(NodeMode::Configuration), 0);
        Self {
            mode: NodeMode::Configuration,
            runtime: [SensorRuntime::new(), SensorRuntime::new()],
            events,
            battery: BatterySnapshot::default(),
            error_polls: 0,
        }
    }

    /// Current operating mode.
    #[must_use]
    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    /// Last-known battery telemetry.
    #[must_use]
    pub fn battery(&self) -> BatterySnapshot {
        self.battery
    }

    /// Runtime state for a sensor slot.
    pub fn runtime(&self, slot: SensorSlot) -> &SensorRuntime {
        &self.runtime[slot.as_index()]
    }

    /// Runs one pass of the current mode and returns the (possibly new)
    /// mode so the caller can pick its next sleep interval.
    pub fn poll<C, T, Ra, Se, Pw, Ba, De, St>(
        &mut self,
        config: &mut NodeConfig,
        session: &mut LinkSession,
        store: &mut St,
        clock: &MonotonicClock<'_, C>,
        sched: &mut Scheduler<'_, T>,
        per: &mut Peripherals<Ra, Se, Pw, Ba, De>,
    ) -> NodeMode
    where
        C: TickCounter,
        T: AlarmTimer,
        Ra: Radio,
        Se: SensorBackend,
        Pw: PowerRail,
        Ba: BatteryMonitor,
        De: DelayNs,
        St: SettingsStore,
    {
        let Ok(now) = clock.elapsed_seconds() else {
            // Transient tick-read fault: skip the pass rather than act on a
            // bogus timestamp.
            self.events.record(NodeEventKind::ClockFault, 0);
            return self.mode;
        };

        match self.mode {
            NodeMode::Configuration => {
                self.configuration_step(now, config, session, store, sched, per);
            }
            NodeMode::Running => self.running_step(now, config, session, sched, per),
            NodeMode::Error => self.error_step(now),
        }

        self.mode
    }

    fn enter_mode(&mut self, mode: NodeMode, now: Seconds) {
        self.mode = mode;
        self.error_polls = 0;
        self.events
            .record(NodeEventKind::ModeEntered(mode), now);
    }

    fn configuration_step<T, Ra, Se, Pw, Ba, De, St>(
        &mut self,
        now: Seconds,
        config: &mut NodeConfig,
        session: &mut LinkSession,
        store: &mut St,
        sched: &mut Scheduler<'_, T>,
        per: &mut Peripherals<Ra, Se, Pw, Ba, De>,
    ) where
        T: AlarmTimer,
        Ra: Radio,
        Se: SensorBackend,
        Pw: PowerRail,
        Ba: BatteryMonitor,
        De: DelayNs,
        St: SettingsStore,
    {
        // Technician asked for an early join; keep trying each pass until
        // it succeeds. Failure here is non-fatal.
        if session.join_requested
            && config.radio.enabled
            && !per.radio.is_joined()
            && join_with_retries(
                &mut per.radio,
                config,
                store,
                &mut per.delay,
                &mut self.events,
                now,
            )
            .is_ok()
        {
            session.join_requested = false;
        }

        if let Some(ModeRequest::Running) = session.take_mode_request() {
            self.events.record(NodeEventKind::SetupDone, now);
            match self.enter_running(now, config, store, sched, per) {
                Ok(()) => self.enter_mode(NodeMode::Running, now),
                Err(_) => self.enter_mode(NodeMode::Error, now),
            }
        }
    }

    /// Running-state initialization check and setup.
    fn enter_running<T, Ra, Se, Pw, Ba, De, St>(
        &mut self,
        now: Seconds,
        config: &mut NodeConfig,
        store: &mut St,
        sched: &mut Scheduler<'_, T>,
        per: &mut Peripherals<Ra, Se, Pw, Ba, De>,
    ) -> Result<(), RunningEntryError>
    where
        T: AlarmTimer,
        Ra: Radio,
        Se: SensorBackend,
        Pw: PowerRail,
        Ba: BatteryMonitor,
        De: DelayNs,
        St: SettingsStore,
    {
        // Each channel is checked independently; a violation disables that
        // channel (durably) and fails the whole entry check.
        let mut healthy = true;
        for slot in SensorSlot::ALL {
            if config.sensor_mut(slot).running_check().is_err() {
                self.events.record(NodeEventKind::SensorDisabled(slot), now);
                self.persist_or_record(store, config, SettingsKey::sensor_keys(slot).enabled, now);
                healthy = false;
            }
        }
        if config.radio.running_check().is_err() {
            self.events.record(NodeEventKind::RadioDisabled, now);
            self.persist_or_record(store, config, SettingsKey::RadioEnabled, now);
            healthy = false;
        }
        if !healthy {
            return Err(RunningEntryError::Misconfigured);
        }
        if !config.any_sensor_enabled() {
            return Err(RunningEntryError::NoSensorsEnabled);
        }

        if config.radio.enabled {
            join_with_retries(
                &mut per.radio,
                config,
                store,
                &mut per.delay,
                &mut self.events,
                now,
            )?;
        }

        // One-time triggers make the first sample and report immediate
        // instead of a full period away.
        for slot in SensorSlot::ALL {
            let sensor = config.sensor(slot);
            if sensor.enabled {
                sched.add(schedule_for(slot), sensor.period_seconds(), true, now)?;
            }
        }
        if config.radio.enabled {
            sched.add(ScheduleId::Radio, config.radio.period_seconds(), true, now)?;
        }

        for runtime in &mut self.runtime {
            runtime.reset();
        }
        let _ = self.battery.refresh(&mut per.battery);
        Ok(())
    }

    fn running_step<T, Ra, Se, Pw, Ba, De>(
        &mut self,
        now: Seconds,
        config: &mut NodeConfig,
        session: &mut LinkSession,
        sched: &mut Scheduler<'_, T>,
        per: &mut Peripherals<Ra, Se, Pw, Ba, De>,
    ) where
        T: AlarmTimer,
        Ra: Radio,
        Se: SensorBackend,
        Pw: PowerRail,
        Ba: BatteryMonitor,
        De: DelayNs,
    {
        if let Some(ModeRequest::Configuration) = session.take_mode_request() {
            self.leave_running(now, config, sched, per);
            self.enter_mode(NodeMode::Configuration, now);
            return;
        }

        for slot in SensorSlot::ALL {
            let sensor = *config.sensor(slot);
            if !sensor.enabled {
                continue;
            }
            let id = schedule_for(slot);
            let record = sched.table().slot(id);
            if !(record.take_one_time() || record.is_triggered()) {
                continue;
            }

            match read_sample(
                slot,
                &sensor,
                &mut per.sensors,
                &mut per.rails[slot.as_index()],
                &mut per.delay,
            ) {
                Ok(value) => {
                    self.runtime[slot.as_index()].record(value, now);
                    self.events.record(NodeEventKind::SensorSampled(slot), now);
                }
                Err(_) => {
                    self.events
                        .record(NodeEventKind::SensorReadFailed(slot), now);
                }
            }
            self.rearm(sched, id, now);
        }

        if config.radio.enabled {
            let record = sched.table().slot(ScheduleId::Radio);
            if record.take_one_time() || record.is_triggered() {
                self.rearm(sched, ScheduleId::Radio, now);
                self.transmit_report(now, config, per);
                // Bound memory: drop buffered samples whether or not the
                // transmit went out.
                for runtime in &mut self.runtime {
                    runtime.log.clear();
                }
            }
        }

        for slot in SensorSlot::ALL {
            if config.sensor(slot).enabled {
                self.runtime[slot.as_index()].refresh_age(now);
            }
        }
        let _ = self.battery.refresh(&mut per.battery);
    }

    fn rearm<T>(&mut self, sched: &mut Scheduler<'_, T>, id: ScheduleId, now: Seconds)
    where
        T: AlarmTimer,
    {
        match sched.reset(id, now) {
            Ok(Rearm::PhaseReset { late_by }) => {
                self.events.record_with(
                    NodeEventKind::ScheduleLate(id),
                    EventDetail::LateBy(late_by),
                    now,
                );
            }
            Ok(Rearm::OnPhase { .. } | Rearm::NotTriggered) => {}
            Err(_) => {
                self.events.record(NodeEventKind::ScheduleFault(id), now);
            }
        }
    }

    fn transmit_report<Ra, Se, Pw, Ba, De>(
        &mut self,
        now: Seconds,
        config: &NodeConfig,
        per: &mut Peripherals<Ra, Se, Pw, Ba, De>,
    ) where
        Ra: Radio,
        Pw: PowerRail,
    {
        match uplink::assemble(config, &self.runtime, self.battery, now) {
            Ok(payload) => {
                match per
                    .radio
                    .send(&payload, config.radio.port, config.radio.send_attempts)
                {
                    Ok(()) => {
                        #[allow(clippy::cast_possible_truncation)]
                        let bytes = payload.len() as u16;
                        self.events.record_with(
                            NodeEventKind::UplinkSent,
                            EventDetail::UplinkBytes(bytes),
                            now,
                        );
                    }
                    Err(_) => {
                        self.events.record(NodeEventKind::SendFailed, now);
                    }
                }
            }
            Err(_) => {
                self.events.record(NodeEventKind::SendFailed, now);
            }
        }
    }

    fn leave_running<T, Ra, Se, Pw, Ba, De>(
        &mut self,
        now: Seconds,
        config: &NodeConfig,
        sched: &mut Scheduler<'_, T>,
        per: &mut Peripherals<Ra, Se, Pw, Ba, De>,
    ) where
        T: AlarmTimer,
        Pw: PowerRail,
        De: DelayNs,
    {
        // Teardown failures are reported but never block the transition.
        for slot in SensorSlot::ALL {
            if !config.sensor(slot).enabled {
                continue;
            }
            if per.rails[slot.as_index()]
                .apply(SupplyVoltage::Off, &mut per.delay)
                .is_err()
            {
                self.events.record(NodeEventKind::RailFault(slot), now);
            }
            let id = schedule_for(slot);
            if sched.remove(id).is_err() {
                self.events.record(NodeEventKind::ScheduleFault(id), now);
            }
        }
        if config.radio.enabled && sched.remove(ScheduleId::Radio).is_err() {
            self.events
                .record(NodeEventKind::ScheduleFault(ScheduleId::Radio), now);
        }
    }

    fn error_step(&mut self, now: Seconds) {
        // No recovery path: the node stays here until a power cycle,
        // heartbeating so the log shows it is alive.
        if self.error_polls % ERROR_HEARTBEAT_POLLS == 0 {
            self.events.record(NodeEventKind::Heartbeat, now);
        }
        self.error_polls = self.error_polls.wrapping_add(1);
    }

    fn persist_or_record<St>(
        &mut self,
        store: &mut St,
        config: &NodeConfig,
        key: SettingsKey,
        now: Seconds,
    ) where
        St: SettingsStore,
    {
        if persist_key(store, config, key).is_err() {
            self.events
                .record_with(NodeEventKind::PersistFailed, EventDetail::Key(key), now);
        }
    }
}

impl Default for NodeApp {
    fn default() -> Self {
        Self::new()
    }
}
