//! Simulated hardware shared by the integration suites.
//!
//! One virtual counter backs both the clock and the alarm channels, the
//! same way one hardware timer does on the board. Advancing simulated time
//! fires rollover and alarm hooks exactly as the ISRs would.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use node_core::alarm::{AlarmChannel, AlarmTimer};
use node_core::clock::{RolloverLedger, TickCounter};
use node_core::config::{SensorKind, SensorSlot, SupplyVoltage};
use node_core::power::{BatteryMonitor, PowerRail};
use node_core::radio::{JoinParams, Radio};
use node_core::schedule::ScheduleTable;
use node_core::sensing::SensorBackend;

pub struct SimState {
    ticks: u64,
    frequency: u32,
    top: u32,
    alarms: [Option<u64>; 3],
    running: bool,
}

impl SimState {
    fn span(&self) -> u64 {
        u64::from(self.top) + 1
    }

    fn wrapped_ticks(&self) -> u32 {
        (self.ticks % self.span()) as u32
    }
}

/// Shared handle to the virtual timer.
#[derive(Clone)]
pub struct SimTimer {
    state: Rc<RefCell<SimState>>,
}

impl SimTimer {
    pub fn new(frequency: u32, top: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                ticks: 0,
                frequency,
                top,
                alarms: [None; 3],
                running: false,
            })),
        }
    }

    /// Advances simulated time second by second, firing rollover and alarm
    /// hooks as the hardware would.
    pub fn advance(&self, seconds: u32, table: &ScheduleTable, ledger: &RolloverLedger) {
        for _ in 0..seconds {
            let mut fired = Vec::new();
            let now_seconds;
            {
                let mut state = self.state.borrow_mut();
                let span = state.span();
                let before = state.ticks / span;
                state.ticks += u64::from(state.frequency);
                let after = state.ticks / span;
                for _ in before..after {
                    ledger.note_rollover(state.top, state.frequency);
                }

                let current = state.ticks;
                for (index, deadline) in state.alarms.iter_mut().enumerate() {
                    if let Some(at) = *deadline
                        && at <= current
                    {
                        *deadline = None;
                        fired.push(AlarmChannel::from_index(index).unwrap());
                    }
                }
                now_seconds =
                    ledger.seconds() + state.wrapped_ticks() / state.frequency;
            }
            for channel in fired {
                table.on_alarm(channel, now_seconds);
            }
        }
    }

    pub fn armed(&self, channel: AlarmChannel) -> bool {
        self.state.borrow().alarms[channel.as_index()].is_some()
    }
}

impl TickCounter for SimTimer {
    type Error = ();

    fn frequency_hz(&self) -> u32 {
        self.state.borrow().frequency
    }

    fn top_value(&self) -> u32 {
        self.state.borrow().top
    }

    fn now_ticks(&self) -> Result<u32, ()> {
        let state = self.state.borrow();
        if state.running {
            Ok(state.wrapped_ticks())
        } else {
            Err(())
        }
    }

    fn start(&mut self) -> Result<(), ()> {
        self.state.borrow_mut().running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ()> {
        self.state.borrow_mut().running = false;
        Ok(())
    }
}

impl AlarmTimer for SimTimer {
    type Error = ();

    fn frequency_hz(&self) -> u32 {
        self.state.borrow().frequency
    }

    fn top_value(&self) -> u32 {
        self.state.borrow().top
    }

    fn arm(&mut self, channel: AlarmChannel, ticks: u32) -> Result<(), ()> {
        let mut state = self.state.borrow_mut();
        let deadline = state.ticks + u64::from(ticks);
        state.alarms[channel.as_index()] = Some(deadline);
        Ok(())
    }

    fn cancel(&mut self, channel: AlarmChannel) -> Result<(), ()> {
        self.state.borrow_mut().alarms[channel.as_index()] = None;
        Ok(())
    }
}

/// Radio fake with a scriptable join failure budget.
pub struct FakeRadio {
    pub joined: bool,
    pub fail_joins: u8,
    pub fail_sends: bool,
    pub join_nonces: Vec<u16>,
    pub sent: Vec<Vec<u8>>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self {
            joined: false,
            fail_joins: 0,
            fail_sends: false,
            join_nonces: Vec::new(),
            sent: Vec::new(),
        }
    }
}

impl Default for FakeRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for FakeRadio {
    type Error = ();

    fn is_joined(&self) -> bool {
        self.joined
    }

    fn join(&mut self, _params: &JoinParams, dev_nonce: u16) -> Result<(), ()> {
        self.join_nonces.push(dev_nonce);
        if self.fail_joins > 0 {
            self.fail_joins -= 1;
            return Err(());
        }
        self.joined = true;
        Ok(())
    }

    fn send(&mut self, payload: &[u8], _port: u8, _confirm_attempts: u8) -> Result<(), ()> {
        if self.fail_sends {
            return Err(());
        }
        self.sent.push(payload.to_vec());
        Ok(())
    }
}

/// Sensor fake returning a deterministic ramp per slot.
pub struct FakeSensors {
    pub reads: Vec<(SensorSlot, SensorKind)>,
    pub next_value: i32,
}

impl FakeSensors {
    pub fn new() -> Self {
        Self {
            reads: Vec::new(),
            next_value: 100,
        }
    }
}

impl Default for FakeSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBackend for FakeSensors {
    type Error = ();

    fn sample(&mut self, slot: SensorSlot, kind: SensorKind) -> Result<i32, ()> {
        self.reads.push((slot, kind));
        let value = self.next_value;
        self.next_value += 1;
        Ok(value)
    }
}

/// Shared view of a [`RecordingRail`]'s level transitions.
pub type LevelLog = Rc<RefCell<Vec<SupplyVoltage>>>;

/// Rail fake recording every level transition.
pub struct RecordingRail {
    pub levels: LevelLog,
}

impl RecordingRail {
    pub fn new() -> (Self, LevelLog) {
        let levels = LevelLog::default();
        (
            Self {
                levels: levels.clone(),
            },
            levels,
        )
    }
}

impl PowerRail for RecordingRail {
    type Error = ();

    fn set_level(&mut self, level: SupplyVoltage) -> Result<(), ()> {
        self.levels.borrow_mut().push(level);
        Ok(())
    }

    fn read_millivolts(&mut self) -> Result<u32, ()> {
        Ok(self
            .levels
            .borrow()
            .last()
            .copied()
            .unwrap_or(SupplyVoltage::Off)
            .millivolts())
    }
}

/// Battery fake with fixed telemetry.
pub struct FakeBattery;

impl BatteryMonitor for FakeBattery {
    type Error = ();

    fn battery_millivolts(&mut self) -> Result<u16, ()> {
        Ok(3_700)
    }

    fn temperature_decidegrees(&mut self) -> Result<i16, ()> {
        Ok(215)
    }
}
