//! Emulator session: simulated hardware plus the console dispatcher.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use node_core::alarm::{AlarmChannel, AlarmTimer};
use node_core::app::{NodeApp, Peripherals};
use node_core::clock::{MonotonicClock, RolloverLedger, TickCounter};
use node_core::config::persist::{MemoryStore, load_config};
use node_core::config::{NodeConfig, SensorKind, SensorSlot, SupplyVoltage};
use node_core::configlink::{self, AttributeId, LinkSession, ModeRequest};
use node_core::console::{ConsoleCommand, HELP_TOPICS, parse_line};
use node_core::power::{BatteryMonitor, NoopDelay, PowerRail, RailController};
use node_core::radio::{JoinParams, Radio};
use node_core::schedule::{ScheduleTable, Scheduler};
use node_core::sensing::SensorBackend;

/// Counter parameters shared by the virtual timer: 1 kHz ticks with a
/// full-scale 32-bit span.
const SIM_FREQUENCY_HZ: u32 = 1_000;
const SIM_TOP: u32 = u32::MAX;

struct SimState {
    ticks: u64,
    alarms: [Option<u64>; 3],
    running: bool,
}

/// Virtual counter backing both the clock and the alarm channels.
#[derive(Clone)]
pub struct SimTimer {
    state: Rc<RefCell<SimState>>,
}

impl SimTimer {
    fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                ticks: 0,
                alarms: [None; 3],
                running: false,
            })),
        }
    }

    fn span() -> u64 {
        u64::from(SIM_TOP) + 1
    }

    /// Advances one simulated second, firing hooks as the ISRs would.
    fn step(&self, table: &ScheduleTable, ledger: &RolloverLedger) {
        let mut fired = Vec::new();
        let now_seconds;
        {
            let mut state = self.state.borrow_mut();
            let before = state.ticks / Self::span();
            state.ticks += u64::from(SIM_FREQUENCY_HZ);
            let after = state.ticks / Self::span();
            for _ in before..after {
                ledger.note_rollover(SIM_TOP, SIM_FREQUENCY_HZ);
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
            let wrapped = (state.ticks % Self::span()) as u32;
            now_seconds = ledger.seconds() + wrapped / SIM_FREQUENCY_HZ;
        }
        for channel in fired {
            table.on_alarm(channel, now_seconds);
        }
    }
}

impl TickCounter for SimTimer {
    type Error = ();

    fn frequency_hz(&self) -> u32 {
        SIM_FREQUENCY_HZ
    }

    fn top_value(&self) -> u32 {
        SIM_TOP
    }

    fn now_ticks(&self) -> Result<u32, ()> {
        let state = self.state.borrow();
        if state.running {
            Ok((state.ticks % Self::span()) as u32)
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
        SIM_FREQUENCY_HZ
    }

    fn top_value(&self) -> u32 {
        SIM_TOP
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

/// Radio fake: joins immediately, remembers what it sent.
struct SimRadio {
    joined: bool,
    uplinks: usize,
    last_uplink_bytes: usize,
}

impl Radio for SimRadio {
    type Error = ();

    fn is_joined(&self) -> bool {
        self.joined
    }

    fn join(&mut self, _params: &JoinParams, _dev_nonce: u16) -> Result<(), ()> {
        self.joined = true;
        Ok(())
    }

    fn send(&mut self, payload: &[u8], _port: u8, _confirm_attempts: u8) -> Result<(), ()> {
        self.uplinks += 1;
        self.last_uplink_bytes = payload.len();
        Ok(())
    }
}

/// Sensor fake: a deterministic ramp so transcripts are reproducible.
struct SimSensors {
    next_value: i32,
}

impl SensorBackend for SimSensors {
    type Error = ();

    fn sample(&mut self, _slot: SensorSlot, _kind: SensorKind) -> Result<i32, ()> {
        let value = self.next_value;
        self.next_value += 7;
        Ok(value)
    }
}

/// Rail fake reading back the nominal level.
struct SimRail {
    level: SupplyVoltage,
}

impl PowerRail for SimRail {
    type Error = ();

    fn set_level(&mut self, level: SupplyVoltage) -> Result<(), ()> {
        self.level = level;
        Ok(())
    }

    fn read_millivolts(&mut self) -> Result<u32, ()> {
        Ok(self.level.millivolts())
    }
}

struct SimBattery;

impl BatteryMonitor for SimBattery {
    type Error = ();

    fn battery_millivolts(&mut self) -> Result<u16, ()> {
        Ok(3_642)
    }

    fn temperature_decidegrees(&mut self) -> Result<i16, ()> {
        Ok(208)
    }
}

struct TranscriptLogger {
    writer: BufWriter<File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# field node emulator transcript")?;
        Ok(Self { writer })
    }

    fn append(&mut self, elapsed: u32, role: &str, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[{elapsed:>6}s] {role} {line}")?;
        self.writer.flush()
    }
}

type SimPeripherals = Peripherals<SimRadio, SimSensors, SimRail, SimBattery, NoopDelay>;

/// One emulator session holding the full core stack.
pub struct Session {
    timer: SimTimer,
    ledger: &'static RolloverLedger,
    table: &'static ScheduleTable,
    clock: MonotonicClock<'static, SimTimer>,
    sched: Scheduler<'static, SimTimer>,
    app: NodeApp,
    config: NodeConfig,
    session: LinkSession,
    store: MemoryStore,
    per: SimPeripherals,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(transcript: Option<PathBuf>) -> io::Result<Self> {
        let timer = SimTimer::new();
        let ledger: &'static RolloverLedger = Box::leak(Box::new(RolloverLedger::new()));
        let table: &'static ScheduleTable = Box::leak(Box::new(ScheduleTable::new()));
        let clock =
            MonotonicClock::new(timer.clone(), ledger).expect("virtual counter always starts");
        let sched = Scheduler::new(table, timer.clone());

        let mut store = MemoryStore::new();
        let config = load_config(&mut store).expect("in-memory store never fails");

        let transcript = match transcript {
            Some(path) => Some(TranscriptLogger::new(&path)?),
            None => None,
        };

        Ok(Self {
            timer,
            ledger,
            table,
            clock,
            sched,
            app: NodeApp::new(),
            config,
            session: LinkSession::new(),
            store,
            per: Peripherals {
                radio: SimRadio {
                    joined: false,
                    uplinks: 0,
                    last_uplink_bytes: 0,
                },
                sensors: SimSensors { next_value: 100 },
                rails: [
                    RailController::new(SimRail {
                        level: SupplyVoltage::Off,
                    }),
                    RailController::new(SimRail {
                        level: SupplyVoltage::Off,
                    }),
                ],
                battery: SimBattery,
                delay: NoopDelay,
            },
            transcript,
        })
    }

    fn elapsed(&self) -> u32 {
        self.clock.elapsed_seconds().unwrap_or(0)
    }

    fn poll_once(&mut self) {
        self.app.poll(
            &mut self.config,
            &mut self.session,
            &mut self.store,
            &self.clock,
            &mut self.sched,
            &mut self.per,
        );
    }

    /// Parses and executes one console line, returning the lines to print.
    pub fn handle_line(&mut self, line: &str) -> io::Result<Vec<String>> {
        let elapsed = self.elapsed();
        if let Some(transcript) = &mut self.transcript {
            transcript.append(elapsed, ">", line)?;
        }

        let output = match parse_line(line) {
            Ok(command) => self.execute(command),
            Err(error) => vec![format!("error: {error}")],
        };

        let elapsed = self.elapsed();
        if let Some(transcript) = &mut self.transcript {
            for entry in &output {
                transcript.append(elapsed, "<", entry)?;
            }
        }
        Ok(output)
    }

    fn execute(&mut self, command: ConsoleCommand) -> Vec<String> {
        match command {
            ConsoleCommand::Status => self.status_lines(),
            ConsoleCommand::Events => self.event_lines(),
            ConsoleCommand::Help => HELP_TOPICS
                .iter()
                .map(|(_, text)| (*text).to_string())
                .collect(),
            ConsoleCommand::Advance { seconds } => {
                for _ in 0..seconds {
                    self.timer.step(self.table, self.ledger);
                    self.poll_once();
                }
                vec![format!(
                    "advanced {seconds}s (t={}s, mode={})",
                    self.elapsed(),
                    self.app.mode()
                )]
            }
            ConsoleCommand::Mode(request) => {
                let value = match request {
                    ModeRequest::Configuration => 0,
                    ModeRequest::Running => 1,
                };
                self.apply_write(AttributeId::Mode, &[value])
            }
            ConsoleCommand::SensorEnable { slot, enabled } => {
                self.apply_write(AttributeId::SensorEnabled(slot), &[u8::from(enabled)])
            }
            ConsoleCommand::SensorType { slot, kind } => {
                let name = kind.name().as_bytes().to_vec();
                self.apply_write(AttributeId::SensorTypeName(slot), &name)
            }
            ConsoleCommand::SensorVoltage { slot, supply } => {
                let name = supply.name().as_bytes().to_vec();
                self.apply_write(AttributeId::SensorVoltageName(slot), &name)
            }
            ConsoleCommand::SensorPeriod { slot, minutes } => {
                self.apply_write(AttributeId::SensorPeriodMinutes(slot), &minutes.to_be_bytes())
            }
            ConsoleCommand::RadioEnable(enabled) => {
                self.apply_write(AttributeId::RadioEnabled, &[u8::from(enabled)])
            }
            ConsoleCommand::RadioPeriod { minutes } => {
                self.apply_write(AttributeId::RadioPeriodMinutes, &minutes.to_be_bytes())
            }
        }
    }

    /// Routes a configuration change through the link boundary, then runs
    /// one poll pass so mode requests take effect immediately.
    fn apply_write(&mut self, attribute: AttributeId, data: &[u8]) -> Vec<String> {
        let result = configlink::write_attribute(
            attribute,
            0,
            data,
            &mut self.config,
            &mut self.session,
            &mut self.store,
        );
        match result {
            Ok(ack) => {
                self.poll_once();
                let mut lines = vec![format!("ok (mode={})", self.app.mode())];
                if !ack.persisted {
                    lines.push("warning: change not persisted".to_string());
                }
                lines
            }
            Err(error) => vec![format!("rejected: {error}")],
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "mode={} t={}s battery={}mV",
            self.app.mode(),
            self.elapsed(),
            self.app.battery().millivolts
        )];

        for slot in SensorSlot::ALL {
            let sensor = self.config.sensor(slot);
            let runtime = self.app.runtime(slot);
            if sensor.enabled {
                let latest = runtime
                    .latest
                    .map_or_else(|| "none".to_string(), |record| record.value.to_string());
                lines.push(format!(
                    "sensor {slot}: {} {} period={}m latest={} age={}s buffered={}",
                    sensor.kind.name(),
                    sensor.supply.name(),
                    sensor.period_minutes,
                    latest,
                    runtime.age_seconds,
                    runtime.log.len(),
                ));
            } else {
                lines.push(format!("sensor {slot}: disabled"));
            }
        }

        let radio = &self.config.radio;
        if radio.enabled {
            lines.push(format!(
                "radio: enabled period={}m joined={} uplinks={} last={}B nonce={}",
                radio.period_minutes,
                self.per.radio.joined,
                self.per.radio.uplinks,
                self.per.radio.last_uplink_bytes,
                radio.dev_nonce,
            ));
        } else {
            lines.push("radio: disabled".to_string());
        }
        lines
    }

    fn event_lines(&self) -> Vec<String> {
        if self.app.events.is_empty() {
            return vec!["no events recorded".to_string()];
        }
        self.app
            .events
            .oldest_first()
            .map(|event| format!("[{:>6}s] #{} {}", event.at, event.id, event.kind))
            .collect()
    }
}
