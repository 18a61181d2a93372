//! Application state machine scenarios over simulated hardware.

mod support;

use node_core::alarm::AlarmChannel;
use node_core::app::{NodeApp, NodeMode, Peripherals};
use node_core::clock::{MonotonicClock, RolloverLedger};
use node_core::config::persist::{MemoryStore, load_config};
use node_core::config::{NodeConfig, SensorKind, SensorSlot, SupplyVoltage};
use node_core::configlink::{AttributeId, LinkSession, write_attribute};
use node_core::events::NodeEventKind;
use node_core::power::{NoopDelay, RailController};
use node_core::radio::Radio;
use node_core::schedule::{ScheduleTable, Scheduler};
use support::{FakeBattery, FakeRadio, FakeSensors, LevelLog, RecordingRail, SimTimer};

type TestPeripherals = Peripherals<FakeRadio, FakeSensors, RecordingRail, FakeBattery, NoopDelay>;

struct Harness {
    timer: SimTimer,
    ledger: &'static RolloverLedger,
    table: &'static ScheduleTable,
    clock: MonotonicClock<'static, SimTimer>,
    sched: Scheduler<'static, SimTimer>,
    app: NodeApp,
    config: NodeConfig,
    session: LinkSession,
    store: MemoryStore,
    per: TestPeripherals,
    rail_levels: [LevelLog; 2],
}

impl Harness {
    fn new() -> Self {
        let timer = SimTimer::new(1_000, u32::MAX);
        let ledger: &'static RolloverLedger = Box::leak(Box::new(RolloverLedger::new()));
        let table: &'static ScheduleTable = Box::leak(Box::new(ScheduleTable::new()));
        let clock = MonotonicClock::new(timer.clone(), ledger).unwrap();
        let sched = Scheduler::new(table, timer.clone());

        let (rail1, levels1) = RecordingRail::new();
        let (rail2, levels2) = RecordingRail::new();
        let mut store = MemoryStore::new();
        let config = load_config(&mut store).unwrap();

        Self {
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
                radio: FakeRadio::new(),
                sensors: FakeSensors::new(),
                rails: [RailController::new(rail1), RailController::new(rail2)],
                battery: FakeBattery,
                delay: NoopDelay,
            },
            rail_levels: [levels1, levels2],
        }
    }

    fn poll(&mut self) -> NodeMode {
        self.app.poll(
            &mut self.config,
            &mut self.session,
            &mut self.store,
            &self.clock,
            &mut self.sched,
            &mut self.per,
        )
    }

    fn advance(&mut self, seconds: u32) {
        self.timer.advance(seconds, self.table, self.ledger);
    }

    fn request_running(&mut self) {
        write_attribute(
            AttributeId::Mode,
            0,
            &[1],
            &mut self.config,
            &mut self.session,
            &mut self.store,
        )
        .unwrap();
    }

    fn event_kinds(&self) -> Vec<NodeEventKind> {
        self.app.events.oldest_first().map(|event| event.kind).collect()
    }
}

fn enable_pulse_sensor(config: &mut NodeConfig, slot: SensorSlot, minutes: u16) {
    let sensor = config.sensor_mut(slot);
    sensor.enabled = true;
    sensor.kind = SensorKind::Pulse;
    sensor.period_minutes = minutes;
}

#[test]
fn misconfigured_sensor_disables_channel_and_escalates() {
    let mut harness = Harness::new();
    let sensor = harness.config.sensor_mut(SensorSlot::One);
    sensor.enabled = true;
    sensor.kind = SensorKind::None;
    sensor.period_minutes = 10;

    harness.request_running();
    assert_eq!(harness.poll(), NodeMode::Error);

    assert!(!harness.config.sensor(SensorSlot::One).enabled);
    assert!(harness
        .event_kinds()
        .contains(&NodeEventKind::SensorDisabled(SensorSlot::One)));

    // The self-heal is durable.
    let reloaded = load_config(&mut harness.store).unwrap();
    assert!(!reloaded.sensor(SensorSlot::One).enabled);
}

#[test]
fn no_enabled_sensors_fails_without_touching_the_radio() {
    let mut harness = Harness::new();
    harness.config.radio.enabled = true;
    harness.config.radio.period_minutes = 60;

    harness.request_running();
    assert_eq!(harness.poll(), NodeMode::Error);

    assert!(harness.per.radio.join_nonces.is_empty());
    assert!(!harness.timer.armed(AlarmChannel::Radio));
}

#[test]
fn first_sample_and_report_happen_immediately() {
    let mut harness = Harness::new();
    enable_pulse_sensor(&mut harness.config, SensorSlot::One, 1);
    harness.config.radio.enabled = true;
    harness.config.radio.period_minutes = 1;
    harness.config.radio.join_attempts = 2;

    harness.request_running();
    assert_eq!(harness.poll(), NodeMode::Running);
    assert!(harness.per.radio.is_joined());

    // One-time triggers fire on the first running pass, no period wait.
    assert_eq!(harness.poll(), NodeMode::Running);
    assert_eq!(harness.per.sensors.reads.len(), 1);
    assert_eq!(harness.per.radio.sent.len(), 1);

    // Sample logs are drained by the report.
    assert!(harness.app.runtime(SensorSlot::One).log.is_empty());

    // The next period fires on schedule.
    harness.advance(60);
    assert_eq!(harness.poll(), NodeMode::Running);
    assert_eq!(harness.per.sensors.reads.len(), 2);
    assert_eq!(harness.per.radio.sent.len(), 2);

    // The second report carries exactly the one fresh sample.
    let report = harness.per.radio.sent.last().unwrap();
    let count_offset = 13 + 5;
    assert_eq!(report[count_offset], 1);
}

#[test]
fn join_exhaustion_escalates_to_error() {
    let mut harness = Harness::new();
    enable_pulse_sensor(&mut harness.config, SensorSlot::One, 1);
    harness.config.radio.enabled = true;
    harness.config.radio.join_attempts = 3;
    harness.per.radio.fail_joins = u8::MAX;

    harness.request_running();
    assert_eq!(harness.poll(), NodeMode::Error);

    assert_eq!(harness.per.radio.join_nonces.as_slice(), &[0, 1, 2]);
    assert!(harness.event_kinds().contains(&NodeEventKind::JoinExhausted));

    // The advanced nonce is durable even though every attempt failed.
    let reloaded = load_config(&mut harness.store).unwrap();
    assert_eq!(reloaded.radio.dev_nonce, 3);
}

#[test]
fn send_failure_is_logged_and_buffers_still_drain() {
    let mut harness = Harness::new();
    enable_pulse_sensor(&mut harness.config, SensorSlot::One, 1);
    harness.config.radio.enabled = true;
    harness.config.radio.period_minutes = 1;
    harness.per.radio.fail_sends = true;

    harness.request_running();
    assert_eq!(harness.poll(), NodeMode::Running);
    assert_eq!(harness.poll(), NodeMode::Running);

    assert!(harness.event_kinds().contains(&NodeEventKind::SendFailed));
    assert!(harness.app.runtime(SensorSlot::One).log.is_empty());
    assert_eq!(harness.app.mode(), NodeMode::Running);
}

#[test]
fn analog_sensor_read_powers_the_rail_around_the_sample() {
    let mut harness = Harness::new();
    let sensor = harness.config.sensor_mut(SensorSlot::One);
    sensor.enabled = true;
    sensor.kind = SensorKind::Voltage;
    sensor.supply = SupplyVoltage::V24;
    sensor.period_minutes = 10;

    harness.request_running();
    assert_eq!(harness.poll(), NodeMode::Running);
    assert_eq!(harness.poll(), NodeMode::Running);

    assert_eq!(
        harness.rail_levels[0].borrow().as_slice(),
        &[SupplyVoltage::V24, SupplyVoltage::Off]
    );
}

#[test]
fn leaving_running_tears_down_rails_and_schedules() {
    let mut harness = Harness::new();
    enable_pulse_sensor(&mut harness.config, SensorSlot::Two, 2);
    harness.config.radio.enabled = true;
    harness.config.radio.period_minutes = 5;

    harness.request_running();
    assert_eq!(harness.poll(), NodeMode::Running);
    assert!(harness.timer.armed(AlarmChannel::SensorTwo));
    assert!(harness.timer.armed(AlarmChannel::Radio));

    write_attribute(
        AttributeId::Mode,
        0,
        &[0],
        &mut harness.config,
        &mut harness.session,
        &mut harness.store,
    )
    .unwrap();
    assert_eq!(harness.poll(), NodeMode::Configuration);

    assert!(!harness.timer.armed(AlarmChannel::SensorTwo));
    assert!(!harness.timer.armed(AlarmChannel::Radio));
    assert!(!harness.table.slot(node_core::schedule::ScheduleId::SensorTwo).is_scheduled());
}

#[test]
fn early_join_request_connects_while_configuring() {
    let mut harness = Harness::new();
    harness.config.radio.enabled = true;

    write_attribute(
        AttributeId::JoinRequest,
        0,
        &[1],
        &mut harness.config,
        &mut harness.session,
        &mut harness.store,
    )
    .unwrap();

    assert_eq!(harness.poll(), NodeMode::Configuration);
    assert!(harness.per.radio.is_joined());
    assert!(!harness.session.join_requested);
    assert!(harness.event_kinds().contains(&NodeEventKind::Joined));
}

#[test]
fn clock_keeps_mode_on_transient_tick_fault() {
    use node_core::clock::TickCounter;

    let mut harness = Harness::new();
    // Stopping the counter makes tick reads fail; the pass is skipped.
    let mut counter = harness.timer.clone();
    counter.stop().unwrap();
    assert_eq!(harness.poll(), NodeMode::Configuration);
    assert!(harness.event_kinds().contains(&NodeEventKind::ClockFault));
}
