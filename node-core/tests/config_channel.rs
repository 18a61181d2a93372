//! Configuration boundary scenarios: console commands routed through the
//! link attributes, persistence round-trips.

use node_core::app::NodeMode;
use node_core::config::persist::{MemoryStore, load_config};
use node_core::config::{SensorKind, SensorSlot, SupplyVoltage};
use node_core::configlink::{
    AttributeId, LinkSession, LinkTelemetry, read_attribute, write_attribute,
};
use node_core::console::{ConsoleCommand, parse_line};
use node_core::power::BatterySnapshot;

/// Routes a parsed console command through the link boundary the way the
/// emulator session does.
fn dispatch(
    command: ConsoleCommand,
    config: &mut node_core::config::NodeConfig,
    session: &mut LinkSession,
    store: &mut MemoryStore,
) {
    let (attribute, data): (AttributeId, Vec<u8>) = match command {
        ConsoleCommand::SensorEnable { slot, enabled } => {
            (AttributeId::SensorEnabled(slot), vec![u8::from(enabled)])
        }
        ConsoleCommand::SensorType { slot, kind } => (
            AttributeId::SensorTypeName(slot),
            kind.name().as_bytes().to_vec(),
        ),
        ConsoleCommand::SensorVoltage { slot, supply } => (
            AttributeId::SensorVoltageName(slot),
            supply.name().as_bytes().to_vec(),
        ),
        ConsoleCommand::SensorPeriod { slot, minutes } => (
            AttributeId::SensorPeriodMinutes(slot),
            minutes.to_be_bytes().to_vec(),
        ),
        ConsoleCommand::RadioEnable(enabled) => {
            (AttributeId::RadioEnabled, vec![u8::from(enabled)])
        }
        ConsoleCommand::RadioPeriod { minutes } => {
            (AttributeId::RadioPeriodMinutes, minutes.to_be_bytes().to_vec())
        }
        other => panic!("not a configuration command: {other:?}"),
    };
    write_attribute(attribute, 0, &data, config, session, store).unwrap();
}

#[test]
fn console_commands_flow_through_the_link_boundary() {
    let mut store = MemoryStore::new();
    let mut config = load_config(&mut store).unwrap();
    let mut session = LinkSession::new();

    for line in [
        "sensor 1 enable",
        "sensor 1 type VOLTAGE_SENSOR",
        "sensor 1 voltage SENSOR_VOLTAGE_12V",
        "sensor 1 period 5",
        "radio enable",
        "radio period 30",
    ] {
        dispatch(
            parse_line(line).unwrap(),
            &mut config,
            &mut session,
            &mut store,
        );
    }

    let sensor = config.sensor(SensorSlot::One);
    assert!(sensor.enabled);
    assert_eq!(sensor.kind, SensorKind::Voltage);
    assert_eq!(sensor.supply, SupplyVoltage::V12);
    assert_eq!(sensor.period_minutes, 5);
    assert!(config.radio.enabled);
    assert_eq!(config.radio.period_minutes, 30);

    // Every change is already durable.
    let reloaded = load_config(&mut store).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn enum_and_name_attributes_stay_consistent() {
    let mut store = MemoryStore::new();
    let mut config = load_config(&mut store).unwrap();
    let mut session = LinkSession::new();

    write_attribute(
        AttributeId::SensorTypeName(SensorSlot::Two),
        0,
        b"CURRENT_SENSOR",
        &mut config,
        &mut session,
        &mut store,
    )
    .unwrap();

    let telemetry = LinkTelemetry {
        mode: NodeMode::Configuration,
        battery: BatterySnapshot {
            millivolts: 3_600,
            temperature_dd: 200,
        },
        join_requested: false,
    };
    let code = read_attribute(AttributeId::SensorKindCode(SensorSlot::Two), &config, &telemetry);
    let name = read_attribute(AttributeId::SensorTypeName(SensorSlot::Two), &config, &telemetry);

    assert_eq!(code.as_slice(), &[SensorKind::Current.code()]);
    assert_eq!(name.as_slice(), b"CURRENT_SENSOR");
}

#[test]
fn telemetry_attributes_mirror_device_state() {
    let store = &mut MemoryStore::new();
    let config = load_config(store).unwrap();

    let telemetry = LinkTelemetry {
        mode: NodeMode::Running,
        battery: BatterySnapshot {
            millivolts: 3_654,
            temperature_dd: -15,
        },
        join_requested: true,
    };

    assert_eq!(
        read_attribute(AttributeId::Mode, &config, &telemetry).as_slice(),
        &[1]
    );
    assert_eq!(
        read_attribute(AttributeId::BatteryMillivolts, &config, &telemetry).as_slice(),
        &3_654u16.to_be_bytes()
    );
    assert_eq!(
        read_attribute(AttributeId::TemperatureDecidegrees, &config, &telemetry).as_slice(),
        &(-15i16).to_be_bytes()
    );
    assert_eq!(
        read_attribute(AttributeId::JoinRequest, &config, &telemetry).as_slice(),
        &[1]
    );
}
