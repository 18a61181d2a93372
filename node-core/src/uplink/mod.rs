//! Uplink report assembly.
//!
//! Reports are flat big-endian records: a telemetry header followed by one
//! block per enabled sensor carrying its configuration echo and the
//! buffered samples as alternating timestamp/value fields. Assembly never
//! allocates; the payload lives in a bounded vector sized for a full pair
//! of sample logs.

use core::fmt;

use heapless::Vec;

use crate::Seconds;
use crate::config::{NodeConfig, SENSOR_SLOT_COUNT, SensorSlot};
use crate::power::BatterySnapshot;
use crate::sensing::SensorRuntime;

/// Firmware release identity embedded in every report.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Version stamped into outgoing reports.
pub const FIRMWARE_VERSION: FirmwareVersion = FirmwareVersion {
    major: 0,
    minor: 1,
    patch: 0,
};

/// Upper bound on an assembled report.
///
/// Header plus two full sensor blocks with saturated sample logs.
pub const MAX_UPLINK_BYTES: usize = 576;

/// Assembled report bytes.
pub type UplinkPayload = Vec<u8, MAX_UPLINK_BYTES>;

/// Errors surfaced during report assembly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UplinkError {
    /// The report outgrew [`MAX_UPLINK_BYTES`].
    Overflow,
}

impl fmt::Display for UplinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UplinkError::Overflow => f.write_str("uplink payload overflow"),
        }
    }
}

fn push_bytes(payload: &mut UplinkPayload, bytes: &[u8]) -> Result<(), UplinkError> {
    payload
        .extend_from_slice(bytes)
        .map_err(|_| UplinkError::Overflow)
}

/// Assembles one report from the current configuration and sample logs.
///
/// Does not clear the logs; the caller clears them after the transmit
/// attempt (successful or not) to bound memory.
pub fn assemble(
    config: &NodeConfig,
    runtime: &[SensorRuntime; SENSOR_SLOT_COUNT],
    battery: BatterySnapshot,
    now: Seconds,
) -> Result<UplinkPayload, UplinkError> {
    let mut payload = UplinkPayload::new();

    push_bytes(
        &mut payload,
        &[
            FIRMWARE_VERSION.major,
            FIRMWARE_VERSION.minor,
            FIRMWARE_VERSION.patch,
        ],
    )?;
    push_bytes(&mut payload, &now.to_be_bytes())?;
    push_bytes(&mut payload, &config.radio.period_minutes.to_be_bytes())?;
    push_bytes(&mut payload, &battery.millivolts.to_be_bytes())?;
    push_bytes(&mut payload, &battery.temperature_dd.to_be_bytes())?;

    for slot in SensorSlot::ALL {
        let sensor = config.sensor(slot);
        if !sensor.enabled {
            continue;
        }
        let samples = runtime[slot.as_index()].log.as_slice();

        #[allow(clippy::cast_possible_truncation)]
        let count = samples.len() as u8;
        push_bytes(
            &mut payload,
            &[
                slot.as_index() as u8,
                sensor.kind.code(),
                sensor.supply.code(),
            ],
        )?;
        push_bytes(&mut payload, &sensor.period_minutes.to_be_bytes())?;
        push_bytes(&mut payload, &[count])?;

        for sample in samples {
            push_bytes(&mut payload, &sample.taken_at.to_be_bytes())?;
            push_bytes(&mut payload, &sample.value.to_be_bytes())?;
        }
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SensorKind, SupplyVoltage};

    fn test_config() -> NodeConfig {
        let mut config = NodeConfig::defaults();
        let sensor = config.sensor_mut(SensorSlot::One);
        sensor.enabled = true;
        sensor.kind = SensorKind::Current;
        sensor.supply = SupplyVoltage::V12;
        sensor.period_minutes = 10;
        config.radio.period_minutes = 60;
        config
    }

    fn battery() -> BatterySnapshot {
        BatterySnapshot {
            millivolts: 3_654,
            temperature_dd: -35,
        }
    }

    #[test]
    fn report_layout_is_big_endian() {
        let config = test_config();
        let mut runtime = [SensorRuntime::new(), SensorRuntime::new()];
        runtime[0].record(0x0102_0304, 600);

        let payload = assemble(&config, &runtime, battery(), 0x0000_0305).unwrap();

        // Header: version, timestamp, report period, battery, temperature.
        assert_eq!(&payload[0..3], &[0, 1, 0]);
        assert_eq!(&payload[3..7], &[0x00, 0x00, 0x03, 0x05]);
        assert_eq!(&payload[7..9], &[0x00, 0x3C]);
        assert_eq!(&payload[9..11], &3_654u16.to_be_bytes());
        assert_eq!(&payload[11..13], &(-35i16).to_be_bytes());

        // Sensor block: slot, kind, supply, period, count, samples.
        assert_eq!(&payload[13..16], &[0, 2, 3]);
        assert_eq!(&payload[16..18], &[0x00, 0x0A]);
        assert_eq!(payload[18], 1);
        assert_eq!(&payload[19..23], &600u32.to_be_bytes());
        assert_eq!(&payload[23..27], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(payload.len(), 27);
    }

    #[test]
    fn disabled_sensors_are_omitted() {
        let mut config = test_config();
        config.sensor_mut(SensorSlot::One).enabled = false;
        let runtime = [SensorRuntime::new(), SensorRuntime::new()];

        let payload = assemble(&config, &runtime, battery(), 0).unwrap();
        assert_eq!(payload.len(), 13);
    }

    #[test]
    fn cleared_logs_leave_no_stale_samples() {
        let config = test_config();
        let mut runtime = [SensorRuntime::new(), SensorRuntime::new()];
        runtime[0].record(7, 60);
        runtime[0].record(9, 120);

        let first = assemble(&config, &runtime, battery(), 130).unwrap();
        assert!(first.len() > 19);

        for slot in &mut runtime {
            slot.log.clear();
        }

        let second = assemble(&config, &runtime, battery(), 190).unwrap();
        // Config echo only: header + sensor block with a zero sample count.
        assert_eq!(second.len(), 19);
        assert_eq!(second[18], 0);
    }

    #[test]
    fn full_logs_fit_the_payload_bound() {
        let mut config = test_config();
        let sensor = config.sensor_mut(SensorSlot::Two);
        sensor.enabled = true;
        sensor.kind = SensorKind::Pulse;
        sensor.period_minutes = 1;

        let mut runtime = [SensorRuntime::new(), SensorRuntime::new()];
        for i in 0..200 {
            runtime[0].record(i, i as Seconds);
            runtime[1].record(i, i as Seconds);
        }

        let payload = assemble(&config, &runtime, battery(), 10_000).unwrap();
        assert!(payload.len() <= MAX_UPLINK_BYTES);
    }
}
