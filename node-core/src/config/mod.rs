//! Sensor and radio configuration model.
//!
//! The configuration is the single source of truth the application state
//! machine consumes: which sensor slots are populated, what they are, how
//! they are powered, and how the radio reports. External representations
//! (the configuration link, the technician console) address the symbolic
//! fields by canonical name strings; unknown names are rejected at the
//! boundary without mutating anything.

pub mod persist;

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::Seconds;

/// Number of physical sensor slots on the board.
pub const SENSOR_SLOT_COUNT: usize = 2;

/// Identifies one of the sensor slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensorSlot {
    One,
    Two,
}

impl SensorSlot {
    /// Every slot, in index order.
    pub const ALL: [SensorSlot; SENSOR_SLOT_COUNT] = [SensorSlot::One, SensorSlot::Two];

    /// Deterministic index for array lookups.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            SensorSlot::One => 0,
            SensorSlot::Two => 1,
        }
    }

    /// Attempts to construct a slot from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(SensorSlot::One),
            1 => Some(SensorSlot::Two),
            _ => None,
        }
    }
}

impl fmt::Display for SensorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorSlot::One => f.write_str("1"),
            SensorSlot::Two => f.write_str("2"),
        }
    }
}

/// Kind of transducer wired into a sensor slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SensorKind {
    None,
    Voltage,
    Current,
    Pulse,
}

impl SensorKind {
    /// Canonical name string used by the external configuration boundary.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SensorKind::None => "NO_SENSOR",
            SensorKind::Voltage => "VOLTAGE_SENSOR",
            SensorKind::Current => "CURRENT_SENSOR",
            SensorKind::Pulse => "PULSE_SENSOR",
        }
    }

    /// Translates a canonical name back to the kind.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NO_SENSOR" => Some(SensorKind::None),
            "VOLTAGE_SENSOR" => Some(SensorKind::Voltage),
            "CURRENT_SENSOR" => Some(SensorKind::Current),
            "PULSE_SENSOR" => Some(SensorKind::Pulse),
            _ => None,
        }
    }

    /// Compact code used in uplink payloads.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            SensorKind::None => 0,
            SensorKind::Voltage => 1,
            SensorKind::Current => 2,
            SensorKind::Pulse => 3,
        }
    }
}

/// Supply level for a sensor excitation rail.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SupplyVoltage {
    Off,
    V3_3,
    V5,
    V12,
    V24,
}

impl SupplyVoltage {
    /// Canonical name string used by the external configuration boundary.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SupplyVoltage::Off => "SENSOR_VOLTAGE_OFF",
            SupplyVoltage::V3_3 => "SENSOR_VOLTAGE_3V3",
            SupplyVoltage::V5 => "SENSOR_VOLTAGE_5V",
            SupplyVoltage::V12 => "SENSOR_VOLTAGE_12V",
            SupplyVoltage::V24 => "SENSOR_VOLTAGE_24V",
        }
    }

    /// Translates a canonical name back to the level.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SENSOR_VOLTAGE_OFF" => Some(SupplyVoltage::Off),
            "SENSOR_VOLTAGE_3V3" => Some(SupplyVoltage::V3_3),
            "SENSOR_VOLTAGE_5V" => Some(SupplyVoltage::V5),
            "SENSOR_VOLTAGE_12V" => Some(SupplyVoltage::V12),
            "SENSOR_VOLTAGE_24V" => Some(SupplyVoltage::V24),
            _ => None,
        }
    }

    /// Nominal rail output in millivolts.
    #[must_use]
    pub const fn millivolts(self) -> u32 {
        match self {
            SupplyVoltage::Off => 0,
            SupplyVoltage::V3_3 => 3_300,
            SupplyVoltage::V5 => 5_000,
            SupplyVoltage::V12 => 12_000,
            SupplyVoltage::V24 => 24_000,
        }
    }

    /// Compact code used in uplink payloads.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            SupplyVoltage::Off => 0,
            SupplyVoltage::V3_3 => 1,
            SupplyVoltage::V5 => 2,
            SupplyVoltage::V12 => 3,
            SupplyVoltage::V24 => 4,
        }
    }
}

/// Reason a slot failed the running-state invariant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SlotFault {
    /// Enabled with `SensorKind::None`.
    MissingKind,
    /// Enabled with a zero sample period.
    ZeroPeriod,
}

impl fmt::Display for SlotFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotFault::MissingKind => f.write_str("enabled without a sensor kind"),
            SlotFault::ZeroPeriod => f.write_str("enabled with a zero period"),
        }
    }
}

/// Configuration for one sensor slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorSlotConfig {
    pub enabled: bool,
    pub kind: SensorKind,
    pub supply: SupplyVoltage,
    pub period_minutes: u16,
}

impl SensorSlotConfig {
    /// Compiled-in default: slot unpopulated.
    #[must_use]
    pub const fn unpopulated() -> Self {
        Self {
            enabled: false,
            kind: SensorKind::None,
            supply: SupplyVoltage::Off,
            period_minutes: 15,
        }
    }

    /// Sample period in seconds.
    #[must_use]
    pub const fn period_seconds(&self) -> Seconds {
        self.period_minutes as Seconds * 60
    }

    /// Running-state invariant: enabled implies a real kind and period.
    ///
    /// A violation self-heals by disabling the slot; the caller surfaces
    /// the fault and fails the running-state entry check.
    pub fn running_check(&mut self) -> Result<(), SlotFault> {
        if !self.enabled {
            return Ok(());
        }
        if self.kind == SensorKind::None {
            self.enabled = false;
            return Err(SlotFault::MissingKind);
        }
        if self.period_minutes == 0 {
            self.enabled = false;
            return Err(SlotFault::ZeroPeriod);
        }
        Ok(())
    }
}

impl Default for SensorSlotConfig {
    fn default() -> Self {
        Self::unpopulated()
    }
}

/// Long-range radio (LoRaWAN) configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RadioConfig {
    pub enabled: bool,
    pub period_minutes: u16,
    pub dev_eui: [u8; 8],
    pub join_eui: [u8; 8],
    pub app_key: [u8; 16],
    pub join_attempts: u8,
    pub send_attempts: u8,
    pub port: u8,
    /// Join replay counter; persisted and advanced on every attempt.
    pub dev_nonce: u16,
}

impl RadioConfig {
    /// Compiled-in default: radio present but not provisioned.
    #[must_use]
    pub const fn unprovisioned() -> Self {
        Self {
            enabled: false,
            period_minutes: 60,
            dev_eui: [0; 8],
            join_eui: [0; 8],
            app_key: [0; 16],
            join_attempts: 5,
            send_attempts: 3,
            port: 2,
            dev_nonce: 0,
        }
    }

    /// Report period in seconds.
    #[must_use]
    pub const fn period_seconds(&self) -> Seconds {
        self.period_minutes as Seconds * 60
    }

    /// Takes the next dev nonce, advancing the counter.
    ///
    /// The returned value must be persisted before it is used on air so a
    /// reboot can never replay it.
    pub fn advance_nonce(&mut self) -> u16 {
        let nonce = self.dev_nonce;
        self.dev_nonce = self.dev_nonce.wrapping_add(1);
        nonce
    }

    /// Running-state invariant: enabled implies a non-zero report period.
    pub fn running_check(&mut self) -> Result<(), SlotFault> {
        if self.enabled && self.period_minutes == 0 {
            self.enabled = false;
            return Err(SlotFault::ZeroPeriod);
        }
        Ok(())
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self::unprovisioned()
    }
}

/// Complete node configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct NodeConfig {
    pub sensors: [SensorSlotConfig; SENSOR_SLOT_COUNT],
    pub radio: RadioConfig,
}

impl NodeConfig {
    /// Compiled-in first-boot defaults.
    #[must_use]
    pub const fn defaults() -> Self {
        Self {
            sensors: [SensorSlotConfig::unpopulated(), SensorSlotConfig::unpopulated()],
            radio: RadioConfig::unprovisioned(),
        }
    }

    /// The configuration record for a sensor slot.
    pub fn sensor(&self, slot: SensorSlot) -> &SensorSlotConfig {
        &self.sensors[slot.as_index()]
    }

    /// Mutable access to the configuration record for a sensor slot.
    pub fn sensor_mut(&mut self, slot: SensorSlot) -> &mut SensorSlotConfig {
        &mut self.sensors[slot.as_index()]
    }

    /// Whether at least one sensor slot is enabled.
    #[must_use]
    pub fn any_sensor_enabled(&self) -> bool {
        self.sensors.iter().any(|sensor| sensor.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            SensorKind::None,
            SensorKind::Voltage,
            SensorKind::Current,
            SensorKind::Pulse,
        ] {
            assert_eq!(SensorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(SensorKind::from_name("THERMAL_SENSOR"), None);
    }

    #[test]
    fn voltage_names_round_trip() {
        for level in [
            SupplyVoltage::Off,
            SupplyVoltage::V3_3,
            SupplyVoltage::V5,
            SupplyVoltage::V12,
            SupplyVoltage::V24,
        ] {
            assert_eq!(SupplyVoltage::from_name(level.name()), Some(level));
        }
        assert_eq!(SupplyVoltage::from_name("SENSOR_VOLTAGE_48V"), None);
    }

    #[test]
    fn running_check_disables_misconfigured_slot() {
        let mut sensor = SensorSlotConfig {
            enabled: true,
            kind: SensorKind::None,
            supply: SupplyVoltage::V24,
            period_minutes: 10,
        };
        assert_eq!(sensor.running_check(), Err(SlotFault::MissingKind));
        assert!(!sensor.enabled);
    }

    #[test]
    fn running_check_accepts_disabled_slot() {
        let mut sensor = SensorSlotConfig::unpopulated();
        assert_eq!(sensor.running_check(), Ok(()));
    }

    #[test]
    fn nonce_advances_and_wraps() {
        let mut radio = RadioConfig::unprovisioned();
        radio.dev_nonce = u16::MAX;
        assert_eq!(radio.advance_nonce(), u16::MAX);
        assert_eq!(radio.dev_nonce, 0);
        assert_eq!(radio.advance_nonce(), 0);
        assert_eq!(radio.dev_nonce, 1);
    }
}
