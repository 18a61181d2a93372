//! Sensor excitation rails and battery telemetry.
//!
//! Voltage and current transducers are powered only for the duration of a
//! read; the rail controller owns the sequencing rule for that. Battery
//! telemetry comes from the PMIC through its own capability trait so the
//! emulator and tests can substitute fakes at composition time.

use core::fmt;

use embedded_hal::delay::DelayNs;

use crate::config::SupplyVoltage;

/// Capability trait for one switchable sensor supply rail.
pub trait PowerRail {
    /// Backend-specific failure type.
    type Error;

    /// Drives the rail to the requested level.
    fn set_level(&mut self, level: SupplyVoltage) -> Result<(), Self::Error>;

    /// Reads the rail output back in millivolts.
    fn read_millivolts(&mut self) -> Result<u32, Self::Error>;
}

/// Rail that accepts every request and reads back the nominal level.
#[derive(Copy, Clone, Debug)]
pub struct NoopPowerRail {
    level: SupplyVoltage,
}

impl NoopPowerRail {
    /// Creates a rail resting at `Off`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            level: SupplyVoltage::Off,
        }
    }
}

impl Default for NoopPowerRail {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerRail for NoopPowerRail {
    type Error = core::convert::Infallible;

    fn set_level(&mut self, level: SupplyVoltage) -> Result<(), Self::Error> {
        self.level = level;
        Ok(())
    }

    fn read_millivolts(&mut self) -> Result<u32, Self::Error> {
        Ok(self.level.millivolts())
    }
}

/// Errors surfaced by the rail controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RailError<E> {
    /// The rail backend rejected a request.
    Backend(E),
    /// Read-back landed outside the verification tolerance.
    OutOfTolerance { measured_mv: u32, expected_mv: u32 },
}

impl<E: fmt::Debug> fmt::Display for RailError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RailError::Backend(inner) => write!(f, "rail backend fault: {inner:?}"),
            RailError::OutOfTolerance {
                measured_mv,
                expected_mv,
            } => write!(
                f,
                "rail read back {measured_mv} mV, expected {expected_mv} mV"
            ),
        }
    }
}

/// Milliseconds the boost converter is given to discharge before a level
/// change between two live voltages.
pub const RAIL_SETTLE_MS: u32 = 20;

/// Highest read-back accepted as "off", in millivolts.
const OFF_FLOOR_MV: u32 = 150;

/// Sequencing wrapper for one supply rail.
///
/// Changing a live rail directly between two output voltages glitches the
/// boost converter, so every live-to-live change goes through Off with a
/// settle delay in between.
pub struct RailController<R> {
    rail: R,
    level: SupplyVoltage,
}

impl<R> RailController<R>
where
    R: PowerRail,
{
    /// Wraps a rail assumed to be resting at `Off`.
    pub const fn new(rail: R) -> Self {
        Self {
            rail,
            level: SupplyVoltage::Off,
        }
    }

    /// The level the controller last drove the rail to.
    #[must_use]
    pub fn level(&self) -> SupplyVoltage {
        self.level
    }

    /// Read access to the wrapped rail.
    pub fn rail(&self) -> &R {
        &self.rail
    }

    /// Drives the rail to `target`, sequencing through Off when required.
    pub fn apply<D>(&mut self, target: SupplyVoltage, delay: &mut D) -> Result<(), RailError<R::Error>>
    where
        D: DelayNs,
    {
        if target == self.level {
            return Ok(());
        }

        if target != SupplyVoltage::Off && self.level != SupplyVoltage::Off {
            self.rail
                .set_level(SupplyVoltage::Off)
                .map_err(RailError::Backend)?;
            self.level = SupplyVoltage::Off;
            delay.delay_ms(RAIL_SETTLE_MS);
        }

        self.rail.set_level(target).map_err(RailError::Backend)?;
        self.level = target;
        Ok(())
    }

    /// Reads the rail back and checks it against the driven level.
    ///
    /// `tolerance_pct` bounds the deviation from the nominal output; an
    /// off rail must read back below a fixed floor.
    pub fn verify(&mut self, tolerance_pct: u32) -> Result<u32, RailError<R::Error>> {
        let measured_mv = self.rail.read_millivolts().map_err(RailError::Backend)?;
        let expected_mv = self.level.millivolts();

        let within = if expected_mv == 0 {
            measured_mv <= OFF_FLOOR_MV
        } else {
            let deviation = measured_mv.abs_diff(expected_mv);
            deviation * 100 <= expected_mv * tolerance_pct
        };

        if within {
            Ok(measured_mv)
        } else {
            Err(RailError::OutOfTolerance {
                measured_mv,
                expected_mv,
            })
        }
    }
}

/// Last-known battery telemetry, refreshed by the application loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct BatterySnapshot {
    pub millivolts: u16,
    /// Tenths of a degree Celsius.
    pub temperature_dd: i16,
}

impl BatterySnapshot {
    /// Reads a fresh snapshot, keeping `self` when the monitor fails.
    pub fn refresh<M>(&mut self, monitor: &mut M) -> Result<(), M::Error>
    where
        M: BatteryMonitor,
    {
        let millivolts = monitor.battery_millivolts()?;
        let temperature_dd = monitor.temperature_decidegrees()?;
        self.millivolts = millivolts;
        self.temperature_dd = temperature_dd;
        Ok(())
    }
}

/// Capability trait for PMIC battery telemetry.
pub trait BatteryMonitor {
    /// Backend-specific failure type.
    type Error;

    /// Battery terminal voltage in millivolts.
    fn battery_millivolts(&mut self) -> Result<u16, Self::Error>;

    /// Board temperature in tenths of a degree Celsius.
    fn temperature_decidegrees(&mut self) -> Result<i16, Self::Error>;
}

/// Battery monitor reporting fixed nominal values.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopBatteryMonitor;

impl NoopBatteryMonitor {
    /// Creates a new no-op monitor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BatteryMonitor for NoopBatteryMonitor {
    type Error = core::convert::Infallible;

    fn battery_millivolts(&mut self) -> Result<u16, Self::Error> {
        Ok(3_600)
    }

    fn temperature_decidegrees(&mut self) -> Result<i16, Self::Error> {
        Ok(210)
    }
}

/// Delay that returns immediately; for hosts where real settling is moot.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}
