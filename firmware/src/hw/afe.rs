//! Analog front end: sensor readout and battery telemetry on the one ADC.
//!
//! The G0 has a single SAR ADC, so one core object owns it behind a
//! `RefCell` and two thin views implement the node-core capability traits.
//! Both views run on the same executor thread; the borrow is never
//! contended. Pulse inputs bypass the ADC entirely: EXTI edges accumulate
//! into atomics that a read swaps back to zero.

use core::cell::RefCell;
use core::ptr;

use embassy_stm32::adc::{Adc, SampleTime, Temperature, VrefInt};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::peripherals::{ADC1, PA0, PA1};
use embassy_stm32::Peri;
use node_core::config::{SensorKind, SensorSlot};
use node_core::power::BatteryMonitor;
use node_core::sensing::SensorBackend;
use portable_atomic::{AtomicU32, Ordering};

/// Factory-programmed VREFINT calibration, sampled at 3.0 V.
const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;
/// Factory temperature sensor calibration at 30 °C / 3.0 V.
const TS_CAL1_ADDR: *const u16 = 0x1FFF_75A8 as *const u16;
/// Factory temperature sensor calibration at 130 °C / 3.0 V.
const TS_CAL2_ADDR: *const u16 = 0x1FFF_75CA as *const u16;

const CAL_VDDA_MV: u32 = 3_000;
const ADC_FULL_SCALE: u32 = 4_095;

static PULSE_COUNTS: [AtomicU32; 2] = [AtomicU32::new(0), AtomicU32::new(0)];

/// Counts rising edges on a pulse input into the slot's accumulator.
#[embassy_executor::task(pool_size = 2)]
pub async fn pulse_task(mut input: ExtiInput<'static>, slot: SensorSlot) {
    loop {
        input.wait_for_rising_edge().await;
        PULSE_COUNTS[slot.as_index()].fetch_add(1, Ordering::Relaxed);
    }
}

fn read_factory_cal(address: *const u16) -> u16 {
    unsafe { ptr::read_volatile(address) }
}

/// Owns the ADC and its analog inputs.
pub struct AfeCore<'d> {
    adc: Adc<'d, ADC1>,
    vrefint: VrefInt,
    temperature: Temperature,
    ain1: Peri<'d, PA0>,
    ain2: Peri<'d, PA1>,
    vrefint_cal: u16,
}

impl<'d> AfeCore<'d> {
    /// Configures the ADC and enables the internal channels.
    pub fn new(mut adc: Adc<'d, ADC1>, ain1: Peri<'d, PA0>, ain2: Peri<'d, PA1>) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        let vrefint = adc.enable_vrefint();
        let temperature = adc.enable_temperature();
        Self {
            adc,
            vrefint,
            temperature,
            ain1,
            ain2,
            vrefint_cal: read_factory_cal(VREFINT_CAL_ADDR),
        }
    }

    /// Supply voltage in millivolts, derived from the calibrated VREFINT.
    fn vdda_millivolts(&mut self) -> u32 {
        let raw = u32::from(self.adc.blocking_read(&mut self.vrefint)).max(1);
        CAL_VDDA_MV * u32::from(self.vrefint_cal) / raw
    }

    /// Analog input reading scaled to millivolts.
    fn input_millivolts(&mut self, slot: SensorSlot) -> u32 {
        let vdda = self.vdda_millivolts();
        let raw = match slot {
            SensorSlot::One => self.adc.blocking_read(&mut self.ain1),
            SensorSlot::Two => self.adc.blocking_read(&mut self.ain2),
        };
        u32::from(raw) * vdda / ADC_FULL_SCALE
    }

    /// Die temperature in tenths of a degree Celsius.
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    fn temperature_decidegrees(&mut self) -> i16 {
        let vdda = self.vdda_millivolts();
        let raw = u32::from(self.adc.blocking_read(&mut self.temperature));
        let scaled = raw * vdda / CAL_VDDA_MV;
        let cal1 = i32::from(read_factory_cal(TS_CAL1_ADDR));
        let cal2 = i32::from(read_factory_cal(TS_CAL2_ADDR));
        let span = (cal2 - cal1).max(1);

        (1_000 * (scaled as i32 - cal1) / span + 300) as i16
    }
}

/// Shared handle the two trait views borrow from.
pub type SharedAfe<'d> = RefCell<AfeCore<'d>>;

/// Sensor readout view over the shared front end.
pub struct AnalogSensors<'a, 'd> {
    afe: &'a SharedAfe<'d>,
}

impl<'a, 'd> AnalogSensors<'a, 'd> {
    pub fn new(afe: &'a SharedAfe<'d>) -> Self {
        Self { afe }
    }
}

/// Errors surfaced by the front end.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AfeError {
    /// The slot kind has no physical readout.
    Unsupported,
}

impl SensorBackend for AnalogSensors<'_, '_> {
    type Error = AfeError;

    fn sample(&mut self, slot: SensorSlot, kind: SensorKind) -> Result<i32, AfeError> {
        match kind {
            SensorKind::Pulse => {
                // Read-and-reset the accumulated edge count.
                let count = PULSE_COUNTS[slot.as_index()].swap(0, Ordering::Relaxed);
                Ok(i32::try_from(count).unwrap_or(i32::MAX))
            }
            SensorKind::Voltage | SensorKind::Current => {
                let millivolts = self.afe.borrow_mut().input_millivolts(slot);
                Ok(i32::try_from(millivolts).unwrap_or(i32::MAX))
            }
            SensorKind::None => Err(AfeError::Unsupported),
        }
    }
}

/// Battery telemetry view over the shared front end.
///
/// The board runs the MCU directly from the cell, so the calibrated VDDA
/// measurement is the battery terminal voltage.
pub struct VddBattery<'a, 'd> {
    afe: &'a SharedAfe<'d>,
}

impl<'a, 'd> VddBattery<'a, 'd> {
    pub fn new(afe: &'a SharedAfe<'d>) -> Self {
        Self { afe }
    }
}

impl BatteryMonitor for VddBattery<'_, '_> {
    type Error = core::convert::Infallible;

    fn battery_millivolts(&mut self) -> Result<u16, Self::Error> {
        let millivolts = self.afe.borrow_mut().vdda_millivolts();
        Ok(u16::try_from(millivolts).unwrap_or(u16::MAX))
    }

    fn temperature_decidegrees(&mut self) -> Result<i16, Self::Error> {
        Ok(self.afe.borrow_mut().temperature_decidegrees())
    }
}
