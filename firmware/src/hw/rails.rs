//! Boost-converter sensor rails driven over GPIO.
//!
//! Each rail has an enable line and two select lines into the converter's
//! feedback network. The converter regulates its own output; the MCU
//! reports the commanded level for read-back.

use embassy_stm32::gpio::Output;
use node_core::config::SupplyVoltage;
use node_core::power::PowerRail;

/// One switchable excitation rail.
pub struct BoostRail<'d> {
    enable: Output<'d>,
    sel0: Output<'d>,
    sel1: Output<'d>,
    level: SupplyVoltage,
}

impl<'d> BoostRail<'d> {
    /// Wraps the rail control lines, leaving the rail off.
    pub fn new(mut enable: Output<'d>, sel0: Output<'d>, sel1: Output<'d>) -> Self {
        enable.set_low();
        Self {
            enable,
            sel0,
            sel1,
            level: SupplyVoltage::Off,
        }
    }

    fn select(&mut self, level: SupplyVoltage) {
        let (bit0, bit1) = match level {
            SupplyVoltage::Off | SupplyVoltage::V3_3 => (false, false),
            SupplyVoltage::V5 => (true, false),
            SupplyVoltage::V12 => (false, true),
            SupplyVoltage::V24 => (true, true),
        };
        if bit0 {
            self.sel0.set_high();
        } else {
            self.sel0.set_low();
        }
        if bit1 {
            self.sel1.set_high();
        } else {
            self.sel1.set_low();
        }
    }
}

impl PowerRail for BoostRail<'_> {
    type Error = core::convert::Infallible;

    fn set_level(&mut self, level: SupplyVoltage) -> Result<(), Self::Error> {
        if level == SupplyVoltage::Off {
            self.enable.set_low();
        } else {
            self.select(level);
            self.enable.set_high();
        }
        self.level = level;
        Ok(())
    }

    fn read_millivolts(&mut self) -> Result<u32, Self::Error> {
        Ok(self.level.millivolts())
    }
}
