//! Sensor sampling runtime: backends, bounded sample logs, powered reads.

use core::fmt;

use embedded_hal::delay::DelayNs;
use heapless::Vec;

use crate::Seconds;
use crate::config::{SensorKind, SensorSlot, SensorSlotConfig};
use crate::power::{PowerRail, RailController, RailError};

/// Samples buffered per slot between radio reports.
pub const MAX_SAMPLES_PER_SLOT: usize = 32;

/// One stored reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SampleRecord {
    /// Absolute node seconds when the reading was taken.
    pub taken_at: Seconds,
    pub value: i32,
}

/// Bounded log of readings for one slot.
///
/// When the log is full the oldest reading is dropped; memory stays bounded
/// even if the radio cannot drain the log for a long time.
#[derive(Debug, Default)]
pub struct SampleLog {
    samples: Vec<SampleRecord, MAX_SAMPLES_PER_SLOT>,
}

impl SampleLog {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Appends a reading, dropping the oldest when full.
    pub fn push(&mut self, record: SampleRecord) {
        if self.samples.is_full() {
            self.samples.remove(0);
        }
        // Cannot fail: a slot was just freed if needed.
        let _ = self.samples.push(record);
    }

    /// The buffered readings, oldest first.
    #[must_use]
    pub fn as_slice(&self) -> &[SampleRecord] {
        &self.samples
    }

    /// Number of buffered readings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the log holds no readings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Discards every buffered reading.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Per-slot runtime state owned by the application.
#[derive(Debug, Default)]
pub struct SensorRuntime {
    pub log: SampleLog,
    pub latest: Option<SampleRecord>,
    /// Seconds since the latest reading, refreshed every loop pass.
    pub age_seconds: Seconds,
}

impl SensorRuntime {
    /// Creates an empty runtime record.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            log: SampleLog::new(),
            latest: None,
            age_seconds: 0,
        }
    }

    /// Stores a fresh reading taken at `now`.
    pub fn record(&mut self, value: i32, now: Seconds) {
        let record = SampleRecord {
            taken_at: now,
            value,
        };
        self.log.push(record);
        self.latest = Some(record);
        self.age_seconds = 0;
    }

    /// Recomputes the reading age against the current clock.
    pub fn refresh_age(&mut self, now: Seconds) {
        if let Some(latest) = self.latest {
            self.age_seconds = now.saturating_sub(latest.taken_at);
        }
    }

    /// Clears buffered samples and resets bookkeeping for a fresh run.
    pub fn reset(&mut self) {
        self.log.clear();
        self.latest = None;
        self.age_seconds = 0;
    }
}

/// Capability trait for the physical sensor readout.
///
/// Voltage and current kinds read a powered analog scalar; pulse kinds
/// accumulate edge counts asynchronously and are read-and-reset on demand,
/// so they need no excitation rail.
pub trait SensorBackend {
    /// Backend-specific failure type.
    type Error;

    /// Takes one scalar reading from the slot.
    fn sample(&mut self, slot: SensorSlot, kind: SensorKind) -> Result<i32, Self::Error>;
}

/// Errors surfaced by a powered sensor read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SensingError<RE, BE> {
    /// The slot is not configured with a readable kind.
    NotConfigured,
    /// The excitation rail failed to sequence.
    Rail(RailError<RE>),
    /// The readout backend failed.
    Backend(BE),
}

impl<RE: fmt::Debug, BE: fmt::Debug> fmt::Display for SensingError<RE, BE> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensingError::NotConfigured => f.write_str("slot has no readable sensor"),
            SensingError::Rail(inner) => write!(f, "{inner}"),
            SensingError::Backend(inner) => write!(f, "sensor backend fault: {inner:?}"),
        }
    }
}

/// Read-back tolerance for the excitation rail, in percent.
pub const RAIL_TOLERANCE_PCT: u32 = 10;

/// Reads one sample from a slot, bracketing powered kinds with the rail.
///
/// Analog kinds get exactly one rail-on and one rail-off around the read,
/// with a read-back check in between; the rail is switched off even when
/// the verification or the readout itself fails.
pub fn read_sample<B, R, D>(
    slot: SensorSlot,
    config: &SensorSlotConfig,
    backend: &mut B,
    rail: &mut RailController<R>,
    delay: &mut D,
) -> Result<i32, SensingError<R::Error, B::Error>>
where
    B: SensorBackend,
    R: PowerRail,
    D: DelayNs,
{
    match config.kind {
        SensorKind::None => Err(SensingError::NotConfigured),
        SensorKind::Pulse => backend
            .sample(slot, SensorKind::Pulse)
            .map_err(SensingError::Backend),
        kind @ (SensorKind::Voltage | SensorKind::Current) => {
            rail.apply(config.supply, delay).map_err(SensingError::Rail)?;
            let reading = match rail.verify(RAIL_TOLERANCE_PCT) {
                Ok(_) => backend.sample(slot, kind).map_err(SensingError::Backend),
                Err(fault) => Err(SensingError::Rail(fault)),
            };
            rail.apply(crate::config::SupplyVoltage::Off, delay)
                .map_err(SensingError::Rail)?;
            reading
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupplyVoltage;
    use crate::power::NoopDelay;

    struct ScriptedBackend {
        value: i32,
        fail: bool,
        reads: usize,
    }

    impl SensorBackend for ScriptedBackend {
        type Error = ();

        fn sample(&mut self, _slot: SensorSlot, _kind: SensorKind) -> Result<i32, ()> {
            self.reads += 1;
            if self.fail { Err(()) } else { Ok(self.value) }
        }
    }

    struct RecordingRail {
        levels: Vec<SupplyVoltage, 8>,
    }

    impl PowerRail for RecordingRail {
        type Error = ();

        fn set_level(&mut self, level: SupplyVoltage) -> Result<(), ()> {
            self.levels.push(level).map_err(|_| ())
        }

        fn read_millivolts(&mut self) -> Result<u32, ()> {
            Ok(self
                .levels
                .last()
                .copied()
                .unwrap_or(SupplyVoltage::Off)
                .millivolts())
        }
    }

    fn voltage_config() -> SensorSlotConfig {
        SensorSlotConfig {
            enabled: true,
            kind: SensorKind::Voltage,
            supply: SupplyVoltage::V24,
            period_minutes: 10,
        }
    }

    #[test]
    fn analog_read_brackets_the_rail() {
        let mut backend = ScriptedBackend {
            value: 1_234,
            fail: false,
            reads: 0,
        };
        let mut rail = RailController::new(RecordingRail { levels: Vec::new() });
        let mut delay = NoopDelay;

        let value = read_sample(
            SensorSlot::One,
            &voltage_config(),
            &mut backend,
            &mut rail,
            &mut delay,
        )
        .unwrap();

        assert_eq!(value, 1_234);
        assert_eq!(backend.reads, 1);
        // Exactly two rail transitions bracket the read.
        assert_eq!(
            rail.rail().levels.as_slice(),
            &[SupplyVoltage::V24, SupplyVoltage::Off]
        );
    }

    #[test]
    fn rail_switches_off_even_when_readout_fails() {
        let mut backend = ScriptedBackend {
            value: 0,
            fail: true,
            reads: 0,
        };
        let mut rail = RailController::new(RecordingRail { levels: Vec::new() });
        let mut delay = NoopDelay;

        let result = read_sample(
            SensorSlot::One,
            &voltage_config(),
            &mut backend,
            &mut rail,
            &mut delay,
        );

        assert_eq!(result, Err(SensingError::Backend(())));
        assert_eq!(rail.level(), SupplyVoltage::Off);
    }

    #[test]
    fn pulse_read_does_not_touch_the_rail() {
        let mut backend = ScriptedBackend {
            value: 42,
            fail: false,
            reads: 0,
        };
        let mut rail = RailController::new(RecordingRail { levels: Vec::new() });
        let mut delay = NoopDelay;

        let config = SensorSlotConfig {
            kind: SensorKind::Pulse,
            ..voltage_config()
        };
        let value = read_sample(SensorSlot::Two, &config, &mut backend, &mut rail, &mut delay)
            .unwrap();

        assert_eq!(value, 42);
        assert!(rail.rail().levels.is_empty());
    }

    #[test]
    fn sample_log_drops_oldest_when_full() {
        let mut log = SampleLog::new();
        for i in 0..=MAX_SAMPLES_PER_SLOT as i32 {
            log.push(SampleRecord {
                taken_at: i as Seconds,
                value: i,
            });
        }
        assert_eq!(log.len(), MAX_SAMPLES_PER_SLOT);
        assert_eq!(log.as_slice()[0].value, 1);
    }

    #[test]
    fn runtime_tracks_latest_and_age() {
        let mut runtime = SensorRuntime::new();
        runtime.record(7, 100);
        assert_eq!(runtime.age_seconds, 0);

        runtime.refresh_age(160);
        assert_eq!(runtime.age_seconds, 60);

        runtime.reset();
        assert!(runtime.log.is_empty());
        assert_eq!(runtime.latest, None);
    }
}
