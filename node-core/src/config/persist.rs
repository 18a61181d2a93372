//! Settings persistence over the address-indexed record store.
//!
//! Every configuration field owns one record address. Boot-time loading is
//! self-healing: an absent or undecodable record falls back to the
//! compiled-in default, which is immediately written back so the next boot
//! finds a complete store. Runtime writes persist synchronously after the
//! in-memory update; a failed write leaves the in-memory value in place.

use core::fmt;

use heapless::Vec;
use heapless::index_map::FnvIndexMap;
use serde::{Deserialize, Serialize};

use super::{NodeConfig, SensorSlot};

/// Maximum serialized length of a single settings record.
pub const MAX_RECORD_LEN: usize = 24;

/// Capability trait for the non-volatile record store.
pub trait SettingsStore {
    /// Backend-specific failure type.
    type Error;

    /// Reads the record at `address` into `buf`.
    ///
    /// Returns `Ok(None)` when no record has ever been written there.
    fn read_record(&mut self, address: u16, buf: &mut [u8]) -> Result<Option<usize>, Self::Error>;

    /// Writes (or replaces) the record at `address`.
    fn write_record(&mut self, address: u16, bytes: &[u8]) -> Result<(), Self::Error>;
}

/// Record address for each persisted configuration field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SettingsKey {
    Sensor1Enabled,
    Sensor1Kind,
    Sensor1Supply,
    Sensor1Period,
    Sensor2Enabled,
    Sensor2Kind,
    Sensor2Supply,
    Sensor2Period,
    RadioEnabled,
    RadioPeriod,
    DevEui,
    JoinEui,
    AppKey,
    JoinAttempts,
    SendAttempts,
    UplinkPort,
    DevNonce,
}

impl SettingsKey {
    /// Record address in the store.
    #[must_use]
    pub const fn address(self) -> u16 {
        match self {
            SettingsKey::Sensor1Enabled => 0,
            SettingsKey::Sensor1Kind => 1,
            SettingsKey::Sensor1Supply => 2,
            SettingsKey::Sensor1Period => 3,
            SettingsKey::Sensor2Enabled => 4,
            SettingsKey::Sensor2Kind => 5,
            SettingsKey::Sensor2Supply => 6,
            SettingsKey::Sensor2Period => 7,
            SettingsKey::RadioEnabled => 8,
            SettingsKey::RadioPeriod => 9,
            SettingsKey::DevEui => 10,
            SettingsKey::JoinEui => 11,
            SettingsKey::AppKey => 12,
            SettingsKey::JoinAttempts => 13,
            SettingsKey::SendAttempts => 14,
            SettingsKey::UplinkPort => 15,
            SettingsKey::DevNonce => 16,
        }
    }

    /// The four per-slot keys for a sensor slot.
    #[must_use]
    pub const fn sensor_keys(slot: SensorSlot) -> SensorKeys {
        match slot {
            SensorSlot::One => SensorKeys {
                enabled: SettingsKey::Sensor1Enabled,
                kind: SettingsKey::Sensor1Kind,
                supply: SettingsKey::Sensor1Supply,
                period: SettingsKey::Sensor1Period,
            },
            SensorSlot::Two => SensorKeys {
                enabled: SettingsKey::Sensor2Enabled,
                kind: SettingsKey::Sensor2Kind,
                supply: SettingsKey::Sensor2Supply,
                period: SettingsKey::Sensor2Period,
            },
        }
    }
}

/// Settings keys backing one sensor slot.
#[derive(Copy, Clone, Debug)]
pub struct SensorKeys {
    pub enabled: SettingsKey,
    pub kind: SettingsKey,
    pub supply: SettingsKey,
    pub period: SettingsKey,
}

/// Errors surfaced by settings persistence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PersistError<E> {
    /// The store backend failed.
    Store(E),
    /// A value did not fit or decode as a settings record.
    Codec,
}

impl<E: fmt::Debug> fmt::Display for PersistError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Store(inner) => write!(f, "settings store fault: {inner:?}"),
            PersistError::Codec => f.write_str("settings record codec failure"),
        }
    }
}

fn write_value<S, T>(store: &mut S, key: SettingsKey, value: &T) -> Result<(), PersistError<S::Error>>
where
    S: SettingsStore,
    T: Serialize,
{
    let mut buf = [0u8; MAX_RECORD_LEN];
    let used = postcard::to_slice(value, &mut buf).map_err(|_| PersistError::Codec)?;
    store
        .write_record(key.address(), used)
        .map_err(PersistError::Store)
}

fn load_or_heal<S, T>(
    store: &mut S,
    key: SettingsKey,
    value: &mut T,
) -> Result<(), PersistError<S::Error>>
where
    S: SettingsStore,
    T: Serialize + for<'de> Deserialize<'de>,
{
    let mut buf = [0u8; MAX_RECORD_LEN];
    let record = store
        .read_record(key.address(), &mut buf)
        .map_err(PersistError::Store)?;

    match record {
        Some(len) => match postcard::from_bytes::<T>(&buf[..len]) {
            Ok(decoded) => {
                *value = decoded;
                Ok(())
            }
            // Undecodable record: keep the default and heal the store.
            Err(_) => write_value(store, key, value),
        },
        None => write_value(store, key, value),
    }
}

/// Loads the full configuration at boot, healing missing records.
pub fn load_config<S>(store: &mut S) -> Result<NodeConfig, PersistError<S::Error>>
where
    S: SettingsStore,
{
    let mut config = NodeConfig::defaults();

    for slot in SensorSlot::ALL {
        let keys = SettingsKey::sensor_keys(slot);
        let sensor = config.sensor_mut(slot);
        load_or_heal(store, keys.enabled, &mut sensor.enabled)?;
        load_or_heal(store, keys.kind, &mut sensor.kind)?;
        load_or_heal(store, keys.supply, &mut sensor.supply)?;
        load_or_heal(store, keys.period, &mut sensor.period_minutes)?;
    }

    let radio = &mut config.radio;
    load_or_heal(store, SettingsKey::RadioEnabled, &mut radio.enabled)?;
    load_or_heal(store, SettingsKey::RadioPeriod, &mut radio.period_minutes)?;
    load_or_heal(store, SettingsKey::DevEui, &mut radio.dev_eui)?;
    load_or_heal(store, SettingsKey::JoinEui, &mut radio.join_eui)?;
    load_or_heal(store, SettingsKey::AppKey, &mut radio.app_key)?;
    load_or_heal(store, SettingsKey::JoinAttempts, &mut radio.join_attempts)?;
    load_or_heal(store, SettingsKey::SendAttempts, &mut radio.send_attempts)?;
    load_or_heal(store, SettingsKey::UplinkPort, &mut radio.port)?;
    load_or_heal(store, SettingsKey::DevNonce, &mut radio.dev_nonce)?;

    Ok(config)
}

/// Persists the current value of one configuration field.
pub fn persist_key<S>(
    store: &mut S,
    config: &NodeConfig,
    key: SettingsKey,
) -> Result<(), PersistError<S::Error>>
where
    S: SettingsStore,
{
    match key {
        SettingsKey::Sensor1Enabled => {
            write_value(store, key, &config.sensor(SensorSlot::One).enabled)
        }
        SettingsKey::Sensor1Kind => write_value(store, key, &config.sensor(SensorSlot::One).kind),
        SettingsKey::Sensor1Supply => {
            write_value(store, key, &config.sensor(SensorSlot::One).supply)
        }
        SettingsKey::Sensor1Period => {
            write_value(store, key, &config.sensor(SensorSlot::One).period_minutes)
        }
        SettingsKey::Sensor2Enabled => {
            write_value(store, key, &config.sensor(SensorSlot::Two).enabled)
        }
        SettingsKey::Sensor2Kind => write_value(store, key, &config.sensor(SensorSlot::Two).kind),
        SettingsKey::Sensor2Supply => {
            write_value(store, key, &config.sensor(SensorSlot::Two).supply)
        }
        SettingsKey::Sensor2Period => {
            write_value(store, key, &config.sensor(SensorSlot::Two).period_minutes)
        }
        SettingsKey::RadioEnabled => write_value(store, key, &config.radio.enabled),
        SettingsKey::RadioPeriod => write_value(store, key, &config.radio.period_minutes),
        SettingsKey::DevEui => write_value(store, key, &config.radio.dev_eui),
        SettingsKey::JoinEui => write_value(store, key, &config.radio.join_eui),
        SettingsKey::AppKey => write_value(store, key, &config.radio.app_key),
        SettingsKey::JoinAttempts => write_value(store, key, &config.radio.join_attempts),
        SettingsKey::SendAttempts => write_value(store, key, &config.radio.send_attempts),
        SettingsKey::UplinkPort => write_value(store, key, &config.radio.port),
        SettingsKey::DevNonce => write_value(store, key, &config.radio.dev_nonce),
    }
}

/// Number of record slots the in-memory store holds (next power of two
/// above the key count, as the index map requires).
const MEMORY_STORE_CAPACITY: usize = 32;

/// Errors surfaced by [`MemoryStore`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryStoreError {
    /// Record exceeds [`MAX_RECORD_LEN`].
    RecordTooLong,
    /// The store ran out of record slots.
    Full,
    /// Failure injected by a test.
    Injected,
}

/// In-memory settings store for tests and the emulator.
pub struct MemoryStore {
    records: FnvIndexMap<u16, Vec<u8, MAX_RECORD_LEN>, MEMORY_STORE_CAPACITY>,
    fail_writes: bool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: FnvIndexMap::new(),
            fail_writes: false,
        }
    }

    /// Makes every subsequent write fail with [`MemoryStoreError::Injected`].
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsStore for MemoryStore {
    type Error = MemoryStoreError;

    fn read_record(&mut self, address: u16, buf: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        match self.records.get(&address) {
            Some(record) => {
                if record.len() > buf.len() {
                    return Err(MemoryStoreError::RecordTooLong);
                }
                buf[..record.len()].copy_from_slice(record);
                Ok(Some(record.len()))
            }
            None => Ok(None),
        }
    }

    fn write_record(&mut self, address: u16, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MemoryStoreError::Injected);
        }
        let mut record = Vec::new();
        record
            .extend_from_slice(bytes)
            .map_err(|_| MemoryStoreError::RecordTooLong)?;
        match self.records.insert(address, record) {
            Ok(_) => Ok(()),
            Err(_) => Err(MemoryStoreError::Full),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SensorKind, SupplyVoltage};

    #[test]
    fn first_boot_heals_every_record() {
        let mut store = MemoryStore::new();
        let config = load_config(&mut store).unwrap();

        assert_eq!(config, NodeConfig::defaults());
        // One record per settings key was written back.
        assert_eq!(store.len(), 17);
    }

    #[test]
    fn persisted_fields_survive_reload() {
        let mut store = MemoryStore::new();
        let mut config = load_config(&mut store).unwrap();

        let sensor = config.sensor_mut(SensorSlot::One);
        sensor.enabled = true;
        sensor.kind = SensorKind::Pulse;
        sensor.supply = SupplyVoltage::V12;
        sensor.period_minutes = 5;
        config.radio.dev_nonce = 41;

        for key in [
            SettingsKey::Sensor1Enabled,
            SettingsKey::Sensor1Kind,
            SettingsKey::Sensor1Supply,
            SettingsKey::Sensor1Period,
            SettingsKey::DevNonce,
        ] {
            persist_key(&mut store, &config, key).unwrap();
        }

        let reloaded = load_config(&mut store).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn corrupt_record_falls_back_to_default() {
        let mut store = MemoryStore::new();
        // A varint-encoded period can never legally be this record.
        store
            .write_record(SettingsKey::Sensor1Kind.address(), &[0xFF, 0xFF, 0xFF])
            .unwrap();

        let config = load_config(&mut store).unwrap();
        assert_eq!(config.sensor(SensorSlot::One).kind, SensorKind::None);

        // The store was healed in place.
        let mut buf = [0u8; MAX_RECORD_LEN];
        let len = store
            .read_record(SettingsKey::Sensor1Kind.address(), &mut buf)
            .unwrap()
            .unwrap();
        assert_eq!(
            postcard::from_bytes::<SensorKind>(&buf[..len]).unwrap(),
            SensorKind::None
        );
    }

    #[test]
    fn injected_write_failure_propagates() {
        let mut store = MemoryStore::new();
        let config = load_config(&mut store).unwrap();
        store.fail_writes(true);
        assert_eq!(
            persist_key(&mut store, &config, SettingsKey::DevNonce),
            Err(PersistError::Store(MemoryStoreError::Injected))
        );
    }
}
