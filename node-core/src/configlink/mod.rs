//! Short-range configuration boundary.
//!
//! The wireless transport (BLE stack, GATT plumbing) lives outside this
//! crate; what it carries is this attribute catalog. Every write must be a
//! full, zero-offset write of the exact expected size — or a bounded name
//! string for the symbolic attributes — and is validated, applied in
//! memory, and persisted synchronously. Reads return the raw in-memory
//! representation, big-endian for multi-byte integers. A rejected write
//! mutates nothing.

use core::fmt;

use heapless::Vec;

use crate::app::NodeMode;
use crate::config::persist::{SettingsKey, SettingsStore, persist_key};
use crate::config::{NodeConfig, SensorKind, SensorSlot, SupplyVoltage};
use crate::power::BatterySnapshot;
use crate::uplink::FIRMWARE_VERSION;

/// Longest attribute value (canonical name strings).
pub const MAX_ATTRIBUTE_LEN: usize = 20;

/// Raw attribute value returned by reads.
pub type AttributeValue = Vec<u8, MAX_ATTRIBUTE_LEN>;

/// Attributes exposed to the configuration transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttributeId {
    /// Operating mode request: 0 = configuration, 1 = running.
    Mode,
    /// Set non-zero to request a network join while still configuring.
    JoinRequest,
    FirmwareVersion,
    BatteryMillivolts,
    TemperatureDecidegrees,
    SensorEnabled(SensorSlot),
    /// Compact sensor kind code (read-only; written via the name).
    SensorKindCode(SensorSlot),
    /// Canonical sensor kind name string.
    SensorTypeName(SensorSlot),
    /// Compact supply level code (read-only; written via the name).
    SensorSupplyCode(SensorSlot),
    /// Canonical supply level name string.
    SensorVoltageName(SensorSlot),
    SensorPeriodMinutes(SensorSlot),
    RadioEnabled,
    RadioPeriodMinutes,
    DevEui,
    JoinEui,
    AppKey,
    JoinAttempts,
    SendAttempts,
    UplinkPort,
    DevNonce,
}

impl AttributeId {
    /// Every attribute, in handle order.
    pub const ALL: [AttributeId; 26] = [
        AttributeId::Mode,
        AttributeId::JoinRequest,
        AttributeId::FirmwareVersion,
        AttributeId::BatteryMillivolts,
        AttributeId::TemperatureDecidegrees,
        AttributeId::SensorEnabled(SensorSlot::One),
        AttributeId::SensorKindCode(SensorSlot::One),
        AttributeId::SensorTypeName(SensorSlot::One),
        AttributeId::SensorSupplyCode(SensorSlot::One),
        AttributeId::SensorVoltageName(SensorSlot::One),
        AttributeId::SensorPeriodMinutes(SensorSlot::One),
        AttributeId::SensorEnabled(SensorSlot::Two),
        AttributeId::SensorKindCode(SensorSlot::Two),
        AttributeId::SensorTypeName(SensorSlot::Two),
        AttributeId::SensorSupplyCode(SensorSlot::Two),
        AttributeId::SensorVoltageName(SensorSlot::Two),
        AttributeId::SensorPeriodMinutes(SensorSlot::Two),
        AttributeId::RadioEnabled,
        AttributeId::RadioPeriodMinutes,
        AttributeId::DevEui,
        AttributeId::JoinEui,
        AttributeId::AppKey,
        AttributeId::JoinAttempts,
        AttributeId::SendAttempts,
        AttributeId::UplinkPort,
        AttributeId::DevNonce,
    ];

    /// Wire handle used by the configuration transport framing.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn code(self) -> u8 {
        let index = AttributeId::ALL
            .iter()
            .position(|attribute| *attribute == self)
            .unwrap_or(usize::MAX);
        index as u8
    }

    /// Resolves a wire handle back to the attribute.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        AttributeId::ALL.get(code as usize).copied()
    }
}

/// Mode values carried by the [`AttributeId::Mode`] attribute.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModeRequest {
    Configuration,
    Running,
}

/// State the configuration channel shares with the application loop.
///
/// The transport context writes it (under the owner's lock); the
/// application loop consumes it between poll passes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LinkSession {
    pub requested_mode: Option<ModeRequest>,
    pub join_requested: bool,
}

impl LinkSession {
    /// Creates an idle session.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requested_mode: None,
            join_requested: false,
        }
    }

    /// Consumes the pending mode request, if any.
    pub fn take_mode_request(&mut self) -> Option<ModeRequest> {
        self.requested_mode.take()
    }
}

/// Why a link operation was rejected.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkError {
    /// The attribute cannot be written.
    ReadOnly,
    /// Writes must cover the whole value starting at offset zero.
    InvalidOffset,
    /// The write length does not match the attribute size.
    InvalidLength { expected: usize, got: usize },
    /// A symbolic attribute received an unrecognized name.
    UnknownName,
    /// The value is out of range for the attribute.
    BadValue,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::ReadOnly => f.write_str("attribute is read-only"),
            LinkError::InvalidOffset => f.write_str("partial writes are not supported"),
            LinkError::InvalidLength { expected, got } => {
                write!(f, "expected {expected} bytes, got {got}")
            }
            LinkError::UnknownName => f.write_str("unrecognized name"),
            LinkError::BadValue => f.write_str("value out of range"),
        }
    }
}

/// Result of an accepted write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WriteAck {
    /// Whether the synchronous persistence succeeded. A `false` here means
    /// the in-memory change stands but the store and memory disagree until
    /// the next successful write.
    pub persisted: bool,
}

fn expect_len(data: &[u8], expected: usize) -> Result<(), LinkError> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(LinkError::InvalidLength {
            expected,
            got: data.len(),
        })
    }
}

fn parse_bool(data: &[u8]) -> Result<bool, LinkError> {
    expect_len(data, 1)?;
    match data[0] {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(LinkError::BadValue),
    }
}

fn parse_u16(data: &[u8]) -> Result<u16, LinkError> {
    expect_len(data, 2)?;
    Ok(u16::from_be_bytes([data[0], data[1]]))
}

fn parse_name(data: &[u8]) -> Result<&str, LinkError> {
    if data.is_empty() || data.len() > MAX_ATTRIBUTE_LEN {
        return Err(LinkError::InvalidLength {
            expected: MAX_ATTRIBUTE_LEN,
            got: data.len(),
        });
    }
    core::str::from_utf8(data).map_err(|_| LinkError::UnknownName)
}

fn persist<S>(store: &mut S, config: &NodeConfig, key: SettingsKey) -> bool
where
    S: SettingsStore,
{
    persist_key(store, config, key).is_ok()
}

/// Applies one attribute write.
///
/// Validation happens before any mutation; a rejected write leaves the
/// configuration, the session, and the store untouched. Persistence
/// failures do not roll the in-memory change back; they are reported
/// through [`WriteAck::persisted`].
pub fn write_attribute<S>(
    attribute: AttributeId,
    offset: usize,
    data: &[u8],
    config: &mut NodeConfig,
    session: &mut LinkSession,
    store: &mut S,
) -> Result<WriteAck, LinkError>
where
    S: SettingsStore,
{
    if offset != 0 {
        return Err(LinkError::InvalidOffset);
    }

    let persisted = match attribute {
        AttributeId::Mode => {
            expect_len(data, 1)?;
            session.requested_mode = Some(match data[0] {
                0 => ModeRequest::Configuration,
                1 => ModeRequest::Running,
                _ => return Err(LinkError::BadValue),
            });
            true
        }
        AttributeId::JoinRequest => {
            session.join_requested = parse_bool(data)?;
            true
        }
        AttributeId::SensorEnabled(slot) => {
            let enabled = parse_bool(data)?;
            config.sensor_mut(slot).enabled = enabled;
            persist(store, config, SettingsKey::sensor_keys(slot).enabled)
        }
        AttributeId::SensorTypeName(slot) => {
            let kind = SensorKind::from_name(parse_name(data)?).ok_or(LinkError::UnknownName)?;
            config.sensor_mut(slot).kind = kind;
            persist(store, config, SettingsKey::sensor_keys(slot).kind)
        }
        AttributeId::SensorVoltageName(slot) => {
            let supply =
                SupplyVoltage::from_name(parse_name(data)?).ok_or(LinkError::UnknownName)?;
            config.sensor_mut(slot).supply = supply;
            persist(store, config, SettingsKey::sensor_keys(slot).supply)
        }
        AttributeId::SensorPeriodMinutes(slot) => {
            let minutes = parse_u16(data)?;
            config.sensor_mut(slot).period_minutes = minutes;
            persist(store, config, SettingsKey::sensor_keys(slot).period)
        }
        AttributeId::RadioEnabled => {
            config.radio.enabled = parse_bool(data)?;
            persist(store, config, SettingsKey::RadioEnabled)
        }
        AttributeId::RadioPeriodMinutes => {
            config.radio.period_minutes = parse_u16(data)?;
            persist(store, config, SettingsKey::RadioPeriod)
        }
        AttributeId::DevEui => {
            expect_len(data, 8)?;
            config.radio.dev_eui.copy_from_slice(data);
            persist(store, config, SettingsKey::DevEui)
        }
        AttributeId::JoinEui => {
            expect_len(data, 8)?;
            config.radio.join_eui.copy_from_slice(data);
            persist(store, config, SettingsKey::JoinEui)
        }
        AttributeId::AppKey => {
            expect_len(data, 16)?;
            config.radio.app_key.copy_from_slice(data);
            persist(store, config, SettingsKey::AppKey)
        }
        AttributeId::JoinAttempts => {
            expect_len(data, 1)?;
            if data[0] == 0 {
                return Err(LinkError::BadValue);
            }
            config.radio.join_attempts = data[0];
            persist(store, config, SettingsKey::JoinAttempts)
        }
        AttributeId::SendAttempts => {
            expect_len(data, 1)?;
            if data[0] == 0 {
                return Err(LinkError::BadValue);
            }
            config.radio.send_attempts = data[0];
            persist(store, config, SettingsKey::SendAttempts)
        }
        AttributeId::UplinkPort => {
            expect_len(data, 1)?;
            config.radio.port = data[0];
            persist(store, config, SettingsKey::UplinkPort)
        }
        AttributeId::FirmwareVersion
        | AttributeId::BatteryMillivolts
        | AttributeId::TemperatureDecidegrees
        | AttributeId::SensorKindCode(_)
        | AttributeId::SensorSupplyCode(_)
        | AttributeId::DevNonce => return Err(LinkError::ReadOnly),
    };

    Ok(WriteAck { persisted })
}

/// Device-side state mirrored into read-only attributes.
#[derive(Copy, Clone, Debug)]
pub struct LinkTelemetry {
    pub mode: NodeMode,
    pub battery: BatterySnapshot,
    pub join_requested: bool,
}

impl Default for LinkTelemetry {
    fn default() -> Self {
        Self {
            mode: NodeMode::Configuration,
            battery: BatterySnapshot::default(),
            join_requested: false,
        }
    }
}

fn value_of(bytes: &[u8]) -> AttributeValue {
    let mut value = AttributeValue::new();
    // Every attribute fits MAX_ATTRIBUTE_LEN by construction.
    let _ = value.extend_from_slice(bytes);
    value
}

/// Reads the raw in-memory representation of one attribute.
#[must_use]
pub fn read_attribute(
    attribute: AttributeId,
    config: &NodeConfig,
    telemetry: &LinkTelemetry,
) -> AttributeValue {
    match attribute {
        AttributeId::Mode => value_of(&[telemetry.mode.as_index() as u8]),
        AttributeId::JoinRequest => value_of(&[u8::from(telemetry.join_requested)]),
        AttributeId::FirmwareVersion => value_of(&[
            FIRMWARE_VERSION.major,
            FIRMWARE_VERSION.minor,
            FIRMWARE_VERSION.patch,
        ]),
        AttributeId::BatteryMillivolts => value_of(&telemetry.battery.millivolts.to_be_bytes()),
        AttributeId::TemperatureDecidegrees => {
            value_of(&telemetry.battery.temperature_dd.to_be_bytes())
        }
        AttributeId::SensorEnabled(slot) => value_of(&[u8::from(config.sensor(slot).enabled)]),
        AttributeId::SensorKindCode(slot) => value_of(&[config.sensor(slot).kind.code()]),
        AttributeId::SensorTypeName(slot) => value_of(config.sensor(slot).kind.name().as_bytes()),
        AttributeId::SensorSupplyCode(slot) => value_of(&[config.sensor(slot).supply.code()]),
        AttributeId::SensorVoltageName(slot) => {
            value_of(config.sensor(slot).supply.name().as_bytes())
        }
        AttributeId::SensorPeriodMinutes(slot) => {
            value_of(&config.sensor(slot).period_minutes.to_be_bytes())
        }
        AttributeId::RadioEnabled => value_of(&[u8::from(config.radio.enabled)]),
        AttributeId::RadioPeriodMinutes => value_of(&config.radio.period_minutes.to_be_bytes()),
        AttributeId::DevEui => value_of(&config.radio.dev_eui),
        AttributeId::JoinEui => value_of(&config.radio.join_eui),
        AttributeId::AppKey => value_of(&config.radio.app_key),
        AttributeId::JoinAttempts => value_of(&[config.radio.join_attempts]),
        AttributeId::SendAttempts => value_of(&[config.radio.send_attempts]),
        AttributeId::UplinkPort => value_of(&[config.radio.port]),
        AttributeId::DevNonce => value_of(&config.radio.dev_nonce.to_be_bytes()),
    }
}
