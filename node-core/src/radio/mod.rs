//! Long-range radio capability and the join retry procedure.
//!
//! The network stack itself (OTAA handshake, MAC, regional parameters) is a
//! black box behind the [`Radio`] trait; the core only sequences attempts,
//! advances the replay nonce, and decides what an exhausted retry budget
//! means for the calling state.

use core::fmt;

use embedded_hal::delay::DelayNs;

use crate::config::RadioConfig;
use crate::config::persist::{SettingsKey, SettingsStore, persist_key};
use crate::events::{EventDetail, EventRecorder, NodeEventKind};
use crate::{Seconds, config::NodeConfig};

/// Milliseconds between consecutive join attempts.
pub const JOIN_RETRY_DELAY_MS: u32 = 5_000;

/// Identity material used during the join handshake.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JoinParams {
    pub dev_eui: [u8; 8],
    pub join_eui: [u8; 8],
    pub app_key: [u8; 16],
}

impl JoinParams {
    /// Extracts the join identity from the radio configuration.
    #[must_use]
    pub const fn from_config(config: &RadioConfig) -> Self {
        Self {
            dev_eui: config.dev_eui,
            join_eui: config.join_eui,
            app_key: config.app_key,
        }
    }
}

/// Capability trait for the long-range radio backend.
///
/// `join` and `send` are extended synchronous operations; the backend owns
/// any internal timing the air protocol requires.
pub trait Radio {
    /// Backend-specific failure type.
    type Error;

    /// Whether a network session is currently established.
    fn is_joined(&self) -> bool;

    /// One blocking join attempt with the given replay nonce.
    fn join(&mut self, params: &JoinParams, dev_nonce: u16) -> Result<(), Self::Error>;

    /// Transmits one uplink payload on `port` with the configured number of
    /// confirmation attempts.
    fn send(
        &mut self,
        payload: &[u8],
        port: u8,
        confirm_attempts: u8,
    ) -> Result<(), Self::Error>;
}

/// Why the join procedure gave up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinError {
    /// Every configured attempt failed.
    Exhausted { attempts: u8 },
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::Exhausted { attempts } => {
                write!(f, "join failed after {attempts} attempts")
            }
        }
    }
}

/// Runs the join procedure with the configured retry budget.
///
/// The dev nonce advances and is persisted before every attempt, success or
/// failure, so a reboot can never replay a nonce the network may have seen.
/// A nonce persistence failure is recorded and the attempt proceeds (the
/// in-memory counter already advanced).
pub fn join_with_retries<R, S, D>(
    radio: &mut R,
    config: &mut NodeConfig,
    store: &mut S,
    delay: &mut D,
    events: &mut EventRecorder,
    now: Seconds,
) -> Result<(), JoinError>
where
    R: Radio,
    S: SettingsStore,
    D: DelayNs,
{
    if radio.is_joined() {
        return Ok(());
    }

    let attempts = config.radio.join_attempts.max(1);
    let params = JoinParams::from_config(&config.radio);

    for attempt in 0..attempts {
        let nonce = config.radio.advance_nonce();
        if persist_key(store, config, SettingsKey::DevNonce).is_err() {
            events.record_with(
                NodeEventKind::PersistFailed,
                EventDetail::Key(SettingsKey::DevNonce),
                now,
            );
        }

        match radio.join(&params, nonce) {
            Ok(()) => {
                events.record(NodeEventKind::Joined, now);
                return Ok(());
            }
            Err(_) => {
                events.record(NodeEventKind::JoinAttemptFailed, now);
                if attempt + 1 < attempts {
                    delay.delay_ms(JOIN_RETRY_DELAY_MS);
                }
            }
        }
    }

    events.record(NodeEventKind::JoinExhausted, now);
    Err(JoinError::Exhausted { attempts })
}
