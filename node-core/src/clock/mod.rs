//! Monotonic overflow-aware clock over a free-running hardware counter.
//!
//! The hardware counter wraps at a fixed top value, so elapsed time is split
//! into two parts: whole seconds accumulated by the rollover interrupt
//! ([`RolloverLedger`]) and the seconds represented by the live tick value.
//! The ledger is interior-atomic so the rollover ISR can bump it without
//! locking while the polling context reads it.

use core::fmt;

use portable_atomic::{AtomicU32, Ordering};

use crate::Seconds;

/// Capability trait for the free-running hardware counter.
///
/// Implementations wrap a real timer peripheral on the MCU or a virtual
/// counter in the emulator. The counter counts from zero up to
/// `top_value()` inclusive and then wraps, invoking the platform's rollover
/// hook (which must forward to [`RolloverLedger::note_rollover`]).
pub trait TickCounter {
    /// Backend-specific failure type.
    type Error;

    /// Counter frequency in ticks per second. Must be non-zero.
    fn frequency_hz(&self) -> u32;

    /// Highest tick value reached before the counter wraps to zero.
    fn top_value(&self) -> u32;

    /// Reads the live tick value.
    fn now_ticks(&self) -> Result<u32, Self::Error>;

    /// Starts the counter. Fails when the underlying device is not ready.
    fn start(&mut self) -> Result<(), Self::Error>;

    /// Stops the counter.
    fn stop(&mut self) -> Result<(), Self::Error>;
}

/// Seconds accumulated across counter rollovers.
///
/// Written only by the rollover interrupt (via [`note_rollover`]) and by
/// [`MonotonicClock::reset`]; read everywhere else. One ledger instance
/// backs one counter; the owner places it wherever the ISR can reach it
/// (a static in firmware, a local in tests).
///
/// [`note_rollover`]: RolloverLedger::note_rollover
pub struct RolloverLedger {
    seconds: AtomicU32,
}

impl RolloverLedger {
    /// Creates a ledger with no accumulated rollovers.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            seconds: AtomicU32::new(0),
        }
    }

    /// Accounts for one counter wrap. ISR context: O(1), lock-free.
    pub fn note_rollover(&self, top_value: u32, frequency_hz: u32) {
        let span = top_value / frequency_hz + 1;
        self.seconds.fetch_add(span, Ordering::Relaxed);
    }

    /// Returns the seconds accumulated by rollovers so far.
    pub fn seconds(&self) -> Seconds {
        self.seconds.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.seconds.store(0, Ordering::Relaxed);
    }
}

impl Default for RolloverLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors surfaced by the clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockError {
    /// The counter device rejected a start/stop/read request.
    CounterFault,
    /// The counter reports a zero tick frequency.
    ZeroFrequency,
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::CounterFault => f.write_str("counter device fault"),
            ClockError::ZeroFrequency => f.write_str("counter frequency is zero"),
        }
    }
}

/// Monotonic clock combining the rollover ledger with the live tick value.
pub struct MonotonicClock<'l, C> {
    counter: C,
    ledger: &'l RolloverLedger,
}

impl<'l, C> MonotonicClock<'l, C>
where
    C: TickCounter,
{
    /// Configures and starts the counter.
    ///
    /// A counter that is not ready is a fatal boot error; the caller is
    /// expected to move the application into its error state.
    pub fn new(mut counter: C, ledger: &'l RolloverLedger) -> Result<Self, ClockError> {
        if counter.frequency_hz() == 0 {
            return Err(ClockError::ZeroFrequency);
        }
        counter.start().map_err(|_| ClockError::CounterFault)?;
        Ok(Self { counter, ledger })
    }

    /// Total elapsed seconds since boot (or the last [`reset`]).
    ///
    /// Non-decreasing across any number of counter rollovers. A rollover
    /// landing between the ledger and tick reads would pair a stale ledger
    /// with a wrapped counter, so the read retries until the ledger is
    /// stable around the tick sample.
    ///
    /// [`reset`]: MonotonicClock::reset
    pub fn elapsed_seconds(&self) -> Result<Seconds, ClockError> {
        loop {
            let rollovers = self.ledger.seconds();
            let ticks = self
                .counter
                .now_ticks()
                .map_err(|_| ClockError::CounterFault)?;
            if self.ledger.seconds() == rollovers {
                return Ok(rollovers + ticks / self.counter.frequency_hz());
            }
        }
    }

    /// Stops the counter, clears the ledger, and restarts from zero.
    ///
    /// Test/recovery use only; never part of the normal run-time flow.
    pub fn reset(&mut self) -> Result<(), ClockError> {
        self.counter.stop().map_err(|_| ClockError::CounterFault)?;
        self.ledger.clear();
        self.counter.start().map_err(|_| ClockError::CounterFault)
    }

    /// Shared handle to the rollover ledger backing this clock.
    #[must_use]
    pub fn ledger(&self) -> &'l RolloverLedger {
        self.ledger
    }

    /// Read access to the wrapped counter.
    pub fn counter(&self) -> &C {
        &self.counter
    }
}
