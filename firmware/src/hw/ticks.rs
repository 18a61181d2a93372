//! TIM2 tick counter and alarm channels.
//!
//! One 32-bit timer backs everything time-related: the free-running counter
//! the monotonic clock reads, the update interrupt that feeds the rollover
//! ledger, and three one-shot compare channels for the schedule alarms.
//! The ISR only flips atomics (`RolloverLedger::note_rollover`,
//! `ScheduleTable::on_alarm`); all real work stays in the polling task.

use core::ptr;

use embassy_stm32::pac;
use embassy_stm32::pac::interrupt;
use node_core::alarm::{AlarmChannel, AlarmTimer};
use node_core::clock::{RolloverLedger, TickCounter};
use node_core::schedule::ScheduleTable;
use portable_atomic::{AtomicPtr, Ordering};

/// Tick rate the counter is prescaled to.
pub const TICK_FREQUENCY_HZ: u32 = 1_000;

/// Full-scale 32-bit counter: one rollover every ~49.7 days at 1 kHz.
pub const COUNTER_TOP: u32 = u32::MAX;

/// Default HSI16 kernel clock feeding TIM2 out of reset.
const TIM_CLOCK_HZ: u32 = 16_000_000;

static TABLE: AtomicPtr<ScheduleTable> = AtomicPtr::new(ptr::null_mut());
static LEDGER: AtomicPtr<RolloverLedger> = AtomicPtr::new(ptr::null_mut());

/// Configures TIM2 and hooks the ISR references. Must run before the
/// first [`NodeTimer::start`].
pub fn init(table: &'static ScheduleTable, ledger: &'static RolloverLedger) {
    TABLE.store(ptr::from_ref(table).cast_mut(), Ordering::Release);
    LEDGER.store(ptr::from_ref(ledger).cast_mut(), Ordering::Release);

    pac::RCC.apbenr1().modify(|w| w.set_tim2en(true));

    let tim = pac::TIM2;
    tim.cr1().modify(|w| w.set_cen(false));
    #[allow(clippy::cast_possible_truncation)]
    tim.psc().write(|w| w.set_psc((TIM_CLOCK_HZ / TICK_FREQUENCY_HZ - 1) as u16));
    tim.arr().write(|w| w.set_arr(COUNTER_TOP));
    tim.cnt().write(|w| w.set_cnt(0));
    // Latch the prescaler, then drop the update flag it raised.
    tim.egr().write(|w| w.set_ug(true));
    tim.sr().modify(|w| w.set_uif(false));
    tim.dier().modify(|w| w.set_uie(true));

    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM2);
    }
}

fn now_seconds(ledger: &RolloverLedger) -> u32 {
    ledger.seconds() + pac::TIM2.cnt().read().cnt() / TICK_FREQUENCY_HZ
}

#[interrupt]
fn TIM2() {
    let tim = pac::TIM2;
    let sr = tim.sr().read();

    // References are published before the counter starts.
    let table = unsafe { TABLE.load(Ordering::Acquire).as_ref() };
    let ledger = unsafe { LEDGER.load(Ordering::Acquire).as_ref() };
    let (Some(table), Some(ledger)) = (table, ledger) else {
        tim.sr().modify(|w| {
            w.set_uif(false);
            for index in 0..3 {
                w.set_ccif(index, false);
            }
        });
        return;
    };

    if sr.uif() {
        tim.sr().modify(|w| w.set_uif(false));
        ledger.note_rollover(COUNTER_TOP, TICK_FREQUENCY_HZ);
    }

    for channel in AlarmChannel::ALL {
        let index = channel.as_index();
        if sr.ccif(index) {
            tim.sr().modify(|w| w.set_ccif(index, false));
            // One-shot: the schedule registry re-arms explicitly.
            tim.dier().modify(|w| w.set_ccie(index, false));
            table.on_alarm(channel, now_seconds(ledger));
        }
    }
}

/// Handle over the shared TIM2 implementing both timer capabilities.
///
/// Cheap to clone; the polling task owns one instance for the clock and
/// one for the scheduler, mirroring how the emulator shares its virtual
/// counter.
#[derive(Copy, Clone)]
pub struct NodeTimer;

impl NodeTimer {
    /// Creates a handle. [`init`] must have run first.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn ready() -> bool {
        !TABLE.load(Ordering::Acquire).is_null()
    }
}

impl Default for NodeTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors surfaced by the TIM2 adapters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerError {
    /// [`init`] has not run.
    NotReady,
}

impl TickCounter for NodeTimer {
    type Error = TimerError;

    fn frequency_hz(&self) -> u32 {
        TICK_FREQUENCY_HZ
    }

    fn top_value(&self) -> u32 {
        COUNTER_TOP
    }

    fn now_ticks(&self) -> Result<u32, TimerError> {
        if !Self::ready() {
            return Err(TimerError::NotReady);
        }
        Ok(pac::TIM2.cnt().read().cnt())
    }

    fn start(&mut self) -> Result<(), TimerError> {
        if !Self::ready() {
            return Err(TimerError::NotReady);
        }
        pac::TIM2.cr1().modify(|w| w.set_cen(true));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TimerError> {
        pac::TIM2.cr1().modify(|w| w.set_cen(false));
        pac::TIM2.cnt().write(|w| w.set_cnt(0));
        Ok(())
    }
}

impl AlarmTimer for NodeTimer {
    type Error = TimerError;

    fn frequency_hz(&self) -> u32 {
        TICK_FREQUENCY_HZ
    }

    fn top_value(&self) -> u32 {
        COUNTER_TOP
    }

    fn arm(&mut self, channel: AlarmChannel, ticks: u32) -> Result<(), TimerError> {
        if !Self::ready() {
            return Err(TimerError::NotReady);
        }
        let tim = pac::TIM2;
        let index = channel.as_index();
        let deadline = tim.cnt().read().cnt().wrapping_add(ticks);

        // Overwrite any alarm already outstanding on the channel.
        tim.dier().modify(|w| w.set_ccie(index, false));
        tim.ccr(index).write(|w| w.set_ccr(deadline));
        tim.sr().modify(|w| w.set_ccif(index, false));
        tim.dier().modify(|w| w.set_ccie(index, true));
        Ok(())
    }

    fn cancel(&mut self, channel: AlarmChannel) -> Result<(), TimerError> {
        let tim = pac::TIM2;
        let index = channel.as_index();
        tim.dier().modify(|w| w.set_ccie(index, false));
        tim.sr().modify(|w| w.set_ccif(index, false));
        Ok(())
    }
}
