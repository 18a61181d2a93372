//! Embassy runtime: executor entry point and task wiring.

use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::RawRestoreState;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::bind_interrupts;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::peripherals::{ADC1, PA0, PA1, USART2};
use embassy_stm32::usart::{self, Uart};
use embassy_stm32::Peri;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Timer;
use static_cell::StaticCell;

use node_core::app::{NodeApp, NodeMode, Peripherals, poll_interval_ms};
use node_core::clock::{MonotonicClock, RolloverLedger};
use node_core::config::persist::load_config;
use node_core::config::{NodeConfig, SensorSlot};
use node_core::configlink::LinkSession;
use node_core::power::{BatterySnapshot, RailController};
use node_core::schedule::{ScheduleTable, Scheduler};

use crate::hw::afe::{AfeCore, AnalogSensors, VddBattery, pulse_task};
use crate::hw::flash::SettingsFlash;
use crate::hw::rails::BoostRail;
use crate::hw::ticks::{self, NodeTimer};
use crate::link;
use crate::modem::RadioModem;
use crate::status;
use crate::telemetry::EventMirror;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

bind_interrupts!(struct Irqs {
    USART2 => usart::InterruptHandler<USART2>;
});

/// Configuration, link session, store, and battery mirror shared between
/// the application loop and the configuration link task.
pub struct Shared {
    pub config: NodeConfig,
    pub session: LinkSession,
    pub store: SettingsFlash<'static>,
    pub battery: BatterySnapshot,
}

pub type SharedState = Mutex<ThreadModeRawMutex, Shared>;

static SCHEDULE_TABLE: ScheduleTable = ScheduleTable::new();
static ROLLOVER_LEDGER: RolloverLedger = RolloverLedger::new();
static SHARED: StaticCell<SharedState> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(hal::Config::default());

    ticks::init(&SCHEDULE_TABLE, &ROLLOVER_LEDGER);

    let region = Flash::new_blocking(p.FLASH)
        .into_blocking_regions()
        .bank1_region;
    let mut store = SettingsFlash::new(region);
    let (config, boot_ok) = match load_config(&mut store) {
        Ok(config) => (config, true),
        Err(_) => {
            defmt::error!("settings store unreadable at boot");
            (NodeConfig::defaults(), false)
        }
    };

    let shared: &'static SharedState = SHARED.init(Mutex::new(Shared {
        config,
        session: LinkSession::new(),
        store,
        battery: BatterySnapshot::default(),
    }));

    let link_uart = Uart::new(
        p.USART2,
        p.PA3,
        p.PA2,
        Irqs,
        p.DMA1_CH1,
        p.DMA1_CH2,
        usart::Config::default(),
    )
    .expect("configuration link UART");

    let modem_uart = Uart::new_blocking(p.USART1, p.PB7, p.PB6, usart::Config::default())
        .expect("radio modem UART");

    let rail1 = BoostRail::new(
        Output::new(p.PB0, Level::Low, Speed::Low),
        Output::new(p.PB1, Level::Low, Speed::Low),
        Output::new(p.PB2, Level::Low, Speed::Low),
    );
    let rail2 = BoostRail::new(
        Output::new(p.PA6, Level::Low, Speed::Low),
        Output::new(p.PA7, Level::Low, Speed::Low),
        Output::new(p.PA8, Level::Low, Speed::Low),
    );

    spawner
        .spawn(node_task(
            shared,
            p.ADC1,
            p.PA0,
            p.PA1,
            RadioModem::new(modem_uart),
            rail1,
            rail2,
            boot_ok,
        ))
        .expect("spawn node task");

    spawner
        .spawn(link::run(link_uart, shared))
        .expect("spawn configuration link task");

    spawner
        .spawn(status_task(Output::new(p.PA5, Level::Low, Speed::Low)))
        .expect("spawn status task");

    spawner
        .spawn(pulse_task(
            ExtiInput::new(p.PB4, p.EXTI4, Pull::Down),
            SensorSlot::One,
        ))
        .expect("spawn pulse counter 1");
    spawner
        .spawn(pulse_task(
            ExtiInput::new(p.PB5, p.EXTI5, Pull::Down),
            SensorSlot::Two,
        ))
        .expect("spawn pulse counter 2");

    core::future::pending::<()>().await;
}

#[embassy_executor::task]
#[allow(clippy::too_many_arguments)]
async fn node_task(
    shared: &'static SharedState,
    adc: Peri<'static, ADC1>,
    ain1: Peri<'static, PA0>,
    ain2: Peri<'static, PA1>,
    modem: RadioModem<'static>,
    rail1: BoostRail<'static>,
    rail2: BoostRail<'static>,
    boot_ok: bool,
) {
    if !boot_ok {
        status::record_mode(NodeMode::Error);
        loop {
            defmt::error!("node halted: settings store failed at boot");
            Timer::after_secs(60).await;
        }
    }

    let afe = RefCell::new(AfeCore::new(Adc::new(adc), ain1, ain2));

    let Ok(clock) = MonotonicClock::new(NodeTimer::new(), &ROLLOVER_LEDGER) else {
        status::record_mode(NodeMode::Error);
        loop {
            defmt::error!("node halted: tick counter failed at boot");
            Timer::after_secs(60).await;
        }
    };
    let mut sched = Scheduler::new(&SCHEDULE_TABLE, NodeTimer::new());

    let mut per = Peripherals {
        radio: modem,
        sensors: AnalogSensors::new(&afe),
        rails: [RailController::new(rail1), RailController::new(rail2)],
        battery: VddBattery::new(&afe),
        delay: embassy_time::Delay,
    };

    let mut app = NodeApp::new();
    let mut mirror = EventMirror::new();

    loop {
        let mode = {
            let mut guard = shared.lock().await;
            let state = &mut *guard;
            let mode = app.poll(
                &mut state.config,
                &mut state.session,
                &mut state.store,
                &clock,
                &mut sched,
                &mut per,
            );
            state.battery = app.battery();
            mode
        };

        status::record_mode(mode);
        status::record_battery(app.battery().millivolts);
        mirror.flush(&app.events);

        Timer::after_millis(u64::from(poll_interval_ms(mode))).await;
    }
}

#[embassy_executor::task]
async fn status_task(mut led: Output<'static>) {
    loop {
        let interval = status::blink_interval_ms(status::current_mode());
        if interval == 0 {
            // Error: solid on until power cycle.
            led.set_high();
            Timer::after_millis(250).await;
        } else {
            led.toggle();
            Timer::after_millis(interval).await;
        }
    }
}
