#![no_main]
#![no_std]

use cortex_m;
use cortex_m_rt::{entry, exception};
use log::{debug, info, warn, LevelFilter};
use panic_halt as _;

use stm32f0xx_hal as hal;

use captouch::tsc::{Burst, Channel, TscPort, DEFAULT_TSC_CONFIG};
use captouch::{AcquisitionPort, Engine, EngineConfig, KeyConfig, Timebase, DEFAULT_ENGINE_CONFIG};

use crate::hal::pac;
use crate::hal::pac::interrupt;
use crate::hal::prelude::*;

mod serial;

// Both sliders share groups 2 and 3, so the forward slider gets its own burst.
// Slots 0-3 come from the first burst, 4-6 from the second.
static BURSTS: [Burst; 2] = [
    Burst::new()
        .measure(Channel::new(1, 1), Channel::new(1, 2)) // Rev 1
        .measure(Channel::new(2, 1), Channel::new(2, 3)) // Rev 2
        .measure(Channel::new(3, 2), Channel::new(3, 4)) // Rev 3
        .measure(Channel::new(6, 1), Channel::new(6, 2)), // Stop
    Burst::new()
        .measure(Channel::new(6, 3), Channel::new(6, 2)) // Fwd 1
        .measure(Channel::new(2, 2), Channel::new(2, 3)) // Fwd 2
        .measure(Channel::new(3, 3), Channel::new(3, 4)), // Fwd 3
];
const SLOTS: usize = 7;

const SLIDER: KeyConfig = KeyConfig::slider([0, 0, 0])
    .exclusion(1)
    .thresholds(60, 40, -40)
    .integrators(3, 2, 16)
    .resolution(100, 3);

static KEYS: [KeyConfig; 3] = [
    KeyConfig { groups: [0, 1, 2], ..SLIDER },
    KeyConfig { groups: [6, 4, 5], ..SLIDER },
    KeyConfig::key(3).thresholds(40, 25, -30).integrators(3, 2, 16),
];
static NAMES: [&str; 3] = ["rev", "fwd", "stop"];

static ENGINE_CONFIG: EngineConfig = DEFAULT_ENGINE_CONFIG;

static TIMEBASE: Timebase = Timebase::new();

#[entry]
fn main() -> ! {
    let dp = pac::Peripherals::take().unwrap();
    let cp = cortex_m::Peripherals::take().unwrap();

    let mut flash = dp.FLASH;
    let mut rcc = dp.RCC.configure().sysclk(48.mhz()).freeze(&mut flash);
    let gpioa = dp.GPIOA.split(&mut rcc);
    let gpiob = dp.GPIOB.split(&mut rcc);

    // A library requiring a critical section to set a gpio AF register is bad and I just won't.
    let fake_cs = unsafe { cortex_m::interrupt::CriticalSection::new() };

    // Initialize touch pins
    let _rev1 = gpioa.pa0.into_alternate_af3(&fake_cs);
    let _rev2 = gpioa.pa4.into_alternate_af3(&fake_cs);
    let _rev3 = gpiob.pb0.into_alternate_af3(&fake_cs);
    let _stop = gpiob.pb11.into_alternate_af3(&fake_cs);
    let _fwd1 = gpiob.pb13.into_alternate_af3(&fake_cs);
    let _fwd2 = gpioa.pa5.into_alternate_af3(&fake_cs);
    let _fwd3 = gpiob.pb1.into_alternate_af3(&fake_cs);
    let _g1_cap = gpioa.pa1.into_alternate_af3(&fake_cs);
    let _g2_cap = gpioa.pa6.into_alternate_af3(&fake_cs);
    let _g3_cap = gpiob.pb2.into_alternate_af3(&fake_cs);
    let _g6_cap = gpiob.pb12.into_alternate_af3(&fake_cs);

    let tx_pin = gpiob.pb6.into_alternate_af0(&fake_cs);
    let rx_pin = gpiob.pb7.into_alternate_af0(&fake_cs);
    let uart = hal::serial::Serial::usart1(dp.USART1, (tx_pin, rx_pin), 115200.bps(), &mut rcc);
    serial::uart1::init(uart, 4);
    serial::logger::init(LevelFilter::Info);

    let port = TscPort::new(&DEFAULT_TSC_CONFIG, BURSTS);
    let mut engine: Engine<'static, _, 3, SLOTS> =
        Engine::new(port, &ENGINE_CONFIG, &KEYS).unwrap();
    info!("touch: {} slots, max count {}", engine.port().slots(), engine.port().max_count());

    let mut syst = hal::timers::Timer::syst(cp.SYST, 100.hz(), &mut rcc);
    syst.listen(&hal::timers::Event::TimeOut);

    loop {
        if !TIMEBASE.take_ten_ms() {
            cortex_m::asm::wfi();
            continue;
        }

        match engine.poll(&TIMEBASE) {
            Ok(summary) => {
                if summary.any_changed() {
                    report(&mut engine);
                }
            }
            Err(e) => warn!("{}", e),
        }

        if TIMEBASE.take_hundred_ms() {
            let summary = engine.summary();
            debug!("states {:#010b} settings {:#07b}", summary.states, summary.settings.bits());
        }
    }
}

/// Log every key whose detection or position changed since the last report
fn report<P, const K: usize, const G: usize>(engine: &mut Engine<'_, P, K, G>)
where
    P: AcquisitionPort<G>,
{
    for (index, name) in NAMES.iter().enumerate() {
        let Some(status) = engine.take_status(index) else {
            continue;
        };
        if !status.changed {
            continue;
        }
        if let Some(pos) = status.position {
            info!("{}: {}", name, pos);
        } else if status.detected {
            info!("{}: pressed", name);
        } else {
            info!("{}: released", name);
        }
    }
}

#[exception]
fn SysTick() {
    TIMEBASE.tick();
}
