//! Acquisition port for the STM32 Touch Sensing Controller.
//!
//! The controller counts every enabled group at once, but only one IO per
//! group can be measured at a time. Electrodes sharing a group are spread
//! over several [`Burst`]s, which the port runs back to back on each
//! acquisition.
//!
//! The registers are reached through the PAC pointer rather than an owned
//! peripheral, so the application's HAL and this crate don't need to agree
//! on a PAC version. Nothing else may touch the TSC while a port exists.

#[cfg(feature = "stm32f0x1")]
use stm32f0::stm32f0x1 as pac;
#[cfg(feature = "stm32f303")]
use stm32f3::stm32f303 as pac;

use log::trace;

use crate::acquisition::{Acquisition, AcquisitionPort};

/// Analog IO groups handled by the port
pub const GROUPS: usize = 6;

/// One TSC IO, numbered as in the reference manual: `G<group>_IO<io>`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Channel {
    group: u8,
    io: u8,
}

impl Channel {
    pub const fn new(group: u8, io: u8) -> Self {
        assert!(group >= 1 && group as usize <= GROUPS);
        assert!(io >= 1 && io <= 4);
        Self { group, io }
    }

    pub const fn group(&self) -> u8 {
        self.group
    }

    pub const fn io(&self) -> u8 {
        self.io
    }

    /// Bit of this IO in the IOSCR/IOCCR layout
    const fn mask(&self) -> u32 {
        1 << ((self.group as u32 - 1) * 4 + self.io as u32 - 1)
    }
}

/// The set of electrodes measured together in one charge-transfer burst
///
/// Each measured electrode fills one acquisition slot. Slots are numbered
/// in increasing group order within a burst, and bursts follow each other.
#[derive(Clone, Copy, Debug)]
pub struct Burst {
    // Per group: the sampling capacitor IO in bits 7:4, the measured IO in bits 3:0
    groups: [u8; GROUPS],
}

impl Burst {
    pub const fn new() -> Self {
        Self { groups: [0; GROUPS] }
    }

    /// Measure `electrode` against the sampling capacitor on `sample`
    pub const fn measure(mut self, electrode: Channel, sample: Channel) -> Self {
        assert!(electrode.group == sample.group);
        assert!(electrode.io != sample.io);
        let g = electrode.group as usize - 1;
        assert!(self.groups[g] == 0);
        self.groups[g] = (sample.io << 4) | electrode.io;
        self
    }

    /// Number of slots this burst fills
    pub const fn len(&self) -> usize {
        let mut n = 0;
        let mut g = 0;
        while g < GROUPS {
            if self.groups[g] != 0 {
                n += 1;
            }
            g += 1;
        }
        n
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enabled groups, 1-based, in slot order
    fn enabled(&self) -> impl Iterator<Item = u8> + '_ {
        self.groups.iter().enumerate().filter(|(_, g)| **g != 0).map(|(i, _)| i as u8 + 1)
    }

    /// IOGCSR, IOSCR and IOCCR values selecting this burst's IOs
    fn registers(&self) -> (u32, u32, u32) {
        let mut iogcsr = 0;
        let mut ioscr = 0;
        let mut ioccr = 0;
        for group in self.enabled() {
            let pair = self.groups[group as usize - 1];
            iogcsr |= 1 << (group - 1);
            ioscr |= Channel::new(group, pair >> 4).mask();
            ioccr |= Channel::new(group, pair & 0xf).mask();
        }
        (iogcsr, ioscr, ioccr)
    }
}

impl Default for Burst {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockPrescaler {
    Div1,
    Div2,
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
}

/// Maximum number of transfer cycles before a group is given up on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MaxCount {
    C255,
    C511,
    C1023,
    C2047,
    C4095,
    C8191,
    C16383,
}

impl MaxCount {
    pub const fn count(&self) -> u16 {
        (256u32 << (*self as u32)) as u16 - 1
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TscConfig {
    pub prescaler: ClockPrescaler,
    pub max_count: MaxCount,
    /// Charge transfer pulse high and low times, in 1..=16 TSC clock cycles
    pub pulse_high: u8,
    pub pulse_low: u8,
    /// Spread spectrum deviation in 0..=127 cycles, or None to disable it
    pub spread_spectrum: Option<u8>,
}

impl TscConfig {
    pub const fn default() -> Self {
        Self {
            prescaler: ClockPrescaler::Div16,
            max_count: MaxCount::C8191,
            pulse_high: 2,
            pulse_low: 2,
            spread_spectrum: Some(16),
        }
    }
}

pub const DEFAULT_TSC_CONFIG: TscConfig = TscConfig::default();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TscError {
    /// An acquisition started elsewhere is still running
    Busy,
    /// The bursts fill a different number of slots than the engine reads
    Slots { expected: usize, configured: usize },
}

struct Tsc {
    regs: &'static pac::tsc::RegisterBlock,
    max_count: u16,
}

impl Tsc {
    fn new(config: &TscConfig) -> Self {
        assert!((1..=16).contains(&config.pulse_high) && (1..=16).contains(&config.pulse_low));

        let rcc = unsafe { &*pac::RCC::ptr() };
        rcc.ahbenr.modify(|_, w| w.tscen().set_bit());
        rcc.ahbrstr.modify(|_, w| w.tscrst().set_bit());
        rcc.ahbrstr.modify(|_, w| w.tscrst().clear_bit());

        let regs = unsafe { &*pac::TSC::ptr() };
        regs.cr.write(|w| unsafe {
            w.ctph().bits(config.pulse_high - 1)
                .ctpl().bits(config.pulse_low - 1)
                .sse().bit(config.spread_spectrum.is_some())
                .ssd().bits(config.spread_spectrum.unwrap_or(0) & 0x7f)
                .pgpsc().bits(config.prescaler as u8)
                .mcv().bits(config.max_count as u8)
                .tsce().set_bit()
        });

        Self {
            regs,
            max_count: config.max_count.count(),
        }
    }

    fn is_busy(&self) -> bool {
        self.regs.cr.read().start().bit_is_set()
    }

    fn start(&mut self, burst: &Burst) {
        let (iogcsr, ioscr, ioccr) = burst.registers();
        self.regs.iogcsr.write(|w| unsafe { w.bits(iogcsr) });
        self.regs.ioscr.write(|w| unsafe { w.bits(ioscr) });
        self.regs.ioccr.write(|w| unsafe { w.bits(ioccr) });

        self.regs.icr.write(|w| w.eoaic().set_bit().mceic().set_bit());
        // Discharge the caps before the transfer starts
        self.regs.cr.modify(|_, w| w.iodef().clear_bit());
        self.regs.cr.modify(|_, w| w.start().set_bit());
    }

    /// True on end of acquisition or max count error
    fn is_finished(&self) -> bool {
        let isr = self.regs.isr.read();
        isr.eoaf().bit_is_set() || isr.mcef().bit_is_set()
    }

    /// Count of a group from the last burst, or None if it hit the max count
    fn read_group(&self, group: u8) -> Option<u16> {
        // Status bits are only set for groups that completed
        let status = self.regs.iogcsr.read().bits() >> 16;
        if status & (1 << (group - 1)) == 0 {
            return None;
        }
        let count = match group {
            1 => self.regs.iog1cr.read().cnt().bits(),
            2 => self.regs.iog2cr.read().cnt().bits(),
            3 => self.regs.iog3cr.read().cnt().bits(),
            4 => self.regs.iog4cr.read().cnt().bits(),
            5 => self.regs.iog5cr.read().cnt().bits(),
            6 => self.regs.iog6cr.read().cnt().bits(),
            _ => return None,
        };
        Some(count)
    }
}

/// Blocking acquisition port running `B` bursts per cycle
pub struct TscPort<const B: usize> {
    tsc: Tsc,
    bursts: [Burst; B],
}

impl<const B: usize> TscPort<B> {
    /// Take over the TSC. Enables and resets its clock.
    pub fn new(config: &TscConfig, bursts: [Burst; B]) -> Self {
        Self {
            tsc: Tsc::new(config),
            bursts,
        }
    }

    /// Number of acquisition slots filled per cycle
    pub fn slots(&self) -> usize {
        self.bursts.iter().map(|b| b.len()).sum()
    }

    pub fn max_count(&self) -> u16 {
        self.tsc.max_count
    }
}

impl<const B: usize, const G: usize> AcquisitionPort<G> for TscPort<B> {
    type Error = TscError;

    fn acquire(&mut self, out: &mut Acquisition<G>) -> Result<(), TscError> {
        let configured = self.slots();
        if configured != G {
            return Err(TscError::Slots { expected: G, configured });
        }
        if self.tsc.is_busy() {
            return Err(TscError::Busy);
        }

        out.begin(self.tsc.max_count);
        let mut slot = 0;
        for burst in self.bursts.iter() {
            self.tsc.start(burst);
            while !self.tsc.is_finished() {}

            for group in burst.enabled() {
                match self.tsc.read_group(group) {
                    Some(count) => out.record(slot, count),
                    None => {
                        trace!("tsc: group {} hit max count", group);
                        out.saturate(slot);
                    }
                }
                slot += 1;
            }
        }
        Ok(())
    }
}
