//! Tick flags shared between the periodic interrupt and the engine.
//!
//! The interrupt calls [`Timebase::tick`] every 10 ms. The engine consumes
//! the flags with test-and-reset reads, each taken inside a critical section
//! so a tick landing between the read and the clear is never lost.

use core::cell::Cell;

use critical_section::Mutex;

/// Milliseconds between two calls to `tick`
pub const TICK_MS: u32 = 10;

#[derive(Clone, Copy, Debug, Default)]
struct Ticks {
    count: u32,
    ten_ms: bool,
    hundred_ms: bool,
    one_second: bool,
    credits: u16,
}

pub struct Timebase {
    ticks: Mutex<Cell<Ticks>>,
}

impl Timebase {
    pub const fn new() -> Self {
        Self {
            ticks: Mutex::new(Cell::new(Ticks {
                count: 0,
                ten_ms: false,
                hundred_ms: false,
                one_second: false,
                credits: 0,
            })),
        }
    }

    /// Advance by one 10 ms period. Call from the periodic interrupt.
    pub fn tick(&self) {
        critical_section::with(|cs| {
            let cell = self.ticks.borrow(cs);
            let mut ticks = cell.get();
            ticks.count = ticks.count.wrapping_add(1);
            ticks.ten_ms = true;
            ticks.credits = ticks.credits.saturating_add(1);
            if ticks.count % 10 == 0 {
                ticks.hundred_ms = true;
            }
            if ticks.count % 100 == 0 {
                ticks.one_second = true;
            }
            cell.set(ticks);
        });
    }

    fn take<R>(&self, f: impl FnOnce(&mut Ticks) -> R) -> R {
        critical_section::with(|cs| {
            let cell = self.ticks.borrow(cs);
            let mut ticks = cell.get();
            let result = f(&mut ticks);
            cell.set(ticks);
            result
        })
    }

    /// True once per 10 ms edge
    pub fn take_ten_ms(&self) -> bool {
        self.take(|t| core::mem::replace(&mut t.ten_ms, false))
    }

    /// True once per 100 ms edge
    pub fn take_hundred_ms(&self) -> bool {
        self.take(|t| core::mem::replace(&mut t.hundred_ms, false))
    }

    /// True once per 1 s edge
    pub fn take_one_second(&self) -> bool {
        self.take(|t| core::mem::replace(&mut t.one_second, false))
    }

    /// Number of 10 ms periods since the last call, resetting the count
    pub fn take_credits(&self) -> u16 {
        self.take(|t| core::mem::replace(&mut t.credits, 0))
    }

    /// Ticks since start, wrapping
    pub fn now(&self) -> u32 {
        critical_section::with(|cs| self.ticks.borrow(cs).get().count)
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::new()
    }
}
