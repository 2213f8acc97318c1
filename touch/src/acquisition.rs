//! Boundary between the engine and the charge-transfer hardware.

/// Raw counts of one acquisition cycle, one slot per electrode group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acquisition<const G: usize> {
    counts: [u16; G],
    /// Bit n set when slot n reached threshold before the maximum count
    completed: u32,
    max_count: u16,
}

impl<const G: usize> Acquisition<G> {
    pub const fn new() -> Self {
        assert!(G <= 32);
        Self {
            counts: [0; G],
            completed: 0,
            max_count: 0,
        }
    }

    /// Start a new cycle. Every slot reads as saturated until recorded.
    pub fn begin(&mut self, max_count: u16) {
        self.max_count = max_count;
        self.completed = 0;
        self.counts = [self.saturation(); G];
    }

    /// Count recorded for a slot whose burst hit the maximum cycle count
    pub fn saturation(&self) -> u16 {
        self.max_count.saturating_add(1)
    }

    /// Record a slot that reached threshold after `count` cycles
    pub fn record(&mut self, slot: usize, count: u16) {
        if let Some(c) = self.counts.get_mut(slot) {
            *c = count;
            self.completed |= 1 << slot;
        }
    }

    /// Record a slot that never reached threshold
    pub fn saturate(&mut self, slot: usize) {
        let saturation = self.saturation();
        if let Some(c) = self.counts.get_mut(slot) {
            *c = saturation;
            self.completed &= !(1 << slot);
        }
    }

    pub fn counts(&self) -> &[u16; G] {
        &self.counts
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn is_saturated(&self, slot: usize) -> bool {
        slot < G && self.completed & (1 << slot) == 0
    }
}

impl<const G: usize> Default for Acquisition<G> {
    fn default() -> Self {
        Self::new()
    }
}

/// Performs one acquisition cycle over every electrode group
///
/// Implementations must bound each burst by a maximum cycle count and mark
/// groups that hit it as saturated rather than waiting on them.
pub trait AcquisitionPort<const G: usize> {
    type Error;

    fn acquire(&mut self, out: &mut Acquisition<G>) -> Result<(), Self::Error>;
}
