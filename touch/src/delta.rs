//! Delta computation: how far each measurement sits from its reference.
//!
//! A touch adds capacitance, which lowers the cycle count, so the delta is
//! taken as `reference - measurement` and is positive for a probable touch.

use crate::config::MAX_CHANNELS;
use crate::key::{ChannelRecord, Key};

fn clamp(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

pub fn channel_delta(channel: &ChannelRecord) -> i16 {
    clamp(channel.reference as i32 - channel.last as i32)
}

impl<'a> Key<'a> {
    /// Per-channel deltas. Channels a key does not use read as zero.
    pub fn channel_deltas(&self) -> [i16; MAX_CHANNELS] {
        let mut deltas = [0i16; MAX_CHANNELS];
        for (delta, channel) in deltas.iter_mut().zip(self.channels()) {
            *delta = channel_delta(channel);
        }
        deltas
    }

    /// Delta driving the state machine: the sum across every channel the key reads
    pub fn delta(&self) -> i16 {
        clamp(self.channels().iter().map(|c| channel_delta(c) as i32).sum())
    }
}
