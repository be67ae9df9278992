//! Interception progress
//!
//! Each hook group owns one bit. A bit is claimed under the subsystem lock
//! before the group is routed, so a second installer (another device
//! instance, a re-announced module) sees it set and backs off.

use bitflags::bitflags;

bitflags! {
    /// Hook groups that have been routed (or settled as not needed).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Progress: u32 {
        const PAVP_SESSION_ROUTED       = 1 << 0;
        const FRAMEBUFFER_INIT_ROUTED   = 1 << 1;
        const COMPUTE_LANE_COUNT_ROUTED = 1 << 2;
        const DRIVER_START_ROUTED       = 1 << 3;
        const GUC_FIRMWARE_ROUTED       = 1 << 4;
        const EVERYTHING_DONE = Self::PAVP_SESSION_ROUTED.bits()
            | Self::FRAMEBUFFER_INIT_ROUTED.bits()
            | Self::COMPUTE_LANE_COUNT_ROUTED.bits()
            | Self::DRIVER_START_ROUTED.bits()
            | Self::GUC_FIRMWARE_ROUTED.bits();
    }
}

/// Progress mask, monotonic once a group has routed anything. Lives inside
/// the locked subsystem state.
#[derive(Debug, Default)]
pub struct ProgressState {
    done: Progress,
}

impl ProgressState {
    pub const fn new() -> Self {
        Self {
            done: Progress::empty(),
        }
    }

    pub fn current(&self) -> Progress {
        self.done
    }

    pub fn contains(&self, bits: Progress) -> bool {
        self.done.contains(bits)
    }

    /// Sets `bit` if it was clear. False means someone else already owns
    /// the installation.
    pub fn claim(&mut self, bit: Progress) -> bool {
        if self.done.contains(bit) {
            return false;
        }
        self.done.insert(bit);
        true
    }

    /// Gives back a claim whose group ended up with nothing routed.
    pub(crate) fn release(&mut self, bit: Progress) {
        self.done.remove(bit);
    }

    /// Marks a group finished without routing anything.
    pub fn settle(&mut self, bits: Progress) {
        self.done.insert(bits);
    }

    pub fn is_complete(&self) -> bool {
        self.done.contains(Progress::EVERYTHING_DONE)
    }

    /// Only for subsystem teardown.
    pub(crate) fn reset(&mut self) {
        self.done = Progress::empty();
    }
}
