//! GuC/HuC firmware redirection

mod engine;
pub mod slot;
pub mod store;

pub use engine::{BinaryDecision, DmaRequest, FirmwareEngine, LoadPhase, FIRMWARE_ALIGNMENT};
pub use slot::{FirmwareKind, FirmwareSlot, CSS_SIZE_OFFSET};
pub use store::{image_name, FirmwareStore};

/// Driver buffer object whose CPU mapping can be repointed.
///
/// `backing` is the CPU address the object currently reads from; the
/// redirection swaps it between the driver's allocation and a dummy.
pub trait MappedBuffer {
    fn backing(&self) -> usize;

    fn set_backing(&mut self, address: usize);

    /// Copies `image` into the current backing. False if it does not fit.
    fn fill(&mut self, image: &[u8]) -> bool;
}
