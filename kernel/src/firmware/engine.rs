//! Firmware redirection state machine
//!
//! Cold load: the loader entry opens a sequence, every shared-buffer
//! allocation inside it is the next slot (GuC, HuC, HuC signature, GuC public
//! key). Intercepted slots get a dummy buffer for the loader's own image while
//! the corrected image goes into the real backing. DMA transfers are matched
//! to slots by their own cursor, in upload order (HuC, then GuC), since the
//! loader may stage every buffer before the first transfer.
//!
//! Wake reload: no allocation is intercepted. DMA transfers are replayed from
//! the slots in the order recorded during the cold load.

use heapless::Vec as FixedVec;
use log::{debug, error, info, warn};

use super::slot::{FirmwareKind, FirmwareSlot};
use super::store::FirmwareStore;
use crate::host::CpuGeneration;
use crate::util::{align_up, IgfxError};

/// Slots whose image is DMA'd to the GPU, in the order the loader uploads
/// them. Signature and public key travel inside these transfers.
const UPLOAD_ORDER: [FirmwareKind; 2] = [FirmwareKind::HucBinary, FirmwareKind::GucBinary];

/// Firmware buffers are mapped with 64K granularity.
pub const FIRMWARE_ALIGNMENT: usize = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    /// First load: dummy-buffer substitution active.
    ColdLoad,
    /// Post-wake re-delivery: DMA replay only.
    WakeReload,
}

/// Outcome of `begin_binary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryDecision {
    PassThrough,
    Substitute {
        kind: FirmwareKind,
        /// Size to request from the original allocator.
        alloc_len: usize,
        /// Address of the dummy buffer to hand the loader.
        dummy: usize,
    },
}

/// Arguments of a host-to-GuC DMA command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRequest {
    pub gpu_address: u64,
    pub register: u32,
    pub length: u32,
    pub dma_type: u32,
}

pub struct FirmwareEngine {
    generation: CpuGeneration,
    slots: [FirmwareSlot; FirmwareKind::COUNT],
    phase: LoadPhase,
    suspended: bool,
    current_binary: Option<FirmwareKind>,
    current_dma: Option<FirmwareKind>,
    next_binary: usize,
    /// Slots already uploaded in the current cold load.
    uploaded: [bool; FirmwareKind::COUNT],
    dma_order: FixedVec<FirmwareKind, { FirmwareKind::COUNT }>,
    replay_cursor: usize,
    binary_begins: u32,
}

impl FirmwareEngine {
    pub fn new(generation: CpuGeneration, intercept: [bool; FirmwareKind::COUNT]) -> Self {
        Self {
            generation,
            slots: FirmwareKind::ALL.map(|kind| FirmwareSlot::new(kind, intercept[kind.index()])),
            phase: LoadPhase::Idle,
            suspended: false,
            current_binary: None,
            current_dma: None,
            next_binary: 0,
            uploaded: [false; FirmwareKind::COUNT],
            dma_order: FixedVec::new(),
            replay_cursor: 0,
            binary_begins: 0,
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn performing_firmware_load(&self) -> bool {
        self.phase == LoadPhase::ColdLoad && !self.suspended
    }

    pub fn current_binary(&self) -> Option<FirmwareKind> {
        self.current_binary
    }

    pub fn current_dma(&self) -> Option<FirmwareKind> {
        self.current_dma
    }

    pub fn slot(&self, kind: FirmwareKind) -> &FirmwareSlot {
        &self.slots[kind.index()]
    }

    /// Number of times the dummy-buffer substitution was entered.
    pub fn binary_begins(&self) -> u32 {
        self.binary_begins
    }

    /// Loader entry.
    pub fn begin_sequence(&mut self) {
        match self.phase {
            LoadPhase::WakeReload => {
                debug!("igfx: loader entered during wake reload, substitution bypassed");
            }
            LoadPhase::ColdLoad => {
                warn!("igfx: nested firmware load sequence");
            }
            LoadPhase::Idle => {
                self.phase = LoadPhase::ColdLoad;
                self.suspended = false;
                self.next_binary = 0;
                self.uploaded = [false; FirmwareKind::COUNT];
                self.dma_order.clear();
                self.clear_cursors();
            }
        }
    }

    /// Loader exit.
    pub fn end_sequence(&mut self) {
        if self.phase == LoadPhase::ColdLoad {
            self.phase = LoadPhase::Idle;
            self.suspended = false;
            self.clear_cursors();
            debug!("igfx: firmware load sequence complete");
        }
    }

    /// Shared-buffer allocation inside the loader: the buffer for the next slot.
    pub fn begin_binary(&mut self, requested: usize, store: &FirmwareStore) -> BinaryDecision {
        if !self.performing_firmware_load() {
            return BinaryDecision::PassThrough;
        }
        let Some(kind) = FirmwareKind::from_index(self.next_binary) else {
            return BinaryDecision::PassThrough;
        };
        self.next_binary += 1;
        self.current_binary = Some(kind);
        self.current_dma = None;

        let generation = self.generation;
        let slot = &mut self.slots[kind.index()];
        if !slot.intercept_enabled() {
            debug!("igfx: {} passes through", kind.name());
            return BinaryDecision::PassThrough;
        }

        let image = match store.image(kind, generation) {
            Ok(image) => image,
            Err(e) => {
                warn!("igfx: {} not replaced: {}", kind.name(), e);
                slot.disable();
                return BinaryDecision::PassThrough;
            }
        };
        if let Err(e) = slot.stage(image, requested) {
            error!("igfx: {} interception disabled: {}", kind.name(), e);
            slot.release();
            slot.disable();
            return BinaryDecision::PassThrough;
        }
        let Some(dummy) = slot.dummy_address() else {
            return BinaryDecision::PassThrough;
        };

        self.binary_begins += 1;
        let alloc_len = requested.max(align_up(image.len(), FIRMWARE_ALIGNMENT));
        info!(
            "igfx: substituting {} ({} bytes, loader asked for {})",
            kind.name(),
            image.len(),
            requested
        );
        BinaryDecision::Substitute {
            kind,
            alloc_len,
            dummy,
        }
    }

    /// The allocator returned `backing`; the buffer now points at the dummy.
    pub fn attach_backing(&mut self, kind: FirmwareKind, backing: usize) {
        self.slots[kind.index()].attach_backing(backing);
    }

    /// The allocator failed or the image could not be copied in.
    pub fn abandon(&mut self, kind: FirmwareKind) {
        self.slots[kind.index()].abandon();
    }

    /// Finds the slot whose dummy is currently installed at `address` and
    /// returns the real backing to put back.
    pub fn take_swapped(&mut self, address: usize) -> Option<(FirmwareKind, usize)> {
        self.slots
            .iter_mut()
            .find(|slot| slot.dummy_address() == Some(address))
            .and_then(|slot| slot.take_swapped().map(|backing| (slot.kind(), backing)))
    }

    pub fn record_gpu_address(&mut self, kind: FirmwareKind, address: u64) {
        debug!("igfx: {} mapped at {:#X}", kind.name(), address);
        self.slots[kind.index()].record_gpu_address(address);
    }

    /// Rewrites a DMA transfer to the corrected image. Anything that is not
    /// a substituted firmware transfer is returned unchanged.
    pub fn dma_transfer(&mut self, request: DmaRequest) -> DmaRequest {
        let kind = match self.phase {
            LoadPhase::Idle => return request,
            LoadPhase::ColdLoad if self.suspended => return request,
            LoadPhase::ColdLoad => match self.next_upload() {
                Some(kind) => {
                    self.uploaded[kind.index()] = true;
                    kind
                }
                None => {
                    debug!("igfx: {}", IgfxError::StateViolation("DMA with no pending firmware"));
                    return request;
                }
            },
            LoadPhase::WakeReload => match self.dma_order.get(self.replay_cursor) {
                Some(&kind) => {
                    self.replay_cursor += 1;
                    kind
                }
                None => return request,
            },
        };
        self.current_dma = Some(kind);

        let slot = &mut self.slots[kind.index()];
        if !slot.intercept_enabled() || !slot.is_populated() {
            return request;
        }
        let Some(gpu_address) = slot.gpu_address() else {
            return request;
        };
        let rewritten = DmaRequest {
            gpu_address,
            length: slot.binary_size(),
            ..request
        };

        if self.phase == LoadPhase::ColdLoad && !self.dma_order.contains(&kind) {
            // capacity equals the slot count, so this cannot overflow
            let _ = self.dma_order.push(kind);
        }
        debug!(
            "igfx: DMA {} {:#X}/{} -> {:#X}/{}",
            kind.name(),
            request.gpu_address,
            request.length,
            rewritten.gpu_address,
            rewritten.length
        );
        rewritten
    }

    /// First slot in upload order that was staged and mapped in this
    /// sequence and not uploaded yet.
    fn next_upload(&self) -> Option<FirmwareKind> {
        UPLOAD_ORDER.iter().copied().find(|kind| {
            let slot = &self.slots[kind.index()];
            kind.index() < self.next_binary
                && !self.uploaded[kind.index()]
                && slot.intercept_enabled()
                && slot.is_populated()
                && slot.gpu_address().is_some()
        })
    }

    /// The transfer for the current binary finished.
    pub fn end_binary(&mut self) {
        if self.phase == LoadPhase::ColdLoad {
            self.current_binary = None;
            self.current_dma = None;
        }
    }

    /// Wake entry. Returns false (and stays idle) if nothing was captured
    /// during a cold load.
    pub fn begin_wake_reload(&mut self) -> bool {
        if self.phase != LoadPhase::Idle {
            warn!("igfx: wake while firmware phase is {:?}", self.phase);
            return false;
        }
        if self.dma_order.is_empty() {
            return false;
        }
        self.phase = LoadPhase::WakeReload;
        self.replay_cursor = 0;
        self.clear_cursors();
        info!("igfx: replaying {} firmware transfers after wake", self.dma_order.len());
        true
    }

    /// The GuC was reset mid-replay: start the recorded order again.
    pub fn restart_replay(&mut self) {
        if self.phase == LoadPhase::WakeReload {
            self.replay_cursor = 0;
            self.current_dma = None;
        }
    }

    pub fn end_wake_reload(&mut self) {
        if self.phase == LoadPhase::WakeReload {
            self.phase = LoadPhase::Idle;
            self.clear_cursors();
        }
    }

    /// Sleep entry. A load interrupted by sleep is abandoned.
    pub fn prepare_sleep(&mut self) {
        if self.phase == LoadPhase::ColdLoad {
            warn!("igfx: sleeping during firmware load, sequence dropped");
        }
        self.phase = LoadPhase::Idle;
        self.suspended = false;
        self.clear_cursors();
    }

    /// Hides an in-progress load from nested buffer allocations.
    pub fn suspend(&mut self) -> bool {
        let was = self.suspended;
        self.suspended = true;
        was
    }

    pub fn resume(&mut self, previous: bool) {
        self.suspended = previous;
    }

    /// Frees every slot and returns to idle.
    pub fn teardown(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.release();
        }
        self.dma_order.clear();
        self.uploaded = [false; FirmwareKind::COUNT];
        self.phase = LoadPhase::Idle;
        self.suspended = false;
        self.replay_cursor = 0;
        self.clear_cursors();
    }

    fn clear_cursors(&mut self) {
        self.current_binary = None;
        self.current_dma = None;
    }
}
