//! Substitute bodies
//!
//! Each body receives the original as a closure and decides what to pass to
//! it. Receivers that do not belong to the managed graphics device are
//! forwarded untouched. The state lock is released before any original runs.

use log::{debug, info, warn};

use crate::config::{FramebufferFixMode, SchedulerMode};
use crate::firmware::{BinaryDecision, DmaRequest, LoadPhase, MappedBuffer};
use crate::host::{ObjectRef, PROP_DEVICE_ID};
use crate::igfx::Igfx;
use crate::pci_spoof;
use crate::util::IgfxError;

/// PAVP command that tears down a protected session.
pub const PAVP_SESSION_TEARDOWN: i32 = 4;
/// `kIOReturnTimeout`
pub const K_IO_RETURN_TIMEOUT: u32 = 0xE000_02D6;

impl Igfx {
    pub fn pavp_session_callback(
        &self,
        that: ObjectRef,
        command: i32,
        original: impl FnOnce() -> u32,
    ) -> u32 {
        if command == PAVP_SESSION_TEARDOWN && self.manages(that) {
            debug!("igfx: PAVP session teardown answered with timeout");
            return K_IO_RETURN_TIMEOUT;
        }
        original()
    }

    /// Clamps the available lanes to the configured ceiling. When the driver
    /// then gives up with zero lanes, the clamped width is reported instead.
    pub fn compute_lane_count(
        &self,
        that: ObjectRef,
        available: i32,
        lane_count: &mut i32,
        original: impl FnOnce(i32, &mut i32) -> bool,
    ) -> bool {
        if !self.manages(that) {
            return original(available, lane_count);
        }
        let clamped = available.min(self.config.lane_ceiling as i32);
        let ok = original(clamped, lane_count);
        if !ok && *lane_count == 0 && clamped > 0 {
            debug!("igfx: lane count recovered as {}", clamped);
            *lane_count = clamped;
            return true;
        }
        ok
    }

    pub fn frame_buffer_init(&self, that: ObjectRef, original: impl FnOnce()) {
        let console = match self.host.console.as_deref() {
            Some(console) if self.manages(that) => console,
            _ => return original(),
        };
        match self.config.reset_framebuffer {
            FramebufferFixMode::Default => original(),
            FramebufferFixMode::Reset => {
                let previous = console.set_verbose_boot(true);
                original();
                console.set_verbose_boot(previous);
            }
            FramebufferFixMode::Copy => {
                let saved = console.snapshot();
                original();
                if let Some(saved) = saved {
                    console.restore(&saved);
                }
            }
        }
    }

    /// Driver start: on success the properties are corrected again from a
    /// fresh inventory, since the driver finalizes some of them itself.
    pub fn graphics_start(
        &self,
        provider: ObjectRef,
        original: impl FnOnce() -> bool,
    ) -> bool {
        if !self.manages(provider) {
            debug!("igfx: start forwarded: {}", IgfxError::DeviceMismatch);
            return original();
        }
        let started = original();
        if started {
            info!("igfx: driver started, refreshing properties");
            self.correct_device_properties(true);
        }
        started
    }

    pub fn load_guc_binary(&self, that: ObjectRef, original: impl FnOnce() -> bool) -> bool {
        if !self.manages(that) {
            return original();
        }
        self.shared.lock().engine.begin_sequence();
        let loaded = original();
        self.shared.lock().engine.end_sequence();
        if !loaded {
            warn!("igfx: GuC loader reported failure");
        }
        loaded
    }

    /// Scheduler firmware entry. The receiver is kept for the wake reload.
    pub fn load_firmware(&self, that: ObjectRef, original: impl FnOnce() -> bool) -> bool {
        if self.manages(that) {
            self.shared.lock().scheduler_object = Some(that);
        }
        original()
    }

    /// Buffers allocated here are not firmware.
    pub fn init_sched_control(&self, that: ObjectRef, original: impl FnOnce() -> bool) -> bool {
        if !self.manages(that) {
            return original();
        }
        let previous = self.shared.lock().engine.suspend();
        let ok = original();
        self.shared.lock().engine.resume(previous);
        ok
    }

    /// Shared-buffer allocation. During a cold load the buffer is sized for
    /// the corrected image, filled with it, and repointed at the dummy
    /// before the loader sees it.
    pub fn ig_buffer_with_options<B: MappedBuffer>(
        &self,
        task: ObjectRef,
        requested: usize,
        original: impl FnOnce(usize) -> Option<B>,
    ) -> Option<B> {
        if !self.manages(task) {
            return original(requested);
        }
        let decision = self
            .shared
            .lock()
            .engine
            .begin_binary(requested, &self.host.firmware);
        let BinaryDecision::Substitute { kind, alloc_len, dummy } = decision else {
            return original(requested);
        };

        let Some(mut buffer) = original(alloc_len) else {
            warn!("igfx: {} buffer allocation failed", kind.name());
            self.shared.lock().engine.abandon(kind);
            return None;
        };

        let mut shared = self.shared.lock();
        let filled = shared
            .engine
            .slot(kind)
            .real()
            .map_or(false, |image| buffer.fill(image));
        if filled {
            let backing = buffer.backing();
            buffer.set_backing(dummy);
            shared.engine.attach_backing(kind, backing);
        } else {
            warn!("igfx: {} does not fit its buffer", kind.name());
            shared.engine.abandon(kind);
        }
        Some(buffer)
    }

    /// GPU mapping. A buffer still pointing at a dummy gets its real backing
    /// back first; the address it maps to is what the DMA will use.
    pub fn ig_buffer_gpu_virtual_address<B: MappedBuffer>(
        &self,
        buffer: &mut B,
        original: impl FnOnce(&mut B) -> u64,
    ) -> u64 {
        let swapped = self.shared.lock().engine.take_swapped(buffer.backing());
        let Some((kind, backing)) = swapped else {
            return original(buffer);
        };
        buffer.set_backing(backing);
        let address = original(buffer);
        self.shared.lock().engine.record_gpu_address(kind, address);
        address
    }

    pub fn dma_host_to_guc(
        &self,
        that: ObjectRef,
        request: DmaRequest,
        original: impl FnOnce(DmaRequest) -> bool,
    ) -> bool {
        if !self.manages(that) {
            return original(request);
        }
        let rewritten = self.shared.lock().engine.dma_transfer(request);
        let ok = original(rewritten);
        self.shared.lock().engine.end_binary();
        ok
    }

    /// The GuC is reset here after wake; replay starts over.
    pub fn init_interrupt_services(&self, that: ObjectRef, original: impl FnOnce()) {
        if self.manages(that) {
            self.shared.lock().engine.restart_replay();
        }
        original()
    }

    pub fn system_will_sleep(&self, that: ObjectRef, original: impl FnOnce()) {
        if self.manages(that) {
            self.shared.lock().engine.prepare_sleep();
        }
        original()
    }

    /// Wake. The vendor scheduler reloads by itself and only its DMA needs
    /// replaying; the reference scheduler never reloads, so its firmware
    /// entry is run again on the remembered receiver.
    pub fn system_did_wake(
        &self,
        that: ObjectRef,
        reload: impl FnOnce(ObjectRef) -> bool,
        original: impl FnOnce(),
    ) {
        if !self.manages(that) {
            return original();
        }
        match self.config.scheduler {
            SchedulerMode::VendorFirmware => {
                let replaying = self.shared.lock().engine.begin_wake_reload();
                original();
                if replaying {
                    self.shared.lock().engine.end_wake_reload();
                }
            }
            SchedulerMode::ReferenceFirmware => {
                original();
                let scheduler = self.shared.lock().scheduler_object;
                if let Some(scheduler) = scheduler {
                    if !reload(scheduler) {
                        warn!("igfx: firmware reload after wake failed");
                    }
                }
            }
            SchedulerMode::DisableFirmware => original(),
        }
    }

    /// Current firmware phase, for diagnostics.
    pub fn firmware_phase(&self) -> LoadPhase {
        self.shared.lock().engine.phase()
    }

    fn spoofed_device_id(&self, service: ObjectRef) -> Option<u16> {
        let igpu = self.managed_device()?;
        if self.host.registry.device_for(service) != Some(igpu) {
            return None;
        }
        self.host
            .registry
            .property_u32(igpu, PROP_DEVICE_ID)
            .map(|id| id as u16)
    }

    pub fn config_read16(&self, service: ObjectRef, offset: u8, original: impl FnOnce() -> u16) -> u16 {
        let value = original();
        if offset != pci_spoof::PCI_DEVICE_ID_OFFSET {
            return value;
        }
        pci_spoof::spoof_read16(offset, value, self.spoofed_device_id(service))
    }

    pub fn config_read32(&self, service: ObjectRef, offset: u8, original: impl FnOnce() -> u32) -> u32 {
        let value = original();
        if offset != pci_spoof::PCI_VENDOR_ID_OFFSET {
            return value;
        }
        pci_spoof::spoof_read32(offset, value, self.spoofed_device_id(service))
    }
}
