//! Subsystem context
//!
//! `Igfx` owns the configuration, the host collaborators and all mutable
//! state. Mutable state sits behind one `spin::Mutex`; it is never held
//! across a call into an original driver function or a registry walk.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use spin::Mutex;

use crate::config::Config;
use crate::firmware::FirmwareEngine;
use crate::framebuffer::FramebufferId;
use crate::host::{CpuGeneration, DeviceHandle, Host, Module, ObjectRef, Patcher};
use crate::interceptor::{self, EntryPoint, HookGroup, InstallOutcome, Trampolines};
use crate::inventory::{self, AudioLabelTable, DiscoveredDevices, Inventory};
use crate::progress::{Progress, ProgressState};
use crate::properties::{self, AudioOutcome, AudioPolicy};
use crate::shims;
use crate::sync::DeviceAccessLock;
use crate::util::{IgfxError, IgfxResult};

pub(crate) struct Shared {
    pub(crate) progress: ProgressState,
    pub(crate) pci_hooks_routed: bool,
    pub(crate) inventory: Inventory,
    pub(crate) framebuffer: Option<FramebufferId>,
    pub(crate) connector_less: bool,
    pub(crate) properties_applied: bool,
    /// Scheduler whose firmware entry is re-run after wake.
    pub(crate) scheduler_object: Option<ObjectRef>,
    pub(crate) engine: FirmwareEngine,
}

pub struct Igfx {
    pub(crate) config: Config,
    pub(crate) host: Host,
    generation: CpuGeneration,
    labels: AudioLabelTable,
    pub(crate) shared: Mutex<Shared>,
    access: DeviceAccessLock,
    trampolines: Trampolines,
    retired: AtomicBool,
}

impl Igfx {
    pub fn new(config: Config, host: Host) -> Self {
        Self::with_labels(config, host, AudioLabelTable::default())
    }

    /// Like `new`, with a custom audio mislabel table.
    pub fn with_labels(config: Config, host: Host, labels: AudioLabelTable) -> Self {
        let generation = host.cpu.generation();
        let engine = FirmwareEngine::new(generation, config.binary_interception);
        Self {
            config,
            host,
            generation,
            labels,
            shared: Mutex::new(Shared {
                progress: ProgressState::new(),
                pci_hooks_routed: false,
                inventory: Inventory::new(),
                framebuffer: None,
                connector_less: false,
                properties_applied: false,
                scheduler_object: None,
                engine,
            }),
            access: DeviceAccessLock::new(),
            trampolines: Trampolines::new(),
            retired: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn generation(&self) -> CpuGeneration {
        self.generation
    }

    pub fn progress(&self) -> Progress {
        self.shared.lock().progress.current()
    }

    pub fn trampolines(&self) -> &Trampolines {
        &self.trampolines
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Discovers the devices and routes the PCI config readers so that
    /// driver probe already sees the spoofed device id.
    pub fn init(&self, patcher: &mut dyn Patcher) -> IgfxResult<()> {
        if !self.config.enabled {
            info!("igfx: disabled by boot argument");
            return Err(IgfxError::Disabled);
        }
        if self.is_retired() {
            return Err(IgfxError::StateViolation("init after deinit"));
        }
        info!("igfx: initializing for {}", self.generation.name());

        let found = self.discover(false);
        if found.triple.igpu.is_none() {
            warn!("igfx: {}", IgfxError::NoGraphicsDevice);
            return Err(IgfxError::NoGraphicsDevice);
        }
        self.install(HookGroup::PciConfig, patcher);
        Ok(())
    }

    /// Installs the hooks living in `module`. The first framebuffer load
    /// also triggers the property pass.
    pub fn on_module_loaded(&self, module: Module, patcher: &mut dyn Patcher) {
        if !self.config.enabled || self.is_retired() {
            return;
        }
        for group in HookGroup::ALL {
            if group.module() == module {
                self.install(group, patcher);
            }
        }

        if module == Module::Framebuffer {
            let first = {
                let mut shared = self.shared.lock();
                !core::mem::replace(&mut shared.properties_applied, true)
            };
            if first {
                self.correct_device_properties(false);
            }
        }

        if self.shared.lock().progress.is_complete() {
            debug!("igfx: every hook group settled");
        }
    }

    fn install(&self, group: HookGroup, patcher: &mut dyn Patcher) -> InstallOutcome {
        if !group.needed(&self.config, self.generation) {
            if let Some(bit) = group.progress() {
                self.shared.lock().progress.settle(bit);
            }
            return InstallOutcome::AlreadyInstalled;
        }
        interceptor::install_group(
            group,
            self.config.scheduler,
            patcher,
            &self.trampolines,
            || {
                let mut shared = self.shared.lock();
                match group.progress() {
                    Some(bit) => shared.progress.claim(bit),
                    None => !core::mem::replace(&mut shared.pci_hooks_routed, true),
                }
            },
            || {
                let mut shared = self.shared.lock();
                match group.progress() {
                    Some(bit) => shared.progress.release(bit),
                    None => shared.pci_hooks_routed = false,
                }
            },
            shims::substitute_for,
        )
    }

    /// Cached inventory, or a fresh walk. The walk runs unlocked.
    pub fn discover(&self, force: bool) -> DiscoveredDevices {
        if let Some(found) = self.shared.lock().inventory.cached(force) {
            return found;
        }
        let found = inventory::walk(&*self.host.registry, &self.labels);
        self.shared.lock().inventory.store(found)
    }

    pub(crate) fn managed_device(&self) -> Option<DeviceHandle> {
        if self.is_retired() {
            return None;
        }
        self.shared.lock().inventory.igpu()
    }

    /// True when `object` belongs to the graphics device this context manages.
    pub fn manages(&self, object: ObjectRef) -> bool {
        match self.managed_device() {
            Some(igpu) => self.host.registry.device_for(object) == Some(igpu),
            None => false,
        }
    }

    /// Full property pass over the discovered devices.
    pub fn correct_device_properties(&self, force: bool) {
        let _access = self.access.guard();
        let found = self.discover(force);
        let Some(igpu) = found.triple.igpu else {
            warn!("igfx: property pass without a graphics device");
            return;
        };
        self.correct_graphics_properties_with(igpu, &found);
        if let Some(hdau) = found.triple.hdau {
            let mislabeled = self.labels.is_mislabeled(&*self.host.registry, hdau);
            let connector_less = self.is_connector_less_frame();
            self.correct_graphics_audio_properties(hdau, connector_less, mislabeled);
        }
    }

    /// Graphics pass on `device`; caches the frame's connector state.
    pub fn correct_graphics_properties(&self, device: DeviceHandle) -> FramebufferId {
        let found = self.discover(false);
        self.correct_graphics_properties_with(device, &found)
    }

    fn correct_graphics_properties_with(
        &self,
        device: DeviceHandle,
        found: &DiscoveredDevices,
    ) -> FramebufferId {
        let correction = properties::correct_graphics_properties(
            &*self.host.registry,
            device,
            self.generation,
            self.config.framebuffer_override,
            found.has_discrete(),
        );
        let mut shared = self.shared.lock();
        shared.framebuffer = Some(correction.framebuffer);
        shared.connector_less = correction.connector_less;
        correction.framebuffer
    }

    pub fn correct_graphics_audio_properties(
        &self,
        device: DeviceHandle,
        connector_less: bool,
        mislabeled: bool,
    ) -> AudioOutcome {
        let igpu = self.discover(false).triple.igpu;
        let policy = AudioPolicy {
            mode: self.config.reset_framebuffer,
            terminate: self.config.terminate_connectorless_audio,
        };
        properties::correct_graphics_audio_properties(
            &*self.host.registry,
            device,
            igpu,
            &self.labels,
            policy,
            connector_less,
            mislabeled,
        )
    }

    /// Framebuffer id for `igpu`; written back when `update`.
    pub fn framebuffer_id(
        &self,
        igpu: DeviceHandle,
        has_amd: bool,
        has_nvidia: bool,
        update: bool,
    ) -> u32 {
        properties::framebuffer_id(
            &*self.host.registry,
            igpu,
            self.generation,
            self.config.framebuffer_override,
            has_amd || has_nvidia,
            update,
        )
        .id
    }

    pub fn is_connector_less_frame(&self) -> bool {
        self.shared.lock().connector_less
    }

    pub fn lock_device_access(&self) {
        self.access.lock();
    }

    pub fn unlock_device_access(&self) {
        self.access.unlock();
    }

    /// Frees the firmware slots and forgets progress. Routed hooks stay in
    /// place and forward untouched from here on.
    pub fn deinit(&self) {
        if self.retired.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut shared = self.shared.lock();
        shared.engine.teardown();
        shared.progress.reset();
        shared.pci_hooks_routed = false;
        shared.properties_applied = false;
        shared.scheduler_object = None;
        shared.inventory.clear();
        info!("igfx: deinitialized");
    }

    pub(crate) fn original(&self, entry: EntryPoint) -> Option<usize> {
        self.trampolines.get(entry)
    }
}
