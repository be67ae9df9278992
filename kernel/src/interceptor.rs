//! Entry points, hook groups and installation.
//!
//! A group is installed as a unit: every member must resolve before its
//! progress bit is claimed, and the bit is claimed before anything is
//! routed. The patcher publishes each original into `Trampolines` before
//! the substitute goes live. A claim is given back when nothing got routed.

use core::sync::atomic::{AtomicUsize, Ordering};

use heapless::Vec as FixedVec;
use log::{debug, error, info, warn};

use crate::config::{Config, FramebufferFixMode, SchedulerMode};
use crate::host::{CpuGeneration, Module, Patcher};
use crate::progress::Progress;
use crate::util::IgfxError;

/// Intercepted driver functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    PavpSessionCallback,
    FrameBufferInit,
    ComputeLaneCount,
    GraphicsStart,
    LoadGucBinary,
    LoadFirmware,
    InitSchedControl,
    IgBufferWithOptions,
    IgBufferGpuVirtualAddress,
    DmaHostToGuc,
    InitInterruptServices,
    SystemWillSleep,
    SystemDidWake,
    ConfigRead16,
    ConfigRead32,
}

impl EntryPoint {
    pub const COUNT: usize = 15;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn module(self) -> Module {
        match self {
            EntryPoint::FrameBufferInit | EntryPoint::ComputeLaneCount => Module::Framebuffer,
            EntryPoint::ConfigRead16 | EntryPoint::ConfigRead32 => Module::Kernel,
            _ => Module::Accelerator,
        }
    }

    /// Mangled symbol. The loader and scheduler-control entries differ
    /// between the reference and vendor scheduler.
    pub fn symbol(self, scheduler: SchedulerMode) -> &'static str {
        let vendor = scheduler == SchedulerMode::VendorFirmware;
        match self {
            EntryPoint::PavpSessionCallback => {
                "__ZN16IntelAccelerator19PAVPCommandCallbackE22PAVPSessionCommandID_tjPjb"
            }
            EntryPoint::FrameBufferInit => "__ZN31AppleIntelFramebufferController13FBMemMgr_InitEv",
            EntryPoint::ComputeLaneCount => {
                "__ZN31AppleIntelFramebufferController16ComputeLaneCountEPK29IODetailedTimingInformationV2jiPi"
            }
            EntryPoint::GraphicsStart => "__ZN16IntelAccelerator5startEP9IOService",
            EntryPoint::LoadGucBinary if vendor => "__ZN5IGGuC10loadBinaryEb",
            EntryPoint::LoadGucBinary => "__ZN13IGHardwareGuC13loadGuCBinaryEb",
            EntryPoint::LoadFirmware => "__ZN12IGScheduler412loadFirmwareEv",
            EntryPoint::InitSchedControl if vendor => "__ZN5IGGuC11initGucCtrlEPv",
            EntryPoint::InitSchedControl => "__ZN13IGHardwareGuC16initSchedControlEPv",
            EntryPoint::IgBufferWithOptions => {
                "__ZN20IGSharedMappedBuffer11withOptionsEP11IGAccelTaskmjj"
            }
            EntryPoint::IgBufferGpuVirtualAddress => {
                "__ZNK20IGSharedMappedBuffer20getGPUVirtualAddressEv"
            }
            EntryPoint::DmaHostToGuc => "__ZN5IGGuC12dmaHostToGuCEyjjjb",
            EntryPoint::InitInterruptServices => "__ZN5IGGuC21initInterruptServicesEv",
            EntryPoint::SystemWillSleep => "__ZN16IntelAccelerator15systemWillSleepEv",
            EntryPoint::SystemDidWake => "__ZN16IntelAccelerator13systemDidWakeEv",
            EntryPoint::ConfigRead16 => "__ZN11IOPCIDevice12configRead16Ejh",
            EntryPoint::ConfigRead32 => "__ZN11IOPCIDevice12configRead32Ejh",
        }
    }
}

const REFERENCE_FIRMWARE: &[EntryPoint] = &[
    EntryPoint::LoadGucBinary,
    EntryPoint::LoadFirmware,
    EntryPoint::InitSchedControl,
    EntryPoint::IgBufferWithOptions,
    EntryPoint::IgBufferGpuVirtualAddress,
    EntryPoint::SystemWillSleep,
    EntryPoint::SystemDidWake,
];

const VENDOR_FIRMWARE: &[EntryPoint] = &[
    EntryPoint::LoadGucBinary,
    EntryPoint::InitSchedControl,
    EntryPoint::IgBufferWithOptions,
    EntryPoint::IgBufferGpuVirtualAddress,
    EntryPoint::DmaHostToGuc,
    EntryPoint::InitInterruptServices,
    EntryPoint::SystemWillSleep,
    EntryPoint::SystemDidWake,
];

const MAX_GROUP_MEMBERS: usize = 8;

/// Hooks installed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookGroup {
    PavpSession,
    FramebufferInit,
    ComputeLaneCount,
    DriverStart,
    GucFirmware,
    /// Tracked by its own flag, outside the progress mask.
    PciConfig,
}

impl HookGroup {
    pub const ALL: [HookGroup; 6] = [
        HookGroup::PciConfig,
        HookGroup::PavpSession,
        HookGroup::FramebufferInit,
        HookGroup::ComputeLaneCount,
        HookGroup::DriverStart,
        HookGroup::GucFirmware,
    ];

    pub fn progress(self) -> Option<Progress> {
        match self {
            HookGroup::PavpSession => Some(Progress::PAVP_SESSION_ROUTED),
            HookGroup::FramebufferInit => Some(Progress::FRAMEBUFFER_INIT_ROUTED),
            HookGroup::ComputeLaneCount => Some(Progress::COMPUTE_LANE_COUNT_ROUTED),
            HookGroup::DriverStart => Some(Progress::DRIVER_START_ROUTED),
            HookGroup::GucFirmware => Some(Progress::GUC_FIRMWARE_ROUTED),
            HookGroup::PciConfig => None,
        }
    }

    pub fn module(self) -> Module {
        match self {
            HookGroup::FramebufferInit | HookGroup::ComputeLaneCount => Module::Framebuffer,
            HookGroup::PciConfig => Module::Kernel,
            _ => Module::Accelerator,
        }
    }

    pub fn members(self, scheduler: SchedulerMode) -> &'static [EntryPoint] {
        match self {
            HookGroup::PavpSession => &[EntryPoint::PavpSessionCallback],
            HookGroup::FramebufferInit => &[EntryPoint::FrameBufferInit],
            HookGroup::ComputeLaneCount => &[EntryPoint::ComputeLaneCount],
            HookGroup::DriverStart => &[EntryPoint::GraphicsStart],
            HookGroup::PciConfig => &[EntryPoint::ConfigRead16, EntryPoint::ConfigRead32],
            HookGroup::GucFirmware => match scheduler {
                SchedulerMode::DisableFirmware => &[],
                SchedulerMode::ReferenceFirmware => REFERENCE_FIRMWARE,
                SchedulerMode::VendorFirmware => VENDOR_FIRMWARE,
            },
        }
    }

    /// False when the configuration makes the group a no-op; such groups
    /// are settled without routing.
    pub fn needed(self, config: &Config, generation: CpuGeneration) -> bool {
        match self {
            HookGroup::FramebufferInit => config.reset_framebuffer != FramebufferFixMode::Default,
            HookGroup::GucFirmware => config.scheduler.loads_firmware() && generation.has_guc(),
            _ => true,
        }
    }
}

/// Originals returned by the patcher, one per entry point.
pub struct Trampolines {
    originals: [AtomicUsize; EntryPoint::COUNT],
}

impl Trampolines {
    pub const fn new() -> Self {
        const EMPTY: AtomicUsize = AtomicUsize::new(0);
        Self {
            originals: [EMPTY; EntryPoint::COUNT],
        }
    }

    pub fn get(&self, entry: EntryPoint) -> Option<usize> {
        match self.originals[entry.index()].load(Ordering::Acquire) {
            0 => None,
            address => Some(address),
        }
    }

    pub(crate) fn set(&self, entry: EntryPoint, original: usize) {
        self.slot(entry).store(original, Ordering::Release);
    }

    fn slot(&self, entry: EntryPoint) -> &AtomicUsize {
        &self.originals[entry.index()]
    }
}

impl Default for Trampolines {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// Progress bit already set by an earlier installer.
    AlreadyInstalled,
    Failed(IgfxError),
}

/// Installs one group.
///
/// `claim` runs under the subsystem lock and returns false if the group was
/// already claimed. `release` undoes the claim and runs only when the first
/// route fails. `substitute` maps an entry point to the address of its
/// replacement.
pub fn install_group(
    group: HookGroup,
    scheduler: SchedulerMode,
    patcher: &mut dyn Patcher,
    trampolines: &Trampolines,
    claim: impl FnOnce() -> bool,
    release: impl FnOnce(),
    substitute: impl Fn(EntryPoint) -> usize,
) -> InstallOutcome {
    let mut resolved: FixedVec<(EntryPoint, usize), MAX_GROUP_MEMBERS> = FixedVec::new();
    for &entry in group.members(scheduler) {
        let symbol = entry.symbol(scheduler);
        match patcher.resolve(entry.module(), symbol) {
            Some(address) => {
                // groups never exceed MAX_GROUP_MEMBERS
                let _ = resolved.push((entry, address));
            }
            None => {
                let e = IgfxError::SymbolNotFound(symbol);
                warn!("igfx: {:?} skipped: {}", group, e);
                return InstallOutcome::Failed(e);
            }
        }
    }

    if !claim() {
        debug!("igfx: {:?} already routed", group);
        return InstallOutcome::AlreadyInstalled;
    }

    for (routed, (entry, address)) in resolved.into_iter().enumerate() {
        if let Err(e) = patcher.route(address, substitute(entry), trampolines.slot(entry)) {
            trampolines.set(entry, 0);
            if routed == 0 {
                warn!("igfx: {:?} not routed: {}", group, e);
                release();
            } else {
                error!("igfx: {:?} left partially routed: {}", group, e);
            }
            return InstallOutcome::Failed(e);
        }
    }
    info!("igfx: {:?} routed", group);
    InstallOutcome::Installed
}
