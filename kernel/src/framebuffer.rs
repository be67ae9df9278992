//! Framebuffer identifier tables and selection.

use log::{debug, warn};

use crate::host::CpuGeneration;
use crate::util::IgfxError;

/// Reserved id that never selects a frame.
pub const INVALID_PLATFORM_ID: u32 = 0xFFFF_FFFF;

/// Used when the generation is unknown: a frame with no connectors is safe
/// on any GPU since it never drives a display.
pub const SAFE_CONNECTORLESS_ID: u32 = 0x1912_0001;

pub const PROP_PLATFORM_ID: &str = "AAPL,ig-platform-id";
pub const PROP_SNB_PLATFORM_ID: &str = "AAPL,snb-platform-id";

/// Where a framebuffer id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferSource {
    BootArgument,
    DeviceTree,
    GenerationDefault,
}

/// A selected framebuffer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferId {
    pub id: u32,
    pub source: FramebufferSource,
}

/// Property the id is stored under on this generation.
pub fn platform_id_property(generation: CpuGeneration) -> &'static str {
    if generation == CpuGeneration::SandyBridge {
        PROP_SNB_PLATFORM_ID
    } else {
        PROP_PLATFORM_ID
    }
}

/// Desktop default with display outputs.
pub fn default_id(generation: CpuGeneration) -> Option<u32> {
    match generation {
        CpuGeneration::SandyBridge => Some(0x0001_0000),
        CpuGeneration::IvyBridge => Some(0x0166_000A),
        CpuGeneration::Haswell => Some(0x0D22_0003),
        CpuGeneration::Broadwell => Some(0x1626_0006),
        CpuGeneration::Skylake => Some(0x191B_0000),
        CpuGeneration::KabyLake => Some(0x591B_0000),
        CpuGeneration::CoffeeLake => Some(0x3EA5_0000),
        CpuGeneration::Unknown => None,
    }
}

/// Compute-only default used next to a discrete GPU.
pub fn connectorless_id(generation: CpuGeneration) -> Option<u32> {
    match generation {
        CpuGeneration::SandyBridge => Some(0x0005_0000),
        CpuGeneration::IvyBridge => Some(0x0162_0007),
        CpuGeneration::Haswell => Some(0x0412_0004),
        CpuGeneration::Broadwell => Some(0x1622_0007),
        CpuGeneration::Skylake => Some(0x1912_0001),
        CpuGeneration::KabyLake => Some(0x5912_0003),
        CpuGeneration::CoffeeLake => Some(0x3E92_0003),
        CpuGeneration::Unknown => None,
    }
}

/// Frames with no display connectors.
const CONNECTORLESS_FRAMES: &[u32] = &[
    0x0005_0000, 0x0162_0007, 0x0166_0007, 0x0412_0004, 0x0D22_0007,
    0x1622_0007, 0x1912_0001, 0x1932_0001, 0x5912_0003, 0x3E92_0003,
    0x3E91_0003, 0x3E98_0003,
];

/// Connector counts for frames that differ from the common three-port layout.
const CONNECTOR_COUNTS: &[(u32, u32)] = &[
    (0x0001_0000, 4),
    (0x0166_000A, 3),
    (0x0166_0003, 4),
    (0x0D22_0003, 3),
    (0x0A26_0006, 3),
    (0x1626_0006, 3),
    (0x191B_0000, 3),
    (0x1912_0000, 3),
    (0x5912_0000, 3),
    (0x591B_0000, 3),
    (0x5916_0000, 3),
    (0x3EA5_0000, 3),
    (0x3E9B_0007, 3),
    (0x3E92_0000, 3),
];

const DEFAULT_CONNECTOR_COUNT: u32 = 3;

pub fn is_connectorless(id: u32) -> bool {
    CONNECTORLESS_FRAMES.contains(&id)
}

/// Value for `framebuffer-con-count`.
pub fn connector_count(id: u32) -> u32 {
    if is_connectorless(id) {
        return 0;
    }
    CONNECTOR_COUNTS
        .iter()
        .find(|(frame, _)| *frame == id)
        .map_or(DEFAULT_CONNECTOR_COUNT, |(_, count)| *count)
}

/// Generation default, falling back to the safe id when the generation is
/// unknown.
pub fn generation_default(generation: CpuGeneration, has_discrete: bool) -> u32 {
    let id = if has_discrete {
        connectorless_id(generation)
    } else {
        default_id(generation)
    };
    id.unwrap_or(SAFE_CONNECTORLESS_ID)
}

/// Picks the framebuffer id by priority: boot argument, existing device
/// property, generation default. A candidate equal to the sentinel is
/// rejected and the generation default used instead.
pub fn select(
    generation: CpuGeneration,
    boot_override: Option<u32>,
    property: Option<u32>,
    has_discrete: bool,
) -> FramebufferId {
    let candidate = boot_override
        .map(|id| (id, FramebufferSource::BootArgument))
        .or_else(|| property.map(|id| (id, FramebufferSource::DeviceTree)));

    match candidate {
        Some((INVALID_PLATFORM_ID, source)) => {
            warn!(
                "igfx: {} from {:?}, using {} default",
                IgfxError::InvalidIdentifier(INVALID_PLATFORM_ID),
                source,
                generation.name()
            );
        }
        Some((id, source)) => {
            debug!("igfx: framebuffer {:#010X} from {:?}", id, source);
            return FramebufferId { id, source };
        }
        None => {}
    }

    FramebufferId {
        id: generation_default(generation, has_discrete),
        source: FramebufferSource::GenerationDefault,
    }
}
