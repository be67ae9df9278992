//! Property corrections for the graphics device and its audio companion.
//!
//! Every write replaces a single key, so running a pass twice with the same
//! inputs leaves the same property set.

use alloc::vec;

use log::{debug, info};

use crate::config::FramebufferFixMode;
use crate::framebuffer::{self, FramebufferId};
use crate::host::{CpuGeneration, DeviceHandle, DeviceTree, PropertyValue, PROP_NAME};
use crate::inventory::AudioLabelTable;

pub const IGPU_NAME: &str = "IGPU";
pub const PROP_CONNECTOR_COUNT: &str = "framebuffer-con-count";
pub const PROP_BUILT_IN: &str = "built-in";
pub const PROP_HDA_GFX: &str = "hda-gfx";
pub const PROP_GFX_YTILE: &str = "AAPL,GfxYTile";
pub const PROP_GFX_324: &str = "AAPL,Gfx324";

/// Default audio linkage label shared by the GPU and its HDMI codec.
pub const DEFAULT_HDA_GFX: &str = "onboard-1";

/// Result of a graphics pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsCorrection {
    pub framebuffer: FramebufferId,
    pub connector_count: u32,
    pub connector_less: bool,
}

/// Connector-less audio policy inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPolicy {
    pub mode: FramebufferFixMode,
    pub terminate: bool,
}

/// What happened to the audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutcome {
    Untouched,
    Linked,
    Unlinked,
    Copied,
    Terminated,
}

/// Resolves the framebuffer id for `igpu`, writing it back when `update`.
pub fn framebuffer_id(
    tree: &dyn DeviceTree,
    igpu: DeviceHandle,
    generation: CpuGeneration,
    boot_override: Option<u32>,
    has_discrete: bool,
    update: bool,
) -> FramebufferId {
    let key = framebuffer::platform_id_property(generation);
    let selected = framebuffer::select(
        generation,
        boot_override,
        tree.property_u32(igpu, key),
        has_discrete,
    );
    if update {
        tree.set_property(igpu, key, PropertyValue::from_u32(selected.id));
    }
    selected
}

/// Renames the device, writes the framebuffer id, its connector count and
/// the capability properties the driver probe expects.
pub fn correct_graphics_properties(
    tree: &dyn DeviceTree,
    device: DeviceHandle,
    generation: CpuGeneration,
    boot_override: Option<u32>,
    has_discrete: bool,
) -> GraphicsCorrection {
    tree.set_property(device, PROP_NAME, PropertyValue::string(IGPU_NAME));

    let framebuffer = framebuffer_id(tree, device, generation, boot_override, has_discrete, true);
    let connector_count = framebuffer::connector_count(framebuffer.id);
    tree.set_property(device, PROP_CONNECTOR_COUNT, PropertyValue::from_u32(connector_count));

    tree.set_property(device, PROP_BUILT_IN, PropertyValue::Data(vec![0]));
    tree.set_property(device, PROP_HDA_GFX, PropertyValue::string(DEFAULT_HDA_GFX));
    tree.set_property(device, PROP_GFX_YTILE, PropertyValue::from_u32(1));
    tree.set_property(device, PROP_GFX_324, PropertyValue::from_u32(1));

    info!(
        "igfx: framebuffer {:#010X} ({:?}), {} connectors",
        framebuffer.id, framebuffer.source, connector_count
    );
    GraphicsCorrection {
        framebuffer,
        connector_count,
        connector_less: connector_count == 0,
    }
}

/// Fixes the audio companion. A mislabeled device is renamed first; the
/// connector-less policy runs after.
pub fn correct_graphics_audio_properties(
    tree: &dyn DeviceTree,
    device: DeviceHandle,
    igpu: Option<DeviceHandle>,
    labels: &AudioLabelTable,
    policy: AudioPolicy,
    connector_less: bool,
    mislabeled: bool,
) -> AudioOutcome {
    if mislabeled && labels.relabel(tree, device) {
        debug!("igfx: audio device {:?} relabeled", device);
    }

    if !connector_less {
        tree.set_property(device, PROP_HDA_GFX, PropertyValue::string(DEFAULT_HDA_GFX));
        return AudioOutcome::Linked;
    }

    if policy.terminate {
        info!("igfx: terminating audio on connector-less frame");
        tree.terminate(device);
        return AudioOutcome::Terminated;
    }

    match policy.mode {
        FramebufferFixMode::Default => AudioOutcome::Untouched,
        FramebufferFixMode::Reset => {
            tree.remove_property(device, PROP_HDA_GFX);
            AudioOutcome::Unlinked
        }
        FramebufferFixMode::Copy => {
            let label = igpu
                .and_then(|gpu| tree.property(gpu, PROP_HDA_GFX))
                .unwrap_or_else(|| PropertyValue::string(DEFAULT_HDA_GFX));
            tree.set_property(device, PROP_HDA_GFX, label);
            AudioOutcome::Copied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framebuffer::{FramebufferSource, INVALID_PLATFORM_ID, PROP_PLATFORM_ID};
    use crate::testing::MockTree;

    fn policy(mode: FramebufferFixMode) -> AudioPolicy {
        AudioPolicy { mode, terminate: false }
    }

    #[test]
    fn test_graphics_pass_is_idempotent() {
        let tree = MockTree::new();
        let igpu = tree.add_pci("GFX0", 0x8086, 0x5912, 0x03_00_00);

        let first = correct_graphics_properties(&tree, igpu, CpuGeneration::KabyLake, None, false);
        let snapshot = tree.properties(igpu);
        let second = correct_graphics_properties(&tree, igpu, CpuGeneration::KabyLake, None, false);

        assert_eq!(tree.properties(igpu), snapshot);
        assert_eq!(first.framebuffer.id, second.framebuffer.id);
        assert_eq!(first.connector_count, second.connector_count);
        assert_eq!(first.connector_less, second.connector_less);
        // the written id is read back on the next pass
        assert_eq!(first.framebuffer.source, FramebufferSource::GenerationDefault);
        assert_eq!(second.framebuffer.source, FramebufferSource::DeviceTree);
        assert_eq!(tree.name(igpu).as_deref(), Some(IGPU_NAME));
        assert_eq!(tree.property_u32(igpu, PROP_PLATFORM_ID), Some(0x591B_0000));
        assert_eq!(tree.property_u32(igpu, PROP_CONNECTOR_COUNT), Some(3));
        assert_eq!(tree.property_u32(igpu, PROP_GFX_YTILE), Some(1));
        assert_eq!(
            tree.property(igpu, PROP_HDA_GFX),
            Some(PropertyValue::string(DEFAULT_HDA_GFX))
        );
    }

    #[test]
    fn test_sentinel_property_replaced() {
        let tree = MockTree::new();
        let igpu = tree.add_pci("GFX0", 0x8086, 0x3E92, 0x03_00_00);
        tree.set_property(igpu, PROP_PLATFORM_ID, PropertyValue::from_u32(INVALID_PLATFORM_ID));
        let fb = framebuffer_id(&tree, igpu, CpuGeneration::CoffeeLake, None, false, true);
        assert_eq!(fb.id, 0x3EA5_0000);
        assert_eq!(fb.source, FramebufferSource::GenerationDefault);
        assert_eq!(tree.property_u32(igpu, PROP_PLATFORM_ID), Some(0x3EA5_0000));
    }

    #[test]
    fn test_read_only_lookup() {
        let tree = MockTree::new();
        let igpu = tree.add_pci("GFX0", 0x8086, 0x0412, 0x03_00_00);
        let fb = framebuffer_id(&tree, igpu, CpuGeneration::Haswell, None, true, false);
        assert_eq!(fb.id, 0x0412_0004);
        assert_eq!(tree.property(igpu, PROP_PLATFORM_ID), None);
    }

    #[test]
    fn test_connectorless_copy_on_mislabeled_audio() {
        let tree = MockTree::new();
        let igpu = tree.add_pci("GFX0", 0x8086, 0x0412, 0x03_00_00);
        let hdau = tree.add_pci("HDEF", 0x8086, 0x0C0C, 0x04_03_00);
        tree.set_property(igpu, PROP_HDA_GFX, PropertyValue::string("onboard-2"));
        let labels = AudioLabelTable::default();

        let outcome = correct_graphics_audio_properties(
            &tree,
            hdau,
            Some(igpu),
            &labels,
            policy(FramebufferFixMode::Copy),
            true,
            true,
        );
        assert_eq!(outcome, AudioOutcome::Copied);
        assert_eq!(tree.name(hdau).as_deref(), Some("HDAU"));
        assert_eq!(tree.property(hdau, PROP_HDA_GFX), Some(PropertyValue::string("onboard-2")));
        assert!(!tree.is_terminated(hdau));
    }

    #[test]
    fn test_connectorless_default_leaves_audio_alone() {
        let tree = MockTree::new();
        let hdau = tree.add_pci("HDAU", 0x8086, 0x0C0C, 0x04_03_00);
        tree.set_property(hdau, PROP_HDA_GFX, PropertyValue::string("onboard-1"));
        let before = tree.properties(hdau);

        let outcome = correct_graphics_audio_properties(
            &tree,
            hdau,
            None,
            &AudioLabelTable::default(),
            policy(FramebufferFixMode::Default),
            true,
            false,
        );
        assert_eq!(outcome, AudioOutcome::Untouched);
        assert_eq!(tree.properties(hdau), before);
    }

    #[test]
    fn test_policy_switch_leaves_no_residue() {
        let tree = MockTree::new();
        let hdau = tree.add_pci("HDAU", 0x8086, 0x0C0C, 0x04_03_00);
        let labels = AudioLabelTable::default();
        let run = |mode| {
            correct_graphics_audio_properties(&tree, hdau, None, &labels, policy(mode), true, false)
        };

        assert_eq!(run(FramebufferFixMode::Copy), AudioOutcome::Copied);
        assert_eq!(run(FramebufferFixMode::Reset), AudioOutcome::Unlinked);
        assert_eq!(tree.property(hdau, PROP_HDA_GFX), None);
        let after_reset = tree.properties(hdau);
        assert_eq!(run(FramebufferFixMode::Reset), AudioOutcome::Unlinked);
        assert_eq!(tree.properties(hdau), after_reset);
    }

    #[test]
    fn test_terminate_on_connectorless() {
        let tree = MockTree::new();
        let hdau = tree.add_pci("HDAU", 0x8086, 0x0C0C, 0x04_03_00);
        let outcome = correct_graphics_audio_properties(
            &tree,
            hdau,
            None,
            &AudioLabelTable::default(),
            AudioPolicy { mode: FramebufferFixMode::Copy, terminate: true },
            true,
            false,
        );
        assert_eq!(outcome, AudioOutcome::Terminated);
        assert!(tree.is_terminated(hdau));
    }

    #[test]
    fn test_connectors_get_default_link() {
        let tree = MockTree::new();
        let hdau = tree.add_pci("HDAU", 0x8086, 0x0C0C, 0x04_03_00);
        let outcome = correct_graphics_audio_properties(
            &tree,
            hdau,
            None,
            &AudioLabelTable::default(),
            AudioPolicy { mode: FramebufferFixMode::Reset, terminate: true },
            false,
            false,
        );
        assert_eq!(outcome, AudioOutcome::Linked);
        assert_eq!(tree.property(hdau, PROP_HDA_GFX), Some(PropertyValue::string(DEFAULT_HDA_GFX)));
        assert!(!tree.is_terminated(hdau));
    }
}
