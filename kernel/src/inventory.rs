//! Device inventory
//!
//! One walk over the PCI devices finds the integrated GPU, its management
//! engine and HD audio companions, and notes discrete AMD/NVIDIA GPUs.
//! An audio companion published without class properties is found by its
//! registry name instead. The result is cached once the GPU has been found.

use alloc::vec::Vec;

use log::{debug, info};

use crate::host::{find_matching, DeviceHandle, DeviceMatch, DeviceTree, PropertyValue, PROP_NAME};

pub const VENDOR_INTEL: u16 = 0x8086;
pub const VENDOR_AMD: u16 = 0x1002;
pub const VENDOR_NVIDIA: u16 = 0x10DE;

const CLASS_COMMUNICATION_OTHER: u16 = 0x0780;
const CLASS_HD_AUDIO: u16 = 0x0403;

/// Registry names of the two audio roles.
pub const NAME_DIGITAL_AUDIO: &str = "HDAU";
pub const NAME_ANALOG_AUDIO: &str = "HDEF";

/// Graphics, management engine and audio companion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceTriple {
    pub igpu: Option<DeviceHandle>,
    pub imei: Option<DeviceHandle>,
    pub hdau: Option<DeviceHandle>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveredDevices {
    pub triple: DeviceTriple,
    pub has_amd: bool,
    pub has_nvidia: bool,
}

impl DiscoveredDevices {
    pub fn has_discrete(&self) -> bool {
        self.has_amd || self.has_nvidia
    }
}

/// Expected registry name for an audio controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLabel {
    pub vendor_id: u16,
    pub device_id: u16,
    pub name: &'static str,
}

/// Lookup deciding whether an audio device carries the wrong name for its
/// vendor/device pair.
#[derive(Debug, Clone)]
pub struct AudioLabelTable {
    labels: Vec<AudioLabel>,
}

impl Default for AudioLabelTable {
    fn default() -> Self {
        const fn digital(device_id: u16) -> AudioLabel {
            AudioLabel { vendor_id: VENDOR_INTEL, device_id, name: NAME_DIGITAL_AUDIO }
        }
        const fn analog(device_id: u16) -> AudioLabel {
            AudioLabel { vendor_id: VENDOR_INTEL, device_id, name: NAME_ANALOG_AUDIO }
        }
        Self::new(alloc::vec![
            // Haswell/Broadwell HDMI-only controllers
            digital(0x0C0C),
            digital(0x160C),
            digital(0x0D0C),
            // PCH HD audio
            analog(0xA170),
            analog(0xA2F0),
            analog(0x9D70),
            analog(0xA348),
            analog(0x8C20),
            analog(0x1E20),
        ])
    }
}

impl AudioLabelTable {
    pub fn new(labels: Vec<AudioLabel>) -> Self {
        Self { labels }
    }

    pub fn expected_name(&self, vendor_id: u16, device_id: u16) -> Option<&'static str> {
        self.labels
            .iter()
            .find(|l| l.vendor_id == vendor_id && l.device_id == device_id)
            .map(|l| l.name)
    }

    /// Expected name for a registry device, by its PCI identity.
    pub fn expected_for(&self, tree: &dyn DeviceTree, device: DeviceHandle) -> Option<&'static str> {
        let id = tree.pci_identity(device)?;
        self.expected_name(id.vendor_id, id.device_id)
    }

    pub fn is_digital(&self, vendor_id: u16, device_id: u16) -> bool {
        self.expected_name(vendor_id, device_id) == Some(NAME_DIGITAL_AUDIO)
    }

    /// Known device whose current name differs from the expected one.
    pub fn is_mislabeled(&self, tree: &dyn DeviceTree, device: DeviceHandle) -> bool {
        match self.expected_for(tree, device) {
            Some(expected) => tree.name(device).as_deref() != Some(expected),
            None => false,
        }
    }

    /// Writes the expected name. Returns false for unknown devices.
    pub fn relabel(&self, tree: &dyn DeviceTree, device: DeviceHandle) -> bool {
        match self.expected_for(tree, device) {
            Some(expected) => {
                tree.set_property(device, PROP_NAME, PropertyValue::string(expected));
                true
            }
            None => false,
        }
    }
}

/// Walks the PCI devices once. Does not touch any cache.
pub fn walk(tree: &dyn DeviceTree, labels: &AudioLabelTable) -> DiscoveredDevices {
    let mut found = DiscoveredDevices::default();
    let mut hdau_digital = false;

    for device in tree.pci_devices() {
        let Some(id) = tree.pci_identity(device) else {
            continue;
        };
        match id.vendor_id {
            VENDOR_INTEL if id.is_display() => {
                if found.triple.igpu.is_none() {
                    found.triple.igpu = Some(device);
                }
            }
            VENDOR_INTEL if id.class() == CLASS_COMMUNICATION_OTHER => {
                if found.triple.imei.is_none() {
                    found.triple.imei = Some(device);
                }
            }
            VENDOR_INTEL if id.class() == CLASS_HD_AUDIO => {
                let digital = labels.is_digital(id.vendor_id, id.device_id);
                if found.triple.hdau.is_none() || (digital && !hdau_digital) {
                    found.triple.hdau = Some(device);
                    hdau_digital = digital;
                }
            }
            VENDOR_AMD if id.is_display() => found.has_amd = true,
            VENDOR_NVIDIA if id.is_display() => found.has_nvidia = true,
            _ => {}
        }
    }

    if found.triple.hdau.is_none() {
        let by_name = DeviceMatch { name: Some(NAME_DIGITAL_AUDIO), ..Default::default() };
        found.triple.hdau = find_matching(tree, &by_name);
    }

    debug!(
        "igfx: inventory igpu={:?} imei={:?} hdau={:?} amd={} nvidia={}",
        found.triple.igpu, found.triple.imei, found.triple.hdau, found.has_amd, found.has_nvidia
    );
    found
}

/// Cached inventory.
#[derive(Debug, Default)]
pub struct Inventory {
    cached: Option<DiscoveredDevices>,
    walks: u32,
}

impl Inventory {
    pub const fn new() -> Self {
        Self {
            cached: None,
            walks: 0,
        }
    }

    /// Cached result, unless a refresh is forced.
    pub fn cached(&self, force: bool) -> Option<DiscoveredDevices> {
        if force {
            None
        } else {
            self.cached
        }
    }

    /// Records a walk. Only results that found the GPU are kept.
    pub fn store(&mut self, found: DiscoveredDevices) -> DiscoveredDevices {
        self.walks += 1;
        if found.triple.igpu.is_some() {
            if self.cached.is_none() {
                info!("igfx: graphics device {:?}", found.triple.igpu);
            }
            self.cached = Some(found);
        }
        found
    }

    pub fn igpu(&self) -> Option<DeviceHandle> {
        self.cached.and_then(|found| found.triple.igpu)
    }

    pub fn walks(&self) -> u32 {
        self.walks
    }

    pub fn clear(&mut self) {
        self.cached = None;
    }
}
