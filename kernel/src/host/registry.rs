//! Device registry access
//!
//! The registry owns every device; the subsystem only holds `DeviceHandle`
//! values, which are weak and may stop resolving at any point.

use alloc::string::String;
use alloc::vec::Vec;

/// Weak reference to a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque receiver (`that`/`provider`) handed to an intercepted entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(pub usize);

impl ObjectRef {
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        ObjectRef(ptr as usize)
    }
}

/// Registry property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Data(Vec<u8>),
    String(String),
}

impl PropertyValue {
    /// Little-endian 32-bit data value, the form id properties take.
    pub fn from_u32(value: u32) -> Self {
        PropertyValue::Data(value.to_le_bytes().to_vec())
    }

    pub fn string(value: &str) -> Self {
        PropertyValue::String(String::from(value))
    }

    /// Reads up to four little-endian bytes of a data value.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::Data(bytes) if !bytes.is_empty() && bytes.len() <= 4 => {
                let mut raw = [0u8; 4];
                raw[..bytes.len()].copy_from_slice(bytes);
                Some(u32::from_le_bytes(raw))
            }
            _ => None,
        }
    }

    /// String value; NUL-terminated data is accepted as well.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s.as_str()),
            PropertyValue::Data(bytes) => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                core::str::from_utf8(&bytes[..end]).ok()
            }
        }
    }
}

pub const PROP_NAME: &str = "name";
pub const PROP_VENDOR_ID: &str = "vendor-id";
pub const PROP_DEVICE_ID: &str = "device-id";
pub const PROP_CLASS_CODE: &str = "class-code";

/// PCI identity read back from registry properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_code: u8,
    pub subclass: u8,
}

impl PciIdentity {
    /// Class and subclass as one 16-bit value, e.g. `0x0300` for VGA.
    pub fn class(&self) -> u16 {
        ((self.class_code as u16) << 8) | self.subclass as u16
    }

    pub fn is_display(&self) -> bool {
        self.class_code == 0x03
    }
}

/// Match criteria for `find_matching`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceMatch<'a> {
    pub vendor_id: Option<u16>,
    pub class_code: Option<u8>,
    pub name: Option<&'a str>,
}

impl<'a> DeviceMatch<'a> {
    fn matches(&self, tree: &dyn DeviceTree, device: DeviceHandle) -> bool {
        if let Some(name) = self.name {
            if tree.name(device).as_deref() != Some(name) {
                return false;
            }
        }
        if self.vendor_id.is_none() && self.class_code.is_none() {
            return true;
        }
        match tree.pci_identity(device) {
            Some(id) => {
                self.vendor_id.map_or(true, |v| v == id.vendor_id)
                    && self.class_code.map_or(true, |c| c == id.class_code)
            }
            None => false,
        }
    }
}

/// Registry traversal and property primitives.
pub trait DeviceTree: Send + Sync {
    /// Every PCI device on the platform, bridges walked.
    fn pci_devices(&self) -> Vec<DeviceHandle>;

    /// Registry entry an intercepted receiver belongs to: the entry itself
    /// for registry objects, its provider chain otherwise.
    fn device_for(&self, object: ObjectRef) -> Option<DeviceHandle>;

    fn property(&self, device: DeviceHandle, key: &str) -> Option<PropertyValue>;

    fn set_property(&self, device: DeviceHandle, key: &str, value: PropertyValue);

    fn remove_property(&self, device: DeviceHandle, key: &str);

    /// Stops and detaches the device.
    fn terminate(&self, device: DeviceHandle);

    fn name(&self, device: DeviceHandle) -> Option<String> {
        self.property(device, PROP_NAME)
            .and_then(|v| v.as_str().map(String::from))
    }

    fn property_u32(&self, device: DeviceHandle, key: &str) -> Option<u32> {
        self.property(device, key).and_then(|v| v.as_u32())
    }

    fn pci_identity(&self, device: DeviceHandle) -> Option<PciIdentity> {
        let vendor = self.property_u32(device, PROP_VENDOR_ID)?;
        let dev = self.property_u32(device, PROP_DEVICE_ID)?;
        let class = self.property_u32(device, PROP_CLASS_CODE)?;
        Some(PciIdentity {
            vendor_id: vendor as u16,
            device_id: dev as u16,
            class_code: (class >> 16) as u8,
            subclass: (class >> 8) as u8,
        })
    }
}

/// First device satisfying `criteria`.
pub fn find_matching(tree: &dyn DeviceTree, criteria: &DeviceMatch<'_>) -> Option<DeviceHandle> {
    tree.pci_devices()
        .into_iter()
        .find(|&dev| criteria.matches(tree, dev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTree;

    #[test]
    fn test_property_value_u32() {
        assert_eq!(PropertyValue::from_u32(0x591B_0000).as_u32(), Some(0x591B_0000));
        assert_eq!(PropertyValue::Data(vec![0x12, 0x59]).as_u32(), Some(0x5912));
        assert_eq!(PropertyValue::Data(vec![0; 8]).as_u32(), None);
        assert_eq!(PropertyValue::string("IGPU").as_u32(), None);
    }

    #[test]
    fn test_property_value_str() {
        assert_eq!(PropertyValue::Data(b"onboard-1\0".to_vec()).as_str(), Some("onboard-1"));
        assert_eq!(PropertyValue::string("HDAU").as_str(), Some("HDAU"));
    }

    #[test]
    fn test_find_matching() {
        let tree = MockTree::new();
        let igpu = tree.add_pci("GFX0", 0x8086, 0x5912, 0x03_00_00);
        let hdef = tree.add_pci("HDEF", 0x8086, 0xA2F0, 0x04_03_00);

        let display = DeviceMatch { vendor_id: Some(0x8086), class_code: Some(0x03), name: None };
        assert_eq!(find_matching(&tree, &display), Some(igpu));

        let by_name = DeviceMatch { name: Some("HDEF"), ..Default::default() };
        assert_eq!(find_matching(&tree, &by_name), Some(hdef));

        let amd = DeviceMatch { vendor_id: Some(0x1002), ..Default::default() };
        assert_eq!(find_matching(&tree, &amd), None);
    }

    #[test]
    fn test_pci_identity() {
        let tree = MockTree::new();
        let dev = tree.add_pci("IMEI", 0x8086, 0xA2BA, 0x07_80_00);
        let id = tree.pci_identity(dev).unwrap();
        assert_eq!(id.vendor_id, 0x8086);
        assert_eq!(id.device_id, 0xA2BA);
        assert_eq!(id.class(), 0x0780);
        assert!(!id.is_display());
    }
}
