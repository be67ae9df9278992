//! PCI configuration-space device-id spoofing.
//!
//! Driver probe matches against the id read from config space, which happens
//! before any registry property is consulted. Reads of the id registers of
//! the graphics device report the `device-id` property instead.

/// 32-bit read covering vendor (low half) and device id (high half).
pub const PCI_VENDOR_ID_OFFSET: u8 = 0x00;
/// 16-bit read of the device id.
pub const PCI_DEVICE_ID_OFFSET: u8 = 0x02;

/// Result of a 16-bit config read.
pub fn spoof_read16(offset: u8, value: u16, device_id: Option<u16>) -> u16 {
    match device_id {
        Some(id) if offset == PCI_DEVICE_ID_OFFSET && id != value => id,
        _ => value,
    }
}

/// Result of a 32-bit config read. Only the device-id half is replaced.
pub fn spoof_read32(offset: u8, value: u32, device_id: Option<u16>) -> u32 {
    match device_id {
        Some(id) if offset == PCI_VENDOR_ID_OFFSET && (value >> 16) as u16 != id => {
            (value & 0xFFFF) | ((id as u32) << 16)
        }
        _ => value,
    }
}
