//! Firmware slots: one per GuC/HuC image the loader hands to the GPU.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::util::{IgfxError, IgfxResult};

/// Image kinds the loader transfers, in load order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FirmwareKind {
    GucBinary = 0,
    HucBinary = 1,
    HucSignature = 2,
    GucPublicKey = 3,
}

/// Byte offset of the `size` dword in the CSS header that prefixes GuC and
/// HuC images (module_type, header_len, header_version, module_id,
/// module_vendor, date, size, ...).
pub const CSS_SIZE_OFFSET: usize = 24;

impl FirmwareKind {
    pub const COUNT: usize = 4;

    pub const ALL: [FirmwareKind; FirmwareKind::COUNT] = [
        FirmwareKind::GucBinary,
        FirmwareKind::HucBinary,
        FirmwareKind::HucSignature,
        FirmwareKind::GucPublicKey,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            FirmwareKind::GucBinary => "GuC binary",
            FirmwareKind::HucBinary => "HuC binary",
            FirmwareKind::HucSignature => "HuC signature",
            FirmwareKind::GucPublicKey => "GuC public key",
        }
    }

    /// Offset of the in-band size field that must agree with the DMA length.
    pub fn size_field(self) -> Option<usize> {
        match self {
            FirmwareKind::GucBinary | FirmwareKind::HucBinary => Some(CSS_SIZE_OFFSET),
            FirmwareKind::HucSignature | FirmwareKind::GucPublicKey => None,
        }
    }
}

/// Allocates a zeroed buffer, reporting failure instead of aborting.
fn try_alloc(len: usize) -> IgfxResult<Box<[u8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| IgfxError::AllocationFailed(len))?;
    buf.resize(len, 0);
    Ok(buf.into_boxed_slice())
}

/// State for one firmware image.
#[derive(Debug)]
pub struct FirmwareSlot {
    kind: FirmwareKind,
    intercept: bool,
    /// Scratch memory the loader writes its own image into.
    dummy: Option<Box<[u8]>>,
    /// Corrected image as delivered to the GPU.
    real: Option<Box<[u8]>>,
    /// CPU address of the driver-mapped memory holding `real`.
    backing: Option<usize>,
    /// The buffer object currently points at `dummy` instead of `backing`.
    swapped: bool,
    gpu_address: Option<u64>,
    binary_size: u32,
    size_field: Option<usize>,
}

impl FirmwareSlot {
    pub fn new(kind: FirmwareKind, intercept: bool) -> Self {
        Self {
            kind,
            intercept,
            dummy: None,
            real: None,
            backing: None,
            swapped: false,
            gpu_address: None,
            binary_size: 0,
            size_field: None,
        }
    }

    pub fn kind(&self) -> FirmwareKind {
        self.kind
    }

    pub fn intercept_enabled(&self) -> bool {
        self.intercept
    }

    pub fn disable(&mut self) {
        self.intercept = false;
    }

    pub fn binary_size(&self) -> u32 {
        self.binary_size
    }

    pub fn gpu_address(&self) -> Option<u64> {
        self.gpu_address
    }

    pub fn real(&self) -> Option<&[u8]> {
        self.real.as_deref()
    }

    pub fn backing(&self) -> Option<usize> {
        self.backing
    }

    pub fn is_staged(&self) -> bool {
        self.real.is_some()
    }

    /// Staged and mapped: safe to substitute into a DMA transfer.
    pub fn is_populated(&self) -> bool {
        self.real.is_some() && self.gpu_address.is_some()
    }

    pub fn dummy_address(&self) -> Option<usize> {
        self.dummy.as_ref().map(|d| d.as_ptr() as usize)
    }

    /// Lazily allocates the dummy buffer (at least `requested` bytes) and the
    /// corrected image. Existing buffers are reused when large enough.
    pub fn stage(&mut self, image: &[u8], requested: usize) -> IgfxResult<()> {
        if self.dummy.as_ref().map_or(true, |d| d.len() < requested) {
            self.dummy = Some(try_alloc(requested)?);
        }
        if !self.holds(image) {
            let mut real = try_alloc(image.len())?;
            real.copy_from_slice(image);
            self.real = Some(real);
            self.gpu_address = None;
        }
        self.binary_size = image.len() as u32;
        self.size_field = self.kind.size_field();
        self.patch_size_field();
        Ok(())
    }

    /// The staged copy was made from `image`. The size field is ignored
    /// since staging rewrites it.
    fn holds(&self, image: &[u8]) -> bool {
        let Some(real) = self.real.as_deref() else {
            return false;
        };
        if real.len() != image.len() {
            return false;
        }
        match self.kind.size_field() {
            Some(offset) if offset + 4 <= image.len() => {
                real[..offset] == image[..offset] && real[offset + 4..] == image[offset + 4..]
            }
            _ => real == image,
        }
    }

    /// Writes the corrected length (in dwords, as the CSS header counts it)
    /// into the image's own size field.
    pub fn patch_size_field(&mut self) -> bool {
        let (Some(offset), Some(real)) = (self.size_field, self.real.as_mut()) else {
            return false;
        };
        if offset + 4 > real.len() {
            return false;
        }
        let dwords = self.binary_size / 4;
        real[offset..offset + 4].copy_from_slice(&dwords.to_le_bytes());
        true
    }

    pub fn size_field_value(&self) -> Option<u32> {
        let offset = self.size_field?;
        let real = self.real.as_ref()?;
        let raw = real.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn attach_backing(&mut self, backing: usize) {
        self.backing = Some(backing);
        self.swapped = true;
    }

    /// Hands back the real backing if the buffer still points at the dummy.
    pub(crate) fn take_swapped(&mut self) -> Option<usize> {
        if self.swapped {
            self.swapped = false;
            self.backing
        } else {
            None
        }
    }

    pub(crate) fn record_gpu_address(&mut self, address: u64) {
        self.gpu_address = Some(address);
    }

    /// Drops a staging attempt whose buffer never reached the GPU.
    pub(crate) fn abandon(&mut self) {
        self.backing = None;
        self.swapped = false;
        self.gpu_address = None;
    }

    /// Frees both buffers and forgets the mapping.
    pub fn release(&mut self) {
        self.dummy = None;
        self.real = None;
        self.backing = None;
        self.swapped = false;
        self.gpu_address = None;
        self.binary_size = 0;
        self.size_field = None;
    }
}
