//! Replacement firmware store
//!
//! Hosts register the corrected GuC/HuC images by name before `init`; the
//! engine picks the one matching the running CPU generation.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use log::debug;

use super::FirmwareKind;
use crate::host::CpuGeneration;
use crate::util::{IgfxError, IgfxResult};

/// Image name for a slot on a given generation. Skylake has its own
/// builds; everything newer runs the Kaby Lake ones.
pub fn image_name(kind: FirmwareKind, generation: CpuGeneration) -> &'static str {
    let skl = generation == CpuGeneration::Skylake;
    match kind {
        FirmwareKind::GucBinary => if skl { "skl_guc" } else { "kbl_guc" },
        FirmwareKind::HucBinary => if skl { "skl_huc" } else { "kbl_huc" },
        FirmwareKind::HucSignature => if skl { "skl_huc_sig" } else { "kbl_huc_sig" },
        FirmwareKind::GucPublicKey => if skl { "skl_guc_pubkey" } else { "kbl_guc_pubkey" },
    }
}

#[derive(Debug, Default)]
pub struct FirmwareStore {
    images: BTreeMap<String, Vec<u8>>,
}

impl FirmwareStore {
    pub fn new() -> Self {
        Self {
            images: BTreeMap::new(),
        }
    }

    /// Registers (or replaces) an image.
    pub fn register(&mut self, name: &str, data: Vec<u8>) {
        debug!("igfx: firmware {} registered ({} bytes)", name, data.len());
        self.images.insert(String::from(name), data);
    }

    pub fn request(&self, name: &'static str) -> IgfxResult<&[u8]> {
        self.images
            .get(name)
            .map(|data| data.as_slice())
            .ok_or(IgfxError::FirmwareMissing(name))
    }

    /// Image for `kind` on `generation`.
    pub fn image(&self, kind: FirmwareKind, generation: CpuGeneration) -> IgfxResult<&[u8]> {
        self.request(image_name(kind, generation))
    }
}
