//! CPU generation detection.

/// Intel CPU generations with an integrated GPU this subsystem knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CpuGeneration {
    Unknown,
    SandyBridge,
    IvyBridge,
    Haswell,
    Broadwell,
    Skylake,
    KabyLake,
    CoffeeLake,
}

impl CpuGeneration {
    pub fn name(&self) -> &'static str {
        match self {
            CpuGeneration::Unknown => "unknown",
            CpuGeneration::SandyBridge => "Sandy Bridge",
            CpuGeneration::IvyBridge => "Ivy Bridge",
            CpuGeneration::Haswell => "Haswell",
            CpuGeneration::Broadwell => "Broadwell",
            CpuGeneration::Skylake => "Skylake",
            CpuGeneration::KabyLake => "Kaby Lake",
            CpuGeneration::CoffeeLake => "Coffee Lake",
        }
    }

    /// Generations whose GPU carries GuC/HuC microcontrollers.
    pub fn has_guc(&self) -> bool {
        *self >= CpuGeneration::Skylake
    }

    /// Maps a CPUID leaf 1 signature to a generation.
    pub fn from_signature(family: u32, model: u32, stepping: u32) -> Self {
        if family != 6 {
            return CpuGeneration::Unknown;
        }
        match model {
            0x2A | 0x2D => CpuGeneration::SandyBridge,
            0x3A | 0x3E => CpuGeneration::IvyBridge,
            0x3C | 0x3F | 0x45 | 0x46 => CpuGeneration::Haswell,
            0x3D | 0x47 | 0x4F | 0x56 => CpuGeneration::Broadwell,
            0x4E | 0x5E | 0x55 => CpuGeneration::Skylake,
            // Kaby Lake and Coffee/Whiskey Lake share model numbers
            0x8E if stepping >= 0xB => CpuGeneration::CoffeeLake,
            0x9E if stepping >= 0xA => CpuGeneration::CoffeeLake,
            0x8E | 0x9E => CpuGeneration::KabyLake,
            0xA5 | 0xA6 => CpuGeneration::CoffeeLake,
            _ => CpuGeneration::Unknown,
        }
    }
}

/// CPU identification capability.
pub trait CpuInfo: Send + Sync {
    fn generation(&self) -> CpuGeneration;
}

/// Detects the generation from CPUID leaf 1.
pub struct CpuidInfo;

impl CpuidInfo {
    /// Splits a leaf 1 EAX value into (family, model, stepping), folding in
    /// the extended family/model fields.
    pub fn decode_signature(eax: u32) -> (u32, u32, u32) {
        let stepping = eax & 0xF;
        let mut model = (eax >> 4) & 0xF;
        let mut family = (eax >> 8) & 0xF;
        if family == 0xF {
            family += (eax >> 20) & 0xFF;
        }
        if family == 0x6 || family >= 0xF {
            model |= ((eax >> 16) & 0xF) << 4;
        }
        (family, model, stepping)
    }
}

impl CpuInfo for CpuidInfo {
    #[cfg(target_arch = "x86_64")]
    fn generation(&self) -> CpuGeneration {
        let leaf1 = unsafe { core::arch::x86_64::__cpuid(1) };
        let (family, model, stepping) = Self::decode_signature(leaf1.eax);
        CpuGeneration::from_signature(family, model, stepping)
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn generation(&self) -> CpuGeneration {
        CpuGeneration::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_signature() {
        // i7-7700K: family 6, model 0x9E, stepping 9
        assert_eq!(CpuidInfo::decode_signature(0x0009_06E9), (6, 0x9E, 9));
        // i5-2500: family 6, model 0x2A, stepping 7
        assert_eq!(CpuidInfo::decode_signature(0x0002_06A7), (6, 0x2A, 7));
    }

    #[test]
    fn test_generation_table() {
        assert_eq!(CpuGeneration::from_signature(6, 0x2A, 7), CpuGeneration::SandyBridge);
        assert_eq!(CpuGeneration::from_signature(6, 0x5E, 3), CpuGeneration::Skylake);
        assert_eq!(CpuGeneration::from_signature(6, 0x9E, 9), CpuGeneration::KabyLake);
        assert_eq!(CpuGeneration::from_signature(6, 0x9E, 0xA), CpuGeneration::CoffeeLake);
        assert_eq!(CpuGeneration::from_signature(6, 0x8E, 0xC), CpuGeneration::CoffeeLake);
        assert_eq!(CpuGeneration::from_signature(0xF, 0x2A, 0), CpuGeneration::Unknown);
    }

    #[test]
    fn test_has_guc() {
        assert!(!CpuGeneration::Broadwell.has_guc());
        assert!(CpuGeneration::Skylake.has_guc());
        assert!(CpuGeneration::CoffeeLake.has_guc());
    }
}
