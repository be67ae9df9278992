//! Symbol resolution and trampoline routing contract.

use core::sync::atomic::AtomicUsize;

use crate::util::IgfxResult;

/// Module an entry point lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    /// The kernel itself (PCI family).
    Kernel,
    /// Intel framebuffer driver.
    Framebuffer,
    /// Intel graphics accelerator driver, including its GuC/scheduler code.
    Accelerator,
}

const INTEL_BUNDLE_PREFIX: &str = "com.apple.driver.AppleIntel";

impl Module {
    /// Classifies a loaded driver bundle identifier.
    pub fn from_bundle_id(bundle: &str) -> Option<Self> {
        let rest = bundle.strip_prefix(INTEL_BUNDLE_PREFIX)?;
        if rest.ends_with("Framebuffer") || rest.ends_with("GraphicsFB") {
            Some(Module::Framebuffer)
        } else if rest.ends_with("Graphics") {
            Some(Module::Accelerator)
        } else {
            None
        }
    }
}

/// Code patching capability.
///
/// `route` must store a pointer to the original function, callable with the
/// identical ABI, into `original` before the substitute becomes reachable.
pub trait Patcher {
    fn resolve(&mut self, module: Module, symbol: &str) -> Option<usize>;

    /// Redirects `address` to `substitute`. The original is published
    /// through `original` ahead of the switch.
    fn route(&mut self, address: usize, substitute: usize, original: &AtomicUsize) -> IgfxResult<()>;
}
