//! Boot console access used by the framebuffer-init fixups.

use alloc::vec::Vec;

/// Boot console the framebuffer driver takes over.
pub trait ConsoleAccess: Send + Sync {
    /// Copy of the visible console framebuffer, if one is active.
    fn snapshot(&self) -> Option<Vec<u8>>;

    /// Writes a previous snapshot back into the framebuffer.
    fn restore(&self, contents: &[u8]);

    /// Sets the verbose-boot flag the framebuffer driver consults during
    /// init, returning the previous value.
    fn set_verbose_boot(&self, enabled: bool) -> bool;
}
