//! Shared helpers: the subsystem error type and small numeric utilities.

use core::fmt;

/// Errors raised inside the subsystem.
///
/// None of these ever reach the host driver: callers log them and degrade the
/// affected piece to pass-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgfxError {
    /// Subsystem switched off by `-igfxoff`.
    Disabled,
    /// No Intel graphics controller in the device tree.
    NoGraphicsDevice,
    /// A required symbol could not be resolved.
    SymbolNotFound(&'static str),
    /// The patcher refused to route a resolved symbol.
    RouteFailed(&'static str),
    /// A substitute fired for an instance this subsystem does not manage.
    DeviceMismatch,
    /// Framebuffer identifier equals the invalid sentinel.
    InvalidIdentifier(u32),
    /// Firmware slot buffer allocation failed.
    AllocationFailed(usize),
    /// No replacement image registered under this name.
    FirmwareMissing(&'static str),
    /// Internal state machine invariant broken.
    StateViolation(&'static str),
}

impl fmt::Display for IgfxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgfxError::Disabled => write!(f, "subsystem disabled"),
            IgfxError::NoGraphicsDevice => write!(f, "no graphics device"),
            IgfxError::SymbolNotFound(sym) => write!(f, "symbol {} not found", sym),
            IgfxError::RouteFailed(sym) => write!(f, "failed to route {}", sym),
            IgfxError::DeviceMismatch => write!(f, "unmanaged device instance"),
            IgfxError::InvalidIdentifier(id) => write!(f, "invalid framebuffer id {:#010X}", id),
            IgfxError::AllocationFailed(len) => write!(f, "failed to allocate {} bytes", len),
            IgfxError::FirmwareMissing(name) => write!(f, "firmware {} not registered", name),
            IgfxError::StateViolation(what) => write!(f, "state violation: {}", what),
        }
    }
}

pub type IgfxResult<T> = core::result::Result<T, IgfxError>;

/// Rounds `value` up to a multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Parses a decimal or `0x`-prefixed hexadecimal number.
pub fn parse_u32(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}
