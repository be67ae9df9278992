//! Boot-time configuration
//!
//! Recognised boot arguments:
//! - `igfxrst=<0|1|2>`: framebuffer fix mode (default / reset / copy)
//! - `igfxfw=<0|1|2>`: scheduler firmware (disabled / reference / vendor)
//! - `igfxbin=<mask>`: per-slot binary interception, bit N = slot N
//! - `igfxframe=<id>`: framebuffer identifier override
//! - `igfxlanes=<n>`: DisplayPort lane ceiling
//! - `-igfxnoaudio`: terminate the audio companion on connector-less frames
//! - `-igfxoff`: disable the subsystem

use log::warn;

use crate::firmware::FirmwareKind;
use crate::util::parse_u32;

/// Framebuffer distortion fix mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramebufferFixMode {
    /// Leave the console alone.
    #[default]
    Default,
    /// Force a verbose-boot style console reset.
    Reset,
    /// Copy the console contents across framebuffer init.
    Copy,
}

impl FramebufferFixMode {
    fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(FramebufferFixMode::Default),
            1 => Some(FramebufferFixMode::Reset),
            2 => Some(FramebufferFixMode::Copy),
            _ => None,
        }
    }
}

/// Which GPU scheduler firmware path the driver is steered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerMode {
    /// Host-side scheduling, no microcontroller firmware.
    #[default]
    DisableFirmware,
    /// Reference firmware scheduler (IGScheduler4).
    ReferenceFirmware,
    /// Vendor firmware scheduler (IGGuC).
    VendorFirmware,
}

impl SchedulerMode {
    fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(SchedulerMode::DisableFirmware),
            1 => Some(SchedulerMode::ReferenceFirmware),
            2 => Some(SchedulerMode::VendorFirmware),
            _ => None,
        }
    }

    pub fn loads_firmware(&self) -> bool {
        !matches!(self, SchedulerMode::DisableFirmware)
    }
}

pub const DEFAULT_LANE_CEILING: u32 = 4;

/// Subsystem configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub enabled: bool,
    pub reset_framebuffer: FramebufferFixMode,
    pub scheduler: SchedulerMode,
    /// Per-slot interception switches, indexed by `FirmwareKind`.
    pub binary_interception: [bool; FirmwareKind::COUNT],
    pub framebuffer_override: Option<u32>,
    pub lane_ceiling: u32,
    pub terminate_connectorless_audio: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            reset_framebuffer: FramebufferFixMode::Default,
            scheduler: SchedulerMode::DisableFirmware,
            binary_interception: [true, true, false, false],
            framebuffer_override: None,
            lane_ceiling: DEFAULT_LANE_CEILING,
            terminate_connectorless_audio: false,
        }
    }
}

impl Config {
    /// Builds a configuration from a whitespace-separated boot-argument line.
    /// Unknown arguments are ignored; malformed values keep the default.
    pub fn from_boot_args(args: &str) -> Self {
        let mut config = Config::default();
        for arg in args.split_whitespace() {
            match arg {
                "-igfxoff" => config.enabled = false,
                "-igfxnoaudio" => config.terminate_connectorless_audio = true,
                _ => {
                    if let Some((key, value)) = arg.split_once('=') {
                        config.apply(key, value);
                    }
                }
            }
        }
        config
    }

    fn apply(&mut self, key: &str, value: &str) {
        let parsed = parse_u32(value);
        match key {
            "igfxrst" => match parsed.and_then(FramebufferFixMode::from_raw) {
                Some(mode) => self.reset_framebuffer = mode,
                None => warn!("igfx: ignoring igfxrst={}", value),
            },
            "igfxfw" => match parsed.and_then(SchedulerMode::from_raw) {
                Some(mode) => self.scheduler = mode,
                None => warn!("igfx: ignoring igfxfw={}", value),
            },
            "igfxbin" => match parsed {
                Some(mask) if mask < (1 << FirmwareKind::COUNT) => {
                    for kind in FirmwareKind::ALL {
                        self.binary_interception[kind.index()] = mask & (1 << kind.index()) != 0;
                    }
                }
                _ => warn!("igfx: ignoring igfxbin={}", value),
            },
            "igfxframe" => match parsed {
                Some(id) => self.framebuffer_override = Some(id),
                None => warn!("igfx: ignoring igfxframe={}", value),
            },
            "igfxlanes" => match parsed {
                Some(lanes @ 1..=4) => self.lane_ceiling = lanes,
                _ => warn!("igfx: ignoring igfxlanes={}", value),
            },
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_boot_args("");
        assert_eq!(config, Config::default());
        assert!(config.enabled);
        assert_eq!(config.binary_interception, [true, true, false, false]);
        assert_eq!(config.lane_ceiling, 4);
    }

    #[test]
    fn test_full_line() {
        let config = Config::from_boot_args(
            "keepsyms=1 igfxrst=2 igfxfw=2 igfxbin=0x5 igfxframe=0x59120003 igfxlanes=2 -igfxnoaudio",
        );
        assert_eq!(config.reset_framebuffer, FramebufferFixMode::Copy);
        assert_eq!(config.scheduler, SchedulerMode::VendorFirmware);
        assert_eq!(config.binary_interception, [true, false, true, false]);
        assert_eq!(config.framebuffer_override, Some(0x5912_0003));
        assert_eq!(config.lane_ceiling, 2);
        assert!(config.terminate_connectorless_audio);
    }

    #[test]
    fn test_malformed_values_keep_defaults() {
        let config = Config::from_boot_args("igfxrst=7 igfxfw=x igfxbin=0x10 igfxlanes=9");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_disable() {
        assert!(!Config::from_boot_args("-v -igfxoff").enabled);
    }
}
