//! Host capability surface
//!
//! Everything the subsystem needs from the surrounding kernel is expressed
//! as a trait here: registry traversal and properties, symbol patching, CPU
//! identification and console access. Hosts implement these once; tests use
//! the in-memory doubles in `crate::testing`.

pub mod console;
pub mod cpu;
pub mod patcher;
pub mod registry;

use alloc::boxed::Box;

use crate::firmware::FirmwareStore;

pub use console::ConsoleAccess;
pub use cpu::{CpuGeneration, CpuInfo, CpuidInfo};
pub use patcher::{Module, Patcher};
pub use registry::{
    find_matching, DeviceHandle, DeviceMatch, DeviceTree, ObjectRef, PciIdentity, PropertyValue,
    PROP_CLASS_CODE, PROP_DEVICE_ID, PROP_NAME, PROP_VENDOR_ID,
};

/// Bundle of host collaborators owned by the subsystem context.
pub struct Host {
    pub registry: Box<dyn DeviceTree>,
    pub cpu: Box<dyn CpuInfo>,
    pub console: Option<Box<dyn ConsoleAccess>>,
    pub firmware: FirmwareStore,
}

impl Host {
    pub fn new(registry: Box<dyn DeviceTree>, cpu: Box<dyn CpuInfo>) -> Self {
        Self {
            registry,
            cpu,
            console: None,
            firmware: FirmwareStore::new(),
        }
    }

    pub fn with_console(mut self, console: Box<dyn ConsoleAccess>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_firmware(mut self, firmware: FirmwareStore) -> Self {
        self.firmware = firmware;
        self
    }
}
