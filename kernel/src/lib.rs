//! Intel integrated-graphics fixups
//!
//! Corrects what the stock Intel GPU driver stack sees on hardware it does
//! not natively expect: registry properties (framebuffer id, connector
//! count, audio linkage), the PCI device id reported to probe, link-training
//! and PAVP parameters, and the GuC/HuC firmware images delivered to the GPU.
//!
//! The host supplies the collaborators in `host` and drives the lifecycle:
//! `start` (or `Igfx::new` + `init`), `on_module_loaded` for each driver
//! bundle, `deinit`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod firmware;
pub mod framebuffer;
pub mod hooks;
pub mod host;
pub mod igfx;
pub mod interceptor;
pub mod inventory;
pub mod pci_spoof;
pub mod progress;
pub mod properties;
pub mod shims;
pub mod sync;
pub mod util;

#[cfg(test)]
mod testing;

use alloc::sync::Arc;

pub use config::{Config, FramebufferFixMode, SchedulerMode};
pub use firmware::{FirmwareKind, FirmwareStore};
pub use host::{Host, Module, Patcher};
pub use igfx::Igfx;
pub use progress::Progress;
pub use util::{IgfxError, IgfxResult};

/// Creates the subsystem, registers it with the substitutes and runs
/// `init`. The instance is unregistered again if `init` fails.
pub fn start(config: Config, host: Host, patcher: &mut dyn Patcher) -> IgfxResult<Arc<Igfx>> {
    let igfx = Arc::new(Igfx::new(config, host));
    shims::register(igfx.clone());
    if let Err(e) = igfx.init(patcher) {
        shims::unregister();
        return Err(e);
    }
    Ok(igfx)
}

/// Forwards a driver bundle load to the registered instance. Bundles that
/// are not Intel graphics drivers are ignored.
pub fn module_loaded(bundle_id: &str, patcher: &mut dyn Patcher) {
    let (Some(igfx), Some(module)) = (shims::instance(), Module::from_bundle_id(bundle_id)) else {
        return;
    };
    igfx.on_module_loaded(module, patcher);
}

/// Tears down the registered instance. Its substitutes keep forwarding.
pub fn stop() {
    if let Some(igfx) = shims::instance() {
        igfx.deinit();
    }
}
