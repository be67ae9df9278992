//! In-memory host doubles for unit tests.

use std::collections::BTreeMap;
use std::string::String;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use crate::config::{Config, SchedulerMode};
use crate::firmware::{FirmwareStore, MappedBuffer};
use crate::host::{
    ConsoleAccess, CpuGeneration, CpuInfo, DeviceHandle, DeviceTree, Host, Module, ObjectRef,
    Patcher, PropertyValue, PROP_CLASS_CODE, PROP_DEVICE_ID, PROP_NAME, PROP_VENDOR_ID,
};
use crate::igfx::Igfx;
use crate::interceptor::HookGroup;
use crate::util::{IgfxError, IgfxResult};

#[derive(Default)]
struct TreeState {
    next: u64,
    devices: Vec<DeviceHandle>,
    properties: BTreeMap<DeviceHandle, BTreeMap<String, PropertyValue>>,
    objects: BTreeMap<usize, DeviceHandle>,
    terminated: Vec<DeviceHandle>,
}

/// Device tree backed by maps. Clones share state.
#[derive(Clone, Default)]
pub struct MockTree {
    state: Arc<Mutex<TreeState>>,
    walks: Arc<AtomicUsize>,
}

impl MockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a PCI device; `class` is `class << 16 | subclass << 8 | prog_if`.
    pub fn add_pci(&self, name: &str, vendor: u16, device: u16, class: u32) -> DeviceHandle {
        let mut state = self.state.lock().unwrap();
        state.next += 1;
        let handle = DeviceHandle(state.next);
        state.devices.push(handle);
        let props = state.properties.entry(handle).or_default();
        props.insert(PROP_NAME.into(), PropertyValue::string(name));
        props.insert(PROP_VENDOR_ID.into(), PropertyValue::from_u32(vendor as u32));
        props.insert(PROP_DEVICE_ID.into(), PropertyValue::from_u32(device as u32));
        props.insert(PROP_CLASS_CODE.into(), PropertyValue::from_u32(class));
        handle
    }

    /// Makes `object` resolve to `device` in `device_for`.
    pub fn bind_object(&self, object: ObjectRef, device: DeviceHandle) {
        self.state.lock().unwrap().objects.insert(object.0, device);
    }

    pub fn properties(&self, device: DeviceHandle) -> BTreeMap<String, PropertyValue> {
        self.state
            .lock()
            .unwrap()
            .properties
            .get(&device)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_terminated(&self, device: DeviceHandle) -> bool {
        self.state.lock().unwrap().terminated.contains(&device)
    }

    pub fn walks(&self) -> usize {
        self.walks.load(Ordering::SeqCst)
    }
}

impl DeviceTree for MockTree {
    fn pci_devices(&self) -> Vec<DeviceHandle> {
        self.walks.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        state
            .devices
            .iter()
            .copied()
            .filter(|d| !state.terminated.contains(d))
            .collect()
    }

    fn device_for(&self, object: ObjectRef) -> Option<DeviceHandle> {
        self.state.lock().unwrap().objects.get(&object.0).copied()
    }

    fn property(&self, device: DeviceHandle, key: &str) -> Option<PropertyValue> {
        self.state
            .lock()
            .unwrap()
            .properties
            .get(&device)
            .and_then(|props| props.get(key).cloned())
    }

    fn set_property(&self, device: DeviceHandle, key: &str, value: PropertyValue) {
        self.state
            .lock()
            .unwrap()
            .properties
            .entry(device)
            .or_default()
            .insert(key.into(), value);
    }

    fn remove_property(&self, device: DeviceHandle, key: &str) {
        if let Some(props) = self.state.lock().unwrap().properties.get_mut(&device) {
            props.remove(key);
        }
    }

    fn terminate(&self, device: DeviceHandle) {
        self.state.lock().unwrap().terminated.push(device);
    }
}

/// Patcher resolving from a symbol table and recording every route.
#[derive(Default)]
pub struct MockPatcher {
    symbols: Vec<(Module, String, usize)>,
    routes: Vec<(usize, usize)>,
    published: Vec<usize>,
    next_address: usize,
    /// Routes that succeed before every further one fails.
    fail_after: Option<usize>,
}

/// Originals returned by `MockPatcher::route` are offset from the target.
pub const MOCK_ORIGINAL_OFFSET: usize = 0x1000_0000;

impl MockPatcher {
    pub fn new() -> Self {
        Self {
            next_address: 0xFFFF_0000,
            ..Self::default()
        }
    }

    pub fn provide(&mut self, module: Module, symbol: &str, address: usize) {
        self.symbols.push((module, symbol.into(), address));
    }

    /// Provides every member of `group` at fresh addresses.
    pub fn provide_group(&mut self, group: HookGroup, scheduler: SchedulerMode) {
        for entry in group.members(scheduler) {
            self.next_address += 0x100;
            let address = self.next_address;
            self.provide(entry.module(), entry.symbol(scheduler), address);
        }
    }

    /// Provides every group for `scheduler`.
    pub fn provide_all(&mut self, scheduler: SchedulerMode) {
        for group in HookGroup::ALL {
            self.provide_group(group, scheduler);
        }
    }

    pub fn fail_routes(&mut self) {
        self.fail_routes_after(0);
    }

    pub fn fail_routes_after(&mut self, succeeding: usize) {
        self.fail_after = Some(succeeding);
    }

    pub fn allow_routes(&mut self) {
        self.fail_after = None;
    }

    /// What each original slot held at the moment its route went live.
    pub fn published(&self) -> &[usize] {
        &self.published
    }

    pub fn routes(&self) -> &[(usize, usize)] {
        &self.routes
    }
}

impl Patcher for MockPatcher {
    fn resolve(&mut self, module: Module, symbol: &str) -> Option<usize> {
        self.symbols
            .iter()
            .find(|(m, s, _)| *m == module && s == symbol)
            .map(|(_, _, address)| *address)
    }

    fn route(&mut self, address: usize, substitute: usize, original: &AtomicUsize) -> IgfxResult<()> {
        if self.fail_after.map_or(false, |n| self.routes.len() >= n) {
            return Err(IgfxError::RouteFailed("mock"));
        }
        original.store(address + MOCK_ORIGINAL_OFFSET, Ordering::Release);
        self.published.push(original.load(Ordering::Acquire));
        self.routes.push((address, substitute));
        Ok(())
    }
}

pub struct FixedCpu(pub CpuGeneration);

impl CpuInfo for FixedCpu {
    fn generation(&self) -> CpuGeneration {
        self.0
    }
}

#[derive(Default)]
struct ConsoleState {
    contents: Vec<u8>,
    verbose: bool,
    verbose_writes: Vec<bool>,
    restored: Vec<Vec<u8>>,
}

/// Console double. Clones share state.
#[derive(Clone, Default)]
pub struct MockConsole {
    state: Arc<Mutex<ConsoleState>>,
}

impl MockConsole {
    pub fn with_contents(contents: &[u8]) -> Self {
        let console = Self::default();
        console.state.lock().unwrap().contents = contents.to_vec();
        console
    }

    /// Simulates the driver repainting the console.
    pub fn scribble(&self) {
        let mut state = self.state.lock().unwrap();
        for byte in state.contents.iter_mut() {
            *byte = 0;
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().unwrap().contents.clone()
    }

    pub fn verbose(&self) -> bool {
        self.state.lock().unwrap().verbose
    }

    pub fn verbose_writes(&self) -> Vec<bool> {
        self.state.lock().unwrap().verbose_writes.clone()
    }

    pub fn restores(&self) -> usize {
        self.state.lock().unwrap().restored.len()
    }
}

impl ConsoleAccess for MockConsole {
    fn snapshot(&self) -> Option<Vec<u8>> {
        Some(self.state.lock().unwrap().contents.clone())
    }

    fn restore(&self, contents: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.contents = contents.to_vec();
        state.restored.push(contents.to_vec());
    }

    fn set_verbose_boot(&self, enabled: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        state.verbose_writes.push(enabled);
        core::mem::replace(&mut state.verbose, enabled)
    }
}

/// Driver buffer double: `backing` is a plain address, contents are kept
/// on the side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBuffer {
    pub backing: usize,
    pub capacity: usize,
    pub contents: Vec<u8>,
}

impl MockBuffer {
    pub fn new(backing: usize, capacity: usize) -> Self {
        Self {
            backing,
            capacity,
            contents: Vec::new(),
        }
    }
}

impl MappedBuffer for MockBuffer {
    fn backing(&self) -> usize {
        self.backing
    }

    fn set_backing(&mut self, address: usize) {
        self.backing = address;
    }

    fn fill(&mut self, image: &[u8]) -> bool {
        if image.len() > self.capacity {
            return false;
        }
        self.contents = image.to_vec();
        true
    }
}

pub const GUC_IMAGE_LEN: usize = 0x2_4000;
pub const HUC_IMAGE_LEN: usize = 0x1_8000;

/// Kaby Lake replacement images.
pub fn kbl_firmware() -> FirmwareStore {
    let mut store = FirmwareStore::new();
    store.register("kbl_guc", vec![0x11; GUC_IMAGE_LEN]);
    store.register("kbl_huc", vec![0x22; HUC_IMAGE_LEN]);
    store.register("kbl_huc_sig", vec![0x33; 0x100]);
    store
}

/// A Kaby Lake desktop wired into an `Igfx`.
pub struct Platform {
    pub tree: MockTree,
    pub console: MockConsole,
    pub igpu: DeviceHandle,
    pub hdau: DeviceHandle,
    /// Receiver bound to the graphics device.
    pub gpu_object: ObjectRef,
    pub igfx: Igfx,
}

impl Platform {
    pub fn new(config: Config) -> Self {
        Self::with_generation(config, CpuGeneration::KabyLake)
    }

    pub fn with_generation(config: Config, generation: CpuGeneration) -> Self {
        let tree = MockTree::new();
        tree.add_pci("PCI0", 0x8086, 0x591F, 0x06_00_00);
        let igpu = tree.add_pci("GFX0", 0x8086, 0x5912, 0x03_00_00);
        tree.add_pci("IMEI", 0x8086, 0xA2BA, 0x07_80_00);
        let hdau = tree.add_pci("HDEF", 0x8086, 0xA2F0, 0x04_03_00);
        let gpu_object = ObjectRef(0xF000_0000);
        tree.bind_object(gpu_object, igpu);

        let console = MockConsole::with_contents(b"boot log");
        let host = Host::new(Box::new(tree.clone()), Box::new(FixedCpu(generation)))
            .with_console(Box::new(console.clone()))
            .with_firmware(kbl_firmware());
        Self {
            tree,
            console,
            igpu,
            hdau,
            gpu_object,
            igfx: Igfx::new(config, host),
        }
    }

    /// Runs `init` and announces every driver module.
    pub fn boot(&self, patcher: &mut MockPatcher) {
        self.igfx.init(patcher).unwrap();
        self.igfx.on_module_loaded(Module::Framebuffer, patcher);
        self.igfx.on_module_loaded(Module::Accelerator, patcher);
    }
}
