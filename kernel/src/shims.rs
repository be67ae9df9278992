//! `extern "C"` substitutes handed to the patcher.
//!
//! Each substitute looks up the registered `Igfx`, rebuilds the original
//! from its trampoline and runs the matching body in `hooks`. Substitutes
//! are only routed by a registered instance, so the fallback values below
//! are never observed by a driver.

use alloc::sync::Arc;
use core::ffi::c_void;
use core::mem;
use core::ptr;

use spin::RwLock;

use crate::firmware::{DmaRequest, MappedBuffer};
use crate::host::ObjectRef;
use crate::igfx::Igfx;
use crate::interceptor::EntryPoint;

/// `kIOReturnError`
const K_IO_RETURN_ERROR: u32 = 0xE000_02BC;

static INSTANCE: RwLock<Option<Arc<Igfx>>> = RwLock::new(None);

/// Makes `igfx` the target of every substitute.
pub fn register(igfx: Arc<Igfx>) {
    *INSTANCE.write() = Some(igfx);
}

pub fn unregister() -> Option<Arc<Igfx>> {
    INSTANCE.write().take()
}

pub fn instance() -> Option<Arc<Igfx>> {
    INSTANCE.read().clone()
}

type PavpSessionFn = extern "C" fn(*mut c_void, i32, u32, *mut u32, bool) -> u32;
type ComputeLaneCountFn = extern "C" fn(*mut c_void, *mut c_void, u32, i32, *mut i32) -> bool;
type GraphicsStartFn = extern "C" fn(*mut c_void, *mut c_void) -> bool;
type LoadGucBinaryFn = extern "C" fn(*mut c_void, bool) -> bool;
type LoadFirmwareFn = extern "C" fn(*mut c_void) -> bool;
type InitSchedControlFn = extern "C" fn(*mut c_void, *mut c_void) -> bool;
type BufferWithOptionsFn = extern "C" fn(*mut c_void, usize, u32, u32) -> *mut c_void;
type GpuVirtualAddressFn = extern "C" fn(*mut c_void) -> u64;
type DmaHostToGucFn = extern "C" fn(*mut c_void, u64, u32, u32, u32, bool) -> bool;
type MethodFn = extern "C" fn(*mut c_void);
type ConfigRead16Fn = extern "C" fn(*mut c_void, u32, u8) -> u16;
type ConfigRead32Fn = extern "C" fn(*mut c_void, u32, u8) -> u32;

/// Address of the substitute for `entry`.
pub fn substitute_for(entry: EntryPoint) -> usize {
    match entry {
        EntryPoint::PavpSessionCallback => pavp_session_callback as usize,
        EntryPoint::FrameBufferInit => frame_buffer_init as usize,
        EntryPoint::ComputeLaneCount => compute_lane_count as usize,
        EntryPoint::GraphicsStart => graphics_start as usize,
        EntryPoint::LoadGucBinary => load_guc_binary as usize,
        EntryPoint::LoadFirmware => load_firmware as usize,
        EntryPoint::InitSchedControl => init_sched_control as usize,
        EntryPoint::IgBufferWithOptions => ig_buffer_with_options as usize,
        EntryPoint::IgBufferGpuVirtualAddress => ig_buffer_gpu_virtual_address as usize,
        EntryPoint::DmaHostToGuc => dma_host_to_guc as usize,
        EntryPoint::InitInterruptServices => init_interrupt_services as usize,
        EntryPoint::SystemWillSleep => system_will_sleep as usize,
        EntryPoint::SystemDidWake => system_did_wake as usize,
        EntryPoint::ConfigRead16 => config_read16 as usize,
        EntryPoint::ConfigRead32 => config_read32 as usize,
    }
}

fn resolve(entry: EntryPoint) -> Option<(Arc<Igfx>, usize)> {
    let igfx = instance()?;
    let original = igfx.original(entry)?;
    Some((igfx, original))
}

/// `IGSharedMappedBuffer` seen through its CPU mapping fields.
struct RawMappedBuffer(*mut c_void);

const BUFFER_DATA_WORD: usize = 7;
const BUFFER_LENGTH_WORD: usize = 8;

impl RawMappedBuffer {
    fn word(&self, index: usize) -> usize {
        unsafe { *(self.0 as *const usize).add(index) }
    }
}

impl MappedBuffer for RawMappedBuffer {
    fn backing(&self) -> usize {
        self.word(BUFFER_DATA_WORD)
    }

    fn set_backing(&mut self, address: usize) {
        unsafe { *(self.0 as *mut usize).add(BUFFER_DATA_WORD) = address }
    }

    fn fill(&mut self, image: &[u8]) -> bool {
        let data = self.backing();
        if data == 0 || image.len() > self.word(BUFFER_LENGTH_WORD) {
            return false;
        }
        unsafe { ptr::copy_nonoverlapping(image.as_ptr(), data as *mut u8, image.len()) };
        true
    }
}

extern "C" fn pavp_session_callback(
    that: *mut c_void,
    command: i32,
    a3: u32,
    a4: *mut u32,
    flag: bool,
) -> u32 {
    let Some((igfx, address)) = resolve(EntryPoint::PavpSessionCallback) else {
        return K_IO_RETURN_ERROR;
    };
    let original: PavpSessionFn = unsafe { mem::transmute(address) };
    igfx.pavp_session_callback(ObjectRef::from_ptr(that), command, || {
        original(that, command, a3, a4, flag)
    })
}

extern "C" fn frame_buffer_init(that: *mut c_void) {
    let Some((igfx, address)) = resolve(EntryPoint::FrameBufferInit) else {
        return;
    };
    let original: MethodFn = unsafe { mem::transmute(address) };
    igfx.frame_buffer_init(ObjectRef::from_ptr(that), || original(that))
}

extern "C" fn compute_lane_count(
    that: *mut c_void,
    timing: *mut c_void,
    bpp: u32,
    available: i32,
    lane_count: *mut i32,
) -> bool {
    let Some((igfx, address)) = resolve(EntryPoint::ComputeLaneCount) else {
        return false;
    };
    let original: ComputeLaneCountFn = unsafe { mem::transmute(address) };
    if lane_count.is_null() {
        return original(that, timing, bpp, available, lane_count);
    }
    let lanes = unsafe { &mut *lane_count };
    igfx.compute_lane_count(ObjectRef::from_ptr(that), available, lanes, |available, out| {
        original(that, timing, bpp, available, out as *mut i32)
    })
}

extern "C" fn graphics_start(that: *mut c_void, provider: *mut c_void) -> bool {
    let Some((igfx, address)) = resolve(EntryPoint::GraphicsStart) else {
        return false;
    };
    let original: GraphicsStartFn = unsafe { mem::transmute(address) };
    igfx.graphics_start(ObjectRef::from_ptr(provider), || original(that, provider))
}

extern "C" fn load_guc_binary(that: *mut c_void, flag: bool) -> bool {
    let Some((igfx, address)) = resolve(EntryPoint::LoadGucBinary) else {
        return false;
    };
    let original: LoadGucBinaryFn = unsafe { mem::transmute(address) };
    igfx.load_guc_binary(ObjectRef::from_ptr(that), || original(that, flag))
}

extern "C" fn load_firmware(that: *mut c_void) -> bool {
    let Some((igfx, address)) = resolve(EntryPoint::LoadFirmware) else {
        return false;
    };
    let original: LoadFirmwareFn = unsafe { mem::transmute(address) };
    igfx.load_firmware(ObjectRef::from_ptr(that), || original(that))
}

extern "C" fn init_sched_control(that: *mut c_void, ctrl: *mut c_void) -> bool {
    let Some((igfx, address)) = resolve(EntryPoint::InitSchedControl) else {
        return false;
    };
    let original: InitSchedControlFn = unsafe { mem::transmute(address) };
    igfx.init_sched_control(ObjectRef::from_ptr(that), || original(that, ctrl))
}

extern "C" fn ig_buffer_with_options(
    task: *mut c_void,
    size: usize,
    kind: u32,
    flags: u32,
) -> *mut c_void {
    let Some((igfx, address)) = resolve(EntryPoint::IgBufferWithOptions) else {
        return ptr::null_mut();
    };
    let original: BufferWithOptionsFn = unsafe { mem::transmute(address) };
    igfx.ig_buffer_with_options(ObjectRef::from_ptr(task), size, |len| {
        let buffer = original(task, len, kind, flags);
        (!buffer.is_null()).then(|| RawMappedBuffer(buffer))
    })
    .map_or(ptr::null_mut(), |buffer| buffer.0)
}

extern "C" fn ig_buffer_gpu_virtual_address(that: *mut c_void) -> u64 {
    let Some((igfx, address)) = resolve(EntryPoint::IgBufferGpuVirtualAddress) else {
        return 0;
    };
    let original: GpuVirtualAddressFn = unsafe { mem::transmute(address) };
    if that.is_null() {
        return original(that);
    }
    let mut buffer = RawMappedBuffer(that);
    igfx.ig_buffer_gpu_virtual_address(&mut buffer, |buffer| original(buffer.0))
}

extern "C" fn dma_host_to_guc(
    that: *mut c_void,
    gpu_address: u64,
    register: u32,
    length: u32,
    dma_type: u32,
    unk: bool,
) -> bool {
    let Some((igfx, address)) = resolve(EntryPoint::DmaHostToGuc) else {
        return false;
    };
    let original: DmaHostToGucFn = unsafe { mem::transmute(address) };
    let request = DmaRequest {
        gpu_address,
        register,
        length,
        dma_type,
    };
    igfx.dma_host_to_guc(ObjectRef::from_ptr(that), request, |req| {
        original(that, req.gpu_address, req.register, req.length, req.dma_type, unk)
    })
}

extern "C" fn init_interrupt_services(that: *mut c_void) {
    let Some((igfx, address)) = resolve(EntryPoint::InitInterruptServices) else {
        return;
    };
    let original: MethodFn = unsafe { mem::transmute(address) };
    igfx.init_interrupt_services(ObjectRef::from_ptr(that), || original(that))
}

extern "C" fn system_will_sleep(that: *mut c_void) {
    let Some((igfx, address)) = resolve(EntryPoint::SystemWillSleep) else {
        return;
    };
    let original: MethodFn = unsafe { mem::transmute(address) };
    igfx.system_will_sleep(ObjectRef::from_ptr(that), || original(that))
}

extern "C" fn system_did_wake(that: *mut c_void) {
    let Some((igfx, address)) = resolve(EntryPoint::SystemDidWake) else {
        return;
    };
    let original: MethodFn = unsafe { mem::transmute(address) };
    let load_firmware = igfx.original(EntryPoint::LoadFirmware);
    let reload = |scheduler: ObjectRef| match load_firmware {
        Some(address) => {
            let load: LoadFirmwareFn = unsafe { mem::transmute(address) };
            load(scheduler.0 as *mut c_void)
        }
        None => false,
    };
    igfx.system_did_wake(ObjectRef::from_ptr(that), reload, || original(that))
}

extern "C" fn config_read16(service: *mut c_void, space: u32, offset: u8) -> u16 {
    let Some((igfx, address)) = resolve(EntryPoint::ConfigRead16) else {
        return u16::MAX;
    };
    let original: ConfigRead16Fn = unsafe { mem::transmute(address) };
    igfx.config_read16(ObjectRef::from_ptr(service), offset, || original(service, space, offset))
}

extern "C" fn config_read32(service: *mut c_void, space: u32, offset: u8) -> u32 {
    let Some((igfx, address)) = resolve(EntryPoint::ConfigRead32) else {
        return u32::MAX;
    };
    let original: ConfigRead32Fn = unsafe { mem::transmute(address) };
    igfx.config_read32(ObjectRef::from_ptr(service), offset, || original(service, space, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SchedulerMode};
    use crate::host::{CpuGeneration, DeviceTree, Host, PropertyValue, PROP_DEVICE_ID};
    use crate::testing::{FixedCpu, MockPatcher, MockTree};

    extern "C" fn hardware_read16(_service: *mut c_void, _space: u32, offset: u8) -> u16 {
        match offset {
            0x00 => 0x8086,
            0x02 => 0x3E92,
            _ => 0x0007,
        }
    }

    extern "C" fn hardware_read32(_service: *mut c_void, _space: u32, _offset: u8) -> u32 {
        0x3E92_8086
    }

    #[test]
    fn test_substitutes_are_distinct() {
        let all = [
            EntryPoint::PavpSessionCallback,
            EntryPoint::FrameBufferInit,
            EntryPoint::ComputeLaneCount,
            EntryPoint::GraphicsStart,
            EntryPoint::LoadGucBinary,
            EntryPoint::LoadFirmware,
            EntryPoint::InitSchedControl,
            EntryPoint::IgBufferWithOptions,
            EntryPoint::IgBufferGpuVirtualAddress,
            EntryPoint::DmaHostToGuc,
            EntryPoint::InitInterruptServices,
            EntryPoint::SystemWillSleep,
            EntryPoint::SystemDidWake,
            EntryPoint::ConfigRead16,
            EntryPoint::ConfigRead32,
        ];
        assert_eq!(all.len(), EntryPoint::COUNT);
        for (i, a) in all.iter().enumerate() {
            assert_ne!(substitute_for(*a), 0);
            for b in &all[i + 1..] {
                assert_ne!(substitute_for(*a), substitute_for(*b));
            }
        }
    }

    #[test]
    fn test_raw_buffer_swap_and_fill() {
        let mut storage = [0u8; 16];
        let mut object = [0usize; 9];
        object[BUFFER_DATA_WORD] = storage.as_mut_ptr() as usize;
        object[BUFFER_LENGTH_WORD] = storage.len();

        let mut buffer = RawMappedBuffer(object.as_mut_ptr() as *mut c_void);
        assert!(buffer.fill(&[1, 2, 3, 4]));
        assert!(!buffer.fill(&[0; 17]));
        let real = buffer.backing();
        buffer.set_backing(0x1234);
        assert_eq!(object[BUFFER_DATA_WORD], 0x1234);
        buffer.set_backing(real);
        assert_eq!(&storage[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_started_instance_spoofs_config_reads() {
        let tree = MockTree::new();
        let igpu = tree.add_pci("GFX0", 0x8086, 0x3E92, 0x03_00_00);
        tree.set_property(igpu, PROP_DEVICE_ID, PropertyValue::from_u32(0x3E9B));
        let service = ObjectRef(0xF000_2000);
        tree.bind_object(service, igpu);

        let host = Host::new(Box::new(tree.clone()), Box::new(FixedCpu(CpuGeneration::CoffeeLake)));
        let mut patcher = MockPatcher::new();
        patcher.provide_all(SchedulerMode::DisableFirmware);
        let igfx = crate::start(Config::default(), host, &mut patcher).unwrap();
        assert!(Arc::ptr_eq(&igfx, &instance().unwrap()));

        igfx.trampolines().set(EntryPoint::ConfigRead16, hardware_read16 as usize);
        igfx.trampolines().set(EntryPoint::ConfigRead32, hardware_read32 as usize);
        let raw = service.0 as *mut c_void;
        assert_eq!(config_read16(raw, 0, 0x02), 0x3E9B);
        assert_eq!(config_read16(raw, 0, 0x00), 0x8086);
        assert_eq!(config_read32(raw, 0, 0x00), 0x3E9B_8086);
        assert_eq!(config_read16(ptr::null_mut(), 0, 0x02), 0x3E92);

        igfx.deinit();
        assert_eq!(config_read16(raw, 0, 0x02), 0x3E92);
        assert!(unregister().is_some());
        assert_eq!(config_read16(raw, 0, 0x02), u16::MAX);
    }
}
