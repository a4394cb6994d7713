// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory collaborators for host-side testing.
//!
//! [`SimPower`], [`SimAllocator`], [`SimHardware`] and [`SimTranslation`]
//! stand in for the codec block so the control plane can run without the
//! hardware. Each records what it was asked to do and can be told to fail,
//! and [`SimRegion`] plays the part of a user mapping.

use crate::{
    command::{DecodeExecArgs, DecodeInitArgs, RetCode},
    mapping::{RegionFlags, UserRegion},
    platform::{
        BufferAllocator, BufferHandle, BufferRequest, HardwareCommands, Platform, PowerControl,
        SessionId, SessionRef, TranslationUnit,
    },
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::debug;

fn injected(op: &str) -> io::Error {
    io::Error::other(format!("injected {op} failure"))
}

/// Power controller that tracks power and clock state.
#[derive(Default)]
pub struct SimPower {
    powered: AtomicBool,
    clock_depth: AtomicUsize,
    power_on_calls: AtomicUsize,
    power_off_calls: AtomicUsize,
    clock_on_calls: AtomicUsize,
    sleep_calls: AtomicUsize,
    wakeup_calls: AtomicUsize,
    pub fail_power_on: AtomicBool,
    pub fail_power_off: AtomicBool,
    pub fail_clock_on: AtomicBool,
    pub fail_sleep: AtomicBool,
}

impl SimPower {
    pub fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    pub fn is_clocked(&self) -> bool {
        self.clock_depth.load(Ordering::SeqCst) > 0
    }

    pub fn power_on_calls(&self) -> usize {
        self.power_on_calls.load(Ordering::SeqCst)
    }

    pub fn power_off_calls(&self) -> usize {
        self.power_off_calls.load(Ordering::SeqCst)
    }

    pub fn clock_on_calls(&self) -> usize {
        self.clock_on_calls.load(Ordering::SeqCst)
    }

    pub fn sleep_calls(&self) -> usize {
        self.sleep_calls.load(Ordering::SeqCst)
    }

    pub fn wakeup_calls(&self) -> usize {
        self.wakeup_calls.load(Ordering::SeqCst)
    }
}

impl PowerControl for SimPower {
    fn power_on(&self) -> io::Result<()> {
        self.power_on_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_power_on.load(Ordering::SeqCst) {
            return Err(injected("power on"));
        }
        self.powered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn power_off(&self) -> io::Result<()> {
        self.power_off_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_power_off.load(Ordering::SeqCst) {
            return Err(injected("power off"));
        }
        self.powered.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn clock_on(&self) -> io::Result<()> {
        self.clock_on_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_clock_on.load(Ordering::SeqCst) {
            return Err(injected("clock on"));
        }
        self.clock_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clock_off(&self) -> io::Result<()> {
        self.clock_depth.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn sleep(&self) -> io::Result<()> {
        self.sleep_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sleep.load(Ordering::SeqCst) {
            return Err(injected("sleep"));
        }
        Ok(())
    }

    fn wakeup(&self) -> io::Result<()> {
        self.wakeup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Data memory of one simulated port.
#[derive(Copy, Clone, Debug)]
pub struct SimPort {
    pub base: u64,
    pub size: u64,
}

#[derive(Copy, Clone, Debug)]
struct Allocation {
    session: SessionId,
    port: usize,
    /// Offset into the port's data memory.
    offset: u64,
    len: u64,
}

/// First-fit allocator over up to two port pools.
///
/// User addresses are `user_base + port_offset + offset`, where port 1's
/// memory follows port 0's in the session's mapping.
pub struct SimAllocator {
    ports: Vec<SimPort>,
    allocations: Mutex<BTreeMap<(usize, u64), Allocation>>,
}

impl SimAllocator {
    pub fn new(ports: Vec<SimPort>) -> Self {
        Self {
            ports,
            allocations: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of live allocations owned by `session`.
    pub fn outstanding(&self, session: SessionId) -> usize {
        self.allocations
            .lock()
            .values()
            .filter(|a| a.session == session)
            .count()
    }

    /// Number of live allocations over all sessions.
    pub fn total_outstanding(&self) -> usize {
        self.allocations.lock().len()
    }

    fn port_offset(&self, port: usize) -> u64 {
        self.ports.iter().take(port).map(|p| p.size).sum()
    }

    fn locate(&self, session: SessionRef, user_addr: u64) -> Option<(Allocation, u64)> {
        let rel = user_addr.checked_sub(session.user_base)?;
        let allocations = self.allocations.lock();
        allocations
            .values()
            .find(|a| {
                let start = self.port_offset(a.port) + a.offset;
                a.session == session.id && rel >= start && rel < start + a.len
            })
            .map(|a| (*a, rel - self.port_offset(a.port) - a.offset))
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

impl BufferAllocator for SimAllocator {
    fn alloc(&self, session: SessionRef, request: &BufferRequest) -> Result<BufferHandle, RetCode> {
        let port = self.ports.get(request.port).ok_or(RetCode::INVALID_PARAM_FAIL)?;
        if request.size == 0 {
            return Err(RetCode::INVALID_PARAM_FAIL);
        }
        let len = align_up(request.size, request.align.max(1));

        let mut allocations = self.allocations.lock();
        let mut candidate = 0;
        for a in allocations.values().filter(|a| a.port == request.port) {
            if candidate + len <= a.offset {
                break;
            }
            candidate = align_up(a.offset + a.len, request.align.max(1));
        }
        if candidate + len > port.size {
            return Err(RetCode::MEM_ALLOC_FAIL);
        }

        allocations.insert(
            (request.port, candidate),
            Allocation {
                session: session.id,
                port: request.port,
                offset: candidate,
                len,
            },
        );
        let user_addr = session.user_base + self.port_offset(request.port) + candidate;
        debug!("sim alloc {len} bytes on port {} at 0x{user_addr:08x}", request.port);
        Ok(BufferHandle {
            owner: session,
            user_addr,
            port: request.port,
            len,
        })
    }

    fn free(&self, session: SessionRef, user_addr: u64) -> Result<(), RetCode> {
        let (alloc, within) = self
            .locate(session, user_addr)
            .ok_or(RetCode::MEM_INVALID_ADDR_FAIL)?;
        if within != 0 {
            return Err(RetCode::MEM_INVALID_ADDR_FAIL);
        }
        self.allocations.lock().remove(&(alloc.port, alloc.offset));
        Ok(())
    }

    fn size_of(&self, port: usize) -> u64 {
        self.ports.get(port).map_or(0, |p| p.size)
    }

    fn base_of(&self, port: usize) -> u64 {
        self.ports.get(port).map_or(0, |p| p.base)
    }

    fn resolve_physical(&self, session: SessionRef, user_addr: u64) -> Option<u64> {
        let (alloc, within) = self.locate(session, user_addr)?;
        Some(self.ports[alloc.port].base + alloc.offset + within)
    }
}

/// Command layer that accepts every command unless told otherwise and keeps
/// per-instance configuration values for read-back.
#[derive(Default)]
pub struct SimHardware {
    config: Mutex<HashMap<(SessionId, u32), u32>>,
    bring_ups: AtomicUsize,
    decodes: AtomicUsize,
    pub reject_firmware: AtomicBool,
    pub fail_bring_up: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_exec: AtomicBool,
}

impl SimHardware {
    pub fn bring_ups(&self) -> usize {
        self.bring_ups.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl HardwareCommands for SimHardware {
    fn load_firmware(&self, image: &[u8]) -> bool {
        !image.is_empty() && !self.reject_firmware.load(Ordering::SeqCst)
    }

    fn bring_up(&self) -> RetCode {
        self.bring_ups.fetch_add(1, Ordering::SeqCst);
        if self.fail_bring_up.load(Ordering::SeqCst) {
            return RetCode::FAIL;
        }
        RetCode::OK
    }

    fn init_decode(&self, _session: SessionId, args: &mut DecodeInitArgs) -> RetCode {
        if self.fail_init.load(Ordering::SeqCst) {
            return RetCode::DEC_INIT_FAIL;
        }
        args.out_width = 1920;
        args.out_height = 1080;
        args.out_dpb_count = 4;
        RetCode::OK
    }

    fn exec_decode(&self, _session: SessionId, args: &mut DecodeExecArgs) -> RetCode {
        if self.fail_exec.load(Ordering::SeqCst) {
            return RetCode::DEC_EXE_ERR;
        }
        let frame = self.decodes.fetch_add(1, Ordering::SeqCst) as u64;
        args.out_display_status = 1;
        args.out_luma_addr = args.stream_addr + frame * 0x1000;
        args.out_chroma_addr = args.out_luma_addr + 0x800;
        RetCode::OK
    }

    fn set_config(&self, session: SessionId, key: u32, value: u32) -> RetCode {
        self.config.lock().insert((session, key), value);
        RetCode::OK
    }

    fn get_config(&self, session: SessionId, key: u32) -> Option<u32> {
        self.config.lock().get(&(session, key)).copied()
    }
}

/// Translation unit that counts TLB invalidations.
#[derive(Default)]
pub struct SimTranslation {
    invalidations: AtomicUsize,
}

impl SimTranslation {
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl TranslationUnit for SimTranslation {
    fn invalidate_tlb(&self) -> io::Result<()> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// User region recording the pages installed into it.
pub struct SimRegion {
    start: u64,
    len: u64,
    pub flags: RegionFlags,
    pub pages: BTreeMap<u64, u64>,
    /// Fail the remap of the page at this user address.
    pub fail_at: Option<u64>,
}

impl SimRegion {
    pub fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            len,
            flags: RegionFlags::empty(),
            pages: BTreeMap::new(),
            fail_at: None,
        }
    }
}

impl UserRegion for SimRegion {
    fn start(&self) -> u64 {
        self.start
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn set_flags(&mut self, flags: RegionFlags) {
        self.flags |= flags;
    }

    fn remap_page(&mut self, user_addr: u64, phys_addr: u64) -> io::Result<()> {
        if self.fail_at == Some(user_addr) {
            return Err(injected("remap"));
        }
        self.pages.insert(user_addr, phys_addr);
        Ok(())
    }
}

/// Handles onto a simulated platform, kept by the test after the platform
/// itself has been moved into the device.
#[derive(Clone)]
pub struct SimHandles {
    pub power: Arc<SimPower>,
    pub allocator: Arc<SimAllocator>,
    pub hardware: Arc<SimHardware>,
    pub translation: Option<Arc<SimTranslation>>,
}

struct Shared<T>(Arc<T>);

impl<T: PowerControl> PowerControl for Shared<T> {
    fn power_on(&self) -> io::Result<()> {
        self.0.power_on()
    }
    fn power_off(&self) -> io::Result<()> {
        self.0.power_off()
    }
    fn clock_on(&self) -> io::Result<()> {
        self.0.clock_on()
    }
    fn clock_off(&self) -> io::Result<()> {
        self.0.clock_off()
    }
    fn sleep(&self) -> io::Result<()> {
        self.0.sleep()
    }
    fn wakeup(&self) -> io::Result<()> {
        self.0.wakeup()
    }
}

impl<T: HardwareCommands> HardwareCommands for Shared<T> {
    fn load_firmware(&self, image: &[u8]) -> bool {
        self.0.load_firmware(image)
    }
    fn bring_up(&self) -> RetCode {
        self.0.bring_up()
    }
    fn init_decode(&self, session: SessionId, args: &mut DecodeInitArgs) -> RetCode {
        self.0.init_decode(session, args)
    }
    fn exec_decode(&self, session: SessionId, args: &mut DecodeExecArgs) -> RetCode {
        self.0.exec_decode(session, args)
    }
    fn set_config(&self, session: SessionId, key: u32, value: u32) -> RetCode {
        self.0.set_config(session, key, value)
    }
    fn get_config(&self, session: SessionId, key: u32) -> Option<u32> {
        self.0.get_config(session, key)
    }
}

impl<T: TranslationUnit> TranslationUnit for Shared<T> {
    fn invalidate_tlb(&self) -> io::Result<()> {
        self.0.invalidate_tlb()
    }
}

/// Builds a simulated platform with the given ports, optionally behind a
/// translation unit.
pub fn platform(ports: Vec<SimPort>, translation: bool) -> (Platform, SimHandles) {
    let handles = SimHandles {
        power: Arc::new(SimPower::default()),
        allocator: Arc::new(SimAllocator::new(ports)),
        hardware: Arc::new(SimHardware::default()),
        translation: translation.then(|| Arc::new(SimTranslation::default())),
    };
    let platform = Platform {
        power: Box::new(Shared(Arc::clone(&handles.power))),
        hardware: Box::new(Shared(Arc::clone(&handles.hardware))),
        buffers: handles.allocator.clone(),
        translation: handles
            .translation
            .as_ref()
            .map(|t| Box::new(Shared(Arc::clone(t))) as Box<dyn TranslationUnit>),
    };
    (platform, handles)
}
