// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Services the control plane drives but does not implement.
//!
//! The power and clock registers, the buffer pools, the register-level
//! command protocol and the device translation unit all live behind these
//! traits. A [`Platform`] bundles one implementation of each and is handed
//! to [`crate::device::Device::new`] at start-up.

use crate::{
    command::{BufferKind, DecodeExecArgs, DecodeInitArgs, RetCode},
    error::{CodecError, Result},
};
use parking_lot::{Condvar, Mutex};
use std::{io, sync::Arc, time::Duration};
use tracing::warn;

/// Identifier of a live session, unique among open sessions.
pub type SessionId = u32;

/// Byte alignment of every buffer handed out by the allocator.
pub const ALIGN_2KB: u64 = 2048;

/// Power and clock control of the codec block.
pub trait PowerControl: Send + Sync {
    fn power_on(&self) -> io::Result<()>;
    fn power_off(&self) -> io::Result<()>;
    fn clock_on(&self) -> io::Result<()>;
    fn clock_off(&self) -> io::Result<()>;
    fn sleep(&self) -> io::Result<()>;
    fn wakeup(&self) -> io::Result<()>;
}

/// Session identity as seen by the buffer allocator: user addresses are
/// offsets from the session's mapping base.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SessionRef {
    pub id: SessionId,
    pub user_base: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferRequest {
    pub kind: BufferKind,
    pub port: usize,
    pub size: u64,
    pub align: u64,
}

/// A buffer issued to a session.
///
/// `owner` is the session identity the buffer was allocated under. The
/// allocator only recognises the buffer through that identity, even after
/// the session's mapping base has changed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferHandle {
    pub owner: SessionRef,
    pub user_addr: u64,
    pub port: usize,
    pub len: u64,
}

impl BufferHandle {
    /// Offset of the buffer from the owner's mapping base.
    pub fn offset(&self) -> u64 {
        self.user_addr - self.owner.user_base
    }

    pub fn contains(&self, user_addr: u64) -> bool {
        user_addr >= self.user_addr && user_addr - self.user_addr < self.len
    }
}

/// Owner of the data memory pools behind each memory port.
///
/// Implementations serialize their own pool state; every call is treated as
/// atomic by the control plane.
pub trait BufferAllocator: Send + Sync {
    fn alloc(&self, session: SessionRef, request: &BufferRequest) -> Result<BufferHandle, RetCode>;
    fn free(&self, session: SessionRef, user_addr: u64) -> Result<(), RetCode>;
    /// Data memory size of `port` in bytes.
    fn size_of(&self, port: usize) -> u64;
    /// Physical base address of the data memory of `port`.
    fn base_of(&self, port: usize) -> u64;
    /// Physical address backing `user_addr` if it lies inside a buffer owned
    /// by `session`.
    fn resolve_physical(&self, session: SessionRef, user_addr: u64) -> Option<u64>;
}

/// Register-level command protocol of the codec block.
pub trait HardwareCommands: Send + Sync {
    /// Hands a firmware image to the hardware layer, returning whether it
    /// was accepted.
    fn load_firmware(&self, image: &[u8]) -> bool;
    fn bring_up(&self) -> RetCode;
    fn init_decode(&self, session: SessionId, args: &mut DecodeInitArgs) -> RetCode;
    fn exec_decode(&self, session: SessionId, args: &mut DecodeExecArgs) -> RetCode;
    fn set_config(&self, session: SessionId, key: u32, value: u32) -> RetCode;
    /// Reads back a per-instance configuration value.
    fn get_config(&self, session: SessionId, key: u32) -> Option<u32>;
}

/// Device-side address translation unit.
pub trait TranslationUnit: Send + Sync {
    fn invalidate_tlb(&self) -> io::Result<()>;
}

/// The collaborators of one codec device.
pub struct Platform {
    pub power: Box<dyn PowerControl>,
    pub hardware: Box<dyn HardwareCommands>,
    pub buffers: Arc<dyn BufferAllocator>,
    pub translation: Option<Box<dyn TranslationUnit>>,
}

/// Keeps the codec clock running for as long as it is alive.
///
/// Dropping the guard turns the clock off again; a failure to do so is
/// logged since there is no caller left to report it to.
pub struct ClockGuard<'a> {
    power: &'a dyn PowerControl,
}

impl<'a> ClockGuard<'a> {
    pub fn acquire(power: &'a dyn PowerControl) -> Result<Self> {
        power
            .clock_on()
            .map_err(|e| CodecError::power("clock on", e))?;
        Ok(Self { power })
    }
}

impl Drop for ClockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.power.clock_off() {
            warn!("clock off failed: {e}");
        }
    }
}

/// Which hardware completion a waiter is interested in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompletionKind {
    System,
    Codec0,
    Codec1,
}

/// A one-shot completion signalled by the interrupt side of the hardware
/// layer and awaited by the command side.
#[derive(Default)]
pub struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub fn complete(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    /// Waits for the completion and consumes it. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            let _ = self
                .cond
                .wait_while_for(&mut done, |done| !*done, timeout);
        }
        std::mem::replace(&mut *done, false)
    }
}
