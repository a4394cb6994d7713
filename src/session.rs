// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-client instance contexts and the instance state machine.

use crate::{
    command::Command,
    config::{MappingMode, StateGate},
    device::Device,
    error::{CodecError, Result},
    platform::{BufferHandle, SessionId, SessionRef},
};
use core::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Buffers a session is expected to hold at once; reserved up front so
/// that running out of memory is detected while the session is created.
const INITIAL_BUFFERS: usize = 8;

/// Position of a session in the decode sequence.
///
/// States are ordered: a command that needs a given state is also accepted
/// in every later one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceState {
    Created,
    DecodeInitialized,
    DecodeExecuting,
}

impl InstanceState {
    /// Whether `command` may be issued from this state.
    ///
    /// Decode-init is only legal once per session. Decode-exec needs a
    /// successful decode-init. Buffer and query commands follow `gate`.
    /// Freeing buffers and setting configuration values are always legal.
    pub fn permits(self, command: Command, gate: StateGate) -> bool {
        let buffers_from = match gate {
            StateGate::Strict => InstanceState::DecodeInitialized,
            StateGate::Compatible => InstanceState::Created,
        };
        match command {
            Command::DecodeInit => self == InstanceState::Created,
            Command::DecodeExec => self >= InstanceState::DecodeInitialized,
            Command::AllocBuffer | Command::PhysAddr | Command::MmapSize => self >= buffers_from,
            Command::FreeBuffer | Command::SetConfig => true,
        }
    }

    /// State reached after `command` succeeded.
    pub fn after(self, command: Command) -> InstanceState {
        match command {
            Command::DecodeInit => InstanceState::DecodeInitialized,
            Command::DecodeExec => InstanceState::DecodeExecuting,
            _ => self,
        }
    }
}

/// The user region a session has mapped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MappingRecord {
    /// User address of the first mapping, recorded once.
    pub base: u64,
    /// Length of the most recent mapping request.
    pub len: u64,
    /// Bytes actually backed by device memory.
    pub mapped: u64,
    /// Strategy in effect for the region.
    pub mode: MappingMode,
}

/// A client's bound context with the codec device.
///
/// A session is created by [`Device::open_session`] and torn down exactly
/// once, either by [`Session::close`] or when it is dropped.
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) device: Arc<Device>,
    pub(crate) state: InstanceState,
    pub(crate) mapping: Option<MappingRecord>,
    pub(crate) buffers: Vec<BufferHandle>,
    closed: bool,
}

impl Session {
    pub(crate) fn create(device: Arc<Device>, id: SessionId) -> Result<Self> {
        let mut buffers = Vec::new();
        buffers
            .try_reserve(INITIAL_BUFFERS)
            .map_err(|_| CodecError::OutOfMemory)?;
        debug!("instance {id} created");
        Ok(Self {
            id,
            device,
            state: InstanceState::Created,
            mapping: None,
            buffers,
            closed: false,
        })
    }

    /// Releases every buffer the session still owns.
    ///
    /// Each buffer is freed under the identity it was allocated with. A
    /// buffer the allocator refuses to free stays in the owned list and is
    /// counted in the returned total.
    pub(crate) fn destroy(&mut self) -> usize {
        let device = Arc::clone(&self.device);
        let id = self.id;
        self.buffers.retain(|buf| match device.buffers().free(buf.owner, buf.user_addr) {
            Ok(()) => false,
            Err(code) => {
                warn!(
                    "instance {id}: failed to free buffer 0x{:08x} on port {}: {code}",
                    buf.user_addr, buf.port
                );
                true
            }
        });
        if !self.buffers.is_empty() {
            error!(
                "instance {id}: {} buffer(s) still held by the allocator",
                self.buffers.len()
            );
        }
        debug!("instance {id} destroyed in state {:?}", self.state);
        self.buffers.len()
    }

    /// The owned buffer containing `user_addr`.
    pub(crate) fn buffer_at(&self, user_addr: u64) -> Option<&BufferHandle> {
        self.buffers.iter().find(|b| b.contains(user_addr))
    }

    /// The owned buffer covering `offset` bytes into the session's mapping.
    pub(crate) fn buffer_at_offset(&self, offset: u64) -> Option<&BufferHandle> {
        self.buffers
            .iter()
            .find(|b| offset >= b.offset() && offset - b.offset() < b.len)
    }

    /// Rejects `command` unless the current state permits it.
    pub(crate) fn guard(&self, command: Command) -> Result<()> {
        if self.state.permits(command, self.device.config().state_gate) {
            Ok(())
        } else {
            error!("instance {}: invalid state {:?} for {command:?}", self.id, self.state);
            Err(CodecError::InvalidState {
                command,
                state: self.state,
            })
        }
    }

    /// Closes the session, powering the device off if it was the last one.
    ///
    /// The session is closed even when the power-off fails; the error is
    /// returned so the leaked power state is not hidden.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let device = Arc::clone(&self.device);
        device.close_session(&mut self)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// User address recorded by the first successful mapping.
    pub fn user_base(&self) -> Option<u64> {
        self.mapping.map(|m| m.base)
    }

    pub fn mapping(&self) -> Option<&MappingRecord> {
        self.mapping.as_ref()
    }

    /// Buffers currently owned by the session.
    pub fn buffers(&self) -> &[BufferHandle] {
        &self.buffers
    }

    /// Identity under which new buffers are allocated. Existing buffers keep
    /// the identity recorded in their handle.
    pub fn session_ref(&self) -> SessionRef {
        SessionRef {
            id: self.id,
            user_base: self.user_base().unwrap_or(0),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("mapping", &self.mapping)
            .field("buffers", &self.buffers)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let device = Arc::clone(&self.device);
        if let Err(e) = device.close_session(self) {
            error!("instance {} dropped without close: {e}", self.id);
        }
    }
}
