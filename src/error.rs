// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{command::Command, session::InstanceState};
use std::io;

pub type Result<T, E = CodecError> = std::result::Result<T, E>;

/// Errors reported by the codec control plane.
///
/// Every failure detected by the device, session, dispatcher or mapping
/// manager is translated into one of these kinds and returned synchronously.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The codec firmware has not been loaded (or failed to load).
    #[error("codec firmware is not loaded")]
    NotReady,

    /// A power, clock, sleep or wakeup request failed.
    #[error("power control failed during {stage}: {source}")]
    Power {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    /// Hardware bring-up reported a non-OK status.
    #[error("hardware bring-up failed with {0}")]
    HardwareInit(crate::command::RetCode),

    /// No instance context could be created.
    #[error("no memory for a new instance context")]
    OutOfMemory,

    /// The command is not legal in the session's current state.
    #[error("{command:?} is not permitted in state {state:?}")]
    InvalidState {
        command: Command,
        state: InstanceState,
    },

    /// The command code is not recognised and unknown commands are rejected.
    #[error("unknown command code 0x{0:08x}")]
    UnknownCommand(u32),

    /// The argument union does not match the command code.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The mapping request exceeds the data memory of all ports.
    #[error("requested mapping of {requested} bytes exceeds available {available} bytes")]
    MappingTooLarge { requested: u64, available: u64 },

    /// A page of the mapping could not be remapped.
    #[error("failed to remap port {port}: {source}")]
    Remap {
        port: usize,
        #[source]
        source: io::Error,
    },

    /// The session already owns a mapping and second mappings are rejected.
    #[error("session already mapped at 0x{0:08x}")]
    AlreadyMapped(u64),

    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),

    /// Copying the argument envelope to or from the caller failed.
    #[error("argument transfer failed: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    pub(crate) fn power(stage: &'static str, source: io::Error) -> Self {
        CodecError::Power { stage, source }
    }

    /// Negative errno reported to the hosting transport for this error.
    pub fn errno(&self) -> i32 {
        let errno = match self {
            CodecError::NotReady => libc::ENODEV,
            CodecError::Power { .. } => libc::EIO,
            CodecError::HardwareInit(_) => libc::ENODEV,
            CodecError::OutOfMemory => libc::ENOMEM,
            CodecError::InvalidState { .. } => libc::EINVAL,
            CodecError::UnknownCommand(_) => libc::EINVAL,
            CodecError::InvalidArgument(_) => libc::EINVAL,
            CodecError::MappingTooLarge { .. } => libc::EINVAL,
            CodecError::Remap { .. } => libc::EAGAIN,
            CodecError::AlreadyMapped(_) => libc::EBUSY,
            CodecError::InvalidConfig(_) => libc::EINVAL,
            CodecError::Io(_) => libc::EIO,
        };
        -errno
    }
}
