// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The command dispatcher.
//!
//! Every command goes through the same sequence: copy the envelope in,
//! take the device lock if the command needs it, check the instance state,
//! bracket the call with the codec clock if the command needs it, run it,
//! advance the instance state on success and copy the envelope back out.
//! The lock is never held while the envelope is being copied.

use crate::{
    command::{
        AllocArgs, ArgTransport, BufferKind, Command, CommandArgs, CommandEnvelope,
        DecodeExecArgs, DecodeInitArgs, FreeArgs, MmapSizeArgs, PhysAddrArgs, RetCode,
        SetConfigArgs,
    },
    config::{ClockPolicy, UnknownCommandPolicy},
    error::{CodecError, Result},
    platform::{BufferRequest, ClockGuard, ALIGN_2KB},
    session::Session,
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Whether `command` runs with the codec clock enabled under `policy`.
fn clocked(command: Command, policy: ClockPolicy) -> bool {
    if command.touches_hardware() {
        return true;
    }
    match command {
        Command::AllocBuffer | Command::FreeBuffer | Command::PhysAddr => {
            policy == ClockPolicy::Consistent
        }
        _ => false,
    }
}

/// Whether `command` must run under the device lock.
fn locked(command: Command, policy: ClockPolicy) -> bool {
    command == Command::SetConfig || clocked(command, policy)
}

/// Result code written into the envelope for a rejected command.
fn ret_code_for(err: &CodecError) -> RetCode {
    match err {
        CodecError::InvalidState { .. } => RetCode::STATE_INVALID,
        CodecError::UnknownCommand(_) | CodecError::InvalidArgument(_) => {
            RetCode::INVALID_PARAM_FAIL
        }
        _ => RetCode::FAIL,
    }
}

impl Session {
    /// Runs command `code` with the envelope supplied by `io`.
    ///
    /// The envelope is copied back to the caller whatever the outcome, with
    /// `ret_code` set to the command's result. `Ok` carries the result code
    /// of a command that ran (which may itself report a failure); `Err`
    /// means the command was rejected. A failure to copy the envelope in or
    /// out is reported as [`CodecError::Io`] and overrides everything else.
    pub fn dispatch(&mut self, code: u32, io: &mut dyn ArgTransport) -> Result<RetCode> {
        let mut envelope = io.copy_in(code).map_err(|e| {
            error!("argument copy in failed: {e}");
            CodecError::Io(e)
        })?;

        debug!("instance {}: cmd 0x{code:08x}", self.id);
        let result = self.execute(code, &mut envelope);
        envelope.ret_code = match &result {
            Ok(ret) => *ret,
            Err(e) => ret_code_for(e),
        };

        io.copy_out(&envelope).map_err(|e| {
            error!("argument copy out failed: {e}");
            CodecError::Io(e)
        })?;

        debug!("instance {}: return {}", self.id, envelope.ret_code);
        result
    }

    /// Convenience wrapper dispatching an in-process envelope.
    pub fn dispatch_envelope(&mut self, command: Command, args: CommandArgs) -> Result<CommandEnvelope> {
        let mut envelope = CommandEnvelope::new(args);
        self.dispatch(command.code(), &mut envelope)?;
        Ok(envelope)
    }

    fn execute(&mut self, code: u32, envelope: &mut CommandEnvelope) -> Result<RetCode> {
        let command = match Command::try_from(code) {
            Ok(command) => command,
            Err(code) => return self.unknown(code),
        };

        let device = Arc::clone(&self.device);
        let policy = device.config().clock;
        let _lock = locked(command, policy).then(|| device.lock());

        self.guard(command)?;

        let _clock = if clocked(command, policy) {
            Some(ClockGuard::acquire(device.power())?)
        } else {
            None
        };

        let ret = match (command, &mut envelope.args) {
            (Command::DecodeInit, CommandArgs::DecodeInit(args)) => self.decode_init(args),
            (Command::DecodeExec, CommandArgs::DecodeExec(args)) => self.decode_exec(args),
            (Command::AllocBuffer, CommandArgs::Alloc(args)) => self.alloc_buffer(args),
            (Command::FreeBuffer, CommandArgs::Free(args)) => self.free_buffer(args),
            (Command::PhysAddr, CommandArgs::PhysAddr(args)) => self.phys_addr(args),
            (Command::MmapSize, CommandArgs::MmapSize(args)) => self.mmap_size(args),
            (Command::SetConfig, CommandArgs::SetConfig(args)) => self.set_config(args),
            (command, args) => {
                error!("instance {}: {command:?} with mismatched arguments {args:?}", self.id);
                return Err(CodecError::InvalidArgument(format!(
                    "arguments do not belong to {command:?}"
                )));
            }
        };

        if ret.is_ok() {
            self.state = self.state.after(command);
        }
        Ok(ret)
    }

    fn unknown(&self, code: u32) -> Result<RetCode> {
        match self.device.config().unknown_command {
            UnknownCommandPolicy::Accept => {
                warn!("instance {}: ignoring undefined command 0x{code:08x}", self.id);
                Ok(RetCode::OK)
            }
            UnknownCommandPolicy::Reject => {
                error!("instance {}: undefined command 0x{code:08x}", self.id);
                Err(CodecError::UnknownCommand(code))
            }
        }
    }

    fn decode_init(&mut self, args: &mut DecodeInitArgs) -> RetCode {
        let ret = self.device.hardware().init_decode(self.id, args);
        if !ret.is_ok() {
            error!("instance {}: decode init failed: {ret}", self.id);
        }
        ret
    }

    fn decode_exec(&mut self, args: &mut DecodeExecArgs) -> RetCode {
        let ret = self.device.hardware().exec_decode(self.id, args);
        if !ret.is_ok() {
            error!("instance {}: decode exec failed: {ret}", self.id);
        }
        ret
    }

    /// Encoder buffers live on port 1 and decoder buffers on port 0; a
    /// single-port device serves both from port 0.
    fn alloc_buffer(&mut self, args: &mut AllocArgs) -> RetCode {
        let port = match args.kind {
            BufferKind::Encoder if self.device.ports().len() > 1 => 1,
            _ => 0,
        };
        let request = BufferRequest {
            kind: args.kind,
            port,
            size: u64::from(args.size),
            align: ALIGN_2KB,
        };

        if self.buffers.try_reserve(1).is_err() {
            return RetCode::MEM_ALLOC_FAIL;
        }
        match self.device.buffers().alloc(self.session_ref(), &request) {
            Ok(handle) => {
                debug!(
                    "instance {}: {} bytes on port {port} at 0x{:08x}",
                    self.id, handle.len, handle.user_addr
                );
                args.out_addr = handle.user_addr;
                self.buffers.push(handle);
                RetCode::OK
            }
            Err(code) => {
                error!("instance {}: buffer allocation failed: {code}", self.id);
                args.out_addr = 0;
                code
            }
        }
    }

    fn free_buffer(&mut self, args: &mut FreeArgs) -> RetCode {
        let Some(pos) = self.buffers.iter().position(|b| b.user_addr == args.user_addr) else {
            error!(
                "instance {}: 0x{:08x} is not an owned buffer",
                self.id, args.user_addr
            );
            return RetCode::MEM_INVALID_ADDR_FAIL;
        };
        let handle = self.buffers[pos];
        match self.device.buffers().free(handle.owner, handle.user_addr) {
            Ok(()) => {
                self.buffers.remove(pos);
                RetCode::OK
            }
            Err(code) => {
                error!(
                    "instance {}: free of 0x{:08x} failed: {code}",
                    self.id, args.user_addr
                );
                code
            }
        }
    }

    fn phys_addr(&mut self, args: &mut PhysAddrArgs) -> RetCode {
        debug!("user addr: 0x{:08x}", args.user_addr);
        let phys = self.buffer_at(args.user_addr).and_then(|handle| {
            self.device
                .buffers()
                .resolve_physical(handle.owner, args.user_addr)
        });
        match phys {
            Some(phys) if phys != 0 => {
                args.out_phys_addr = phys;
                RetCode::OK
            }
            _ => {
                args.out_phys_addr = 0;
                RetCode::MEM_INVALID_ADDR_FAIL
            }
        }
    }

    fn mmap_size(&mut self, args: &mut MmapSizeArgs) -> RetCode {
        args.out_size = self.device.data_memory_size();
        RetCode::OK
    }

    fn set_config(&mut self, args: &mut SetConfigArgs) -> RetCode {
        self.device
            .hardware()
            .set_config(self.id, args.key, args.value)
    }
}
