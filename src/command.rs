// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Command codes, return codes and the fixed-size argument envelope.
//!
//! A client hands the dispatcher a command code and an envelope holding a
//! return code plus an argument union. The union is interpreted according to
//! the command code; on the wire it is [`ARGS_SIZE`] little-endian bytes.

use core::fmt;
use std::io;

/// Size in bytes of the argument union.
pub const ARGS_SIZE: usize = 64;

/// Size in bytes of the complete envelope (`ret_code` followed by the union).
pub const ENVELOPE_SIZE: usize = 4 + ARGS_SIZE;

/// Commands understood by the dispatcher.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Initialize the decoder for this session.
    DecodeInit = 0x0080_0001,
    /// Decode one unit of stream data.
    DecodeExec = 0x0080_0002,
    /// Allocate a stream or frame buffer from a memory port.
    AllocBuffer = 0x0080_0010,
    /// Release a buffer previously allocated by this session.
    FreeBuffer = 0x0080_0011,
    /// Translate a user address into the physical address seen by the codec.
    PhysAddr = 0x0080_0012,
    /// Report the total data memory that can be mapped.
    MmapSize = 0x0080_0014,
    /// Set a per-instance configuration value.
    SetConfig = 0x0080_0101,
}

impl Command {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Commands that issue a hardware command sequence.
    pub fn touches_hardware(self) -> bool {
        matches!(self, Command::DecodeInit | Command::DecodeExec)
    }
}

impl TryFrom<u32> for Command {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Ok(match code {
            0x0080_0001 => Command::DecodeInit,
            0x0080_0002 => Command::DecodeExec,
            0x0080_0010 => Command::AllocBuffer,
            0x0080_0011 => Command::FreeBuffer,
            0x0080_0012 => Command::PhysAddr,
            0x0080_0014 => Command::MmapSize,
            0x0080_0101 => Command::SetConfig,
            _ => return Err(code),
        })
    }
}

/// Result code carried in the envelope and returned by the collaborators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct RetCode(pub i32);

impl RetCode {
    pub const OK: RetCode = RetCode(0);
    pub const FAIL: RetCode = RetCode(-1000);
    pub const DEC_INIT_FAIL: RetCode = RetCode(-2000);
    pub const DEC_EXE_TIME_OUT: RetCode = RetCode(-2001);
    pub const DEC_EXE_ERR: RetCode = RetCode(-2002);
    pub const MEM_ALLOC_FAIL: RetCode = RetCode(-4001);
    pub const MEM_INVALID_ADDR_FAIL: RetCode = RetCode(-4002);
    pub const INVALID_PARAM_FAIL: RetCode = RetCode(-5001);
    pub const STATE_INVALID: RetCode = RetCode(-5002);
    pub const SET_CONF_FAIL: RetCode = RetCode(-6001);

    pub fn is_ok(self) -> bool {
        self == RetCode::OK
    }
}

impl fmt::Display for RetCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            RetCode::OK => "OK",
            RetCode::FAIL => "FAIL",
            RetCode::DEC_INIT_FAIL => "DEC_INIT_FAIL",
            RetCode::DEC_EXE_TIME_OUT => "DEC_EXE_TIME_OUT",
            RetCode::DEC_EXE_ERR => "DEC_EXE_ERR",
            RetCode::MEM_ALLOC_FAIL => "MEM_ALLOC_FAIL",
            RetCode::MEM_INVALID_ADDR_FAIL => "MEM_INVALID_ADDR_FAIL",
            RetCode::INVALID_PARAM_FAIL => "INVALID_PARAM_FAIL",
            RetCode::STATE_INVALID => "STATE_INVALID",
            RetCode::SET_CONF_FAIL => "SET_CONF_FAIL",
            RetCode(code) => return write!(f, "RetCode({code})"),
        };
        f.write_str(name)
    }
}

/// Which side of the codec a buffer is allocated for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum BufferKind {
    #[default]
    Decoder,
    Encoder,
}

impl BufferKind {
    fn code(self) -> u32 {
        match self {
            BufferKind::Decoder => 0,
            BufferKind::Encoder => 1,
        }
    }

    fn from_code(code: u32) -> Self {
        if code == 1 {
            BufferKind::Encoder
        } else {
            BufferKind::Decoder
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeInitArgs {
    pub codec: u32,
    pub stream_addr: u64,
    pub stream_size: u32,
    pub out_width: u32,
    pub out_height: u32,
    pub out_dpb_count: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeExecArgs {
    pub stream_addr: u64,
    pub stream_size: u32,
    pub out_display_status: u32,
    pub out_luma_addr: u64,
    pub out_chroma_addr: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocArgs {
    pub kind: BufferKind,
    pub size: u32,
    /// User address of the allocated buffer, filled in by the dispatcher.
    pub out_addr: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FreeArgs {
    pub user_addr: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PhysAddrArgs {
    pub user_addr: u64,
    pub out_phys_addr: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MmapSizeArgs {
    pub out_size: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SetConfigArgs {
    pub key: u32,
    pub value: u32,
}

/// The argument union, tagged by the command it belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandArgs {
    DecodeInit(DecodeInitArgs),
    DecodeExec(DecodeExecArgs),
    Alloc(AllocArgs),
    Free(FreeArgs),
    PhysAddr(PhysAddrArgs),
    MmapSize(MmapSizeArgs),
    SetConfig(SetConfigArgs),
    /// Arguments of an unrecognised command, carried back untouched.
    Raw([u8; ARGS_SIZE]),
}

impl Default for CommandArgs {
    fn default() -> Self {
        CommandArgs::Raw([0; ARGS_SIZE])
    }
}

/// Command envelope exchanged with the caller.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub ret_code: RetCode,
    pub args: CommandArgs,
}

impl CommandEnvelope {
    pub fn new(args: CommandArgs) -> Self {
        Self {
            ret_code: RetCode::OK,
            args,
        }
    }

    /// Serializes the envelope into its fixed-size little-endian form.
    pub fn encode(&self) -> [u8; ENVELOPE_SIZE] {
        let mut out = [0u8; ENVELOPE_SIZE];
        out[..4].copy_from_slice(&self.ret_code.0.to_le_bytes());
        let mut w = Writer {
            buf: &mut out[4..],
            pos: 0,
        };
        match self.args {
            CommandArgs::DecodeInit(a) => {
                w.u32(a.codec);
                w.u64(a.stream_addr);
                w.u32(a.stream_size);
                w.u32(a.out_width);
                w.u32(a.out_height);
                w.u32(a.out_dpb_count);
            }
            CommandArgs::DecodeExec(a) => {
                w.u64(a.stream_addr);
                w.u32(a.stream_size);
                w.u32(a.out_display_status);
                w.u64(a.out_luma_addr);
                w.u64(a.out_chroma_addr);
            }
            CommandArgs::Alloc(a) => {
                w.u32(a.kind.code());
                w.u32(a.size);
                w.u64(a.out_addr);
            }
            CommandArgs::Free(a) => w.u64(a.user_addr),
            CommandArgs::PhysAddr(a) => {
                w.u64(a.user_addr);
                w.u64(a.out_phys_addr);
            }
            CommandArgs::MmapSize(a) => w.u64(a.out_size),
            CommandArgs::SetConfig(a) => {
                w.u32(a.key);
                w.u32(a.value);
            }
            CommandArgs::Raw(raw) => w.buf.copy_from_slice(&raw),
        }
        out
    }

    /// Interprets `bytes` as the envelope of `command`.
    ///
    /// Unknown command codes keep their argument bytes verbatim so they can
    /// be copied back to the caller unchanged.
    pub fn decode(command: u32, bytes: &[u8; ENVELOPE_SIZE]) -> Self {
        let ret_code = RetCode(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
        let mut r = Reader {
            buf: &bytes[4..],
            pos: 0,
        };
        let args = match Command::try_from(command) {
            Ok(Command::DecodeInit) => CommandArgs::DecodeInit(DecodeInitArgs {
                codec: r.u32(),
                stream_addr: r.u64(),
                stream_size: r.u32(),
                out_width: r.u32(),
                out_height: r.u32(),
                out_dpb_count: r.u32(),
            }),
            Ok(Command::DecodeExec) => CommandArgs::DecodeExec(DecodeExecArgs {
                stream_addr: r.u64(),
                stream_size: r.u32(),
                out_display_status: r.u32(),
                out_luma_addr: r.u64(),
                out_chroma_addr: r.u64(),
            }),
            Ok(Command::AllocBuffer) => CommandArgs::Alloc(AllocArgs {
                kind: BufferKind::from_code(r.u32()),
                size: r.u32(),
                out_addr: r.u64(),
            }),
            Ok(Command::FreeBuffer) => CommandArgs::Free(FreeArgs {
                user_addr: r.u64(),
            }),
            Ok(Command::PhysAddr) => CommandArgs::PhysAddr(PhysAddrArgs {
                user_addr: r.u64(),
                out_phys_addr: r.u64(),
            }),
            Ok(Command::MmapSize) => CommandArgs::MmapSize(MmapSizeArgs {
                out_size: r.u64(),
            }),
            Ok(Command::SetConfig) => CommandArgs::SetConfig(SetConfigArgs {
                key: r.u32(),
                value: r.u32(),
            }),
            Err(_) => {
                let mut raw = [0u8; ARGS_SIZE];
                raw.copy_from_slice(r.buf);
                CommandArgs::Raw(raw)
            }
        };
        Self { ret_code, args }
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn u32(&mut self, value: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&value.to_le_bytes());
        self.pos += 4;
    }

    fn u64(&mut self, value: u64) {
        self.buf[self.pos..self.pos + 8].copy_from_slice(&value.to_le_bytes());
        self.pos += 8;
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u32(&mut self) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_le_bytes(bytes)
    }

    fn u64(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(bytes)
    }
}

/// Moves a command envelope between the caller and the dispatcher.
///
/// Both directions may fail; a failure is reported to the caller as an I/O
/// error and overrides whatever result the command produced.
pub trait ArgTransport {
    fn copy_in(&mut self, command: u32) -> io::Result<CommandEnvelope>;
    fn copy_out(&mut self, envelope: &CommandEnvelope) -> io::Result<()>;
}

/// In-process callers hand the envelope over directly.
impl ArgTransport for CommandEnvelope {
    fn copy_in(&mut self, _command: u32) -> io::Result<CommandEnvelope> {
        Ok(*self)
    }

    fn copy_out(&mut self, envelope: &CommandEnvelope) -> io::Result<()> {
        *self = *envelope;
        Ok(())
    }
}

/// Argument transport over a caller-owned byte buffer holding the wire
/// envelope.
pub struct SliceArgs<'a> {
    buf: &'a mut [u8],
}

impl<'a> SliceArgs<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }
}

impl ArgTransport for SliceArgs<'_> {
    fn copy_in(&mut self, command: u32) -> io::Result<CommandEnvelope> {
        let bytes: &[u8; ENVELOPE_SIZE] = self
            .buf
            .get(..ENVELOPE_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("argument buffer shorter than {ENVELOPE_SIZE} bytes"),
                )
            })?;
        Ok(CommandEnvelope::decode(command, bytes))
    }

    fn copy_out(&mut self, envelope: &CommandEnvelope) -> io::Result<()> {
        match self.buf.get_mut(..ENVELOPE_SIZE) {
            Some(dst) => {
                dst.copy_from_slice(&envelope.encode());
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("argument buffer shorter than {ENVELOPE_SIZE} bytes"),
            )),
        }
    }
}
