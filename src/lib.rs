// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Codec Control Plane
//!
//! This library arbitrates concurrent client sessions over a single hardware
//! video codec block. It manages the power lifecycle of the block as
//! sessions come and go, validates every command against the session's
//! instance state before the hardware sees it, and maps the codec's data
//! memory (one or two memory ports) into client address space.
//!
//! ## Features
//!
//! - **Power Arbitration**: The first session powers the codec on and brings
//!   it up, the last session powers it off. Suspend and resume are free while
//!   the codec is idle.
//! - **Instance State Machine**: Sessions move through `Created`,
//!   `DecodeInitialized` and `DecodeExecuting`; a single guard at the
//!   dispatch boundary rejects commands that are not legal yet.
//! - **Command Dispatch**: A fixed-size command envelope is copied in,
//!   executed under the device lock with the codec clock running, and
//!   copied back out with its result code.
//! - **Memory Mapping**: User mappings are backed on demand through a fault
//!   handler or remapped up front, across both memory ports.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_codec::{
//!     command::{Command, CommandArgs, DecodeInitArgs},
//!     config::DeviceConfig,
//!     device::Device,
//!     firmware::FirmwareImage,
//!     sim::{self, SimPort},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ports = vec![SimPort { base: 0x4000_0000, size: 1 << 24 }];
//! let (platform, _handles) = sim::platform(ports, false);
//! let config = DeviceConfig { mem_ports: 1, ..DeviceConfig::default() };
//! let device = Device::new(config, platform)?;
//! device.on_firmware_loaded(Some(FirmwareImage::new("codec_fw.bin", vec![0; 64])));
//!
//! // The first session powers the codec on
//! let mut session = device.open_session()?;
//! session.dispatch_envelope(
//!     Command::DecodeInit,
//!     CommandArgs::DecodeInit(DecodeInitArgs::default()),
//! )?;
//!
//! // The last session powers it off again
//! session.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Collaborators
//!
//! Power and clock control, the buffer pools, the register-level command
//! protocol and the translation unit are supplied by the platform through
//! the traits in [`platform`]. The [`sim`] module provides in-memory versions
//! for host-side testing.

pub mod args;
pub mod command;
pub mod config;
pub mod device;
mod dispatch;
pub mod error;
pub mod firmware;
pub mod mapping;
pub mod platform;
pub mod session;
pub mod sim;

pub use error::{CodecError, Result};
