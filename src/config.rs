// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::error::{CodecError, Result};

/// How user mappings are backed by device memory.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy, Default)]
pub enum MappingMode {
    /// On-demand when the platform has a translation unit, direct otherwise
    #[default]
    Auto,
    /// Resolve pages on first touch through the fault handler
    OnDemand,
    /// Remap every page of the region when the mapping is established
    Direct,
}

/// Handling of command codes the dispatcher does not recognise.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy, Default)]
pub enum UnknownCommandPolicy {
    /// Fail with an invalid-parameter result
    #[default]
    Reject,
    /// Succeed with an OK result (legacy client behaviour)
    Accept,
}

/// Which commands run with the codec clock enabled.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy, Default)]
pub enum ClockPolicy {
    /// Every hardware-adjacent command, buffer commands included
    #[default]
    Consistent,
    /// Only decode-init and decode-exec (legacy driver behaviour)
    Compatible,
}

/// Earliest instance state in which buffer and query commands are accepted.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy, Default)]
pub enum StateGate {
    /// After decode-init has succeeded
    #[default]
    Strict,
    /// As soon as the session exists (legacy driver behaviour)
    Compatible,
}

/// Handling of a second mapping call on the same session.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq, Copy, Default)]
pub enum RemapPolicy {
    /// Fail the call, the first mapping stays in place
    #[default]
    Reject,
    /// Map the new region but keep the first recorded base
    Reuse,
}

/// Static configuration of a codec device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    /// Number of memory ports (1 or 2).
    pub mem_ports: usize,
    /// Maximum number of concurrently open sessions.
    pub max_sessions: u32,
    /// Page granularity of user mappings.
    pub page_size: u64,
    pub mapping: MappingMode,
    pub unknown_command: UnknownCommandPolicy,
    pub clock: ClockPolicy,
    pub state_gate: StateGate,
    pub remap: RemapPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "codec".to_string(),
            mem_ports: 2,
            max_sessions: 16,
            page_size: 4096,
            mapping: MappingMode::default(),
            unknown_command: UnknownCommandPolicy::default(),
            clock: ClockPolicy::default(),
            state_gate: StateGate::default(),
            remap: RemapPolicy::default(),
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=2).contains(&self.mem_ports) {
            return Err(CodecError::InvalidConfig(format!(
                "mem_ports must be 1 or 2, got {}",
                self.mem_ports
            )));
        }
        if self.max_sessions == 0 {
            return Err(CodecError::InvalidConfig(
                "max_sessions must be at least 1".to_string(),
            ));
        }
        if !self.page_size.is_power_of_two() {
            return Err(CodecError::InvalidConfig(format!(
                "page_size {} is not a power of two",
                self.page_size
            )));
        }
        Ok(())
    }
}
