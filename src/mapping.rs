// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! User mappings of the device data memory.
//!
//! A session maps one contiguous user region that views the data memory of
//! every port back to back: port 0 first, then port 1. The region is backed
//! either on demand through the fault handler ([`OnDemandMapping`]) or by
//! remapping every page when the mapping is established ([`DirectMapping`]).
//! Which one is used is decided once, when the device is created.

use crate::{
    config::{MappingMode, RemapPolicy},
    device::MemoryPort,
    error::{CodecError, Result},
    session::{MappingRecord, Session},
};
use bitflags::bitflags;
use std::{io, sync::Arc};
use tracing::{debug, error, warn};

bitflags! {
    /// Attributes applied to a user region by a mapping strategy.
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct RegionFlags: u32 {
        const IO            = 0b1;
        const RESERVED      = 0b10;
        const NONCACHED     = 0b100;
        const FAULT_HANDLED = 0b1000;
    }
}

/// The user virtual address range a mapping call operates on.
pub trait UserRegion {
    fn start(&self) -> u64;
    fn len(&self) -> u64;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn set_flags(&mut self, flags: RegionFlags);
    /// Installs one page: `user_addr` now translates to `phys_addr`.
    fn remap_page(&mut self, user_addr: u64, phys_addr: u64) -> io::Result<()>;
}

/// Backs a user region with device data memory.
pub trait MappingStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn mode(&self) -> MappingMode;
    /// Prepares `region` and returns how many bytes of it are backed.
    fn map(&self, ports: &[MemoryPort], page_size: u64, region: &mut dyn UserRegion)
        -> Result<u64>;
}

/// Defers page resolution to the first touch of each page.
///
/// Used when the codec sits behind a translation unit: buffers are only
/// virtually contiguous, so pages are looked up one by one in the buffer
/// allocator by [`Session::resolve_fault`].
pub struct OnDemandMapping;

impl MappingStrategy for OnDemandMapping {
    fn name(&self) -> &'static str {
        "on-demand"
    }

    fn mode(&self) -> MappingMode {
        MappingMode::OnDemand
    }

    fn map(&self, _ports: &[MemoryPort], _page_size: u64, region: &mut dyn UserRegion) -> Result<u64> {
        region.set_flags(
            RegionFlags::IO | RegionFlags::RESERVED | RegionFlags::NONCACHED | RegionFlags::FAULT_HANDLED,
        );
        Ok(region.len())
    }
}

/// Remaps the whole region page by page when the mapping is established.
pub struct DirectMapping;

impl MappingStrategy for DirectMapping {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn mode(&self) -> MappingMode {
        MappingMode::Direct
    }

    fn map(&self, ports: &[MemoryPort], page_size: u64, region: &mut dyn UserRegion) -> Result<u64> {
        region.set_flags(RegionFlags::IO | RegionFlags::RESERVED | RegionFlags::NONCACHED);

        let requested = region.len();
        let start = region.start();
        let mut offset = 0;
        for (port_no, port) in ports.iter().enumerate() {
            if offset >= requested {
                break;
            }
            let size = port.size.min(requested - offset);
            let mut done = 0;
            while done < size {
                region
                    .remap_page(start + offset + done, port.base + done)
                    .map_err(|source| {
                        error!("failed to remap port {port_no}: {source}");
                        CodecError::Remap {
                            port: port_no,
                            source,
                        }
                    })?;
                done += page_size;
            }
            offset += size;
        }

        let available: u64 = ports.iter().map(|p| p.size).sum();
        if offset < available {
            warn!("reserved memory not mapped fully [{available}: {offset}]");
        }
        Ok(offset)
    }
}

impl Session {
    /// Maps the device data memory into `region` and returns the session's
    /// mapping base.
    ///
    /// The base is recorded by the first successful call. A second call is
    /// rejected or maps the new region under the recorded base, depending
    /// on [`RemapPolicy`].
    pub fn establish_mapping(&mut self, region: &mut dyn UserRegion) -> Result<u64> {
        let device = Arc::clone(&self.device);
        let requested = region.len();
        let available = device.data_memory_size();

        debug!(
            "instance {}: map 0x{:08x}+{requested} ({}MB), available {available}",
            self.id,
            region.start(),
            requested >> 20
        );

        if requested > available {
            error!("requested mapping of {requested} bytes exceeds available {available} bytes");
            return Err(CodecError::MappingTooLarge {
                requested,
                available,
            });
        }

        if let Some(record) = self.mapping {
            if device.config().remap == RemapPolicy::Reject {
                error!("instance {} already mapped at 0x{:08x}", self.id, record.base);
                return Err(CodecError::AlreadyMapped(record.base));
            }
        }

        let strategy = device.mapping_strategy();
        let mapped = strategy.map(device.ports(), device.config().page_size, region)?;
        let base = self.user_base().unwrap_or_else(|| region.start());
        self.mapping = Some(MappingRecord {
            base,
            len: requested,
            mapped,
            mode: strategy.mode(),
        });
        Ok(base)
    }

    /// Resolves a fault at `user_addr` inside the session's on-demand region
    /// to the physical page backing it.
    ///
    /// `None` means the fault cannot be satisfied and the faulting access
    /// must be failed with a bus error.
    pub fn resolve_fault(&self, user_addr: u64) -> Option<u64> {
        let record = self.mapping?;
        if record.mode != MappingMode::OnDemand {
            return None;
        }
        if user_addr < record.base || user_addr - record.base >= record.len {
            return None;
        }
        // buffers allocated before the mapping existed are found by offset
        let offset = user_addr - record.base;
        let handle = self.buffer_at_offset(offset)?;
        let phys = self
            .device
            .buffers()
            .resolve_physical(handle.owner, handle.owner.user_base + offset)?;
        let page_mask = self.device.config().page_size - 1;
        debug!("instance {}: fault 0x{user_addr:08x} -> 0x{phys:08x}", self.id);
        Some(phys & !page_mask)
    }
}
