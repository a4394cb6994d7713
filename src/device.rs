// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The shared codec device and its power arbitration.
//!
//! One [`Device`] exists per hardware unit. It is constructed explicitly by
//! the hosting transport and shared with every session through an `Arc`.
//! The first session to open powers the unit on and brings it up; the last
//! session to close powers it off. Everything that touches the hardware or
//! the session count runs under the device lock.

use crate::{
    config::{DeviceConfig, MappingMode},
    error::{CodecError, Result},
    firmware::FirmwareImage,
    mapping::{DirectMapping, MappingStrategy, OnDemandMapping},
    platform::{
        BufferAllocator, ClockGuard, Completion, CompletionKind, HardwareCommands, Platform,
        PowerControl, SessionId, TranslationUnit,
    },
    session::Session,
};
use parking_lot::{Mutex, MutexGuard};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, error, info, warn};

/// Data memory exposed by one memory port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryPort {
    /// Physical base address of the port's data memory.
    pub base: u64,
    /// Size in bytes.
    pub size: u64,
}

/// Mutable device state, only reachable through the device lock.
pub(crate) struct DeviceState {
    live: BTreeSet<SessionId>,
    firmware: Option<FirmwareImage>,
    firmware_ready: bool,
}

impl DeviceState {
    fn free_id(&self, max_sessions: u32) -> Option<SessionId> {
        (0..max_sessions).find(|id| !self.live.contains(id))
    }
}

pub struct Device {
    config: DeviceConfig,
    power: Box<dyn PowerControl>,
    hardware: Box<dyn HardwareCommands>,
    buffers: Arc<dyn BufferAllocator>,
    translation: Option<Box<dyn TranslationUnit>>,
    ports: Vec<MemoryPort>,
    mapping: Box<dyn MappingStrategy>,
    state: Mutex<DeviceState>,
    wait_sys: Completion,
    wait_codec: [Completion; 2],
}

impl Device {
    /// Creates the device record for a platform.
    ///
    /// The memory ports are sampled from the buffer allocator once; their
    /// sizes are treated as immutable afterwards. The device starts out not
    /// ready until [`Device::on_firmware_loaded`] accepts an image.
    pub fn new(config: DeviceConfig, platform: Platform) -> Result<Arc<Self>> {
        config.validate()?;

        let ports = (0..config.mem_ports)
            .map(|port| MemoryPort {
                base: platform.buffers.base_of(port),
                size: platform.buffers.size_of(port),
            })
            .collect::<Vec<_>>();
        let page_mask = config.page_size - 1;
        if let Some((i, port)) = ports
            .iter()
            .enumerate()
            .find(|(_, p)| p.base & page_mask != 0 || p.size & page_mask != 0)
        {
            return Err(CodecError::InvalidConfig(format!(
                "port {i} (base 0x{:08x} size {}) is not aligned to the {} byte page size",
                port.base, port.size, config.page_size
            )));
        }

        let mode = match config.mapping {
            MappingMode::Auto if platform.translation.is_some() => MappingMode::OnDemand,
            MappingMode::Auto => MappingMode::Direct,
            mode => mode,
        };
        let mapping: Box<dyn MappingStrategy> = match mode {
            MappingMode::OnDemand => Box::new(OnDemandMapping),
            _ => Box::new(DirectMapping),
        };

        for (i, port) in ports.iter().enumerate() {
            debug!("port {i}: base 0x{:08x} size {}", port.base, port.size);
        }
        info!(
            "{}: {} memory port(s), {} mapping",
            config.name,
            ports.len(),
            mapping.name()
        );

        Ok(Arc::new(Self {
            config,
            power: platform.power,
            hardware: platform.hardware,
            buffers: platform.buffers,
            translation: platform.translation,
            ports,
            mapping,
            state: Mutex::new(DeviceState {
                live: BTreeSet::new(),
                firmware: None,
                firmware_ready: false,
            }),
            wait_sys: Completion::default(),
            wait_codec: [Completion::default(), Completion::default()],
        }))
    }

    /// Opens a new session.
    ///
    /// Fails with [`CodecError::NotReady`] while no firmware is loaded. The
    /// first session powers the unit on and brings it up; any failure after
    /// power-on turns the power off again before the error is returned.
    pub fn open_session(self: &Arc<Self>) -> Result<Session> {
        let mut state = self.lock();

        if !state.firmware_ready {
            error!("{}: firmware not loaded yet", self.config.name);
            return Err(CodecError::NotReady);
        }

        let first = state.live.is_empty();
        if first {
            self.power.power_on().map_err(|e| {
                error!("power enable failed: {e}");
                CodecError::power("power on", e)
            })?;

            let ret = self.hardware.bring_up();
            if !ret.is_ok() {
                error!("hardware init failed: {ret}");
                self.compensate_power_off();
                return Err(CodecError::HardwareInit(ret));
            }

            self.flush_tlb();
            info!("{}: powered on", self.config.name);
        }

        let created = state
            .free_id(self.config.max_sessions)
            .ok_or(CodecError::OutOfMemory)
            .and_then(|id| Session::create(Arc::clone(self), id));
        let session = match created {
            Ok(session) => session,
            Err(e) => {
                error!("failed to create instance context: {e}");
                if first {
                    self.compensate_power_off();
                }
                return Err(e);
            }
        };

        state.live.insert(session.id());
        debug!(
            "instance {} opened, {} live",
            session.id(),
            state.live.len()
        );
        Ok(session)
    }

    /// Tears a session down and powers the unit off if it was the last one.
    pub(crate) fn close_session(&self, session: &mut Session) -> Result<()> {
        let mut state = self.lock();

        self.flush_tlb();
        session.destroy();
        state.live.remove(&session.id());
        debug!(
            "instance {} closed, {} live",
            session.id(),
            state.live.len()
        );

        if state.live.is_empty() {
            self.power.power_off().map_err(|e| {
                error!("power disable failed: {e}");
                CodecError::power("power off", e)
            })?;
            info!("{}: powered off", self.config.name);
        }
        Ok(())
    }

    /// Puts the unit to sleep for system suspend. Nothing to do while idle.
    pub fn suspend(&self) -> Result<()> {
        let state = self.lock();
        if state.live.is_empty() {
            return Ok(());
        }
        self.power
            .sleep()
            .map_err(|e| CodecError::power("sleep", e))
    }

    /// Wakes the unit after system resume. Nothing to do while idle.
    pub fn resume(&self) -> Result<()> {
        let state = self.lock();
        if state.live.is_empty() {
            return Ok(());
        }
        self.power
            .wakeup()
            .map_err(|e| CodecError::power("wakeup", e))
    }

    /// Completion callback of the asynchronous firmware request.
    ///
    /// The image is retained until [`Device::shutdown`] whether or not the
    /// hardware layer accepts it; only an accepted image makes the device
    /// ready. A missing image leaves the device permanently not ready.
    pub fn on_firmware_loaded(&self, image: Option<FirmwareImage>) {
        let mut state = self.lock();
        match image {
            Some(image) => {
                state.firmware_ready = self.hardware.load_firmware(image.data());
                if state.firmware_ready {
                    info!("firmware loaded successfully (size: {})", image.len());
                } else {
                    error!("firmware {} rejected by the hardware layer", image.name());
                }
                state.firmware = Some(image);
            }
            None => error!("failed to load firmware, {} will not work", self.config.name),
        }
    }

    pub fn firmware_ready(&self) -> bool {
        self.lock().firmware_ready
    }

    /// Releases the retained firmware image; the device is not ready
    /// afterwards.
    pub fn shutdown(&self) -> Option<FirmwareImage> {
        let mut state = self.lock();
        if !state.live.is_empty() {
            warn!(
                "{}: shutting down with {} open session(s)",
                self.config.name,
                state.live.len()
            );
        }
        state.firmware_ready = false;
        let image = state.firmware.take();
        info!("{}: shut down", self.config.name);
        image
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.lock().live.len()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn ports(&self) -> &[MemoryPort] {
        &self.ports
    }

    /// Total data memory over all configured ports.
    pub fn data_memory_size(&self) -> u64 {
        self.ports.iter().map(|p| p.size).sum()
    }

    pub fn mapping_strategy(&self) -> &dyn MappingStrategy {
        self.mapping.as_ref()
    }

    pub fn buffers(&self) -> &dyn BufferAllocator {
        self.buffers.as_ref()
    }

    pub fn completion(&self, kind: CompletionKind) -> &Completion {
        match kind {
            CompletionKind::System => &self.wait_sys,
            CompletionKind::Codec0 => &self.wait_codec[0],
            CompletionKind::Codec1 => &self.wait_codec[1],
        }
    }

    pub(crate) fn power(&self) -> &dyn PowerControl {
        self.power.as_ref()
    }

    pub(crate) fn hardware(&self) -> &dyn HardwareCommands {
        self.hardware.as_ref()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock()
    }

    fn compensate_power_off(&self) {
        if let Err(e) = self.power.power_off() {
            error!("power disable failed: {e}");
        }
    }

    /// Invalidates the translation unit's TLBs with the clock running.
    fn flush_tlb(&self) {
        let Some(tlb) = self.translation.as_ref() else {
            return;
        };
        match ClockGuard::acquire(self.power()) {
            Ok(_clock) => {
                if let Err(e) = tlb.invalidate_tlb() {
                    warn!("TLB invalidate failed: {e}");
                }
            }
            Err(e) => warn!("TLB invalidate skipped: {e}"),
        }
    }
}
