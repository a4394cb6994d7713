// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

#![allow(dead_code)]

use edgefirst_codec::{
    config::DeviceConfig,
    device::Device,
    firmware::FirmwareImage,
    sim::{self, SimHandles, SimPort},
};
use std::sync::Arc;

pub const PORT0_BASE: u64 = 0x4000_0000;
pub const PORT1_BASE: u64 = 0x6000_0000;
pub const PORT_SIZE: u64 = 1 << 20;
pub const USER_BASE: u64 = 0x1000_0000;

pub fn ports() -> Vec<SimPort> {
    vec![
        SimPort {
            base: PORT0_BASE,
            size: PORT_SIZE,
        },
        SimPort {
            base: PORT1_BASE,
            size: PORT_SIZE,
        },
    ]
}

pub fn firmware() -> FirmwareImage {
    FirmwareImage::new("codec_fw.bin", vec![0xc0; 256])
}

/// A device over two simulated ports that has not seen any firmware yet.
pub fn device(config: DeviceConfig, translation: bool) -> (Arc<Device>, SimHandles) {
    let (platform, handles) = sim::platform(ports(), translation);
    let device = Device::new(config, platform).unwrap();
    (device, handles)
}

/// A device over two simulated ports with firmware loaded.
pub fn ready_device(config: DeviceConfig, translation: bool) -> (Arc<Device>, SimHandles) {
    let (device, handles) = device(config, translation);
    device.on_firmware_loaded(Some(firmware()));
    assert!(device.firmware_ready());
    (device, handles)
}
