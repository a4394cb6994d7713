// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::device::Device;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    thread::{self, JoinHandle},
};
use tracing::{debug, error};

/// Default firmware file name looked up by the exerciser.
pub const FIRMWARE_NAME: &str = "codec_fw.bin";

/// A firmware image retained by the device until shutdown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareImage {
    name: String,
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| FIRMWARE_NAME.to_string());
        Ok(Self { name, data })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Loads the firmware at `path` on a background thread and reports the
/// outcome through [`Device::on_firmware_loaded`].
///
/// Returns once the loader thread is running; join the handle to wait for
/// the device to become ready (or to stay not ready).
pub fn request_firmware_nowait(device: Arc<Device>, path: PathBuf) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("codec-fw".to_string())
        .spawn(move || {
            debug!("loading firmware from {}", path.display());
            let image = match FirmwareImage::from_file(&path) {
                Ok(image) if !image.is_empty() => Some(image),
                Ok(_) => {
                    error!("firmware {} is empty", path.display());
                    None
                }
                Err(e) => {
                    error!("could not load firmware {}: {e}", path.display());
                    None
                }
            };
            device.on_firmware_loaded(image);
        })
}
