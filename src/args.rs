// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{
    config::{ClockPolicy, DeviceConfig, MappingMode, RemapPolicy, StateGate, UnknownCommandPolicy},
    sim::SimPort,
};
use clap::Parser;
use std::{error::Error, fs::File, path::PathBuf};

/// Physical base of the first simulated port when no platform file is given.
const SIM_PORT0_BASE: u64 = 0x4000_0000;

/// Command-line arguments for the EdgeFirst codec exerciser.
///
/// Device policies can be given on the command line or through environment
/// variables; the simulated platform is described either by the port size
/// options or by a JSON platform file.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-codec --mem-ports 1 --sessions 8 --clock-policy compatible
///
/// # Via environment variables
/// export CODEC_MEM_PORTS=1
/// export CODEC_UNKNOWN_COMMAND=accept
/// edgefirst-codec
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Codec firmware image
    #[arg(long, env = "CODEC_FIRMWARE", default_value = "/lib/firmware/codec_fw.bin")]
    pub firmware: PathBuf,

    /// Path to a JSON platform description (ports and translation unit)
    #[arg(long, env = "CODEC_PLATFORM")]
    pub platform: Option<PathBuf>,

    /// Number of memory ports used by the device (1 or 2)
    #[arg(long, env = "CODEC_MEM_PORTS", default_value = "2")]
    pub mem_ports: usize,

    /// Data memory size of each simulated port in bytes (port0 port1)
    #[arg(
        long,
        env = "CODEC_PORT_SIZE",
        default_value = "16777216 16777216",
        value_delimiter = ' ',
        num_args = 1..=2
    )]
    pub port_size: Vec<u64>,

    /// Simulate a device translation unit
    #[arg(long, env = "CODEC_TRANSLATION_UNIT")]
    pub translation_unit: bool,

    /// Maximum number of concurrently open sessions
    #[arg(long, env = "CODEC_MAX_SESSIONS", default_value = "16")]
    pub max_sessions: u32,

    /// Page size of user mappings in bytes
    #[arg(long, env = "CODEC_PAGE_SIZE", default_value = "4096")]
    pub page_size: u64,

    /// User mapping strategy
    #[arg(long, env = "CODEC_MAPPING", default_value = "auto", value_enum)]
    pub mapping: MappingMode,

    /// Handling of unrecognised command codes
    #[arg(long, env = "CODEC_UNKNOWN_COMMAND", default_value = "reject", value_enum)]
    pub unknown_command: UnknownCommandPolicy,

    /// Which commands are bracketed by the codec clock
    #[arg(long, env = "CODEC_CLOCK_POLICY", default_value = "consistent", value_enum)]
    pub clock_policy: ClockPolicy,

    /// Earliest state in which buffer and query commands are accepted
    #[arg(long, env = "CODEC_STATE_GATE", default_value = "strict", value_enum)]
    pub state_gate: StateGate,

    /// Handling of a second mapping call on one session
    #[arg(long, env = "CODEC_REMAP_POLICY", default_value = "reject", value_enum)]
    pub remap_policy: RemapPolicy,

    /// Number of concurrent client sessions to run
    #[arg(short, long, env = "CODEC_SESSIONS", default_value = "4")]
    pub sessions: usize,

    /// Decode commands issued by each session
    #[arg(short, long, env = "CODEC_FRAMES", default_value = "30")]
    pub frames: u32,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Simulated ports and translation-unit presence.
    ///
    /// A platform file takes precedence over the port size options. It is a
    /// JSON object of the form
    /// `{"translation_unit": true, "ports": [{"base": 1073741824, "size": 16777216}]}`.
    pub fn sim_platform(&self) -> Result<(Vec<SimPort>, bool), Box<dyn Error>> {
        let Some(path) = &self.platform else {
            let mut base = SIM_PORT0_BASE;
            let ports = self
                .port_size
                .iter()
                .map(|&size| {
                    let port = SimPort { base, size };
                    base += size;
                    port
                })
                .collect();
            return Ok((ports, self.translation_unit));
        };

        let file = File::open(path)?;
        let json: serde_json::Value = serde_json::from_reader(file)?;
        let ports = match json["ports"].as_array() {
            Some(ports) => ports,
            None => return Err(Box::from("Did not find ports as an array")),
        };
        if ports.is_empty() || ports.len() > 2 {
            return Err(Box::from(format!(
                "Expected 1 or 2 ports but found {}",
                ports.len()
            )));
        }
        let ports = ports
            .iter()
            .map(|p| match (p["base"].as_u64(), p["size"].as_u64()) {
                (Some(base), Some(size)) => Ok(SimPort { base, size }),
                _ => Err(Box::<dyn Error>::from(format!(
                    "port entry {p} needs numeric base and size"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let translation = json["translation_unit"]
            .as_bool()
            .unwrap_or(self.translation_unit);
        Ok((ports, translation))
    }
}

impl From<Args> for DeviceConfig {
    fn from(args: Args) -> Self {
        DeviceConfig {
            mem_ports: args.mem_ports,
            max_sessions: args.max_sessions,
            page_size: args.page_size,
            mapping: args.mapping,
            unknown_command: args.unknown_command,
            clock: args.clock_policy,
            state_gate: args.state_gate,
            remap: args.remap_policy,
            ..DeviceConfig::default()
        }
    }
}
