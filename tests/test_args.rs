// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_codec::{
    args::Args,
    config::{ClockPolicy, DeviceConfig, MappingMode, UnknownCommandPolicy},
};
use serial_test::serial;
use std::{env, error::Error, fs, path::PathBuf};

const ENV_VARS: [&str; 6] = [
    "CODEC_MEM_PORTS",
    "CODEC_PORT_SIZE",
    "CODEC_UNKNOWN_COMMAND",
    "CODEC_CLOCK_POLICY",
    "CODEC_PLATFORM",
    "CODEC_MAPPING",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

fn platform_file(name: &str, contents: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = env::temp_dir().join(format!("{name}_{}.json", std::process::id()));
    fs::write(&path, contents)?;
    Ok(path)
}

#[test]
#[serial]
fn test_defaults() -> Result<(), Box<dyn Error>> {
    clear_env();
    let args = Args::try_parse_from(["edgefirst-codec"])?;
    assert_eq!(args.sessions, 4);
    assert_eq!(args.frames, 30);
    assert_eq!(args.port_size, vec![16 << 20, 16 << 20]);
    assert_eq!(DeviceConfig::from(args.clone()), DeviceConfig::default());

    let (ports, translation) = args.sim_platform()?;
    assert!(!translation);
    assert_eq!(ports.len(), 2);
    assert_eq!(ports[1].base, ports[0].base + ports[0].size);
    Ok(())
}

#[test]
#[serial]
fn test_env_overrides() -> Result<(), Box<dyn Error>> {
    clear_env();
    env::set_var("CODEC_MEM_PORTS", "1");
    env::set_var("CODEC_PORT_SIZE", "1048576");
    env::set_var("CODEC_UNKNOWN_COMMAND", "accept");
    env::set_var("CODEC_CLOCK_POLICY", "compatible");

    let args = Args::try_parse_from(["edgefirst-codec", "--mapping", "on-demand"]);
    clear_env();
    let args = args?;

    let config = DeviceConfig::from(args.clone());
    assert_eq!(config.mem_ports, 1);
    assert_eq!(config.unknown_command, UnknownCommandPolicy::Accept);
    assert_eq!(config.clock, ClockPolicy::Compatible);
    assert_eq!(config.mapping, MappingMode::OnDemand);
    config.validate()?;

    let (ports, _) = args.sim_platform()?;
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].size, 1 << 20);
    Ok(())
}

#[test]
#[serial]
fn test_platform_file() -> Result<(), Box<dyn Error>> {
    clear_env();
    let path = platform_file(
        "codec_platform",
        r#"{"translation_unit": true, "ports": [{"base": 536870912, "size": 65536}]}"#,
    )?;
    let args = Args::try_parse_from(["edgefirst-codec", "--platform", path.to_str().unwrap()])?;
    let (ports, translation) = args.sim_platform()?;
    fs::remove_file(&path)?;

    assert!(translation);
    assert_eq!(ports.len(), 1);
    assert_eq!((ports[0].base, ports[0].size), (0x2000_0000, 0x1_0000));
    Ok(())
}

#[test]
#[serial]
fn test_platform_file_errors() -> Result<(), Box<dyn Error>> {
    clear_env();
    let three = platform_file(
        "codec_platform_three",
        r#"{"ports": [{"base": 0, "size": 1}, {"base": 1, "size": 1}, {"base": 2, "size": 1}]}"#,
    )?;
    let args = Args::try_parse_from(["edgefirst-codec", "--platform", three.to_str().unwrap()])?;
    let err = args.sim_platform().unwrap_err();
    assert!(err.to_string().contains("found 3"));
    fs::remove_file(&three)?;

    let bad = platform_file("codec_platform_bad", r#"{"ports": [{"base": "low"}]}"#)?;
    let args = Args::try_parse_from(["edgefirst-codec", "--platform", bad.to_str().unwrap()])?;
    assert!(args.sim_platform().is_err());
    fs::remove_file(&bad)?;
    Ok(())
}

#[test]
#[serial]
fn test_invalid_value() {
    clear_env();
    assert!(Args::try_parse_from(["edgefirst-codec", "--clock-policy", "sometimes"]).is_err());
}
