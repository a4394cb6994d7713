// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_codec::{
    args::Args,
    command::{
        AllocArgs, BufferKind, Command, CommandArgs, CommandEnvelope, DecodeExecArgs,
        DecodeInitArgs, FreeArgs, PhysAddrArgs, SliceArgs, ENVELOPE_SIZE,
    },
    config::DeviceConfig,
    device::Device,
    firmware::{request_firmware_nowait, FirmwareImage, FIRMWARE_NAME},
    sim::{self, SimRegion},
    CodecError,
};
use serde_json::json;
use std::{
    error::Error,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Bytes requested for each client's stream buffer.
const STREAM_BUFFER_SIZE: u32 = 4096;

/// User address at which client `n` maps the device memory.
fn user_base(client: usize) -> u64 {
    0x1000_0000 * (client as u64 + 1)
}

#[derive(Debug, Default)]
struct ClientStats {
    id: u32,
    frames: u32,
    stream_phys: u64,
    exec_time: Duration,
}

fn init_logging(verbose: bool) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let journald = tracing_journald::layer().ok();
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(journald);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose)?;
    info!("EdgeFirst Codec Control Plane");

    let (ports, translation) = args.sim_platform()?;
    let (platform, handles) = sim::platform(ports, translation);
    let device = Device::new(DeviceConfig::from(args.clone()), platform)?;

    if args.firmware.exists() {
        request_firmware_nowait(Arc::clone(&device), args.firmware.clone())?
            .join()
            .map_err(|_| "firmware loader panicked")?;
    } else {
        warn!(
            "{} not found, using a simulated {FIRMWARE_NAME}",
            args.firmware.display()
        );
        device.on_firmware_loaded(Some(FirmwareImage::new(FIRMWARE_NAME, vec![0xc0; 4096])));
    }
    if !device.firmware_ready() {
        return Err(Box::new(CodecError::NotReady));
    }

    let start = Instant::now();
    let clients = (0..args.sessions)
        .map(|client| {
            let device = Arc::clone(&device);
            let args = args.clone();
            thread::Builder::new()
                .name(format!("client-{client}"))
                .spawn(move || run_client(&device, client, &args))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut completed = Vec::new();
    for client in clients {
        match client.join() {
            Ok(Ok(stats)) => completed.push(stats),
            Ok(Err(e)) => error!("client failed: {e} (errno {})", e.errno()),
            Err(_) => error!("client panicked"),
        }
    }
    let elapsed = start.elapsed();

    for stats in &completed {
        let per_frame = stats.exec_time / stats.frames.max(1);
        info!(
            "instance {} frames: {} stream phys: 0x{:08x} exec: {:?}/frame",
            stats.id, stats.frames, stats.stream_phys, per_frame
        );
    }

    let summary = json!({
        "sessions": args.sessions,
        "completed": completed.len(),
        "decodes": handles.hardware.decodes(),
        "bring_ups": handles.hardware.bring_ups(),
        "power_on": handles.power.power_on_calls(),
        "power_off": handles.power.power_off_calls(),
        "powered": handles.power.is_powered(),
        "outstanding_buffers": handles.allocator.total_outstanding(),
        "tlb_invalidations": handles.translation.as_ref().map(|t| t.invalidations()),
        "elapsed_ms": elapsed.as_millis() as u64,
    });
    println!("{summary}");

    device.shutdown();
    Ok(())
}

fn run_client(device: &Arc<Device>, client: usize, args: &Args) -> Result<ClientStats, CodecError> {
    let mut session = device.open_session()?;
    let mut stats = ClientStats {
        id: session.id(),
        ..ClientStats::default()
    };

    let mut region = SimRegion::new(user_base(client), device.data_memory_size());
    session.establish_mapping(&mut region)?;

    session.dispatch_envelope(
        Command::DecodeInit,
        CommandArgs::DecodeInit(DecodeInitArgs {
            codec: 0,
            ..DecodeInitArgs::default()
        }),
    )?;

    let env = session.dispatch_envelope(
        Command::AllocBuffer,
        CommandArgs::Alloc(AllocArgs {
            kind: BufferKind::Decoder,
            size: STREAM_BUFFER_SIZE,
            out_addr: 0,
        }),
    )?;
    let CommandArgs::Alloc(alloc) = env.args else {
        return Err(CodecError::InvalidArgument("allocation reply".to_string()));
    };
    if !env.ret_code.is_ok() {
        warn!("instance {}: stream buffer allocation returned {}", stats.id, env.ret_code);
        session.close()?;
        return Ok(stats);
    }

    let env = session.dispatch_envelope(
        Command::PhysAddr,
        CommandArgs::PhysAddr(PhysAddrArgs {
            user_addr: alloc.out_addr,
            out_phys_addr: 0,
        }),
    )?;
    if let CommandArgs::PhysAddr(phys) = env.args {
        stats.stream_phys = phys.out_phys_addr;
    }

    // decode commands travel through the wire envelope like a real client's
    let mut wire = [0u8; ENVELOPE_SIZE];
    for _ in 0..args.frames {
        let request = CommandEnvelope::new(CommandArgs::DecodeExec(DecodeExecArgs {
            stream_addr: alloc.out_addr,
            stream_size: STREAM_BUFFER_SIZE,
            ..DecodeExecArgs::default()
        }));
        wire.copy_from_slice(&request.encode());

        let now = Instant::now();
        let ret = session.dispatch(Command::DecodeExec.code(), &mut SliceArgs::new(&mut wire))?;
        stats.exec_time += now.elapsed();
        if !ret.is_ok() {
            warn!("instance {}: decode returned {ret}", stats.id);
            break;
        }
        stats.frames += 1;
    }

    session.dispatch_envelope(
        Command::FreeBuffer,
        CommandArgs::Free(FreeArgs {
            user_addr: alloc.out_addr,
        }),
    )?;
    session.close()?;
    Ok(stats)
}
