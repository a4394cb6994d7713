// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod common;

use common::{ready_device, PORT0_BASE, PORT_SIZE, USER_BASE};
use edgefirst_codec::{
    command::{
        AllocArgs, ArgTransport, BufferKind, Command, CommandArgs, CommandEnvelope,
        DecodeExecArgs, DecodeInitArgs, FreeArgs, MmapSizeArgs, PhysAddrArgs, RetCode,
        SetConfigArgs, SliceArgs, ARGS_SIZE, ENVELOPE_SIZE,
    },
    config::{ClockPolicy, DeviceConfig, StateGate, UnknownCommandPolicy},
    platform::HardwareCommands,
    session::{InstanceState, Session},
    sim::SimRegion,
    CodecError,
};
use std::{error::Error, io, sync::atomic::Ordering};

fn decode_init(session: &mut Session) -> Result<CommandEnvelope, CodecError> {
    session.dispatch_envelope(
        Command::DecodeInit,
        CommandArgs::DecodeInit(DecodeInitArgs::default()),
    )
}

fn decode_exec(session: &mut Session) -> Result<CommandEnvelope, CodecError> {
    session.dispatch_envelope(
        Command::DecodeExec,
        CommandArgs::DecodeExec(DecodeExecArgs::default()),
    )
}

fn alloc(session: &mut Session, kind: BufferKind, size: u32) -> Result<CommandEnvelope, CodecError> {
    session.dispatch_envelope(
        Command::AllocBuffer,
        CommandArgs::Alloc(AllocArgs {
            kind,
            size,
            out_addr: 0,
        }),
    )
}

fn alloc_addr(envelope: &CommandEnvelope) -> u64 {
    match envelope.args {
        CommandArgs::Alloc(args) => args.out_addr,
        other => panic!("unexpected reply {other:?}"),
    }
}

fn phys_addr(session: &mut Session, user_addr: u64) -> Result<CommandEnvelope, CodecError> {
    session.dispatch_envelope(
        Command::PhysAddr,
        CommandArgs::PhysAddr(PhysAddrArgs {
            user_addr,
            out_phys_addr: 0,
        }),
    )
}

/// Transport whose copy back to the caller always fails.
struct BrokenCopyOut(CommandEnvelope);

impl ArgTransport for BrokenCopyOut {
    fn copy_in(&mut self, _command: u32) -> io::Result<CommandEnvelope> {
        Ok(self.0)
    }

    fn copy_out(&mut self, _envelope: &CommandEnvelope) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "bad user pointer"))
    }
}

#[test]
fn test_decode_scenario() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;
    let mut region = SimRegion::new(USER_BASE, device.data_memory_size());
    session.establish_mapping(&mut region)?;

    let env = decode_init(&mut session)?;
    assert_eq!(env.ret_code, RetCode::OK);
    assert_eq!(session.state(), InstanceState::DecodeInitialized);

    let env = alloc(&mut session, BufferKind::Decoder, 4096)?;
    assert_eq!(env.ret_code, RetCode::OK);
    let user_addr = alloc_addr(&env);
    assert!(user_addr >= USER_BASE);

    let env = phys_addr(&mut session, user_addr)?;
    assert_eq!(env.ret_code, RetCode::OK);
    match env.args {
        CommandArgs::PhysAddr(args) => assert_ne!(args.out_phys_addr, 0),
        other => panic!("unexpected reply {other:?}"),
    }

    let env = session.dispatch_envelope(Command::FreeBuffer, CommandArgs::Free(FreeArgs { user_addr }))?;
    assert_eq!(env.ret_code, RetCode::OK);
    assert!(session.buffers().is_empty());

    session.close()?;
    assert_eq!(device.session_count(), 0);
    assert_eq!(handles.power.power_off_calls(), 1);
    assert!(!handles.power.is_powered());
    assert_eq!(handles.allocator.total_outstanding(), 0);
    Ok(())
}

#[test]
fn test_strict_gate() -> Result<(), Box<dyn Error>> {
    let (device, _handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    let err = alloc(&mut session, BufferKind::Decoder, 4096).unwrap_err();
    assert!(matches!(
        err,
        CodecError::InvalidState {
            command: Command::AllocBuffer,
            state: InstanceState::Created
        }
    ));
    assert!(matches!(phys_addr(&mut session, USER_BASE), Err(CodecError::InvalidState { .. })));

    let mut env = CommandEnvelope::new(CommandArgs::MmapSize(MmapSizeArgs::default()));
    let err = session.dispatch(Command::MmapSize.code(), &mut env).unwrap_err();
    assert!(matches!(err, CodecError::InvalidState { .. }));
    assert_eq!(err.errno(), -libc::EINVAL);
    // the rejection is still copied back to the caller
    assert_eq!(env.ret_code, RetCode::STATE_INVALID);
    assert_eq!(session.state(), InstanceState::Created);

    decode_init(&mut session)?;
    assert_eq!(alloc(&mut session, BufferKind::Decoder, 4096)?.ret_code, RetCode::OK);

    let mut env = CommandEnvelope::new(CommandArgs::MmapSize(MmapSizeArgs::default()));
    assert_eq!(session.dispatch(Command::MmapSize.code(), &mut env)?, RetCode::OK);
    assert_eq!(env.args, CommandArgs::MmapSize(MmapSizeArgs { out_size: 2 * PORT_SIZE }));
    Ok(())
}

#[test]
fn test_compatible_gate() -> Result<(), Box<dyn Error>> {
    let config = DeviceConfig {
        state_gate: StateGate::Compatible,
        ..DeviceConfig::default()
    };
    let (device, _handles) = ready_device(config, false);
    let mut session = device.open_session()?;

    let env = alloc(&mut session, BufferKind::Decoder, 4096)?;
    assert_eq!(env.ret_code, RetCode::OK);
    assert_eq!(session.state(), InstanceState::Created);

    // decode-exec still needs a successful decode-init
    assert!(matches!(decode_exec(&mut session), Err(CodecError::InvalidState { .. })));
    Ok(())
}

#[test]
fn test_decode_state_machine() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    let err = decode_exec(&mut session).unwrap_err();
    assert!(matches!(
        err,
        CodecError::InvalidState {
            command: Command::DecodeExec,
            state: InstanceState::Created
        }
    ));
    assert_eq!(handles.hardware.decodes(), 0);

    let env = decode_init(&mut session)?;
    match env.args {
        CommandArgs::DecodeInit(args) => assert_eq!((args.out_width, args.out_height), (1920, 1080)),
        other => panic!("unexpected reply {other:?}"),
    }

    // decode-init is only legal once
    assert!(matches!(decode_init(&mut session), Err(CodecError::InvalidState { .. })));
    assert_eq!(session.state(), InstanceState::DecodeInitialized);

    for _ in 0..3 {
        assert_eq!(decode_exec(&mut session)?.ret_code, RetCode::OK);
        assert_eq!(session.state(), InstanceState::DecodeExecuting);
    }
    assert_eq!(handles.hardware.decodes(), 3);
    Ok(())
}

#[test]
fn test_decode_failures_keep_state() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    handles.hardware.fail_init.store(true, Ordering::SeqCst);
    let env = decode_init(&mut session)?;
    assert_eq!(env.ret_code, RetCode::DEC_INIT_FAIL);
    assert_eq!(session.state(), InstanceState::Created);

    handles.hardware.fail_init.store(false, Ordering::SeqCst);
    decode_init(&mut session)?;
    assert_eq!(session.state(), InstanceState::DecodeInitialized);

    handles.hardware.fail_exec.store(true, Ordering::SeqCst);
    assert_eq!(decode_exec(&mut session)?.ret_code, RetCode::DEC_EXE_ERR);
    assert_eq!(session.state(), InstanceState::DecodeInitialized);
    Ok(())
}

#[test]
fn test_set_config_round_trip() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    // legal from any state
    let env = session.dispatch_envelope(
        Command::SetConfig,
        CommandArgs::SetConfig(SetConfigArgs {
            key: 0x0c,
            value: 9999,
        }),
    )?;
    assert_eq!(env.ret_code, RetCode::OK);
    assert_eq!(handles.hardware.get_config(session.id(), 0x0c), Some(9999));
    assert_eq!(handles.hardware.get_config(session.id(), 0x0d), None);
    Ok(())
}

#[test]
fn test_unknown_command_rejected() -> Result<(), Box<dyn Error>> {
    let (device, _handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    let mut env = CommandEnvelope::default();
    let err = session.dispatch(0xdead_beef, &mut env).unwrap_err();
    assert!(matches!(err, CodecError::UnknownCommand(0xdead_beef)));
    assert_eq!(env.ret_code, RetCode::INVALID_PARAM_FAIL);
    Ok(())
}

#[test]
fn test_unknown_command_accepted() -> Result<(), Box<dyn Error>> {
    let config = DeviceConfig {
        unknown_command: UnknownCommandPolicy::Accept,
        ..DeviceConfig::default()
    };
    let (device, _handles) = ready_device(config, false);
    let mut session = device.open_session()?;

    let mut wire = [0u8; ENVELOPE_SIZE];
    wire[4..].copy_from_slice(&[0x5a; ARGS_SIZE]);
    wire[..4].copy_from_slice(&(-1i32).to_le_bytes());
    let ret = session.dispatch(0xdead_beef, &mut SliceArgs::new(&mut wire))?;
    assert_eq!(ret, RetCode::OK);
    assert_eq!(&wire[..4], &0i32.to_le_bytes());
    assert!(wire[4..].iter().all(|&b| b == 0x5a));
    assert_eq!(session.state(), InstanceState::Created);
    Ok(())
}

#[test]
fn test_mismatched_arguments() -> Result<(), Box<dyn Error>> {
    let (device, _handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    let mut env = CommandEnvelope::new(CommandArgs::Free(FreeArgs { user_addr: 0 }));
    let err = session.dispatch(Command::DecodeInit.code(), &mut env).unwrap_err();
    assert!(matches!(err, CodecError::InvalidArgument(_)));
    assert_eq!(env.ret_code, RetCode::INVALID_PARAM_FAIL);
    assert_eq!(session.state(), InstanceState::Created);
    Ok(())
}

#[test]
fn test_wire_dispatch() -> Result<(), Box<dyn Error>> {
    let (device, _handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;
    decode_init(&mut session)?;

    let request = CommandEnvelope::new(CommandArgs::Alloc(AllocArgs {
        kind: BufferKind::Encoder,
        size: 100,
        out_addr: 0,
    }));
    let mut wire = request.encode();
    let ret = session.dispatch(Command::AllocBuffer.code(), &mut SliceArgs::new(&mut wire))?;
    assert_eq!(ret, RetCode::OK);

    let reply = CommandEnvelope::decode(Command::AllocBuffer.code(), &wire);
    assert_eq!(reply.ret_code, RetCode::OK);
    let handle = session.buffers()[0];
    assert_eq!(alloc_addr(&reply), handle.user_addr);
    // encoder buffers come from port 1, rounded up to 2 KiB
    assert_eq!(handle.port, 1);
    assert_eq!(handle.len, 2048);
    assert_eq!(handle.user_addr, PORT_SIZE);
    Ok(())
}

#[test]
fn test_short_argument_buffer() -> Result<(), Box<dyn Error>> {
    let (device, _handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    let mut short = [0u8; ENVELOPE_SIZE - 1];
    let err = session
        .dispatch(Command::DecodeInit.code(), &mut SliceArgs::new(&mut short))
        .unwrap_err();
    assert!(matches!(err, CodecError::Io(_)));
    assert_eq!(err.errno(), -libc::EIO);
    assert_eq!(session.state(), InstanceState::Created);
    Ok(())
}

#[test]
fn test_copy_out_failure_overrides_result() -> Result<(), Box<dyn Error>> {
    let (device, _handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    let mut io = BrokenCopyOut(CommandEnvelope::new(CommandArgs::DecodeInit(
        DecodeInitArgs::default(),
    )));
    let err = session.dispatch(Command::DecodeInit.code(), &mut io).unwrap_err();
    assert!(matches!(err, CodecError::Io(_)));
    // the command itself ran
    assert_eq!(session.state(), InstanceState::DecodeInitialized);
    Ok(())
}

#[test]
fn test_close_frees_buffers() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;
    let mut other = device.open_session()?;
    decode_init(&mut session)?;
    decode_init(&mut other)?;

    for kind in [BufferKind::Decoder, BufferKind::Encoder, BufferKind::Decoder] {
        assert_eq!(alloc(&mut session, kind, 8192)?.ret_code, RetCode::OK);
    }
    alloc(&mut other, BufferKind::Decoder, 4096)?;
    assert_eq!(session.buffers().len(), 3);
    assert_eq!(handles.allocator.outstanding(session.id()), 3);

    let id = session.id();
    session.close()?;
    assert_eq!(handles.allocator.outstanding(id), 0);
    assert_eq!(handles.allocator.outstanding(other.id()), 1);
    drop(other);
    assert_eq!(handles.allocator.total_outstanding(), 0);
    Ok(())
}

#[test]
fn test_close_frees_buffers_allocated_before_mapping() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;
    let id = session.id();
    decode_init(&mut session)?;

    // allocated while the session has no mapping base yet
    let early = alloc_addr(&alloc(&mut session, BufferKind::Decoder, 4096)?);
    assert_eq!(early, 0);

    let mut region = SimRegion::new(USER_BASE, device.data_memory_size());
    session.establish_mapping(&mut region)?;

    let env = phys_addr(&mut session, early)?;
    assert_eq!(env.ret_code, RetCode::OK);
    assert_eq!(env.args, CommandArgs::PhysAddr(PhysAddrArgs {
        user_addr: early,
        out_phys_addr: PORT0_BASE,
    }));

    let late = alloc_addr(&alloc(&mut session, BufferKind::Decoder, 4096)?);
    assert_eq!(late, USER_BASE + 4096);
    assert_eq!(handles.allocator.outstanding(id), 2);

    session.close()?;
    assert_eq!(handles.allocator.outstanding(id), 0);
    assert_eq!(handles.allocator.total_outstanding(), 0);
    Ok(())
}

#[test]
fn test_free_after_mapping() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;
    decode_init(&mut session)?;

    let early = alloc_addr(&alloc(&mut session, BufferKind::Encoder, 2048)?);
    let mut region = SimRegion::new(USER_BASE, device.data_memory_size());
    session.establish_mapping(&mut region)?;

    let env = session.dispatch_envelope(
        Command::FreeBuffer,
        CommandArgs::Free(FreeArgs { user_addr: early }),
    )?;
    assert_eq!(env.ret_code, RetCode::OK);
    assert!(session.buffers().is_empty());
    assert_eq!(handles.allocator.outstanding(session.id()), 0);
    Ok(())
}

#[test]
fn test_close_frees_buffers_allocated_after_mapping() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;
    let id = session.id();

    let mut region = SimRegion::new(USER_BASE, device.data_memory_size());
    session.establish_mapping(&mut region)?;
    decode_init(&mut session)?;

    let decoder = alloc_addr(&alloc(&mut session, BufferKind::Decoder, 4096)?);
    let encoder = alloc_addr(&alloc(&mut session, BufferKind::Encoder, 4096)?);
    assert_eq!(decoder, USER_BASE);
    assert_eq!(encoder, USER_BASE + PORT_SIZE);

    session.close()?;
    assert_eq!(handles.allocator.outstanding(id), 0);
    Ok(())
}

#[test]
fn test_hardware_commands() {
    assert!(Command::DecodeInit.touches_hardware());
    assert!(Command::DecodeExec.touches_hardware());
    for command in [
        Command::AllocBuffer,
        Command::FreeBuffer,
        Command::PhysAddr,
        Command::MmapSize,
        Command::SetConfig,
    ] {
        assert!(!command.touches_hardware(), "{command:?}");
    }
}

#[test]
fn test_single_port_buffers() -> Result<(), Box<dyn Error>> {
    let config = DeviceConfig {
        mem_ports: 1,
        ..DeviceConfig::default()
    };
    let (device, _handles) = ready_device(config, false);
    let mut session = device.open_session()?;
    decode_init(&mut session)?;

    alloc(&mut session, BufferKind::Encoder, 4096)?;
    assert_eq!(session.buffers()[0].port, 0);

    let mut env = CommandEnvelope::new(CommandArgs::MmapSize(MmapSizeArgs::default()));
    session.dispatch(Command::MmapSize.code(), &mut env)?;
    assert_eq!(env.args, CommandArgs::MmapSize(MmapSizeArgs { out_size: PORT_SIZE }));
    Ok(())
}

#[test]
fn test_invalid_addresses() -> Result<(), Box<dyn Error>> {
    let (device, _handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;
    decode_init(&mut session)?;

    let env = phys_addr(&mut session, 0x1234)?;
    assert_eq!(env.ret_code, RetCode::MEM_INVALID_ADDR_FAIL);

    let env = session.dispatch_envelope(
        Command::FreeBuffer,
        CommandArgs::Free(FreeArgs { user_addr: 0x1234 }),
    )?;
    assert_eq!(env.ret_code, RetCode::MEM_INVALID_ADDR_FAIL);

    let env = alloc(&mut session, BufferKind::Decoder, 2 * PORT_SIZE as u32)?;
    assert_eq!(env.ret_code, RetCode::MEM_ALLOC_FAIL);
    assert_eq!(alloc_addr(&env), 0);
    assert!(session.buffers().is_empty());
    Ok(())
}

#[test]
fn test_consistent_clock() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;

    decode_init(&mut session)?;
    assert_eq!(handles.power.clock_on_calls(), 1);
    alloc(&mut session, BufferKind::Decoder, 4096)?;
    assert_eq!(handles.power.clock_on_calls(), 2);
    let addr = session.buffers()[0].user_addr;
    phys_addr(&mut session, addr)?;
    assert_eq!(handles.power.clock_on_calls(), 3);
    assert!(!handles.power.is_clocked());
    Ok(())
}

#[test]
fn test_compatible_clock() -> Result<(), Box<dyn Error>> {
    let config = DeviceConfig {
        clock: ClockPolicy::Compatible,
        ..DeviceConfig::default()
    };
    let (device, handles) = ready_device(config, false);
    let mut session = device.open_session()?;

    decode_init(&mut session)?;
    alloc(&mut session, BufferKind::Decoder, 4096)?;
    let addr = session.buffers()[0].user_addr;
    phys_addr(&mut session, addr)?;
    decode_exec(&mut session)?;
    assert_eq!(handles.power.clock_on_calls(), 2);
    assert!(!handles.power.is_clocked());
    Ok(())
}

#[test]
fn test_clock_failure() -> Result<(), Box<dyn Error>> {
    let (device, handles) = ready_device(DeviceConfig::default(), false);
    let mut session = device.open_session()?;
    handles.power.fail_clock_on.store(true, Ordering::SeqCst);

    let err = decode_init(&mut session).unwrap_err();
    assert!(matches!(err, CodecError::Power { stage: "clock on", .. }));
    assert_eq!(session.state(), InstanceState::Created);
    Ok(())
}
