//! Static SCPI command table

use vxi_core::status::event_status;
use vxi_core::{InstrumentError, InstrumentResult};

use crate::instrument::SimulatedInstrument;
use crate::measurement;
use crate::registers::ScpiError;
use crate::scpi::{header_matches, parse_command, parse_number, CommandKind};

type Handler = fn(&SimulatedInstrument, &str) -> InstrumentResult<Option<String>>;

struct CommandEntry {
    header: &'static str,
    kind: CommandKind,
    handler: Handler,
}

const fn query(header: &'static str, handler: Handler) -> CommandEntry {
    CommandEntry {
        header,
        kind: CommandKind::Query,
        handler,
    }
}

const fn write(header: &'static str, handler: Handler) -> CommandEntry {
    CommandEntry {
        header,
        kind: CommandKind::Write,
        handler,
    }
}

static COMMANDS: &[CommandEntry] = &[
    // IEEE 488.2 common commands
    query("*IDN", identify),
    write("*RST", reset),
    write("*CLS", clear_status),
    write("*ESE", set_event_enable),
    query("*ESE", event_enable),
    query("*ESR", event_status_register),
    write("*SRE", set_service_request_enable),
    query("*SRE", service_request_enable),
    query("*STB", status_byte),
    write("*OPC", arm_operation_complete),
    query("*OPC", operation_complete),
    write("*TRG", trigger),
    query("*TST", self_test),
    write("*WAI", wait),
    // SCPI subsystems
    query("SYSTem:ERRor[:NEXT]", next_error),
    query("SYSTem:REMote", remote_state),
    write("CONFigure:VOLTage", configure_voltage),
    query("CONFigure:VOLTage", voltage_range),
    query("MEASure:VOLTage", measure_voltage),
    write("INITiate", trigger),
    write("ABORt", abort),
    query("FETCh", fetch),
];

/// SCPI "no data" value
pub(crate) const NOT_A_NUMBER: &str = "9.91E+37";

/// Find and run the handler for `command`
pub(crate) fn dispatch(
    instrument: &SimulatedInstrument,
    command: &str,
) -> InstrumentResult<Option<String>> {
    let parsed = parse_command(command)
        .ok_or_else(|| InstrumentError::UndefinedHeader(command.to_string()))?;

    let mut header_known = false;
    for entry in COMMANDS {
        if !header_matches(entry.header, parsed.header) {
            continue;
        }
        if entry.kind == parsed.kind {
            return (entry.handler)(instrument, parsed.args);
        }
        header_known = true;
    }

    if header_known {
        Err(InstrumentError::KindMismatch(command.trim().to_string()))
    } else {
        Err(InstrumentError::UndefinedHeader(command.trim().to_string()))
    }
}

/// SCPI error queue entry and event register bit for a failed command
pub(crate) fn scpi_error(err: &InstrumentError) -> (ScpiError, u8) {
    match err {
        InstrumentError::UndefinedHeader(_) | InstrumentError::KindMismatch(_) => (
            ScpiError::new(-113, "Undefined header"),
            event_status::COMMAND_ERROR,
        ),
        InstrumentError::InvalidParameter(_) => (
            ScpiError::new(-224, "Illegal parameter value"),
            event_status::EXECUTION_ERROR,
        ),
        InstrumentError::DataOutOfRange(_) => (
            ScpiError::new(-222, "Data out of range"),
            event_status::EXECUTION_ERROR,
        ),
        InstrumentError::Io(_) => (
            ScpiError::new(-240, "Hardware error"),
            event_status::DEVICE_ERROR,
        ),
        InstrumentError::NotSupported(_) => (
            ScpiError::new(-200, "Execution error"),
            event_status::EXECUTION_ERROR,
        ),
    }
}

fn format_reading(value: f64) -> String {
    format!("{:+.6E}", value)
}

fn flag(value: bool) -> Option<String> {
    Some(if value { "1" } else { "0" }.to_string())
}

fn parse_mask(args: &str) -> InstrumentResult<u8> {
    let value = parse_number(args)
        .ok_or_else(|| InstrumentError::InvalidParameter(format!("expected a mask, got '{}'", args)))?;
    if !(0.0..=255.0).contains(&value) {
        return Err(InstrumentError::DataOutOfRange(format!("{} not in 0..=255", value)));
    }
    Ok(value.round() as u8)
}

fn identify(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    Ok(Some(inst.config.identity.clone()))
}

fn reset(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    inst.cancel_measurement();
    let mut state = inst.state.lock();
    state.registers.reset();
    state.voltage_range = inst.config.voltage_range;
    state.last_reading = None;
    Ok(None)
}

fn clear_status(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    inst.update_registers(|regs| ((), regs.clear()));
    Ok(None)
}

fn set_event_enable(inst: &SimulatedInstrument, args: &str) -> InstrumentResult<Option<String>> {
    let mask = parse_mask(args)?;
    inst.update_registers(|regs| ((), regs.set_event_enable(mask)));
    Ok(None)
}

fn event_enable(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    Ok(Some(inst.state.lock().registers.event_enable().to_string()))
}

fn event_status_register(
    inst: &SimulatedInstrument,
    _args: &str,
) -> InstrumentResult<Option<String>> {
    let value = inst.update_registers(|regs| regs.take_event_status());
    Ok(Some(value.to_string()))
}

fn set_service_request_enable(
    inst: &SimulatedInstrument,
    args: &str,
) -> InstrumentResult<Option<String>> {
    let mask = parse_mask(args)?;
    inst.update_registers(|regs| ((), regs.set_service_request_enable(mask)));
    Ok(None)
}

fn service_request_enable(
    inst: &SimulatedInstrument,
    _args: &str,
) -> InstrumentResult<Option<String>> {
    Ok(Some(
        inst.state.lock().registers.service_request_enable().to_string(),
    ))
}

fn status_byte(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    Ok(Some(inst.state.lock().registers.status_byte().to_string()))
}

fn arm_operation_complete(
    inst: &SimulatedInstrument,
    _args: &str,
) -> InstrumentResult<Option<String>> {
    let change = {
        let mut state = inst.state.lock();
        let running = state.measuring;
        state.registers.arm_operation_complete(running)
    };
    inst.publish(change);
    Ok(None)
}

fn operation_complete(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    Ok(flag(!inst.state.lock().measuring))
}

fn trigger(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    inst.start_measurement()?;
    Ok(None)
}

fn self_test(_inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    Ok(Some("0".to_string()))
}

// Commands run sequentially, so there is never a pending command to wait for
fn wait(_inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    Ok(None)
}

fn next_error(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    let error = inst.update_registers(|regs| regs.next_error());
    Ok(Some(error.to_string()))
}

fn remote_state(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    Ok(flag(inst.remote_flag()))
}

fn configure_voltage(inst: &SimulatedInstrument, args: &str) -> InstrumentResult<Option<String>> {
    let range = parse_number(args).ok_or_else(|| {
        InstrumentError::InvalidParameter(format!("expected a voltage range, got '{}'", args))
    })?;
    if range <= 0.0 || range > inst.config.max_voltage_range {
        return Err(InstrumentError::DataOutOfRange(format!(
            "range {} outside 0..={}",
            range, inst.config.max_voltage_range
        )));
    }
    inst.state.lock().voltage_range = range;
    Ok(None)
}

fn voltage_range(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    Ok(Some(format_reading(inst.state.lock().voltage_range)))
}

fn measure_voltage(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    let mut state = inst.state.lock();
    let reading = measurement::sample(state.voltage_range);
    state.last_reading = Some(reading);
    Ok(Some(format_reading(reading)))
}

fn abort(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    inst.cancel_measurement();
    Ok(None)
}

fn fetch(inst: &SimulatedInstrument, _args: &str) -> InstrumentResult<Option<String>> {
    let reading = inst.state.lock().last_reading;
    Ok(Some(
        reading.map_or_else(|| NOT_A_NUMBER.to_string(), format_reading),
    ))
}
