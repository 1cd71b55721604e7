//! Command handlers and per-mode command tables.
//!
//! Every DUCI slave table starts with the base set (`KM RE RI SN PP`), then
//! adds the commands of its mode:
//!
//! | Mode     | Extra commands                         |
//! |----------|----------------------------------------|
//! | Local    | `IV`                                   |
//! | Remote   | `IV SD RD ST RT SP FN UF`              |
//! | ProdTest | `TR TS`                                |
//! | EngTest  | `EA EM`                                |
//! | Dump     | `DL`                                   |
//!
//! Device discovery runs a master table (`RI SN` replies) and the OWI link a
//! binary opcode table.

use crate::protocol::args::Param;
use crate::protocol::duci::{DuciParser, HandlerResult, Message, Role, TableError, reply};
use crate::protocol::errors::ErrorFlags;
use crate::protocol::owi::{OwiFrame, OwiHandler, OwiParser, OwiTableError};
use crate::protocol::pin::PinMode;

use super::Mode;
use super::context::{OwiSession, Session};

pub const BASE_COMMANDS: usize = 5;
pub const LOCAL_CAPACITY: usize = BASE_COMMANDS + 1;
pub const REMOTE_CAPACITY: usize = BASE_COMMANDS + 8;
pub const PROD_TEST_CAPACITY: usize = BASE_COMMANDS + 2;
pub const ENG_TEST_CAPACITY: usize = BASE_COMMANDS + 2;
pub const DUMP_CAPACITY: usize = BASE_COMMANDS + 1;
pub const DISCOVERY_CAPACITY: usize = 2;
pub const OWI_CAPACITY: usize = 5;

/// Largest `UF` payload chunk.
pub const MAX_CHUNK_LEN: usize = 96;

pub const OWI_GET_VERSION: u8 = 0x18;
pub const OWI_GET_SERIAL: u8 = 0x19;
pub const OWI_GET_STATUS: u8 = 0x1A;
pub const OWI_SET_ZERO: u8 = 0x5B;
pub const OWI_ENTER_MODE: u8 = 0x5C;

type Parser = DuciParser<Session>;

fn first<'m>(msg: &'m Message<'_>) -> Result<&'m Param, ErrorFlags> {
    msg.params.first().ok_or(ErrorFlags::MISSING_ARGS)
}

// ───────────────────────────────────────────────────────────────
// Base commands (every slave mode)
// ───────────────────────────────────────────────────────────────

fn set_km(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let code = first(msg)?.as_char().ok_or(ErrorFlags::INVALID_ARGS)?;
    let mode = Mode::from_code(code).ok_or(ErrorFlags::INVALID_ARGS)?;
    if !s.link.transport.supports(mode) {
        return Err(ErrorFlags::INVALID_ARGS);
    }
    if mode == Mode::EngTest && s.instrument().pin_mode() != PinMode::Engineering {
        return Err(ErrorFlags::INVALID_MODE);
    }
    s.next_mode = mode;
    Ok(None)
}

fn get_km(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    // The production-test surface stays hidden until self-test is up.
    let shown = match s.mode {
        Mode::ProdTest if !s.link.test_mode() => Mode::Local,
        mode => mode,
    };
    reply(format_args!("KM={}", shown.code().unwrap_or('L')))
}

fn get_re(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    let errors = s.errors.take();
    reply(format_args!("RE={:08X}", errors.bits()))
}

fn get_ri(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    let inst = s.instrument();
    reply(format_args!("RI=DK{:04},{}", inst.device_kind(), inst.app_version()))
}

fn set_sn(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let serial = first(msg)?.as_u32().ok_or(ErrorFlags::INVALID_ARGS)?;
    s.instrument().set_serial_number(serial)?;
    Ok(None)
}

fn get_sn(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("SN={}", s.instrument().serial_number()))
}

fn set_pp(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let code = first(msg)?.as_u32().ok_or(ErrorFlags::INVALID_ARGS)?;
    let pin = u16::try_from(code)
        .ok()
        .and_then(PinMode::from_code)
        .ok_or(ErrorFlags::INVALID_ARGS)?;
    s.instrument().set_pin_mode(pin);
    Ok(None)
}

fn get_pp(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("PP={}", s.instrument().pin_mode().level()))
}

fn add_base_commands(p: &mut Parser) -> Result<(), TableError> {
    use PinMode::None as Open;
    p.add_command("KM", "=c", "?", Some(set_km), Some(get_km), Open, Open)?;
    p.add_command("RE", "", "?", None, Some(get_re), Open, Open)?;
    p.add_command("RI", "", "?", None, Some(get_ri), Open, Open)?;
    p.add_command("SN", "=u", "?", Some(set_sn), Some(get_sn), PinMode::Factory, Open)?;
    p.add_command("PP", "=3u", "?", Some(set_pp), Some(get_pp), Open, Open)?;
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Local / Remote
// ───────────────────────────────────────────────────────────────

fn get_iv(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("IV={}", s.instrument().reading()))
}

fn set_sd(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let date = first(msg)?.as_date().ok_or(ErrorFlags::INVALID_ARGS)?;
    s.instrument().set_date(date)?;
    Ok(None)
}

fn get_rd(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("RD={}", s.instrument().date()))
}

fn set_st(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let time = first(msg)?.as_time().ok_or(ErrorFlags::INVALID_ARGS)?;
    s.instrument().set_time(time)?;
    Ok(None)
}

fn get_rt(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("RT={}", s.instrument().time()))
}

fn set_sp(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let value = first(msg)?.as_f32().ok_or(ErrorFlags::INVALID_ARGS)?;
    s.instrument().set_setpoint(value)?;
    Ok(None)
}

fn get_sp(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("SP={}", s.instrument().setpoint()))
}

fn set_fn(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let name = first(msg)?.as_str().ok_or(ErrorFlags::INVALID_ARGS)?;
    let name = heapless::String::try_from(name).map_err(|()| ErrorFlags::INVALID_ARGS)?;
    s.upload.filename = Some(name);
    s.upload.next_sequence = 1;
    Ok(None)
}

fn get_fn(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!(
        "FN={}",
        s.upload.filename.as_deref().unwrap_or("")
    ))
}

/// One `UF` chunk: `SSSS,LLL,<data>,CCCCCCCC`.
struct Chunk<'a> {
    sequence: u16,
    declared_len: usize,
    data: &'a str,
    crc: u32,
}

fn parse_chunk(blob: &str) -> Result<Chunk<'_>, ErrorFlags> {
    let invalid = ErrorFlags::INVALID_ARGS;
    let (seq, rest) = blob.split_once(',').ok_or(ErrorFlags::MISSING_ARGS)?;
    let (len, rest) = rest.split_once(',').ok_or(ErrorFlags::MISSING_ARGS)?;
    let (data, crc) = rest.rsplit_once(',').ok_or(ErrorFlags::MISSING_ARGS)?;

    let digits = |s: &str, n: usize| s.len() == n && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(seq, 4) || !digits(len, 3) {
        return Err(invalid);
    }
    if crc.len() != 8 || !crc.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid);
    }
    Ok(Chunk {
        sequence: seq.parse().map_err(|_| invalid)?,
        declared_len: len.parse().map_err(|_| invalid)?,
        data,
        crc: u32::from_str_radix(crc, 16).map_err(|_| invalid)?,
    })
}

fn set_uf(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let blob = msg.blob(0).ok_or(ErrorFlags::MISSING_ARGS)?;
    let chunk = parse_chunk(blob)?;
    if chunk.declared_len > MAX_CHUNK_LEN {
        return Err(ErrorFlags::BUFFER_SIZE);
    }
    let data = chunk.data.as_bytes();
    if data.len() != chunk.declared_len || crc32fast::hash(data) != chunk.crc {
        return Err(ErrorFlags::BAD_DATA);
    }
    let Some(filename) = s.upload.filename.as_deref() else {
        return Err(ErrorFlags::COMMAND_FAILED);
    };
    if chunk.sequence != s.upload.next_sequence {
        return Err(ErrorFlags::NUMBER_NOT_IN_SEQUENCE);
    }
    s.link
        .store()
        .write_chunk(filename, chunk.sequence, data)
        .map_err(|_| ErrorFlags::WRITE_TO_FLASH)?;
    s.upload.next_sequence = s.upload.next_sequence.wrapping_add(1);
    Ok(None)
}

pub fn local_table() -> Result<Parser, TableError> {
    let mut p = Parser::new(Role::Slave, LOCAL_CAPACITY);
    add_base_commands(&mut p)?;
    p.add_command("IV", "", "?", None, Some(get_iv), PinMode::None, PinMode::None)?;
    Ok(p)
}

pub fn remote_table() -> Result<Parser, TableError> {
    use PinMode::None as Open;
    let mut p = Parser::new(Role::Slave, REMOTE_CAPACITY);
    add_base_commands(&mut p)?;
    p.add_command("IV", "", "?", None, Some(get_iv), Open, Open)?;
    p.add_command("SD", "=d", "", Some(set_sd), None, Open, Open)?;
    p.add_command("RD", "", "?", None, Some(get_rd), Open, Open)?;
    p.add_command("ST", "=t", "", Some(set_st), None, Open, Open)?;
    p.add_command("RT", "", "?", None, Some(get_rt), Open, Open)?;
    p.add_command("SP", "=v", "?", Some(set_sp), Some(get_sp), Open, Open)?;
    p.add_command("FN", "=s", "?", Some(set_fn), Some(get_fn), PinMode::Upgrade, Open)?;
    p.add_command("UF", "=C", "", Some(set_uf), None, PinMode::Upgrade, Open)?;
    Ok(p)
}

// ───────────────────────────────────────────────────────────────
// Production / engineering test
// ───────────────────────────────────────────────────────────────

fn set_tr(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let test = first(msg)?.as_u32().ok_or(ErrorFlags::INVALID_ARGS)?;
    s.instrument().run_self_test(test)?;
    Ok(None)
}

fn get_ts(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("TS={:08X}", s.instrument().self_test_status()))
}

fn get_ea(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("EA={}", s.instrument().engineering_adc()))
}

fn set_em(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let percent = first(msg)?.as_i32().ok_or(ErrorFlags::INVALID_ARGS)?;
    if !(-100..=100).contains(&percent) {
        return Err(ErrorFlags::INVALID_ARGS);
    }
    s.instrument().set_motor_percent(percent)?;
    Ok(None)
}

fn get_em(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    reply(format_args!("EM={}", s.instrument().motor_percent()))
}

pub fn prod_test_table() -> Result<Parser, TableError> {
    let mut p = Parser::new(Role::Slave, PROD_TEST_CAPACITY);
    add_base_commands(&mut p)?;
    p.add_command("TR", "=2u", "", Some(set_tr), None, PinMode::None, PinMode::None)?;
    p.add_command("TS", "", "?", None, Some(get_ts), PinMode::None, PinMode::None)?;
    Ok(p)
}

pub fn eng_test_table() -> Result<Parser, TableError> {
    use PinMode::Engineering as Eng;
    let mut p = Parser::new(Role::Slave, ENG_TEST_CAPACITY);
    add_base_commands(&mut p)?;
    p.add_command("EA", "", "?", None, Some(get_ea), PinMode::None, Eng)?;
    p.add_command("EM", "=i", "?", Some(set_em), Some(get_em), Eng, PinMode::None)?;
    Ok(p)
}

// ───────────────────────────────────────────────────────────────
// Dump
// ───────────────────────────────────────────────────────────────

fn get_dl(s: &mut Session, _msg: &Message<'_>) -> HandlerResult {
    match s.instrument().next_dump_line() {
        Some(line) => reply(format_args!("DL={line}")),
        None => {
            s.next_mode = Mode::Local;
            reply(format_args!("DL=END"))
        }
    }
}

pub fn dump_table() -> Result<Parser, TableError> {
    let mut p = Parser::new(Role::Slave, DUMP_CAPACITY);
    add_base_commands(&mut p)?;
    p.add_command("DL", "", "?", None, Some(get_dl), PinMode::None, PinMode::None)?;
    Ok(p)
}

/// Slave table for a DUCI mode.
pub fn table_for(mode: Mode) -> Result<Parser, TableError> {
    match mode {
        Mode::Remote => remote_table(),
        Mode::ProdTest => prod_test_table(),
        Mode::EngTest => eng_test_table(),
        Mode::Dump => dump_table(),
        Mode::Local | Mode::DeviceDiscovery | Mode::External => local_table(),
    }
}

// ───────────────────────────────────────────────────────────────
// Device discovery (master side)
// ───────────────────────────────────────────────────────────────

fn reply_ri(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    let kind = msg.params.first().and_then(Param::as_str);
    let version = msg.params.get(1).and_then(Param::as_str);
    let identity = kind
        .zip(version)
        .and_then(|(k, v)| crate::comms::device_info::DeviceIdentity::parse(k, v))
        .ok_or(ErrorFlags::BAD_REPLY)?;
    s.probe.identity = Some(identity);
    Ok(None)
}

fn reply_sn(s: &mut Session, msg: &Message<'_>) -> HandlerResult {
    s.probe.serial = Some(first(msg)?.as_u32().ok_or(ErrorFlags::BAD_REPLY)?);
    Ok(None)
}

pub fn discovery_table() -> Result<Parser, TableError> {
    let mut p = Parser::new(Role::Master, DISCOVERY_CAPACITY);
    p.add_command("RI", "=s,s", "", Some(reply_ri), None, PinMode::None, PinMode::None)?;
    p.add_command("SN", "=u", "", Some(reply_sn), None, PinMode::None, PinMode::None)?;
    Ok(p)
}

// ───────────────────────────────────────────────────────────────
// OWI slave
// ───────────────────────────────────────────────────────────────

fn owi_version(s: &mut OwiSession, out: &mut OwiFrame) -> Result<(), ErrorFlags> {
    let inst = s.instrument();
    out.extend_from_slice(&inst.app_version().to_be_bytes())
        .and_then(|()| out.extend_from_slice(&inst.boot_version().to_be_bytes()))
        .map_err(|_| ErrorFlags::BUFFER_SIZE)
}

fn owi_serial(s: &mut OwiSession, out: &mut OwiFrame) -> Result<(), ErrorFlags> {
    out.extend_from_slice(&s.instrument().serial_number().to_be_bytes())
        .map_err(|_| ErrorFlags::BUFFER_SIZE)
}

fn owi_status(s: &mut OwiSession, out: &mut OwiFrame) -> Result<(), ErrorFlags> {
    out.extend_from_slice(&s.instrument().status().to_be_bytes())
        .map_err(|_| ErrorFlags::BUFFER_SIZE)
}

fn owi_set_zero(s: &mut OwiSession, payload: &[u8]) -> Result<(), ErrorFlags> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| ErrorFlags::INVALID_ARGS)?;
    let value = f32::from_be_bytes(bytes);
    if !value.is_finite() {
        return Err(ErrorFlags::BAD_DATA);
    }
    s.instrument().set_zero_offset(value)
}

fn owi_enter_mode(s: &mut OwiSession, payload: &[u8]) -> Result<(), ErrorFlags> {
    s.next_mode = match payload {
        [0] => Mode::Local,
        [1] => Mode::External,
        _ => return Err(ErrorFlags::INVALID_ARGS),
    };
    Ok(())
}

pub fn owi_table() -> Result<OwiParser<OwiSession>, OwiTableError> {
    let mut p = OwiParser::new(OWI_CAPACITY);
    p.add_command(OWI_GET_VERSION, 2, 10, OwiHandler::Read(owi_version))?;
    p.add_command(OWI_GET_SERIAL, 2, 6, OwiHandler::Read(owi_serial))?;
    p.add_command(OWI_GET_STATUS, 2, 6, OwiHandler::Read(owi_status))?;
    p.add_command(OWI_SET_ZERO, 6, 1, OwiHandler::Write(owi_set_zero))?;
    p.add_command(OWI_ENTER_MODE, 3, 1, OwiHandler::Write(owi_enter_mode))?;
    Ok(p)
}
