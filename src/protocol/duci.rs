//! DUCI text-protocol parser and command table.
//!
//! ```text
//!   #KM=R:4A\n
//!   │└┤│└┤└┬┘└─ terminator (LF or CRLF, ignored on input)
//!   │ ││ │ └─── optional checksum ':' + 2 hex digits
//!   │ ││ └───── arguments, comma separated
//!   │ │└─────── '=' assignment / '?' query
//!   │ └──────── 2-char mnemonic (case-sensitive)
//!   └────────── '#' / '*' command, '!' reply
//! ```
//!
//! A parser owns one command table.  Tables are built once when the owning
//! comms state is constructed; each row carries a format string per
//! direction, a handler per direction and the PIN level each direction needs.
//!
//! Handlers are plain `fn` pointers over a caller-supplied context type `C`,
//! so the table is `Copy`-cheap and the whole dispatch path is allocation-free
//! after construction.

use core::fmt::Write;

use heapless::String;
use log::{debug, warn};

use super::args::{Form, FormatError, FormatSpec, Params};
use super::errors::ErrorFlags;
use super::pin::PinMode;
use crate::config::LineTerminator;

/// Longest line accepted or produced, excluding checksum and terminator.
pub const MAX_LINE_LEN: usize = 128;

/// Shortest meaningful line: start char + 2-char mnemonic.
pub const MIN_LINE_LEN: usize = 3;

/// Capacity of a framed outgoing line (`:nn` + CRLF on top of the body).
pub const TX_LINE_CAP: usize = MAX_LINE_LEN + 8;

/// Reply body returned by a handler (no start char, no checksum).
pub type Reply = String<MAX_LINE_LEN>;

/// Framed outgoing line ready for `Medium::send_string`.
pub type TxLine = String<TX_LINE_CAP>;

/// Outcome of a handler: an optional reply body, or error bits.
pub type HandlerResult = Result<Option<Reply>, ErrorFlags>;

/// Command handler over context `C`.
pub type Handler<C> = fn(&mut C, &Message<'_>) -> HandlerResult;

/// Build a reply body from format arguments.
///
/// ```ignore
/// return reply(format_args!("KM={}", mode.code()));
/// ```
pub fn reply(args: core::fmt::Arguments<'_>) -> HandlerResult {
    let mut out = Reply::new();
    out.write_fmt(args).map_err(|_| ErrorFlags::BUFFER_SIZE)?;
    Ok(Some(out))
}

// ---------------------------------------------------------------------------
// Roles and messages
// ---------------------------------------------------------------------------

/// Which start characters a parser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Expects commands (`#` / `*`), as the instrument answering a host.
    Slave,
    /// Expects replies (`!`), as the instrument querying a device.
    Master,
    /// Accepts both.
    MasterSlave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Command,
    Reply,
    Unexpected,
}

impl MessageType {
    fn classify(start: u8, role: Role) -> Self {
        match (start, role) {
            (b'#' | b'*', Role::Slave | Role::MasterSlave) => Self::Command,
            (b'!', Role::Master | Role::MasterSlave) => Self::Reply,
            _ => Self::Unexpected,
        }
    }

    /// Start character used when transmitting a message of this type.
    pub const fn start_char(self) -> Option<char> {
        match self {
            Self::Command => Some('#'),
            Self::Reply => Some('!'),
            Self::Unexpected => None,
        }
    }
}

/// One received line after tokenising, handed to a handler.
#[derive(Debug)]
pub struct Message<'a> {
    raw: &'a str,
    pub kind: MessageType,
    pub form: Form,
    pub params: Params,
}

impl<'a> Message<'a> {
    /// The received line with checksum and terminator removed.
    pub fn raw(&self) -> &'a str {
        self.raw
    }

    pub fn mnemonic(&self) -> &'a str {
        &self.raw[1..3]
    }

    /// Opaque blob parameter at `idx`, as a slice of the raw line.
    pub fn blob(&self, idx: usize) -> Option<&'a str> {
        match self.params.get(idx)? {
            super::args::Param::Blob { start, len } => self.raw.get(*start..*start + *len),
            _ => None,
        }
    }
}

/// What one call to [`DuciParser::parse`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub kind: MessageType,
    pub mnemonic: Option<[u8; 2]>,
    pub errors: ErrorFlags,
    pub reply: Option<Reply>,
    pub dispatched: bool,
}

impl ParseOutcome {
    fn rejected(kind: MessageType, errors: ErrorFlags) -> Self {
        Self {
            kind,
            mnemonic: None,
            errors,
            reply: None,
            dispatched: false,
        }
    }
}

/// Context a parser needs from its owner.
pub trait ParserContext {
    /// Current session PIN level.
    fn pin_mode(&self) -> PinMode;
}

// ---------------------------------------------------------------------------
// Command table
// ---------------------------------------------------------------------------

/// One direction (set or get) of a command.
pub struct Direction<C> {
    pub spec: FormatSpec,
    pub handler: Handler<C>,
    pub pin: PinMode,
}

/// One row of a command table.
pub struct CommandDescriptor<C> {
    pub mnemonic: [u8; 2],
    pub set: Option<Direction<C>>,
    pub get: Option<Direction<C>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    Full { capacity: usize },
    BadMnemonic,
    Format(FormatError),
    /// Format string and handler disagree on whether a direction exists, or
    /// the format uses the wrong marker for its direction.
    Mismatch,
}

impl core::fmt::Display for TableError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full { capacity } => write!(f, "command table full ({capacity} entries)"),
            Self::BadMnemonic => write!(f, "mnemonic must be two ASCII characters"),
            Self::Format(e) => write!(f, "bad format string: {e}"),
            Self::Mismatch => write!(f, "format string and handler disagree"),
        }
    }
}

impl core::error::Error for TableError {}

impl From<FormatError> for TableError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

/// Fixed-capacity table, sized when the owning state is built.
pub struct CommandTable<C> {
    entries: Vec<CommandDescriptor<C>>,
    capacity: usize,
}

impl<C> CommandTable<C> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn find(&self, mnemonic: &[u8]) -> Option<&CommandDescriptor<C>> {
        self.entries.iter().find(|e| e.mnemonic == mnemonic)
    }

    fn insert(&mut self, desc: CommandDescriptor<C>) -> Result<(), TableError> {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.mnemonic == desc.mnemonic) {
            warn!(
                "DUCI: command {} registered twice, replacing",
                core::str::from_utf8(&desc.mnemonic).unwrap_or("??")
            );
            *existing = desc;
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(TableError::Full {
                capacity: self.capacity,
            });
        }
        self.entries.push(desc);
        Ok(())
    }
}

fn direction<C>(
    fmt: &str,
    handler: Option<Handler<C>>,
    pin: PinMode,
    expected: Form,
) -> Result<Option<Direction<C>>, TableError> {
    match (FormatSpec::parse(fmt)?, handler) {
        (None, None) => Ok(None),
        (Some(spec), Some(handler)) if spec.form == expected => Ok(Some(Direction {
            spec,
            handler,
            pin,
        })),
        _ => Err(TableError::Mismatch),
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Sum of `bytes` modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

pub struct DuciParser<C> {
    role: Role,
    checksum_enabled: bool,
    terminator: LineTerminator,
    table: CommandTable<C>,
}

impl<C: ParserContext> DuciParser<C> {
    pub fn new(role: Role, capacity: usize) -> Self {
        Self {
            role,
            checksum_enabled: false,
            terminator: LineTerminator::Lf,
            table: CommandTable::with_capacity(capacity),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_checksum_enabled(&mut self, enabled: bool) {
        self.checksum_enabled = enabled;
    }

    pub fn checksum_enabled(&self) -> bool {
        self.checksum_enabled
    }

    pub fn set_terminator(&mut self, terminator: LineTerminator) {
        self.terminator = terminator;
    }

    pub fn table(&self) -> &CommandTable<C> {
        &self.table
    }

    /// Register a command.  Pass `""` and `None` for an unsupported direction.
    #[allow(clippy::too_many_arguments)]
    pub fn add_command(
        &mut self,
        mnemonic: &str,
        set_fmt: &str,
        get_fmt: &str,
        set_fn: Option<Handler<C>>,
        get_fn: Option<Handler<C>>,
        set_pin: PinMode,
        get_pin: PinMode,
    ) -> Result<(), TableError> {
        let mnemonic: [u8; 2] = mnemonic
            .as_bytes()
            .try_into()
            .map_err(|_| TableError::BadMnemonic)?;
        if !mnemonic.iter().all(u8::is_ascii_graphic) {
            return Err(TableError::BadMnemonic);
        }
        let set = direction(set_fmt, set_fn, set_pin, Form::Assignment)?;
        let get = direction(get_fmt, get_fn, get_pin, Form::Query)?;
        self.table.insert(CommandDescriptor { mnemonic, set, get })
    }

    /// Parse one received line and dispatch it to its handler.
    ///
    /// Malformed input never reaches a handler; every failure is reported in
    /// the returned error bits.
    pub fn parse(&self, ctx: &mut C, line: &str) -> ParseOutcome {
        let line = line.trim_end_matches(['\r', '\n']);
        let Some(&start) = line.as_bytes().first() else {
            return ParseOutcome::rejected(MessageType::Unexpected, ErrorFlags::MESSAGE_TOO_SMALL);
        };

        let kind = MessageType::classify(start, self.role);
        if kind == MessageType::Unexpected {
            return ParseOutcome::rejected(kind, ErrorFlags::UNEXPECTED_MESSAGE);
        }

        let body = if self.checksum_enabled {
            match verify_checksum(line) {
                Some(body) => body,
                None => return ParseOutcome::rejected(kind, ErrorFlags::INVALID_CHECKSUM),
            }
        } else {
            line
        };

        if body.len() > MAX_LINE_LEN {
            return ParseOutcome::rejected(kind, ErrorFlags::MESSAGE_TOO_BIG);
        }
        if body.len() < MIN_LINE_LEN || !body.is_char_boundary(MIN_LINE_LEN) {
            return ParseOutcome::rejected(kind, ErrorFlags::MESSAGE_TOO_SMALL);
        }

        let mnemonic = &body.as_bytes()[1..3];
        let Some(desc) = self.table.find(mnemonic) else {
            debug!("DUCI: unknown command {}", &body[1..3]);
            return ParseOutcome::rejected(kind, ErrorFlags::UNKNOWN_COMMAND);
        };
        let mut outcome = ParseOutcome::rejected(kind, ErrorFlags::NONE);
        outcome.mnemonic = Some(desc.mnemonic);

        let suffix = &body[3..];
        let (form, args) = match suffix.as_bytes().first() {
            Some(b'=') => (Form::Assignment, &suffix[1..]),
            Some(b'?') => (Form::Query, &suffix[1..]),
            None => (Form::Query, suffix),
            Some(_) => {
                outcome.errors = ErrorFlags::INVALID_ARGS;
                return outcome;
            }
        };
        let dir = match form {
            Form::Assignment => desc.set.as_ref(),
            Form::Query => desc.get.as_ref(),
        };
        let Some(dir) = dir else {
            outcome.errors = ErrorFlags::INVALID_ARGS;
            return outcome;
        };

        let arg_offset = body.len() - args.len();
        let params = match dir.spec.parse_args(args, arg_offset) {
            Ok(p) => p,
            Err(e) => {
                outcome.errors = e;
                return outcome;
            }
        };

        if !ctx.pin_mode().permits(dir.pin) {
            outcome.errors = ErrorFlags::INVALID_MODE;
            return outcome;
        }

        let message = Message {
            raw: body,
            kind,
            form,
            params,
        };
        outcome.dispatched = true;
        match (dir.handler)(ctx, &message) {
            Ok(reply) => outcome.reply = reply,
            Err(e) => outcome.errors |= e,
        }
        outcome
    }

    /// Frame an outgoing line: start char, body, checksum (if enabled) and
    /// the configured terminator.
    pub fn prepare_tx_message(&self, kind: MessageType, body: &str) -> Result<TxLine, ErrorFlags> {
        let start = kind.start_char().ok_or(ErrorFlags::UNEXPECTED_MESSAGE)?;
        if body.len() + 1 > MAX_LINE_LEN {
            return Err(ErrorFlags::MESSAGE_TOO_BIG);
        }
        let mut out = TxLine::new();
        let overflow = |_| ErrorFlags::BUFFER_SIZE;
        out.push(start).map_err(overflow)?;
        out.push_str(body).map_err(overflow)?;
        if self.checksum_enabled {
            let sum = checksum(out.as_bytes());
            write!(out, ":{sum:02X}").map_err(|_| ErrorFlags::BUFFER_SIZE)?;
        }
        out.push_str(self.terminator.as_str()).map_err(overflow)?;
        Ok(out)
    }
}

/// Split off and verify a trailing `:nn` checksum, returning the covered part.
fn verify_checksum(line: &str) -> Option<&str> {
    let (body, field) = line.rsplit_once(':')?;
    if field.len() != 2 || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let expected = u8::from_str_radix(field, 16).ok()?;
    (checksum(body.as_bytes()) == expected).then_some(body)
}
