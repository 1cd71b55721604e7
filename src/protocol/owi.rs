//! OWI binary-protocol parser.
//!
//! Frame layout (both directions):
//!
//! ```text
//!   ┌────────┬──────────────────┬──────────┐
//!   │ opcode │ payload (0..N)   │ checksum │
//!   └────────┴──────────────────┴──────────┘
//!   opcode:  bit7 sync (set on responder frames)
//!            bit6 write (clear = read)
//!            bits5-0 command id
//!   checksum: sum of all preceding bytes mod 256
//! ```
//!
//! Lengths are fixed per opcode and come from the command table, so the
//! receiver knows how many bytes to wait for once it has the opcode.  Read
//! commands answer at once with the opcode echoed (sync set), a fixed-length
//! payload and a checksum.  Write commands answer a single ACK / NACK byte
//! after the checksum and the payload have been validated.

use heapless::Vec;
use log::debug;

use super::errors::ErrorFlags;

pub const SYNC_BIT: u8 = 0x80;
pub const WRITE_BIT: u8 = 0x40;
pub const ID_MASK: u8 = 0x3F;

pub const ACK: u8 = 0x06;
pub const NACK: u8 = 0x15;

/// Largest frame in either direction.
pub const MAX_FRAME_LEN: usize = 32;

pub type OwiFrame = Vec<u8, MAX_FRAME_LEN>;

/// Decoded opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode(pub u8);

impl Opcode {
    pub const fn sync(self) -> bool {
        self.0 & SYNC_BIT != 0
    }

    pub const fn is_write(self) -> bool {
        self.0 & WRITE_BIT != 0
    }

    pub const fn id(self) -> u8 {
        self.0 & ID_MASK
    }

    /// The opcode byte with the sync bit cleared, as stored in the table.
    pub const fn command(self) -> u8 {
        self.0 & !SYNC_BIT
    }
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Read handler: append exactly the payload bytes for the reply.
pub type OwiReadFn<C> = fn(&mut C, &mut OwiFrame) -> Result<(), ErrorFlags>;

/// Write handler: validate and apply the payload.
pub type OwiWriteFn<C> = fn(&mut C, &[u8]) -> Result<(), ErrorFlags>;

pub enum OwiHandler<C> {
    Read(OwiReadFn<C>),
    Write(OwiWriteFn<C>),
}

pub struct OwiCommand<C> {
    pub opcode: u8,
    /// Full command frame length including opcode and checksum.
    pub command_len: usize,
    /// Full reply frame length (1 for ACK / NACK).
    pub reply_len: usize,
    pub handler: OwiHandler<C>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwiTableError {
    Full { capacity: usize },
    /// Opcode bits, handler kind and lengths disagree.
    Inconsistent(u8),
}

impl core::fmt::Display for OwiTableError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full { capacity } => write!(f, "OWI table full ({capacity} entries)"),
            Self::Inconsistent(op) => write!(f, "OWI opcode 0x{op:02X} is inconsistent"),
        }
    }
}

impl core::error::Error for OwiTableError {}

/// Result of handling one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwiOutcome {
    pub errors: ErrorFlags,
    /// Frame to send back, if any.
    pub reply: Option<OwiFrame>,
    pub dispatched: bool,
}

impl OwiOutcome {
    fn silent(errors: ErrorFlags) -> Self {
        Self {
            errors,
            reply: None,
            dispatched: false,
        }
    }

    fn nack(errors: ErrorFlags) -> Self {
        let mut reply = OwiFrame::new();
        // Capacity is never zero.
        let _ = reply.push(NACK);
        Self {
            errors,
            reply: Some(reply),
            dispatched: false,
        }
    }
}

pub struct OwiParser<C> {
    table: std::vec::Vec<OwiCommand<C>>,
    capacity: usize,
}

impl<C> OwiParser<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: std::vec::Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn add_command(
        &mut self,
        opcode: u8,
        command_len: usize,
        reply_len: usize,
        handler: OwiHandler<C>,
    ) -> Result<(), OwiTableError> {
        let op = Opcode(opcode);
        let consistent = !op.sync()
            && (2..=MAX_FRAME_LEN).contains(&command_len)
            && match handler {
                OwiHandler::Read(_) => !op.is_write() && (2..=MAX_FRAME_LEN).contains(&reply_len),
                OwiHandler::Write(_) => op.is_write() && reply_len == 1,
            };
        if !consistent {
            return Err(OwiTableError::Inconsistent(opcode));
        }
        if let Some(existing) = self.table.iter_mut().find(|c| c.opcode == opcode) {
            *existing = OwiCommand {
                opcode,
                command_len,
                reply_len,
                handler,
            };
            return Ok(());
        }
        if self.table.len() >= self.capacity {
            return Err(OwiTableError::Full {
                capacity: self.capacity,
            });
        }
        self.table.push(OwiCommand {
            opcode,
            command_len,
            reply_len,
            handler,
        });
        Ok(())
    }

    /// Find the table entry for a received opcode byte.
    pub fn lookup(&self, opcode: u8) -> Option<&OwiCommand<C>> {
        self.table.iter().find(|c| c.opcode == opcode)
    }

    /// Total frame length expected for `opcode`, so the receiver knows how
    /// many more bytes to read after the first.
    pub fn command_len(&self, opcode: u8) -> Option<usize> {
        self.lookup(opcode).map(|c| c.command_len)
    }

    /// Validate a complete command frame and dispatch it.
    pub fn parse(&self, ctx: &mut C, frame: &[u8]) -> OwiOutcome {
        let Some(&first) = frame.first() else {
            return OwiOutcome::silent(ErrorFlags::MESSAGE_TOO_SMALL);
        };
        let op = Opcode(first);
        if op.sync() {
            return OwiOutcome::silent(ErrorFlags::UNEXPECTED_MESSAGE);
        }
        let Some(cmd) = self.lookup(first) else {
            debug!("OWI: unknown opcode 0x{first:02X}");
            return OwiOutcome::silent(ErrorFlags::UNKNOWN_COMMAND);
        };

        let reject = |errors| match cmd.handler {
            OwiHandler::Read(_) => OwiOutcome::silent(errors),
            OwiHandler::Write(_) => OwiOutcome::nack(errors),
        };

        if frame.len() < cmd.command_len {
            return reject(ErrorFlags::MESSAGE_TOO_SMALL);
        }
        if frame.len() > cmd.command_len {
            return reject(ErrorFlags::MESSAGE_TOO_BIG);
        }
        let (covered, sum) = frame.split_at(frame.len() - 1);
        if checksum(covered) != sum[0] {
            return reject(ErrorFlags::INVALID_CHECKSUM);
        }
        let payload = &covered[1..];

        match cmd.handler {
            OwiHandler::Read(read) => {
                let mut reply = OwiFrame::new();
                let _ = reply.push(first | SYNC_BIT);
                if let Err(e) = read(ctx, &mut reply) {
                    return OwiOutcome {
                        errors: e,
                        reply: None,
                        dispatched: true,
                    };
                }
                if reply.len() != cmd.reply_len - 1 {
                    return OwiOutcome {
                        errors: ErrorFlags::COMMAND_FAILED,
                        reply: None,
                        dispatched: true,
                    };
                }
                let sum = checksum(&reply);
                if reply.push(sum).is_err() {
                    return OwiOutcome {
                        errors: ErrorFlags::BUFFER_SIZE,
                        reply: None,
                        dispatched: true,
                    };
                }
                OwiOutcome {
                    errors: ErrorFlags::NONE,
                    reply: Some(reply),
                    dispatched: true,
                }
            }
            OwiHandler::Write(write) => {
                let mut outcome = match write(ctx, payload) {
                    Ok(()) => {
                        let mut ack = OwiFrame::new();
                        let _ = ack.push(ACK);
                        OwiOutcome {
                            errors: ErrorFlags::NONE,
                            reply: Some(ack),
                            dispatched: true,
                        }
                    }
                    Err(e) => OwiOutcome::nack(e),
                };
                outcome.dispatched = true;
                outcome
            }
        }
    }
}

/// Build a command frame (master side): opcode, payload, checksum.
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Result<OwiFrame, ErrorFlags> {
    let mut frame = OwiFrame::new();
    frame.push(opcode).map_err(|_| ErrorFlags::BUFFER_SIZE)?;
    frame
        .extend_from_slice(payload)
        .map_err(|_| ErrorFlags::MESSAGE_TOO_BIG)?;
    let sum = checksum(&frame);
    frame.push(sum).map_err(|_| ErrorFlags::MESSAGE_TOO_BIG)?;
    Ok(frame)
}

/// Validate a read reply (master side) and return its payload.
pub fn decode_reply(opcode: u8, reply: &[u8]) -> Result<&[u8], ErrorFlags> {
    if reply.len() < 2 {
        return Err(ErrorFlags::MESSAGE_TOO_SMALL);
    }
    if reply[0] != opcode | SYNC_BIT {
        return Err(ErrorFlags::BAD_REPLY);
    }
    let (covered, sum) = reply.split_at(reply.len() - 1);
    if checksum(covered) != sum[0] {
        return Err(ErrorFlags::INVALID_CHECKSUM);
    }
    Ok(&covered[1..])
}
