//! Argument descriptors and typed parameter values.
//!
//! Command tables declare their arguments with a compact format string that
//! is parsed once, when the table is built:
//!
//! ```text
//!   ""        direction not supported
//!   "?"       query, no arguments
//!   "=c"      assignment, one char
//!   "=3u"     assignment, unsigned integer of exactly three digits
//!   "=s,i*"   assignment, string then an optional free-width integer
//!   "=C"      assignment, opaque blob consuming the rest of the line
//! ```
//!
//! | char | kind        | wire form                  |
//! |------|-------------|----------------------------|
//! | `i`  | integer     | `-12`, `+7`, `0042`        |
//! | `u`  | unsigned    | `42`                       |
//! | `x`  | hex32       | `1A2B`                     |
//! | `X`  | hex64       | `DEADBEEF00112233`         |
//! | `b`  | boolean     | `0` / `1`                  |
//! | `s`  | string      | up to 32 chars, no comma   |
//! | `c`  | char        | `R`                        |
//! | `v`  | float       | `12.5`, `-1e-3`            |
//! | `d`  | date        | `dd/mm/yyyy`               |
//! | `t`  | time        | `hh:mm:ss`                 |
//! | `C`  | custom blob | remainder of the line      |

use core::fmt;

use heapless::{String, Vec};

use super::errors::ErrorFlags;

/// Maximum number of parameters one message can carry.
pub const MAX_PARAMS: usize = 8;

/// Maximum length of a string argument.
pub const MAX_STRING_LEN: usize = 32;

/// Parsed parameter array for one message.
pub type Params = Vec<Param, MAX_PARAMS>;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Integer,
    Unsigned,
    Hex32,
    Hex64,
    Boolean,
    String,
    Char,
    Float,
    Date,
    Time,
    Custom,
}

impl ArgKind {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'i' => Self::Integer,
            'u' => Self::Unsigned,
            'x' => Self::Hex32,
            'X' => Self::Hex64,
            'b' => Self::Boolean,
            's' => Self::String,
            'c' => Self::Char,
            'v' => Self::Float,
            'd' => Self::Date,
            't' => Self::Time,
            'C' => Self::Custom,
            _ => return None,
        })
    }
}

/// One positional argument: kind plus field-width / optional flags.
/// `width == None` means free format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub kind: ArgKind,
    pub width: Option<u8>,
    pub optional: bool,
}

/// Assignment (`=`) or query (`?`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    Assignment,
    Query,
}

impl Form {
    pub const fn marker(self) -> char {
        match self {
            Self::Assignment => '=',
            Self::Query => '?',
        }
    }
}

/// Errors in a static format string.  These surface while a command table is
/// being built, never while parsing traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    BadForm,
    UnknownType(char),
    EmptyArg,
    TooManyArgs,
    CustomNotLast,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadForm => write!(f, "format must start with '=' or '?'"),
            Self::UnknownType(c) => write!(f, "unknown argument type '{c}'"),
            Self::EmptyArg => write!(f, "empty argument descriptor"),
            Self::TooManyArgs => write!(f, "more than {MAX_PARAMS} arguments"),
            Self::CustomNotLast => write!(f, "custom blob must be the last argument"),
        }
    }
}

impl core::error::Error for FormatError {}

/// Parsed format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSpec {
    pub form: Form,
    pub args: Vec<ArgSpec, MAX_PARAMS>,
}

impl FormatSpec {
    /// Parse a table format string.  `""` yields `Ok(None)`.
    pub fn parse(spec: &str) -> Result<Option<Self>, FormatError> {
        let mut chars = spec.chars();
        let form = match chars.next() {
            None => return Ok(None),
            Some('=') => Form::Assignment,
            Some('?') => Form::Query,
            Some(_) => return Err(FormatError::BadForm),
        };

        let rest = chars.as_str();
        let mut args = Vec::new();
        if !rest.is_empty() {
            for token in rest.split(',') {
                if args.last().is_some_and(|a: &ArgSpec| a.kind == ArgKind::Custom) {
                    return Err(FormatError::CustomNotLast);
                }
                let arg = parse_arg_token(token)?;
                args.push(arg).map_err(|_| FormatError::TooManyArgs)?;
            }
        }
        Ok(Some(Self { form, args }))
    }

    /// Parse the argument text that follows the `=` / `?` marker.
    ///
    /// `offset` is the position of `text` inside the raw message so that blob
    /// parameters can refer back into it.
    pub fn parse_args(&self, text: &str, offset: usize) -> Result<Params, ErrorFlags> {
        let mut params = Params::new();
        let mut rest = Some(text).filter(|t| !t.is_empty());
        let mut pos = offset;

        for spec in &self.args {
            let Some(remaining) = rest else {
                if spec.optional {
                    continue;
                }
                return Err(ErrorFlags::MISSING_ARGS);
            };

            let token = if spec.kind == ArgKind::Custom {
                rest = None;
                remaining
            } else if let Some((head, tail)) = remaining.split_once(',') {
                rest = Some(tail);
                head
            } else {
                rest = None;
                remaining
            };

            let param = parse_value(spec, token, pos)?;
            pos += token.len() + 1;
            params.push(param).map_err(|_| ErrorFlags::INVALID_ARGS)?;
        }

        if rest.is_some() {
            return Err(ErrorFlags::INVALID_ARGS);
        }
        Ok(params)
    }
}

fn parse_arg_token(token: &str) -> Result<ArgSpec, FormatError> {
    let (token, optional) = match token.strip_suffix('*') {
        Some(t) => (t, true),
        None => (token, false),
    };
    let digits = token.chars().take_while(char::is_ascii_digit).count();
    let (width, kind) = token.split_at(digits);
    let mut kind_chars = kind.chars();
    let kind = match (kind_chars.next(), kind_chars.next()) {
        (Some(c), None) => ArgKind::from_char(c).ok_or(FormatError::UnknownType(c))?,
        (None, _) => return Err(FormatError::EmptyArg),
        (Some(_), Some(c)) => return Err(FormatError::UnknownType(c)),
    };
    let width = if width.is_empty() {
        None
    } else {
        Some(width.parse::<u8>().map_err(|_| FormatError::EmptyArg)?)
    };
    Ok(ArgSpec {
        kind,
        width,
        optional,
    })
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Calendar date carried as `dd/mm/yyyy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

impl Date {
    pub fn new(day: u8, month: u8, year: u16) -> Option<Self> {
        let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
        let days_in_month = match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            2 if leap => 29,
            2 => 28,
            _ => return None,
        };
        (1..=days_in_month)
            .contains(&day)
            .then_some(Self { day, month, year })
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}/{:04}", self.day, self.month, self.year)
    }
}

/// Time of day carried as `hh:mm:ss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8) -> Option<Self> {
        (hour < 24 && minute < 60 && second < 60).then_some(Self {
            hour,
            minute,
            second,
        })
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// One parsed argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Integer(i32),
    Unsigned(u32),
    Hex32(u32),
    Hex64(u64),
    Boolean(bool),
    Str(String<MAX_STRING_LEN>),
    Char(char),
    Float(f32),
    Date(Date),
    Time(Time),
    /// Byte range of an opaque blob inside the raw message.
    Blob { start: usize, len: usize },
}

impl Param {
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::Integer(v) => Some(v),
            Self::Unsigned(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Self::Unsigned(v) | Self::Hex32(v) => Some(v),
            Self::Integer(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Self::Hex64(v) => Some(v),
            _ => self.as_u32().map(u64::from),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Boolean(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match *self {
            Self::Char(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Integer(v) => Some(v as f32),
            Self::Unsigned(v) => Some(v as f32),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<Date> {
        match *self {
            Self::Date(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<Time> {
        match *self {
            Self::Time(t) => Some(t),
            _ => None,
        }
    }
}

fn parse_value(spec: &ArgSpec, token: &str, offset: usize) -> Result<Param, ErrorFlags> {
    if token.is_empty() {
        return Err(ErrorFlags::MISSING_ARGS);
    }
    if let Some(width) = spec.width {
        let counted = match spec.kind {
            ArgKind::Integer => token.trim_start_matches(['+', '-']).len(),
            _ => token.len(),
        };
        if counted != usize::from(width) {
            return Err(ErrorFlags::INVALID_ARGS);
        }
    }

    let invalid = ErrorFlags::INVALID_ARGS;
    let param = match spec.kind {
        ArgKind::Integer => {
            let digits = token.trim_start_matches(['+', '-']);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid);
            }
            Param::Integer(token.parse().map_err(|_| invalid)?)
        }
        ArgKind::Unsigned => {
            if !token.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid);
            }
            Param::Unsigned(token.parse().map_err(|_| invalid)?)
        }
        ArgKind::Hex32 => {
            if token.len() > 8 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid);
            }
            Param::Hex32(u32::from_str_radix(token, 16).map_err(|_| invalid)?)
        }
        ArgKind::Hex64 => {
            if token.len() > 16 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid);
            }
            Param::Hex64(u64::from_str_radix(token, 16).map_err(|_| invalid)?)
        }
        ArgKind::Boolean => match token {
            "0" => Param::Boolean(false),
            "1" => Param::Boolean(true),
            _ => return Err(invalid),
        },
        ArgKind::String => Param::Str(String::try_from(token).map_err(|()| invalid)?),
        ArgKind::Char => {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Param::Char(c),
                _ => return Err(invalid),
            }
        }
        ArgKind::Float => {
            let v: f32 = token.parse().map_err(|_| invalid)?;
            if !v.is_finite() {
                return Err(invalid);
            }
            Param::Float(v)
        }
        ArgKind::Date => Param::Date(parse_date(token).ok_or(invalid)?),
        ArgKind::Time => Param::Time(parse_time(token).ok_or(invalid)?),
        ArgKind::Custom => Param::Blob {
            start: offset,
            len: token.len(),
        },
    };
    Ok(param)
}

fn fixed_field<T: core::str::FromStr>(s: &str, len: usize) -> Option<T> {
    (s.len() == len && s.bytes().all(|b| b.is_ascii_digit()))
        .then(|| s.parse().ok())
        .flatten()
}

fn parse_date(token: &str) -> Option<Date> {
    let mut parts = token.split('/');
    let day = fixed_field(parts.next()?, 2)?;
    let month = fixed_field(parts.next()?, 2)?;
    let year = fixed_field(parts.next()?, 4)?;
    if parts.next().is_some() {
        return None;
    }
    Date::new(day, month, year)
}

fn parse_time(token: &str) -> Option<Time> {
    let mut parts = token.split(':');
    let hour = fixed_field(parts.next()?, 2)?;
    let minute = fixed_field(parts.next()?, 2)?;
    let second = fixed_field(parts.next()?, 2)?;
    if parts.next().is_some() {
        return None;
    }
    Time::new(hour, minute, second)
}
