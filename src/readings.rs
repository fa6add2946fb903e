//! Typed register values and the per-cycle reading snapshot.

use std::collections::BTreeMap;

use crate::mapping::Bank;

/// Registers per bank. Offsets run `0..=599` and an acquisition cycle always
/// produces a value for every one of them.
pub const BANK_SIZE: u16 = 600;

/// A decoded register value.
///
/// Analog registers carry their value premultiplied by 10 on the wire; the
/// raw signed word is kept here and the division only happens on display and
/// serialization, so no precision is lost in between.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Decimal(i16),
    Integer(i16),
    Boolean(bool),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Value::Decimal(n) => f.write_fmt(format_args!("{}", n as f32 / 10.0)),
            Value::Integer(n) => f.write_fmt(format_args!("{}", n)),
            Value::Boolean(b) => f.write_fmt(format_args!("{}", b)),
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Value::Decimal(n) => serializer.serialize_f32(n as f32 / 10.0),
            Value::Integer(n) => serializer.serialize_i16(n),
            Value::Boolean(b) => serializer.serialize_bool(b),
        }
    }
}

/// Decode a raw analog bank word: sign-extend and scale by 1/10.
pub fn decode_analog(word: u16) -> Value {
    Value::Decimal(word as i16)
}

/// Decode a raw integer bank word: sign-extend, unscaled.
pub fn decode_integer(word: u16) -> Value {
    Value::Integer(word as i16)
}

/// Decode a raw digital bank bit.
pub fn decode_digital(bit: bool) -> Value {
    Value::Boolean(bit)
}

#[derive(thiserror::Error, Debug)]
pub enum ParseKeyError {
    #[error("a register key looks like `A_137`, got `{0}`")]
    Malformed(String),
    #[error("register offset {0} is out of range, the banks hold offsets 0 through 599")]
    OffsetOutOfRange(u16),
}

/// A bank tag plus an offset within the bank, e.g. `A_137`.
///
/// Orders by bank tag first and offset second, which keeps reading sets
/// iterable in acquisition order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegisterAddress {
    pub bank: Bank,
    pub offset: u16,
}

impl std::fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}_{}", self.bank, self.offset))
    }
}

impl std::str::FromStr for RegisterAddress {
    type Err = ParseKeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseKeyError::Malformed(s.to_string());
        let (tag, offset) = s.split_once('_').ok_or_else(malformed)?;
        let bank = tag.parse::<Bank>().map_err(|_| malformed())?;
        let offset = offset.parse::<u16>().map_err(|_| malformed())?;
        if offset >= BANK_SIZE {
            return Err(ParseKeyError::OffsetOutOfRange(offset));
        }
        Ok(RegisterAddress { bank, offset })
    }
}

impl serde::Serialize for RegisterAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// A complete decoded snapshot of all three banks of one unit.
///
/// Only a full acquisition cycle produces one of these; there is no way to
/// observe a partially filled snapshot.
#[derive(Debug)]
pub struct ReadingSet {
    pub(crate) taken_at: jiff::Timestamp,
    pub(crate) values: BTreeMap<RegisterAddress, Value>,
}

impl ReadingSet {
    /// The instant at which the acquisition cycle producing this set started.
    pub fn taken_at(&self) -> jiff::Timestamp {
        self.taken_at
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, address: RegisterAddress) -> Option<Value> {
        self.values.get(&address).copied()
    }

    /// Look a value up by its string key, e.g. `"I_405"`.
    pub fn get_key(&self, key: &str) -> Option<Value> {
        self.get(key.parse().ok()?)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegisterAddress, Value)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }
}
