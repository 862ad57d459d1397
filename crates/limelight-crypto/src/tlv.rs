//! Type-length-value records for pairing messages.
//!
//! Each record is one type byte, one length byte and up to 255 value bytes.
//! A longer value is split over adjacent records of the same type.

use limelight_core::error::ParseError;

const MAX_FRAGMENT: usize = u8::MAX as usize;

/// Record types used by the pairing exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    Signature = 0x0A,
}

impl TlvType {
    const ALL: [TlvType; 7] = [
        TlvType::Identifier,
        TlvType::Salt,
        TlvType::PublicKey,
        TlvType::EncryptedData,
        TlvType::State,
        TlvType::Error,
        TlvType::Signature,
    ];

    pub fn from_byte(b: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| *t as u8 == b)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::Salt => "salt",
            Self::PublicKey => "public key",
            Self::EncryptedData => "encrypted data",
            Self::State => "state",
            Self::Error => "error",
            Self::Signature => "signature",
        }
    }
}

/// Codes a host may return in the `Error` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TlvError {
    Unknown = 0x01,
    Authentication = 0x02,
    Unavailable = 0x06,
    Busy = 0x07,
}

impl TlvError {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x02 => Self::Authentication,
            0x06 => Self::Unavailable,
            0x07 => Self::Busy,
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Authentication => "Authentication",
            Self::Unavailable => "Unavailable",
            Self::Busy => "Busy",
        }
    }
}

/// A pairing message: records in the order they were added or read.
///
/// Unknown record types are kept so a message re-encodes unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    entries: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message whose first record is `State`.
    pub fn with_state(state: u8) -> Self {
        Self::new().with(TlvType::State, [state])
    }

    /// Builder form of [`Tlv8::set`].
    pub fn with(mut self, typ: TlvType, value: impl Into<Vec<u8>>) -> Self {
        self.set(typ, value);
        self
    }

    /// Decode a message, joining adjacent fragments of one type.
    ///
    /// A type that reappears after another type replaces its earlier value.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut tlv = Self::new();
        let mut rest = data;
        let mut previous = None;

        while !rest.is_empty() {
            let (typ, len) = match rest {
                [typ, len, ..] => (*typ, *len as usize),
                _ => {
                    return Err(ParseError::InvalidFormat(
                        "TLV8: truncated header".to_string(),
                    ))
                }
            };
            let body = &rest[2..];
            if body.len() < len {
                return Err(ParseError::InvalidFormat(format!(
                    "TLV8: record 0x{:02x} wants {} bytes, {} left",
                    typ,
                    len,
                    body.len()
                )));
            }
            let (value, tail) = body.split_at(len);
            rest = tail;

            if previous == Some(typ) {
                if let Some((_, joined)) = tlv.entries.iter_mut().find(|(t, _)| *t == typ) {
                    joined.extend_from_slice(value);
                }
            } else {
                tlv.put(typ, value.to_vec());
            }
            previous = Some(typ);
        }

        Ok(tlv)
    }

    /// Encode in insertion order, fragmenting long values.
    pub fn encode(&self) -> Vec<u8> {
        let payload: usize = self.entries.iter().map(|(_, v)| v.len()).sum();
        let mut out = Vec::with_capacity(payload + self.entries.len() * 2);

        for (typ, value) in &self.entries {
            if value.is_empty() {
                out.extend_from_slice(&[*typ, 0]);
                continue;
            }
            for chunk in value.chunks(MAX_FRAGMENT) {
                out.push(*typ);
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }

        out
    }

    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(t, _)| *t == typ as u8)
            .map(|(_, v)| v.as_slice())
    }

    /// Like [`Tlv8::get`] but a missing record is an error.
    pub fn require(&self, typ: TlvType) -> Result<&[u8], ParseError> {
        self.get(typ)
            .ok_or_else(|| ParseError::InvalidFormat(format!("TLV8: missing {}", typ.name())))
    }

    /// Set a record, replacing any existing value in place.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.put(typ as u8, value.into());
    }

    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    /// First byte of the `State` record.
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State)?.first().copied()
    }

    pub fn error(&self) -> Option<TlvError> {
        self.get(TlvType::Error)?.first().copied().map(TlvError::from_byte)
    }

    /// Human-readable form of the `Error` record.
    pub fn error_description(&self) -> Option<String> {
        let code = self.get(TlvType::Error)?.first().copied()?;
        Some(format!(
            "Error 0x{:02x}: {}",
            code,
            TlvError::from_byte(code).label()
        ))
    }

    /// Reply carrying only a state and an error code.
    pub fn error_reply(state: u8, error: TlvError) -> Self {
        Self::with_state(state).with(TlvType::Error, [error as u8])
    }

    fn put(&mut self, typ: u8, value: Vec<u8>) {
        match self.entries.iter_mut().find(|(t, _)| *t == typ) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((typ, value)),
        }
    }
}
