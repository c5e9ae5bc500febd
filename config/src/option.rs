use std::fmt::{self, Display};

use crate::{
    Error, Result,
    hex::Hex,
};

/// Size of the tag field plus the length field.
pub const HEADER_LEN: usize = 2;

/// Largest payload a single option can carry.
pub const MAX_VALUE_LEN: usize = u8::MAX as usize;

/// One `tag | len | value` entry of a `CORE_SET_CONFIG` parameter list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigOption {
    tag: u8,
    value: Vec<u8>,
}

impl ConfigOption {
    pub fn new(tag: u8, value: impl Into<Vec<u8>>) -> Result<Self> {
        let value = value.into();
        if value.len() > MAX_VALUE_LEN {
            return Err(Error::OptionTooLong {
                tag,
                len: value.len(),
            });
        }
        Ok(Self { tag, value })
    }

    pub fn tag(&self) -> u8 {
        self.tag
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Encoded size, framing included.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.value.len()
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag);
        // Checked in `new`.
        out.push(self.value.len() as u8);
        out.extend_from_slice(&self.value);
    }
}

impl Display for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tag=0x{:02x} len={} value={}",
            self.tag,
            self.value.len(),
            Hex(&self.value)
        )
    }
}
