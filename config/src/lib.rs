//! Codec for the TLV parameter list that `NFC_SetConfig` consumes.
//!
//! Each entry is framed as a one byte tag, a one byte length and exactly
//! `length` value bytes, the layout of NCI `CORE_SET_CONFIG` parameters.

mod anticol;
mod error;
mod hex;
mod option;

use std::slice;

pub use anticol::{AnticolParams, LA_BIT_FRAME_SDD, LA_NFCID1, LA_SEL_INFO, LI_A_HIST_BY};
pub use error::{Error, Result};
pub use hex::Hex;
pub use option::{ConfigOption, HEADER_LEN, MAX_VALUE_LEN};

/// Ordered option list. Tags may repeat; nothing is merged implicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    options: Vec<ConfigOption>,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            options: Vec::new(),
        }
    }

    pub fn parse(stream: &[u8]) -> Result<Self> {
        let mut options = Vec::new();
        let mut offset = 0;
        while offset < stream.len() {
            let Some(&[tag, len]) = stream.get(offset..offset + HEADER_LEN) else {
                return Err(Error::MalformedStream {
                    offset,
                    reason: "truncated option header",
                });
            };
            let start = offset + HEADER_LEN;
            let end = start + usize::from(len);
            let Some(value) = stream.get(start..end) else {
                return Err(Error::MalformedStream {
                    offset,
                    reason: "declared length runs past the end of the stream",
                });
            };
            options.push(ConfigOption::new(tag, value)?);
            offset = end;
        }
        Ok(Self { options })
    }

    /// Parses a stream handed over a C boundary.
    ///
    /// # Safety
    /// When `size` is non-zero and `stream` is non-null, `stream` must be
    /// valid for reads of `size` bytes.
    pub unsafe fn parse_raw(size: usize, stream: *const u8) -> Result<Self> {
        if size == 0 {
            return Ok(Self::new());
        }
        if stream.is_null() {
            return Err(Error::MalformedStream {
                offset: 0,
                reason: "non-empty stream without data",
            });
        }
        Self::parse(unsafe { slice::from_raw_parts(stream, size) })
    }

    pub fn add(&mut self, option: ConfigOption) {
        self.options.push(option);
    }

    /// Overwrites the first option carrying the same tag, or appends.
    /// Returns the option that was replaced.
    pub fn replace(&mut self, option: ConfigOption) -> Option<ConfigOption> {
        match self.options.iter_mut().find(|opt| opt.tag() == option.tag()) {
            Some(slot) => Some(std::mem::replace(slot, option)),
            None => {
                self.options.push(option);
                None
            }
        }
    }

    pub fn options(&self) -> &[ConfigOption] {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn clear(&mut self) {
        self.options.clear();
    }

    pub fn contains(&self, tag: u8) -> bool {
        self.options.iter().any(|opt| opt.tag() == tag)
    }

    /// First option carrying `tag`.
    pub fn get(&self, tag: u8) -> Option<&ConfigOption> {
        self.options.iter().find(|opt| opt.tag() == tag)
    }

    /// Encoded size of the whole list.
    pub fn total(&self) -> usize {
        self.options.iter().map(ConfigOption::encoded_len).sum()
    }

    /// Appends the encoding to `out`, returning the number of bytes written.
    pub fn build(&self, out: &mut Vec<u8>) -> usize {
        let before = out.len();
        out.reserve(self.total());
        for opt in &self.options {
            opt.encode(out);
        }
        out.len() - before
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total());
        self.build(&mut out);
        out
    }

    /// Encodes the list as consecutive streams of at most `limit` bytes each,
    /// never splitting an option.
    pub fn batches(&self, limit: usize) -> Result<Vec<Vec<u8>>> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        for opt in &self.options {
            let needed = opt.encoded_len();
            if needed > limit {
                return Err(Error::BufferTooSmall {
                    needed,
                    capacity: limit,
                });
            }
            if current.len() + needed > limit {
                batches.push(std::mem::take(&mut current));
            }
            opt.encode(&mut current);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        Ok(batches)
    }

    pub fn write_into(&self, out: &mut [u8]) -> Result<usize> {
        let needed = self.total();
        let Some(dst) = out.get_mut(..needed) else {
            return Err(Error::BufferTooSmall {
                needed,
                capacity: out.len(),
            });
        };
        dst.copy_from_slice(&self.to_bytes());
        Ok(needed)
    }

    /// Splits `self` into the options whose tag `enforced` does not carry and
    /// the ones it does, both in their original order.
    pub fn filter_against(&self, enforced: &Config) -> (Config, Config) {
        let mut present = [false; 256];
        for opt in &enforced.options {
            present[usize::from(opt.tag())] = true;
        }
        let mut outgoing = Config::new();
        let mut displaced = Config::new();
        for opt in &self.options {
            if present[usize::from(opt.tag())] {
                displaced.add(opt.clone());
            } else {
                outgoing.add(opt.clone());
            }
        }
        (outgoing, displaced)
    }
}

impl FromIterator<ConfigOption> for Config {
    fn from_iter<I: IntoIterator<Item = ConfigOption>>(iter: I) -> Self {
        Self {
            options: iter.into_iter().collect(),
        }
    }
}

impl Extend<ConfigOption> for Config {
    fn extend<I: IntoIterator<Item = ConfigOption>>(&mut self, iter: I) {
        self.options.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Config {
    type Item = &'a ConfigOption;
    type IntoIter = slice::Iter<'a, ConfigOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.options.iter()
    }
}
