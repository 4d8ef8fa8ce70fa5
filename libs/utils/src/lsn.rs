//! Log Sequence Number: a 64-bit position in a source database's write-ahead log.
//!
//! Textual form is `HI/LO`, each half printed as unpadded uppercase hex, matching
//! the format Postgres itself uses for LSNs.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Zero denotes "invalid" / "unset" throughout the applier.
    pub const INVALID: Lsn = Lsn(0);

    pub fn is_valid(self) -> bool {
        self != Lsn::INVALID
    }

    pub fn checked_sub<T: Into<u64>>(self, other: T) -> Option<Lsn> {
        self.0.checked_sub(other.into()).map(Lsn)
    }

    pub fn checked_add<T: Into<u64>>(self, other: T) -> Option<Lsn> {
        self.0.checked_add(other.into()).map(Lsn)
    }

    /// Segment number containing this LSN, given the WAL segment size in bytes.
    /// `segSz` must be a power of two; this is `lsn / segSz` per the WAL naming rule.
    pub fn segment_number(self, seg_sz: u64) -> u64 {
        self.0 / seg_sz
    }
}

impl From<u64> for Lsn {
    fn from(n: u64) -> Self {
        Lsn(n)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> u64 {
        lsn.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xffff_ffff)
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("invalid LSN literal: {0:?}")]
pub struct LsnParseError(String);

impl FromStr for Lsn {
    type Err = LsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('/')
            .ok_or_else(|| LsnParseError(s.to_string()))?;
        let hi = u64::from_str_radix(hi, 16).map_err(|_| LsnParseError(s.to_string()))?;
        let lo = u64::from_str_radix(lo, 16).map_err(|_| LsnParseError(s.to_string()))?;
        if lo > 0xffff_ffff {
            return Err(LsnParseError(s.to_string()));
        }
        Ok(Lsn((hi << 32) | lo))
    }
}

impl Serialize for Lsn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Lsn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Lsn::from_str(&s).map_err(de::Error::custom)
    }
}
