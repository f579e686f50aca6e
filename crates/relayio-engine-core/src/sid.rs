use std::{borrow::Cow, fmt, str::FromStr};

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::Rng;

/// Length of a rendered session id. It encodes 12 random bytes.
const SID_LEN: usize = 16;

/// A 96 bit random session id rendered as 16 url-safe base64 chars.
///
/// It is stored rendered so it can be shown and compared without allocating.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid([u8; SID_LEN]);

impl Sid {
    /// A zeroed session id, only useful as a placeholder.
    pub const ZERO: Self = Self([b'A'; SID_LEN]);

    /// A fresh random session id.
    pub fn new() -> Self {
        let mut entropy = [0u8; 12];
        rand::rng().fill(&mut entropy);
        let mut rendered = Self::ZERO.0;
        // 12 bytes are exactly 16 chars, the buffer can't be too small
        let _ = BASE64_URL_SAFE_NO_PAD.encode_slice(entropy, &mut rendered);
        Sid(rendered)
    }

    /// The 16 chars of the id.
    pub const fn as_str(&self) -> &str {
        // SAFETY: the bytes are url-safe base64 chars, all ascii
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }
}

impl Default for Sid {
    fn default() -> Self {
        Sid::new()
    }
}

/// Why a string is not a [`Sid`].
#[derive(Debug, thiserror::Error)]
pub enum SidDecodeError {
    /// A char is outside of the url-safe base64 alphabet.
    #[error("Invalid url base64 string")]
    InvalidBase64String,
    /// The string is not 16 chars long.
    #[error("Invalid sid length")]
    InvalidLength,
}

impl FromStr for Sid {
    type Err = SidDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rendered: [u8; SID_LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| SidDecodeError::InvalidLength)?;
        let url_safe = |b: &u8| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_');
        if !rendered.iter().all(url_safe) {
            return Err(SidDecodeError::InvalidBase64String);
        }
        Ok(Sid(rendered))
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl serde::Serialize for Sid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Sid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rendered = <Cow<'de, str> as serde::Deserialize>::deserialize(deserializer)?;
        rendered.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_ids_parse_back() {
        let id = Sid::new();
        assert_ne!(id, Sid::new());
        assert_eq!(id.to_string().parse::<Sid>().unwrap(), id);
        assert_eq!("AA9AAA0AAzAAAAHs".parse::<Sid>().unwrap().as_str(), "AA9AAA0AAzAAAAHs");
    }

    #[test]
    fn malformed_ids() {
        let short = "*$^ùù!".parse::<Sid>().unwrap_err();
        assert_eq!(short.to_string(), "Invalid sid length");
        let bad_char = "aoassaAZDoin#zd{".parse::<Sid>().unwrap_err();
        assert_eq!(bad_char.to_string(), "Invalid url base64 string");
    }

    #[test]
    fn serialized_as_a_string() {
        let id = Sid::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert_eq!(serde_json::from_str::<Sid>(&json).unwrap(), id);
        assert!(serde_json::from_str::<Sid>("\"short\"").is_err());
    }
}
