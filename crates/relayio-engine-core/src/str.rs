use std::{borrow::Cow, fmt};

use bytes::Bytes;

/// A [`Bytes`] backed utf8 string.
///
/// Slicing is zero-copy, which keeps text frames cheap to split into
/// namespace, ack id and data parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Str(Bytes);

impl Str {
    /// Slice the string with [`Bytes::slice`].
    /// The range must fall on char boundaries.
    pub fn slice(&self, range: impl std::ops::RangeBounds<usize>) -> Self {
        let sliced = self.0.slice(range);
        debug_assert!(std::str::from_utf8(&sliced).is_ok());
        Str(sliced)
    }

    /// Return a `&str` view of the string.
    pub fn as_str(&self) -> &str {
        // SAFETY: every constructor checks or guarantees utf8
        unsafe { std::str::from_utf8_unchecked(&self.0) }
    }

    /// Return the raw bytes of the string.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Build a [`Str`] from bytes, checking that they are valid utf8.
    pub fn from_utf8(bytes: Bytes) -> Result<Self, std::str::Utf8Error> {
        std::str::from_utf8(&bytes)?;
        Ok(Str(bytes))
    }

    /// Build a [`Str`] from bytes without checking them.
    ///
    /// # Safety
    /// The bytes must be valid utf8.
    pub unsafe fn from_bytes_unchecked(bytes: Bytes) -> Self {
        Str(bytes)
    }
}

impl std::ops::Deref for Str {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}
impl AsRef<str> for Str {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
impl std::borrow::Borrow<str> for Str {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}
impl fmt::Display for Str {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&'static str> for Str {
    fn from(s: &'static str) -> Self {
        Str(Bytes::from_static(s.as_bytes()))
    }
}
impl From<String> for Str {
    fn from(s: String) -> Self {
        Str(Bytes::from(s.into_bytes()))
    }
}
impl From<Cow<'static, str>> for Str {
    fn from(s: Cow<'static, str>) -> Self {
        match s {
            Cow::Borrowed(s) => Str::from(s),
            Cow::Owned(s) => Str::from(s),
        }
    }
}
impl From<&Cow<'static, str>> for Str {
    fn from(s: &Cow<'static, str>) -> Self {
        match s {
            Cow::Borrowed(s) => Str::from(*s),
            Cow::Owned(s) => Str(Bytes::copy_from_slice(s.as_bytes())),
        }
    }
}

impl From<Str> for Bytes {
    fn from(s: Str) -> Self {
        s.0
    }
}
impl From<Str> for String {
    fn from(s: Str) -> Self {
        s.as_str().to_owned()
    }
}
impl From<Str> for Cow<'static, str> {
    fn from(s: Str) -> Self {
        Cow::Owned(s.into())
    }
}

impl PartialEq<&str> for Str {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}
impl PartialEq<str> for Str {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}
impl PartialEq<Str> for &str {
    fn eq(&self, other: &Str) -> bool {
        *self == other.as_str()
    }
}

impl serde::Serialize for Str {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}
impl<'de> serde::Deserialize<'de> for Str {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Str::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_keeps_utf8() {
        let s = Str::from("4/chat,éa");
        assert_eq!(s.slice(1..6), "/chat");
        assert_eq!(s.slice(7..), "éa");
    }

    #[test]
    fn from_utf8_rejects_invalid() {
        assert!(Str::from_utf8(Bytes::from_static(&[0xff, 0xfe])).is_err());
        assert_eq!(Str::from_utf8(Bytes::from_static(b"ok")).unwrap(), "ok");
    }
}
