//! Text encodings used by archive names and embedded strings.
//!
//! Game archives overwhelmingly store names in the Japanese Windows code
//! page (CP932 / Shift-JIS), so that is the default everywhere a caller does
//! not pick an encoding explicitly. Decoding never fails: malformed sequences
//! become U+FFFD.
//!
//! | Variant | Terminator width |
//! |---------|------------------|
//! | [`Encoding::ShiftJis`], [`Encoding::Utf8`], [`Encoding::Latin1`] | 1 byte |
//! | [`Encoding::Utf16Le`], [`Encoding::Utf16Be`] | 2 bytes |
//! | [`Encoding::Utf32Le`] | 4 bytes |

use encoding_rs::{SHIFT_JIS, UTF_16BE, UTF_16LE, WINDOWS_1252};

/// A character encoding for on-disk strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// CP932 / Shift-JIS.
    #[default]
    ShiftJis,
    Utf8,
    /// Windows-1252, the usual stand-in for "ASCII with high bytes".
    Latin1,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    /// Any other WHATWG encoding known to `encoding_rs`.
    Other(&'static encoding_rs::Encoding),
}

impl Encoding {
    /// Resolve an encoding label (`"shift_jis"`, `"utf-16le"`, `"cp932"`, ...).
    pub fn from_label(label: &str) -> Option<Self> {
        let lower = label.trim().to_ascii_lowercase();
        match lower.as_str() {
            "utf-32" | "utf-32le" | "utf32" => return Some(Encoding::Utf32Le),
            "cp932" | "sjis" | "shift-jis" => return Some(Encoding::ShiftJis),
            _ => {}
        }
        encoding_rs::Encoding::for_label(lower.as_bytes()).map(Self::from_encoding_rs)
    }

    fn from_encoding_rs(enc: &'static encoding_rs::Encoding) -> Self {
        if enc == SHIFT_JIS {
            Encoding::ShiftJis
        } else if enc == encoding_rs::UTF_8 {
            Encoding::Utf8
        } else if enc == WINDOWS_1252 {
            Encoding::Latin1
        } else if enc == UTF_16LE {
            Encoding::Utf16Le
        } else if enc == UTF_16BE {
            Encoding::Utf16Be
        } else {
            Encoding::Other(enc)
        }
    }

    /// Canonical label, accepted back by [`Encoding::from_label`].
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::ShiftJis => SHIFT_JIS.name(),
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => WINDOWS_1252.name(),
            Encoding::Utf16Le => UTF_16LE.name(),
            Encoding::Utf16Be => UTF_16BE.name(),
            Encoding::Utf32Le => "UTF-32LE",
            Encoding::Other(enc) => enc.name(),
        }
    }

    /// Width of the NUL terminator (and of the code unit it is aligned to).
    pub fn terminator_size(&self) -> usize {
        match self {
            Encoding::Utf16Le | Encoding::Utf16Be => 2,
            Encoding::Utf32Le => 4,
            Encoding::Other(enc) if *enc == UTF_16LE || *enc == UTF_16BE => 2,
            _ => 1,
        }
    }

    /// Offset of the first terminator in `buf`, aligned to the code unit.
    ///
    /// A trailing partial code unit is never considered a terminator.
    pub fn find_terminator(&self, buf: &[u8]) -> Option<usize> {
        let unit = self.terminator_size();
        if unit == 1 {
            return buf.iter().position(|&b| b == 0);
        }
        buf.chunks_exact(unit)
            .position(|chunk| chunk.iter().all(|&b| b == 0))
            .map(|i| i * unit)
    }

    /// Decode `bytes` into a `String`, replacing malformed sequences.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Utf32Le => bytes
                .chunks_exact(4)
                .map(|c| {
                    char::from_u32(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .unwrap_or(char::REPLACEMENT_CHARACTER)
                })
                .collect(),
            _ => {
                let enc = self.as_encoding_rs();
                enc.decode_without_bom_handling(bytes).0.into_owned()
            }
        }
    }

    /// Decode the prefix of `bytes` that precedes the first terminator.
    pub fn decode_cstring(&self, bytes: &[u8]) -> String {
        let end = self.find_terminator(bytes).unwrap_or(bytes.len());
        self.decode(&bytes[..end])
    }

    fn as_encoding_rs(&self) -> &'static encoding_rs::Encoding {
        match self {
            Encoding::ShiftJis => SHIFT_JIS,
            Encoding::Utf8 | Encoding::Utf32Le => encoding_rs::UTF_8,
            Encoding::Latin1 => WINDOWS_1252,
            Encoding::Utf16Le => UTF_16LE,
            Encoding::Utf16Be => UTF_16BE,
            Encoding::Other(enc) => *enc,
        }
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Encoding {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Encoding {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        Encoding::from_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown encoding: {label}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_jis_is_default() {
        assert_eq!(Encoding::default(), Encoding::ShiftJis);
        // "テスト" in CP932
        let bytes = [0x83, 0x65, 0x83, 0x58, 0x83, 0x67];
        assert_eq!(Encoding::default().decode(&bytes), "テスト");
    }

    #[test]
    fn utf16_terminator_is_aligned() {
        // 'A' 0x00 | 0x00 'B' would look like a terminator at offset 1 if
        // scanned byte-wise; the first aligned pair is at 4.
        let buf = [b'A', 0x00, 0x00, b'B', 0x00, 0x00];
        assert_eq!(Encoding::Utf16Le.find_terminator(&buf), Some(4));
        assert_eq!(Encoding::Utf16Le.find_terminator(&buf[..5]), None);
        let buf = [b'A', 0x00, 0x00, 0x00, b'B', 0x00];
        assert_eq!(Encoding::Utf16Le.find_terminator(&buf), Some(2));
        assert_eq!(Encoding::Utf16Le.decode_cstring(&buf), "A");
    }

    #[test]
    fn utf32_decoding() {
        let buf = [b'h', 0, 0, 0, b'i', 0, 0, 0, 0, 0, 0, 0, b'x', 0, 0, 0];
        assert_eq!(Encoding::Utf32Le.terminator_size(), 4);
        assert_eq!(Encoding::Utf32Le.decode_cstring(&buf), "hi");
    }

    #[test]
    fn labels_resolve() {
        assert_eq!(Encoding::from_label("cp932"), Some(Encoding::ShiftJis));
        assert_eq!(Encoding::from_label("UTF-16LE"), Some(Encoding::Utf16Le));
        assert_eq!(Encoding::from_label("utf-32"), Some(Encoding::Utf32Le));
        assert_eq!(Encoding::from_label("utf-8"), Some(Encoding::Utf8));
        assert!(Encoding::from_label("no-such-encoding").is_none());
        assert_eq!(
            Encoding::from_label(Encoding::Latin1.name()),
            Some(Encoding::Latin1)
        );
    }
}
