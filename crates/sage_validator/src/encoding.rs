//! Text encoding detection for delimited files.

use encoding_rs::{UTF_8, WINDOWS_1252};
use serde::Serialize;
use std::borrow::Cow;
use tracing::warn;

/// Bytes inspected by [`detect_encoding`].
pub const PROBE_LEN: usize = 100;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextEncoding {
    Utf8Bom,
    Utf8,
    Latin1,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8Bom => "utf-8-sig",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pick the first candidate that decodes the leading probe.
///
/// Candidates in order: UTF-8 with BOM, UTF-8, Latin-1. A multibyte UTF-8
/// sequence cut off by the probe boundary still counts as UTF-8.
pub fn detect_encoding(bytes: &[u8]) -> TextEncoding {
    if bytes.starts_with(UTF8_BOM) {
        return TextEncoding::Utf8Bom;
    }
    let probe = &bytes[..bytes.len().min(PROBE_LEN)];
    match std::str::from_utf8(probe) {
        Ok(_) => TextEncoding::Utf8,
        // error_len() is None when the input simply ended mid-sequence
        Err(e) if e.error_len().is_none() => TextEncoding::Utf8,
        Err(_) => TextEncoding::Latin1,
    }
}

/// Decode the whole buffer. A UTF-8 BOM is removed, never returned as data.
pub fn decode(bytes: &[u8], encoding: TextEncoding) -> Cow<'_, str> {
    match encoding {
        TextEncoding::Utf8Bom | TextEncoding::Utf8 => {
            let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
            if had_errors {
                warn!(
                    encoding = %encoding,
                    "invalid UTF-8 past the detection probe, replaced with U+FFFD"
                );
            }
            text
        }
        // Latin-1 is decoded as its Windows-1252 superset, as browsers do.
        TextEncoding::Latin1 => WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}
