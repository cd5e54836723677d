//! Field data payloads.
//!
//! Complex field values live in the field data blob and are referenced by
//! byte offset from the field record:
//!
//! ```text
//! CExoString:    u32 length | bytes (UTF-8)
//! CResRef:       u8 length (<= 16) | bytes (ASCII)
//! CExoLocString: u32 total size (excluding itself) | u32 strref | u32 count
//!                | count x (u32 language id | u32 length | bytes (UTF-8))
//! DWORD64/INT64/DOUBLE: 8 bytes
//! VOID:          u32 length | bytes
//! ```
//!
//! Every payload written by [`FieldDataBuilder`] is zero padded to a 4-byte
//! boundary, and the blob opens with a 4-byte zero sentinel so no real payload
//! sits at offset 0.

use byteorder::{LittleEndian, WriteBytesExt};
use encoding::all::WINDOWS_1252;
use encoding::{DecoderTrap, Encoding};
use log::{debug, warn};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::gff::ByteView;
use crate::types::LocString;

/// Maximum length of a resource reference in bytes.
pub const RESREF_MAX_LEN: usize = 16;

/// Alignment of every payload in the blob.
pub const PAYLOAD_ALIGN: usize = 4;

// ============================================================================
// Encoding
// ============================================================================

/// Decode text bytes as UTF-8, falling back to Windows-1252.
///
/// Older toolsets wrote single-byte Western text; the fallback never fails.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            debug!(
                "Text of {} bytes is not valid UTF-8, decoding as Windows-1252",
                bytes.len()
            );
            WINDOWS_1252
                .decode(bytes, DecoderTrap::Replace)
                .unwrap_or_else(|s| s.into_owned())
        }
    }
}

/// Encode a CExoString payload (unpadded).
pub fn encode_exo_string(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + text.len());
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

/// Encode a CResRef payload (unpadded), truncating to 16 bytes.
pub fn encode_resref(resref: &str) -> Vec<u8> {
    let mut bytes = resref.as_bytes();
    if bytes.len() > RESREF_MAX_LEN {
        warn!(
            "ResRef {:?} longer than {} bytes, truncating",
            resref, RESREF_MAX_LEN
        );
        bytes = &bytes[..RESREF_MAX_LEN];
    }
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
    out
}

/// Encode a CExoLocString payload (unpadded).
pub fn encode_loc_string(value: &LocString) -> Vec<u8> {
    let body_len: usize = 8 + value
        .strings
        .values()
        .map(|s| 8 + s.len())
        .sum::<usize>();

    let mut out = Vec::with_capacity(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_le_bytes());
    out.extend_from_slice(&value.str_ref.to_le_bytes());
    out.extend_from_slice(&(value.strings.len() as u32).to_le_bytes());
    for (language, text) in &value.strings {
        out.extend_from_slice(&language.to_le_bytes());
        out.extend_from_slice(&(text.len() as u32).to_le_bytes());
        out.extend_from_slice(text.as_bytes());
    }
    out
}

/// Field data blob builder.
///
/// Payloads are appended verbatim, including the short encodings of empty
/// strings; identical payloads are written once per occurrence.
#[derive(Debug)]
pub struct FieldDataBuilder {
    data: Vec<u8>,
}

impl Default for FieldDataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldDataBuilder {
    /// Create a blob holding only the zero sentinel.
    pub fn new() -> Self {
        Self {
            data: vec![0u8; PAYLOAD_ALIGN],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn append(&mut self, payload: &[u8]) -> u32 {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(payload);
        let padded = self.data.len().next_multiple_of(PAYLOAD_ALIGN);
        self.data.resize(padded, 0);
        offset
    }

    /// Append a CExoString, returning its offset.
    pub fn add_exo_string(&mut self, text: &str) -> u32 {
        self.append(&encode_exo_string(text))
    }

    /// Append a CResRef, returning its offset.
    pub fn add_resref(&mut self, resref: &str) -> u32 {
        self.append(&encode_resref(resref))
    }

    /// Append a CExoLocString, returning its offset.
    pub fn add_loc_string(&mut self, value: &LocString) -> u32 {
        self.append(&encode_loc_string(value))
    }

    /// Append an 8-byte value, returning its offset.
    pub fn add_u64(&mut self, value: u64) -> u32 {
        let mut bytes = Vec::with_capacity(8);
        // Writing into a Vec cannot fail.
        let _ = bytes.write_u64::<LittleEndian>(value);
        self.append(&bytes)
    }

    /// Consume the builder and return the blob.
    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Read a CExoString at `offset`.
pub fn read_exo_string(data: &ByteView, offset: usize) -> Result<String> {
    let len = data.u32_at(offset)? as usize;
    Ok(decode_text(data.slice(offset + 4, len)?))
}

/// Read a CResRef at `offset`.
pub fn read_resref(data: &ByteView, offset: usize) -> Result<String> {
    let len = data.u8_at(offset)? as usize;
    let bytes = data.slice(offset + 1, len)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Read a CExoLocString at `offset`.
///
/// Substrings are bounded by the declared total size.
pub fn read_loc_string(data: &ByteView, offset: usize) -> Result<LocString> {
    let total = data.u32_at(offset)? as usize;
    let body = data.section(offset + 4, total)?;

    let str_ref = body.u32_at(0)?;
    let count = body.u32_at(4)?;
    let mut strings = BTreeMap::new();
    let mut pos = 8;
    for _ in 0..count {
        let language = body.u32_at(pos)?;
        let len = body.u32_at(pos + 4)? as usize;
        let text = decode_text(body.slice(pos + 8, len)?);
        strings.insert(language, text);
        pos += 8 + len;
    }

    Ok(LocString { str_ref, strings })
}

/// Read a VOID payload at `offset`.
pub fn read_void(data: &ByteView, offset: usize) -> Result<Vec<u8>> {
    let len = data.u32_at(offset)? as usize;
    Ok(data.slice(offset + 4, len)?.to_vec())
}
