//! Byte-level codec: the read cursor, ABC integer primitives, and the error type.

// Copyright 2020 Google Inc. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// What went wrong during a decode.
#[derive(Error, Debug)]
pub enum DecodeErrorKind {
    #[error("unexpected end of input")]
    Truncated,
    #[error("invalid UTF-8 in string entry")]
    BadEncoding(#[from] std::str::Utf8Error),
    #[error("unsupported SWF signature {0:?}")]
    BadSignature([u8; 3]),
    #[error("unrecognized multiname kind 0x{0:02X}")]
    BadMultiname(u8),
    #[error("unrecognized trait kind 0x{0:02X}")]
    BadTrait(u8),
    #[error("unrecognized opcode 0x{0:02X}")]
    UnknownOpcode(u8),
    #[error("{pool} index {index} out of range for pool of length {len}")]
    IndexOutOfRange {
        pool: &'static str,
        index: u32,
        len: usize,
    },
    #[error("bad zlib stream in compressed body: {0}")]
    BadZlib(#[source] std::io::Error),
}

/// A decode failure, annotated with the byte offset of the failing read when
/// it came from a cursor. Consistency-check failures carry no offset.
#[derive(Debug)]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub offset: Option<usize>,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} at byte offset {offset}", self.kind),
            None => self.kind.fmt(f),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<DecodeErrorKind> for DecodeError {
    fn from(kind: DecodeErrorKind) -> Self {
        Self { kind, offset: None }
    }
}

/// A read cursor over a borrowed byte buffer.
///
/// All multi-byte primitives are little-endian, matching both the SWF
/// container and the ABC block format.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Builds a [`DecodeError`] anchored at the current position.
    #[must_use]
    pub fn err(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError {
            kind,
            offset: Some(self.pos),
        }
    }

    /// Hands out a view of the next `n` bytes and advances past them.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| self.err(DecodeErrorKind::Truncated))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.read_bytes(8)?;
        let mut raw = [0; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_le_bytes(raw))
    }

    /// Reads a little-endian 24-bit integer, sign-extended from bit 23.
    pub fn read_s24(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.read_bytes(3)?;
        let raw = u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16;
        Ok(((raw << 8) as i32) >> 8)
    }

    /// Reads an unsigned LEB128 integer.
    ///
    /// The sequence ends at the first byte without the continuation bit, or
    /// after five 7-bit groups, whichever comes first. The 5-group cap clamps
    /// malformed unbounded sequences instead of erroring; bits above 31 are
    /// discarded.
    pub fn read_var_u32(&mut self) -> Result<u32, DecodeError> {
        let mut result: u64 = 0;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(result as u32)
    }

    /// Reads a variable-length signed 32-bit integer: the unsigned LEB128
    /// value reinterpreted as two's-complement.
    pub fn read_var_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_var_u32()? as i32)
    }

    /// Reads a `var_u32` length followed by that many bytes of UTF-8.
    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_var_u32()? as usize;
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(err) => Err(DecodeError {
                kind: DecodeErrorKind::BadEncoding(err),
                offset: Some(start),
            }),
        }
    }

    /// Reads up to (and consumes) a NUL terminator; decodes as UTF-8.
    pub fn read_cstr(&mut self) -> Result<String, DecodeError> {
        let len = self.buf[self.pos..]
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(DecodeError {
                kind: DecodeErrorKind::Truncated,
                offset: Some(self.buf.len()),
            })?;
        let start = self.pos;
        let bytes = &self.buf[start..start + len];
        self.pos = start + len + 1;
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(err) => Err(DecodeError {
                kind: DecodeErrorKind::BadEncoding(err),
                offset: Some(start),
            }),
        }
    }
}

/// Serialization into any [`std::io::Write`] sink.
pub trait Encode {
    fn encode(&self, w: &mut impl std::io::Write) -> std::io::Result<()>;
}

/// Deserialization from a [`Reader`] cursor.
pub trait Decode: Sized {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;
}

pub fn write_u8(w: &mut impl std::io::Write, value: u8) -> std::io::Result<()> {
    w.write_all(&[value])
}

pub fn write_u16(w: &mut impl std::io::Write, value: u16) -> std::io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn write_u32(w: &mut impl std::io::Write, value: u32) -> std::io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn write_f64(w: &mut impl std::io::Write, value: f64) -> std::io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// Writes the low 24 bits of `value`, little-endian.
pub fn write_s24(w: &mut impl std::io::Write, value: i32) -> std::io::Result<()> {
    w.write_all(&value.to_le_bytes()[..3])
}

pub fn write_var_u32(w: &mut impl std::io::Write, value: u32) -> std::io::Result<()> {
    leb128::write::unsigned(w, u64::from(value)).map(|_| ())
}

/// Writes a signed 32-bit integer wrapped to its two's-complement unsigned
/// form and emitted as unsigned LEB128. This is the wire form the format
/// uses, not canonical sign-extended LEB128: `-1` becomes the five bytes of
/// `0xFFFF_FFFF`.
pub fn write_var_i32(w: &mut impl std::io::Write, value: i32) -> std::io::Result<()> {
    write_var_u32(w, value as u32)
}

pub fn write_str(w: &mut impl std::io::Write, s: &str) -> std::io::Result<()> {
    write_var_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

pub fn write_cstr(w: &mut impl std::io::Write, s: &str) -> std::io::Result<()> {
    w.write_all(s.as_bytes())?;
    write_u8(w, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var_u32_bytes(value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        write_var_u32(&mut out, value).unwrap();
        out
    }

    #[test]
    fn var_u32_reference_vector() {
        // 624485 is the canonical LEB128 example value.
        let mut r = Reader::new(&[0xE5, 0x8E, 0x26]);
        assert_eq!(r.read_var_u32().unwrap(), 624_485);
        assert_eq!(var_u32_bytes(624_485), [0xE5, 0x8E, 0x26]);
    }

    #[test]
    fn var_u32_round_trip_edges() {
        for value in [0, 1, 127, 128, 16_383, 16_384, 1 << 30, u32::MAX] {
            let bytes = var_u32_bytes(value);
            let mut r = Reader::new(&bytes);
            assert_eq!(r.read_var_u32().unwrap(), value);
            assert!(r.is_empty());
        }
    }

    #[test]
    fn var_u32_five_group_cap() {
        // The fifth byte still has its continuation bit set; the read stops
        // anyway and the next byte belongs to the following field.
        let mut r = Reader::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x2A]);
        assert_eq!(r.read_var_u32().unwrap(), u32::MAX);
        assert_eq!(r.pos(), 5);
        assert_eq!(r.read_u8().unwrap(), 0x2A);
    }

    #[test]
    fn var_i32_wrap_encoding() {
        let mut out = Vec::new();
        write_var_i32(&mut out, -1).unwrap();
        assert_eq!(out, [0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
        let mut r = Reader::new(&out);
        assert_eq!(r.read_var_i32().unwrap(), -1);
    }

    #[test]
    fn var_i32_round_trip_edges() {
        for value in [0, 1, -1, 63, 64, -64, -65, i32::MAX, i32::MIN] {
            let mut out = Vec::new();
            write_var_i32(&mut out, value).unwrap();
            let mut r = Reader::new(&out);
            assert_eq!(r.read_var_i32().unwrap(), value);
        }
    }

    #[test]
    fn s24_sign_extension() {
        assert_eq!(Reader::new(&[0xFF, 0xFF, 0xFF]).read_s24().unwrap(), -1);
        assert_eq!(
            Reader::new(&[0x00, 0x00, 0x80]).read_s24().unwrap(),
            -8_388_608
        );
        assert_eq!(
            Reader::new(&[0xFF, 0xFF, 0x7F]).read_s24().unwrap(),
            8_388_607
        );

        let mut out = Vec::new();
        write_s24(&mut out, -1).unwrap();
        assert_eq!(out, [0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn strings() {
        let mut out = Vec::new();
        write_str(&mut out, "héllo").unwrap();
        let mut r = Reader::new(&out);
        assert_eq!(r.read_str().unwrap(), "héllo");

        let mut out = Vec::new();
        write_cstr(&mut out, "frame1").unwrap();
        let mut r = Reader::new(&out);
        assert_eq!(r.read_cstr().unwrap(), "frame1");
        assert!(r.is_empty());
    }

    #[test]
    fn bad_encoding_reports_string_start() {
        // Length 2, then an invalid UTF-8 sequence.
        let err = Reader::new(&[0x02, 0xC0, 0x00]).read_str().unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::BadEncoding(_)));
        assert_eq!(err.offset, Some(1));
    }

    #[test]
    fn truncated_reads() {
        let mut r = Reader::new(&[0x01]);
        assert!(matches!(
            r.read_u32().unwrap_err().kind,
            DecodeErrorKind::Truncated
        ));
        // A failed read must not advance the cursor.
        assert_eq!(r.pos(), 0);
        assert!(matches!(
            Reader::new(&[0x61, 0x62]).read_cstr().unwrap_err().kind,
            DecodeErrorKind::Truncated
        ));
    }
}
