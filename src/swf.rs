//! SWF container framing: signature handling, zlib bodies, and the tag walk.

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

use crate::io::{self, DecodeError, DecodeErrorKind, Reader};
use crate::module::{AbcFile, WriteOptions};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::io::{Read, Write};

pub const TAG_END: u16 = 0x00;
pub const TAG_SYMBOL_CLASS: u16 = 0x4C;
pub const TAG_DO_ABC: u16 = 0x52;
pub const TAG_DEFINE_BINARY_DATA: u16 = 0x57;

/// One `SymbolClass` binding: a character id mapped to a class name.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Symbol {
    pub id: u16,
    pub name: String,
}

/// A single SWF tag. Tags the library does not model are kept verbatim so
/// the container still round-trips.
#[derive(Debug, PartialEq, Clone)]
pub enum Tag {
    DoAbc(AbcFile),
    DefineBinaryData { id: u16, data: Vec<u8> },
    SymbolClass(Vec<Symbol>),
    Raw { code: u16, body: Vec<u8> },
}

impl Tag {
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::DoAbc(_) => TAG_DO_ABC,
            Self::DefineBinaryData { .. } => TAG_DEFINE_BINARY_DATA,
            Self::SymbolClass(_) => TAG_SYMBOL_CLASS,
            Self::Raw { code, .. } => *code,
        }
    }
}

/// A decoded SWF container.
///
/// Only the tags carrying ABC blocks and their lookup tables are decoded;
/// the stage RECT and unrecognized tags ride along as raw bytes. The `End`
/// tag is implicit: dropped on parse, re-emitted on write.
#[derive(Debug, PartialEq, Clone)]
pub struct Swf {
    pub version: u8,
    /// The stage RECT, kept verbatim.
    pub frame_size: Vec<u8>,
    pub frame_rate: u16,
    pub frame_count: u16,
    pub tags: Vec<Tag>,
    /// Whether the input was `CWS`; `write` re-deflates when set.
    pub compressed: bool,
}

impl Swf {
    /// Parses a whole SWF file, inflating a `CWS` body first.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let sig: [u8; 3] = data
            .get(..3)
            .and_then(|sig| sig.try_into().ok())
            .ok_or(DecodeError {
                kind: DecodeErrorKind::Truncated,
                offset: Some(data.len()),
            })?;
        let compressed = match &sig {
            b"FWS" => false,
            b"CWS" => true,
            _ => return Err(DecodeErrorKind::BadSignature(sig).into()),
        };
        if data.len() < 8 {
            return Err(DecodeError {
                kind: DecodeErrorKind::Truncated,
                offset: Some(data.len()),
            });
        }
        let version = data[3];
        let declared_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

        let body: Cow<'_, [u8]> = if compressed {
            let mut inflated = Vec::new();
            ZlibDecoder::new(&data[8..])
                .read_to_end(&mut inflated)
                .map_err(|err| DecodeError {
                    kind: DecodeErrorKind::BadZlib(err),
                    offset: Some(8),
                })?;
            Cow::Owned(inflated)
        } else {
            Cow::Borrowed(&data[8..])
        };
        log::debug!(
            "SWF v{version}, declared length {declared_len}, body {} bytes{}",
            body.len(),
            if compressed { " (inflated)" } else { "" }
        );

        let mut r = Reader::new(&body);
        let frame_size = read_rect(&mut r)?;
        let frame_rate = r.read_u16()?;
        let frame_count = r.read_u16()?;

        let mut tags = Vec::new();
        while !r.is_empty() {
            let record = r.read_u16()?;
            let code = record >> 6;
            let mut len = u32::from(record & 0x3F);
            if len == 0x3F {
                len = r.read_u32()?;
            }
            let tag_data = r.read_bytes(len as usize)?;
            log::debug!("tag 0x{code:02X}, {len} bytes");
            match code {
                TAG_END => break,
                TAG_DO_ABC => tags.push(Tag::DoAbc(AbcFile::from_do_abc(tag_data)?)),
                TAG_DEFINE_BINARY_DATA => {
                    let mut tr = Reader::new(tag_data);
                    let id = tr.read_u16()?;
                    tr.read_u32()?; // reserved
                    tags.push(Tag::DefineBinaryData {
                        id,
                        data: tr.read_bytes(tr.remaining())?.to_vec(),
                    });
                }
                TAG_SYMBOL_CLASS => {
                    let mut tr = Reader::new(tag_data);
                    let count = tr.read_u16()?;
                    let mut symbols = Vec::new();
                    for _ in 0..count {
                        symbols.push(Symbol {
                            id: tr.read_u16()?,
                            name: tr.read_cstr()?,
                        });
                    }
                    tags.push(Tag::SymbolClass(symbols));
                }
                _ => tags.push(Tag::Raw {
                    code,
                    body: tag_data.to_vec(),
                }),
            }
        }

        Ok(Self {
            version,
            frame_size,
            frame_rate,
            frame_count,
            tags,
            compressed,
        })
    }

    /// Re-serializes the container with default ABC write options.
    pub fn write(&self) -> std::io::Result<Vec<u8>> {
        self.write_with(WriteOptions::default())
    }

    /// Re-serializes the container, handing `options` to every embedded ABC
    /// unit. The file length header is recomputed and the body re-deflated
    /// when the source was compressed.
    pub fn write_with(&self, options: WriteOptions) -> std::io::Result<Vec<u8>> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.frame_size);
        io::write_u16(&mut body, self.frame_rate)?;
        io::write_u16(&mut body, self.frame_count)?;

        for tag in &self.tags {
            let tag_body = match tag {
                Tag::DoAbc(abc) => abc.write_with(options)?,
                Tag::DefineBinaryData { id, data } => {
                    let mut out = Vec::with_capacity(data.len() + 6);
                    io::write_u16(&mut out, *id)?;
                    io::write_u32(&mut out, 0)?; // reserved
                    out.extend_from_slice(data);
                    out
                }
                Tag::SymbolClass(symbols) => {
                    let mut out = Vec::new();
                    io::write_u16(&mut out, symbols.len() as u16)?;
                    for symbol in symbols {
                        io::write_u16(&mut out, symbol.id)?;
                        io::write_cstr(&mut out, &symbol.name)?;
                    }
                    out
                }
                Tag::Raw { body, .. } => body.clone(),
            };
            write_tag(&mut body, tag.code(), &tag_body)?;
        }
        write_tag(&mut body, TAG_END, &[])?;

        let mut out = Vec::with_capacity(body.len() + 8);
        out.extend_from_slice(if self.compressed { b"CWS" } else { b"FWS" });
        out.push(self.version);
        io::write_u32(&mut out, (body.len() + 8) as u32)?;
        if self.compressed {
            let mut encoder = ZlibEncoder::new(out, Compression::default());
            encoder.write_all(&body)?;
            out = encoder.finish()?;
        } else {
            out.extend_from_slice(&body);
        }
        Ok(out)
    }

    /// The embedded ABC units, in tag order.
    pub fn abc_units(&self) -> impl Iterator<Item = &AbcFile> {
        self.tags.iter().filter_map(|tag| match tag {
            Tag::DoAbc(abc) => Some(abc),
            _ => None,
        })
    }

    pub fn abc_units_mut(&mut self) -> impl Iterator<Item = &mut AbcFile> {
        self.tags.iter_mut().filter_map(|tag| match tag {
            Tag::DoAbc(abc) => Some(abc),
            _ => None,
        })
    }

    /// All `SymbolClass` bindings, flattened in tag order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.tags
            .iter()
            .filter_map(|tag| match tag {
                Tag::SymbolClass(symbols) => Some(symbols.iter()),
                _ => None,
            })
            .flatten()
    }

    /// All `DefineBinaryData` payloads by character id, in tag order.
    pub fn binary_data(&self) -> impl Iterator<Item = (u16, &[u8])> {
        self.tags.iter().filter_map(|tag| match tag {
            Tag::DefineBinaryData { id, data } => Some((*id, data.as_slice())),
            _ => None,
        })
    }
}

/// Reads the stage RECT as raw bytes: five bits of field width, then four
/// fields of that many bits each.
fn read_rect(r: &mut Reader<'_>) -> Result<Vec<u8>, DecodeError> {
    let first = r.read_u8()?;
    let nbits = u32::from(first >> 3);
    let total_bits = 5 + nbits * 4;
    let total_bytes = (total_bits as usize + 7) / 8 - 1;
    let mut rect = vec![first];
    rect.extend_from_slice(r.read_bytes(total_bytes)?);
    Ok(rect)
}

fn write_tag(w: &mut Vec<u8>, code: u16, body: &[u8]) -> std::io::Result<()> {
    if body.len() < 0x3F {
        io::write_u16(w, (code << 6) | body.len() as u16)?;
    } else {
        io::write_u16(w, (code << 6) | 0x3F)?;
        io::write_u32(w, body.len() as u32)?;
    }
    w.extend_from_slice(body);
    Ok(())
}
