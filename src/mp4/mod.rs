//! Minimal ISOBMFF support for single track MPEG-H files.

use std::io::{self, Read};

use anyhow::{Result, bail};
use thiserror::Error;

use crate::byteorder::WriteBytesBe;

pub mod reader;
pub mod writer;

/// Seconds between 1904-01-01 and 1970-01-01.
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

#[derive(Error, Debug)]
pub enum Mp4Error {
    #[error("Missing '{0}' box")]
    MissingBox(&'static str),
    #[error("Invalid size {size} of '{box_type}' box")]
    InvalidBoxSize { box_type: String, size: u64 },
    #[error("'{0}' box truncated")]
    Truncated(String),
    #[error("Unsupported version {version} of '{box_type}' box")]
    UnsupportedVersion { box_type: String, version: u8 },
    #[error("Sample table inconsistent: {0}")]
    InconsistentSampleTable(&'static str),
    #[error("Track has no sample entry")]
    NoSampleEntry,
    #[error("Writer already finished")]
    Finished,
}

pub fn fourcc(box_type: &[u8; 4]) -> String {
    String::from_utf8_lossy(box_type).into_owned()
}

pub trait Mp4Box {
    fn box_type(&self) -> &[u8; 4];
    fn box_data(&self) -> Vec<u8>;

    fn write_box(&self, dst: &mut Vec<u8>) {
        write_box(dst, self.box_type(), &self.box_data());
    }
}

/// Appends a box with a 32-bit size, or a 64-bit one if the payload needs it.
pub fn write_box(dst: &mut Vec<u8>, box_type: &[u8; 4], payload: &[u8]) {
    let size = payload.len() as u64 + 8;
    match u32::try_from(size) {
        Ok(size) => {
            size.write_be(dst);
            dst.extend_from_slice(box_type);
        }
        Err(_) => {
            1u32.write_be(dst);
            dst.extend_from_slice(box_type);
            (size + 8).write_be(dst);
        }
    }
    dst.extend_from_slice(payload);
}

pub fn full_box_header(version: u8, flags: u32) -> u32 {
    ((version as u32) << 24) | (flags & 0x00FF_FFFF)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    pub header_size: u64,
    /// Total size including the header, `None` if the box extends to the end of the file.
    pub size: Option<u64>,
}

impl BoxHeader {
    pub fn payload_size(&self) -> Option<u64> {
        self.size.map(|size| size - self.header_size)
    }
}

/// Reads a box header, `None` at a clean end of stream.
pub fn read_box_header<R: Read>(reader: &mut R) -> Result<Option<BoxHeader>> {
    let mut header = [0u8; 8];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let box_type = [header[4], header[5], header[6], header[7]];
    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;

    let (size, header_size) = match size {
        0 => (None, 8),
        1 => {
            let mut large = [0u8; 8];
            reader.read_exact(&mut large)?;
            (Some(u64::from_be_bytes(large)), 16)
        }
        size => (Some(size), 8),
    };

    if let Some(size) = size {
        if size < header_size {
            bail!(Mp4Error::InvalidBoxSize {
                box_type: fourcc(&box_type),
                size,
            });
        }
    }

    Ok(Some(BoxHeader {
        box_type,
        header_size,
        size,
    }))
}

/// Iterates the child boxes of an in-memory payload.
pub struct BoxIter<'a> {
    data: &'a [u8],
}

impl<'a> BoxIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Result<([u8; 4], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        let mut cursor = self.data;
        let header = match read_box_header(&mut cursor) {
            Ok(Some(header)) => header,
            Ok(None) => {
                let err = Mp4Error::Truncated("box header".to_string());
                self.data = &[];
                return Some(Err(err.into()));
            }
            Err(e) => {
                self.data = &[];
                return Some(Err(e));
            }
        };

        let total = header.size.unwrap_or(self.data.len() as u64);
        if total > self.data.len() as u64 {
            self.data = &[];
            return Some(Err(Mp4Error::Truncated(fourcc(&header.box_type)).into()));
        }

        let (current, rest) = self.data.split_at(total as usize);
        self.data = rest;
        Some(Ok((header.box_type, &current[header.header_size as usize..])))
    }
}

/// Finds the first child box of the given type.
pub fn find_box<'a>(data: &'a [u8], box_type: &[u8; 4]) -> Result<Option<&'a [u8]>> {
    for entry in BoxIter::new(data) {
        let (found, payload) = entry?;
        if &found == box_type {
            return Ok(Some(payload));
        }
    }
    Ok(None)
}

/// Big-endian field reader over a box payload.
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    box_type: [u8; 4],
}

macro_rules! impl_read_be {
    ($($name:ident: $t:ty),+) => { $(
        pub fn $name(&mut self) -> Result<$t> {
            let bytes = self.bytes(std::mem::size_of::<$t>())?;
            let mut buf = [0u8; std::mem::size_of::<$t>()];
            buf.copy_from_slice(bytes);
            Ok(<$t>::from_be_bytes(buf))
        }
    )+ }
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], box_type: &[u8; 4]) -> Self {
        Self {
            data,
            pos: 0,
            box_type: *box_type,
        }
    }

    impl_read_be!(u8: u8, u16: u16, u32: u32, u64: u64, i16: i16, i32: i32, i64: i64);

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let Some(bytes) = self.data.get(self.pos..self.pos + n) else {
            bail!(Mp4Error::Truncated(fourcc(&self.box_type)));
        };
        self.pos += n;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    /// Version and flags of a full box.
    pub fn full_box(&mut self) -> Result<(u8, u32)> {
        let value = self.u32()?;
        Ok(((value >> 24) as u8, value & 0x00FF_FFFF))
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    pub fn unsupported_version(&self, version: u8) -> Mp4Error {
        Mp4Error::UnsupportedVersion {
            box_type: fourcc(&self.box_type),
            version,
        }
    }
}
