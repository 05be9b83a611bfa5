//! Bitstream I/O utilities for MPEG-H 3D Audio rewriting.
//!
//! Provides a bounded bit reader over byte slices, an accumulating bit
//! writer, and the tiered `escapedValue()` integer codec used throughout the
//! MPEG-H grammar and the MHAS packet header.

use std::io;
use std::io::SeekFrom;

use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter, UnsignedInteger};

use crate::utils::errors::EscapeError;

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, BigEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get(&mut self) -> io::Result<bool> {
        self.bs.read_bit()
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger + Default>(&mut self, n: u32) -> io::Result<I> {
        if n == 0 {
            return Ok(I::default());
        }

        // Skip bounds check for small reads - bitstream_io handles EOF internally
        if n <= 32 {
            match self.bs.read_unsigned_var(n) {
                Ok(val) => Ok(val),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "get_n({}): out of bounds bits at {}",
                        n,
                        self.bs.position_in_bits().unwrap_or(0)
                    ),
                )),
                Err(e) => Err(e),
            }
        } else {
            self.available().and_then(|avail| {
                if n as u64 > avail {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "get_n({}): out of bounds bits at {}",
                            n,
                            self.bs.position_in_bits().unwrap_or(0)
                        ),
                    ))
                } else {
                    self.bs.read_unsigned_var(n)
                }
            })
        }
    }

    /// Reads an `escapedValue(n1, n2, n3)`.
    ///
    /// A tier whose field is all ones extends into the next tier. A third
    /// tier width of zero means the value has two tiers only.
    pub fn get_escaped(&mut self, n1: u32, n2: u32, n3: u32) -> io::Result<u64> {
        let mut value = self.get_n::<u64>(n1)?;

        if value == all_ones(n1) {
            let value2 = self.get_n::<u64>(n2)?;
            value += value2;

            if value2 == all_ones(n2) && n3 != 0 {
                value += self.get_n::<u64>(n3)?;
            }
        }

        Ok(value)
    }

    /// Reads `len` whole bytes starting at the current (possibly unaligned) position.
    pub fn get_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        if (len as u64) << 3 > self.available()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_bytes({}): out of bounds bits at {}",
                    len,
                    self.position()?
                ),
            ));
        }

        let mut buf = vec![0u8; len];
        self.bs.read_bytes(&mut buf)?;
        Ok(buf)
    }

    /// Moves to an absolute bit position.
    pub fn seek_to(&mut self, position: u64) -> io::Result<u64> {
        if position > self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("seek_to({}): beyond {} bits", position, self.len),
            ));
        }

        self.bs.seek_bits(SeekFrom::Start(position))
    }

    #[inline(always)]
    pub fn available(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits().map(|pos| self.len - pos)
    }

    #[inline(always)]
    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        let len = buf.len() as u64;
        let read = io::Cursor::new(buf);

        Self::new(read, len)
    }
}

/// Accumulates a big-endian bitstream into an owned byte buffer.
pub struct BitstreamIoWriter {
    bs: BitWriter<Vec<u8>, BigEndian>,
    bits: u64,
}

impl Default for BitstreamIoWriter {
    fn default() -> Self {
        Self {
            bs: BitWriter::new(Vec::new()),
            bits: 0,
        }
    }
}

impl BitstreamIoWriter {
    #[inline(always)]
    pub fn put(&mut self, bit: bool) -> io::Result<()> {
        self.bs.write_bit(bit)?;
        self.bits += 1;
        Ok(())
    }

    #[inline(always)]
    pub fn put_n<U: UnsignedInteger>(&mut self, n: u32, value: U) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }

        self.bs.write_unsigned_var(n, value)?;
        self.bits += n as u64;
        Ok(())
    }

    /// Writes `value` as an `escapedValue(n1, n2, n3)` using the shortest tier.
    pub fn put_escaped(&mut self, value: u64, n1: u32, n2: u32, n3: u32) -> io::Result<()> {
        let max1 = all_ones(n1);
        if value < max1 {
            return self.put_n(n1, value);
        }

        let rest = value - max1;
        let max2 = all_ones(n2);
        let max3 = all_ones(n3);

        if rest < max2 || (n3 == 0 && rest == max2) {
            self.put_n(n1, max1)?;
            return self.put_n(n2, rest);
        }

        if n3 == 0 || rest - max2 > max3 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                EscapeError::ValueTooLarge {
                    value,
                    widths: (n1, n2, n3),
                },
            ));
        }

        self.put_n(n1, max1)?;
        self.put_n(n2, max2)?;
        self.put_n(n3, rest - max2)
    }

    pub fn put_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.bs.write_bytes(buf)?;
        self.bits += (buf.len() as u64) << 3;
        Ok(())
    }

    /// Copies every bit of `bytes[..]` up to `len_bits`, including a trailing partial byte.
    pub fn put_bits_from(&mut self, bytes: &[u8], len_bits: u64) -> io::Result<()> {
        let whole = (len_bits >> 3) as usize;
        self.put_bytes(&bytes[..whole])?;

        let remainder = (len_bits & 7) as u32;
        if remainder != 0 {
            self.put_n(remainder, bytes[whole] >> (8 - remainder))?;
        }

        Ok(())
    }

    pub fn byte_align(&mut self) -> io::Result<()> {
        let pad = ((8 - (self.bits & 7)) & 7) as u32;
        self.put_n(pad, 0u8)
    }

    pub fn bits_written(&self) -> u64 {
        self.bits
    }

    /// Number of bytes the stream occupies once padded to a byte boundary.
    pub fn bytes_written(&self) -> u64 {
        self.bits.div_ceil(8)
    }

    /// Pads to a byte boundary and returns the accumulated bytes.
    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        self.byte_align()?;
        Ok(self.bs.into_writer())
    }
}

#[inline(always)]
fn all_ones(n: u32) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}

/// Number of bits `value` occupies as an `escapedValue(n1, n2, n3)`.
pub fn escaped_bits(value: u64, n1: u32, n2: u32, n3: u32) -> u64 {
    let max1 = all_ones(n1);
    if value < max1 {
        return n1 as u64;
    }

    let rest = value - max1;
    let max2 = all_ones(n2);
    if rest < max2 || n3 == 0 {
        (n1 + n2) as u64
    } else {
        (n1 + n2 + n3) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escaped_roundtrip(value: u64, widths: (u32, u32, u32)) -> io::Result<(u64, u64)> {
        let mut writer = BitstreamIoWriter::default();
        writer.put_escaped(value, widths.0, widths.1, widths.2)?;
        let bits = writer.bits_written();
        let bytes = writer.into_bytes()?;

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let decoded = reader.get_escaped(widths.0, widths.1, widths.2)?;
        assert_eq!(reader.position()?, bits);
        Ok((decoded, bits))
    }

    #[test]
    fn escaped_value_picks_shortest_tier() -> io::Result<()> {
        assert_eq!(escaped_roundtrip(5, (4, 8, 16))?, (5, 4));
        assert_eq!(escaped_roundtrip(15, (4, 8, 16))?, (15, 12));
        assert_eq!(escaped_roundtrip(15 + 254, (4, 8, 16))?, (269, 12));
        assert_eq!(escaped_roundtrip(15 + 255, (4, 8, 16))?, (270, 28));
        assert_eq!(escaped_roundtrip(3 + 15 + 255, (2, 4, 8))?, (273, 14));
        Ok(())
    }

    #[test]
    fn escaped_value_two_tier_upper_bound() -> io::Result<()> {
        // n3 == 0: the second tier may be saturated without a third field
        assert_eq!(escaped_roundtrip(255 + 65535, (8, 16, 0))?, (65790, 24));

        let mut writer = BitstreamIoWriter::default();
        assert!(writer.put_escaped(255 + 65536, 8, 16, 0).is_err());
        Ok(())
    }

    #[test]
    fn escaped_bits_matches_writer() -> io::Result<()> {
        for value in [0u64, 2046, 2047, 2048, 2047 + 16_777_214, 2047 + 16_777_215] {
            let mut writer = BitstreamIoWriter::default();
            writer.put_escaped(value, 11, 24, 24)?;
            assert_eq!(writer.bits_written(), escaped_bits(value, 11, 24, 24));
        }
        Ok(())
    }

    #[test]
    fn unaligned_bytes_and_trailing_bits() -> io::Result<()> {
        let mut writer = BitstreamIoWriter::default();
        writer.put_n(3, 0b101u8)?;
        writer.put_bytes(&[0xAB, 0xCD])?;
        writer.put_bits_from(&[0xF0], 4)?;
        assert_eq!(writer.bits_written(), 23);
        let bytes = writer.into_bytes()?;
        assert_eq!(bytes, vec![0b1011_0101, 0b0111_1001, 0b1011_1110]);

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        assert_eq!(reader.get_n::<u8>(3)?, 0b101);
        assert_eq!(reader.get_bytes(2)?, vec![0xAB, 0xCD]);
        assert_eq!(reader.get_n::<u8>(4)?, 0xF);
        assert!(reader.get_bytes(1).is_err());
        Ok(())
    }
}
