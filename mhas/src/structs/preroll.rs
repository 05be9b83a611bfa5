//! Audio pre-roll rewriting for immediate playout frames (IPF).
//!
//! An IPF starts with a `usacExtElement` of type `ID_EXT_ELE_AUDIOPREROLL`:
//!
//! ```text
//! usacIndependencyFlag, usacExtElementPresent, usacExtElementUseDefaultLength  (0b110)
//! usacExtElementPayloadLength                   8 bits, 255 escapes to 16 bits
//! AudioPreRoll() {
//!     configLen                                 escapedValue(4, 4, 8)
//!     Config()                                  configLen bytes
//!     applyCrossfade                            1 bit
//!     reserved                                  1 bit
//!     numPreRollFrames                          escapedValue(2, 4, 0)
//!     for each: auLen escapedValue(16, 16, 0), AccessUnit() auLen bytes
//! }
//! ```
//!
//! In MHAS the configuration travels in its own packet, so the embedded
//! config is removed (`configLen = 0`) and handed back to the caller.

use anyhow::{Result, anyhow, bail};
use log::Level::Warn;
use log::{debug, info};

use crate::log_or_err;
use crate::structs::packet::ConfigPackets;
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::FrameError;

/// Leading 3 bits of an IPF.
pub const IPF_MARKER: u8 = 0b110;

/// First byte mask and value identifying an IPF.
pub const IPF_MASK: u8 = 0xE0;
pub const IPF_PATTERN: u8 = 0xC0;

/// `usacIndependencyFlag` in the first frame byte.
pub const INDEPENDENCY_FLAG: u8 = 0x80;

pub fn is_ipf(first_byte: u8) -> bool {
    first_byte & IPF_MASK == IPF_PATTERN
}

pub fn is_independent(first_byte: u8) -> bool {
    first_byte & INDEPENDENCY_FLAG != 0
}

/// Result of rewriting one IPF.
#[derive(Debug, Clone)]
pub struct RewrittenPreRoll {
    /// `mpegh3daFrame()` with the embedded config removed.
    pub frame: Vec<u8>,
    /// Packets resolved from the embedded or the cached config.
    pub packets: ConfigPackets,
    pub apply_crossfade: bool,
    pub num_pre_roll_frames: u64,
}

pub struct PreRollRewriter<'a> {
    reader: BsIoSliceReader<'a>,
    pub frame_number: u64,
    pub fail_level: log::Level,
}

impl<'a> PreRollRewriter<'a> {
    pub fn new(frame: &'a [u8], frame_number: u64) -> Self {
        Self {
            reader: BsIoSliceReader::from_slice(frame),
            frame_number,
            fail_level: log::Level::Error,
        }
    }

    pub fn with_fail_level(mut self, level: log::Level) -> Self {
        self.fail_level = level;
        self
    }

    /// Rewrites the frame.
    ///
    /// `resolve_config` receives the embedded config, or `None` when the
    /// pre-roll carries none, and returns the packets to attach.
    pub fn rewrite<F>(mut self, resolve_config: F) -> Result<RewrittenPreRoll>
    where
        F: FnOnce(Option<Vec<u8>>) -> Result<ConfigPackets>,
    {
        let mut writer = BitstreamIoWriter::default();

        let marker = self.reader.get_n::<u8>(3)?;
        if marker != IPF_MARKER {
            bail!(FrameError::MissingPreRollMarker(marker));
        }
        writer.put_n(3, marker)?;

        let payload_length = read_ext_payload_length(&mut self.reader)?;
        let begin = self.reader.position()?;
        let end = begin + (payload_length << 3);

        let config_len = self.reader.get_escaped(4, 4, 8)?;
        let embedded = if config_len != 0 {
            Some(self.reader.get_bytes(config_len as usize)?)
        } else {
            None
        };
        let packets = resolve_config(embedded)?;

        let mut body = BitstreamIoWriter::default();
        body.put_escaped(0, 4, 4, 8)?;

        let apply_crossfade = self.reader.get()?;
        body.put(apply_crossfade)?;
        // reserved
        body.put(self.reader.get()?)?;

        let num_pre_roll_frames = self.reader.get_escaped(2, 4, 0)?;
        body.put_escaped(num_pre_roll_frames, 2, 4, 0)?;

        info!("Sample {} is an IPF", self.frame_number);
        debug!("numPreRollFrames {num_pre_roll_frames}, applyCrossfade {apply_crossfade}");

        if !apply_crossfade || num_pre_roll_frames == 0 {
            log_or_err!(self, Warn, anyhow!(FrameError::CrossfadeDisabled));
        }

        if num_pre_roll_frames > 1 {
            log_or_err!(
                self,
                Warn,
                anyhow!(FrameError::TooManyPreRollUnits(num_pre_roll_frames))
            );
        }

        for i in 0..num_pre_roll_frames {
            let au_len = self.reader.get_escaped(16, 16, 0)?;
            body.put_escaped(au_len, 16, 16, 0)?;

            let au = self.reader.get_bytes(au_len as usize)?;
            if i == 0 && au.first().is_some_and(|&b| !is_independent(b)) {
                log_or_err!(self, Warn, anyhow!(FrameError::PreRollNotIndependent));
            }
            body.put_bytes(&au)?;
        }

        let consumed = self.reader.position()?;
        if consumed > end {
            bail!(FrameError::ExtensionOverrun {
                consumed: consumed - begin,
                declared: payload_length << 3,
            });
        }
        self.reader.seek_to(end)?;

        body.byte_align()?;
        write_ext_payload_length(&mut writer, body.bytes_written())?;
        writer.put_bytes(&body.into_bytes()?)?;

        let remaining = self.reader.available()?;
        let tail = self.reader.get_bytes((remaining >> 3) as usize)?;
        writer.put_bytes(&tail)?;
        let tail_bits = (remaining & 7) as u32;
        writer.put_n(tail_bits, self.reader.get_n::<u8>(tail_bits)?)?;

        Ok(RewrittenPreRoll {
            frame: writer.into_bytes()?,
            packets,
            apply_crossfade,
            num_pre_roll_frames,
        })
    }
}

/// `usacExtElementPayloadLength`: 8 bits, 255 escapes to `255 + 16 bits - 2`.
fn read_ext_payload_length(reader: &mut BsIoSliceReader) -> Result<u64> {
    let value = reader.get_n::<u64>(8)?;
    if value == 255 {
        let extra = reader.get_n::<u64>(16)?;
        return Ok(value + extra - 2);
    }
    Ok(value)
}

fn write_ext_payload_length(writer: &mut BitstreamIoWriter, value: u64) -> Result<()> {
    if value > 254 {
        writer.put_n(8, 255u8)?;
        writer.put_n(16, value - 253)?;
    } else {
        writer.put_n(8, value)?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::ipf;
    use super::*;

    fn packets(tag: u8) -> ConfigPackets {
        ConfigPackets {
            config: vec![tag],
            asi: None,
        }
    }

    #[test]
    fn frame_classification() {
        assert!(is_ipf(0xC3));
        assert!(is_ipf(0xDF));
        assert!(!is_ipf(0xE0));
        assert!(!is_ipf(0x40));
        assert!(is_independent(0x80));
        assert!(!is_independent(0x7F));
    }

    #[test]
    fn embedded_config_is_removed() -> Result<()> {
        let config = vec![0x0D, 0x01, 0x02, 0x03, 0x04];
        let au = vec![0x80, 0x11, 0x22];
        let frame = ipf(&config, &[au.clone()], true, &[0xAB, 0xCD]);

        let mut seen = None;
        let out = PreRollRewriter::new(&frame, 0).rewrite(|embedded| {
            seen = embedded;
            Ok(packets(1))
        })?;

        assert_eq!(seen, Some(config));
        assert_eq!(out.packets, packets(1));
        assert!(out.apply_crossfade);
        assert_eq!(out.num_pre_roll_frames, 1);
        assert_eq!(out.frame, ipf(&[], &[au], true, &[0xAB, 0xCD]));
        Ok(())
    }

    #[test]
    fn long_extension_length_escape() -> Result<()> {
        let au = vec![0x80; 400];
        let frame = ipf(&[0x55; 20], &[au.clone()], true, &[0x01]);
        let out = PreRollRewriter::new(&frame, 3).rewrite(|_| Ok(packets(2)))?;

        let expected = ipf(&[], &[au], true, &[0x01]);
        assert_eq!(out.frame, expected);
        assert_eq!(out.frame[0] & IPF_MASK, IPF_PATTERN);
        Ok(())
    }

    #[test]
    fn trailing_partial_byte_is_kept() -> Result<()> {
        // pre-roll body of 3 bytes: configLen 0, crossfade, no units
        let mut w = BitstreamIoWriter::default();
        w.put_n(3, 0b110u8)?;
        w.put_n(8, 2u8)?;
        w.put_n(4, 0u8)?;
        w.put(true)?;
        w.put(false)?;
        w.put_n(2, 0u8)?;
        w.put_n(8, 0u8)?; // padding declared in the payload length
        w.put_n(7, 0b1011011u8)?;
        let frame = w.into_bytes()?;

        let out = PreRollRewriter::new(&frame, 0).rewrite(|embedded| {
            assert!(embedded.is_none());
            Ok(packets(3))
        })?;

        let mut w = BitstreamIoWriter::default();
        w.put_n(3, 0b110u8)?;
        w.put_n(8, 1u8)?;
        w.put_n(4, 0u8)?;
        w.put(true)?;
        w.put(false)?;
        w.put_n(2, 0u8)?;
        w.put_n(7, 0b1011011u8)?;
        w.put_n(1, 0u8)?;
        assert_eq!(out.frame, w.into_bytes()?);
        Ok(())
    }

    #[test]
    fn overrun_is_fatal() -> Result<()> {
        let mut frame = ipf(&[], &[vec![0x80, 0x00, 0x00]], true, &[0; 8]);
        // shrink the declared payload length below what the body needs
        frame[0] = (frame[0] & 0xE0) | 0x00;
        frame[1] = (frame[1] & 0x1F) | (2 << 5);

        let err = PreRollRewriter::new(&frame, 0)
            .rewrite(|_| Ok(packets(0)))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::ExtensionOverrun { .. })
        ));
        Ok(())
    }

    #[test]
    fn missing_marker_is_fatal() {
        let err = PreRollRewriter::new(&[0x80, 0x00], 0)
            .rewrite(|_| Ok(packets(0)))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::MissingPreRollMarker(0b100))
        ));
    }

    #[test]
    fn strict_mode_rejects_dependent_pre_roll() {
        let frame = ipf(&[], &[vec![0x00, 0x01]], true, &[]);
        let err = PreRollRewriter::new(&frame, 0)
            .with_fail_level(log::Level::Warn)
            .rewrite(|_| Ok(packets(0)))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::PreRollNotIndependent)
        ));
    }

    #[test]
    fn resolver_errors_propagate() {
        let frame = ipf(&[], &[vec![0x80]], true, &[]);
        let err = PreRollRewriter::new(&frame, 0)
            .rewrite(|_| Err(anyhow!(FrameError::NoCachedConfig)))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::NoCachedConfig)
        ));
    }
}
