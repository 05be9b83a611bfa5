//! MPEG-H Audio Stream (MHAS) packets.
//!
//! ## Header
//!
//! | Field | Coding |
//! |-------|--------|
//! | MHASPacketType | escapedValue(3, 8, 8) |
//! | MHASPacketLabel | escapedValue(2, 8, 32) |
//! | MHASPacketLength | escapedValue(11, 24, 24) |
//!
//! Every tier width past the first is a multiple of 8 and the first tiers
//! sum to 16 bits, so a header always ends on a byte boundary.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader, escaped_bits};
use crate::utils::errors::PacketError;

/// Highest packet label of the main stream.
pub const MAX_PACKET_LABEL_MAIN_STREAM: u64 = 16;

/// SYNC packet: label 0, one byte payload `0xA5`.
pub const MHAS_SYNC_PACKET: [u8; 3] = [0xC0, 0x01, 0xA5];

/// Payload of a SYNC packet.
pub const MHAS_SYNC_BYTE: u8 = 0xA5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MhasPacketType {
    FillData,
    Mpegh3daConfig,
    Mpegh3daFrame,
    AudioSceneInfo,
    Sync,
    SyncGap,
    Marker,
    Crc16,
    Crc32,
    Descriptor,
    UserInteraction,
    LoudnessDrc,
    BufferInfo,
    GlobalCrc16,
    GlobalCrc32,
    AudioTruncation,
    GenData,
    Earcon,
    Reserved(u64),
}

impl MhasPacketType {
    pub fn value(self) -> u64 {
        match self {
            Self::FillData => 0,
            Self::Mpegh3daConfig => 1,
            Self::Mpegh3daFrame => 2,
            Self::AudioSceneInfo => 3,
            Self::Sync => 6,
            Self::SyncGap => 7,
            Self::Marker => 8,
            Self::Crc16 => 9,
            Self::Crc32 => 10,
            Self::Descriptor => 11,
            Self::UserInteraction => 12,
            Self::LoudnessDrc => 13,
            Self::BufferInfo => 14,
            Self::GlobalCrc16 => 15,
            Self::GlobalCrc32 => 16,
            Self::AudioTruncation => 17,
            Self::GenData => 18,
            Self::Earcon => 19,
            Self::Reserved(v) => v,
        }
    }
}

impl From<u64> for MhasPacketType {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::FillData,
            1 => Self::Mpegh3daConfig,
            2 => Self::Mpegh3daFrame,
            3 => Self::AudioSceneInfo,
            6 => Self::Sync,
            7 => Self::SyncGap,
            8 => Self::Marker,
            9 => Self::Crc16,
            10 => Self::Crc32,
            11 => Self::Descriptor,
            12 => Self::UserInteraction,
            13 => Self::LoudnessDrc,
            14 => Self::BufferInfo,
            15 => Self::GlobalCrc16,
            16 => Self::GlobalCrc32,
            17 => Self::AudioTruncation,
            18 => Self::GenData,
            19 => Self::Earcon,
            v => Self::Reserved(v),
        }
    }
}

/// A single MHAS packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MhasPacket {
    pub packet_type: MhasPacketType,
    pub label: u64,
    pub payload: Vec<u8>,
}

impl MhasPacket {
    pub fn new(packet_type: MhasPacketType, label: u64, payload: Vec<u8>) -> Self {
        Self {
            packet_type,
            label,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        packetize(self.packet_type, self.label, &self.payload)
    }

    /// Reads one packet, the reader must sit on a byte boundary.
    pub fn read(reader: &mut BsIoSliceReader) -> Result<Self> {
        if reader.position()? & 7 != 0 {
            bail!(PacketError::Misaligned);
        }

        let packet_type = MhasPacketType::from(reader.get_escaped(3, 8, 8)?);
        let label = reader.get_escaped(2, 8, 32)?;
        let length = reader.get_escaped(11, 24, 24)?;

        let available = reader.available()? >> 3;
        if length > available {
            bail!(PacketError::Truncated {
                declared: length,
                available,
            });
        }

        let payload = reader.get_bytes(length as usize)?;

        Ok(Self {
            packet_type,
            label,
            payload,
        })
    }
}

fn write_header(
    writer: &mut BitstreamIoWriter,
    packet_type: MhasPacketType,
    label: u64,
    length: u64,
) -> Result<()> {
    writer.put_escaped(packet_type.value(), 3, 8, 8)?;
    writer.put_escaped(label, 2, 8, 32)?;
    writer.put_escaped(length, 11, 24, 24)?;
    Ok(())
}

/// Size in bytes of a packet carrying `payload_len` bytes.
pub fn packet_size(packet_type: MhasPacketType, label: u64, payload_len: usize) -> usize {
    let header_bits = escaped_bits(packet_type.value(), 3, 8, 8)
        + escaped_bits(label, 2, 8, 32)
        + escaped_bits(payload_len as u64, 11, 24, 24);

    (header_bits.div_ceil(8)) as usize + payload_len
}

/// Wraps `payload` into a serialized packet.
pub fn packetize(packet_type: MhasPacketType, label: u64, payload: &[u8]) -> Result<Vec<u8>> {
    let mut writer = BitstreamIoWriter::default();
    write_header(&mut writer, packet_type, label, payload.len() as u64)?;
    writer.put_bytes(payload)?;

    let bytes = writer.into_bytes()?;
    debug_assert_eq!(bytes.len(), packet_size(packet_type, label, payload.len()));
    Ok(bytes)
}

/// Splits a buffer of back to back packets.
pub fn parse_packets(data: &[u8]) -> Result<Vec<MhasPacket>> {
    let mut reader = BsIoSliceReader::from_slice(data);
    let mut packets = Vec::new();

    while reader.available()? != 0 {
        packets.push(MhasPacket::read(&mut reader)?);
    }

    Ok(packets)
}

/// Configuration and audio scene information packets attached to a frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPackets {
    pub config: Vec<u8>,
    pub asi: Option<Vec<u8>>,
}
