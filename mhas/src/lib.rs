#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Conversion of MPEG-H 3D Audio (ISO/IEC 23008-3) access units into the
//! MPEG-H Audio Stream (MHAS) packet format.
//!
//! ### Stream Organization
//!
//! **MHA**: raw `mpegh3daFrame()` access units, the decoder configuration sits
//! in the sample entry and in the audio pre-roll of immediate playout frames.
//! **MHAS**: self describing packets, each with type, label and length.
//!
//! ### Packet Labels
//!
//! Config, audio scene information and frame packets of one configuration
//! share a label in `1..=16`. A new label is used exactly when the
//! configuration changes.
//!
//! ## Quick Start
//!
//! 1. Convert the track configuration with [`process::convert::Converter::convert_config`]
//! 2. Convert every access unit with [`process::convert::Converter::convert_frame`]
//! 3. Or let [`process::file::FileConverter`] drive a whole track through the
//!    [`process::track::TrackReader`] and [`process::track::TrackWriter`] traits
//!
//! ```rust,no_run
//! use mhas::process::sample::{MhaSampleConverter, SampleConverter, SyncPacketPolicy};
//! use mhas::process::convert::Converter;
//! use mhas::process::track::Sample;
//!
//! let track_config: Vec<u8> = vec![/* mpegh3daConfig() */];
//! let mut samples = MhaSampleConverter::new(
//!     Converter::new(1)?,
//!     Some(track_config),
//!     SyncPacketPolicy::EveryFrame,
//! );
//!
//! let input = Sample::default();
//! let output = samples.convert_sample(&input)?;
//! println!("{} bytes, sync: {}", output.data.len(), output.is_sync_sample);
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Conversion sessions and track processing.
///
/// 1. **Converter** ([`process::convert`]): Packet label state, config and frame conversion.
///
/// 2. **Samples** ([`process::sample`]): Output sample assembly and sync packet insertion.
///
/// 3. **Files** ([`process::file`]): Whole track conversion with progress reporting.
///
/// 4. **Tracks** ([`process::track`]): Container reader/writer interface.
pub mod process;

/// Bitstream structures of MPEG-H 3D Audio and MHAS.
///
/// - **Decoder Config** ([`structs::config`]): `mpegh3daConfig()` rewriting
/// - **Config Extensions** ([`structs::config_extension`]): ASI extraction, compatible profile levels
/// - **Profile Levels** ([`structs::profile_level`]): `mpegh3daProfileLevelIndication` values
/// - **Packets** ([`structs::packet`]): MHAS packet codec
/// - **Audio Pre-Roll** ([`structs::preroll`]): Immediate playout frame rewriting
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Bit-level reading/writing, escaped values
/// - **Error Handling** ([`utils::errors`]): Error types
pub mod utils;
