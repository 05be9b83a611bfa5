use crate::structs::config::BaselineViolations;

#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err);
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum EscapeError {
    #[error("Value {value} does not fit escapedValue{widths:?}")]
    ValueTooLarge { value: u64, widths: (u32, u32, u32) },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid LC config found: coreSbrFrameLengthIndex = {0}")]
    UnsupportedFrameLengthIndex(u8),

    #[error("Unknown speakerLayoutType detected: {0}")]
    UnsupportedSpeakerLayoutType(u8),

    #[error("Unknown signalGroupType detected: {0}")]
    UnknownSignalGroupType(u8),

    #[error("Error parsing config, bitstream is not baseline compatible: {0}")]
    NotBaselineCompatible(BaselineViolations),

    #[error("Only LC bitstreams are supported, found profile level: {0:#04X}")]
    NotLowComplexity(u8),

    #[error("ID_EXT_ELE_AUDIOPREROLL is not the first ExtElementConfig (element {0})")]
    PreRollNotFirst(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Frame does not contain any payload")]
    EmptyFrame,

    #[error("Frame does not contain any AudioPreRoll, read marker {0:#b}")]
    MissingPreRollMarker(u8),

    #[error("No AudioPreRoll config found and no config available")]
    NoCachedConfig,

    #[error(
        "Invalid extension segment payload length detected: consumed {consumed} bits, declared {declared} bits"
    )]
    ExtensionOverrun { consumed: u64, declared: u64 },

    #[error(
        "AudioPreRoll without crossfade or pre-roll units can lead to audible artifacts during bitrate adaptation"
    )]
    CrossfadeDisabled,

    #[error("numPreRollFrames is {0}, at most one pre-roll frame is allowed")]
    TooManyPreRollUnits(u64),

    #[error(
        "Pre-roll frame is not independently decodable, bitrate adaptation can lead to audible artifacts"
    )]
    PreRollNotIndependent,
}

#[derive(thiserror::Error, Debug)]
pub enum PacketError {
    #[error("MHAS packet declares {declared} payload bytes, only {available} remain")]
    Truncated { declared: u64, available: u64 },

    #[error("MHAS packet header does not start on a byte boundary")]
    Misaligned,
}

#[derive(thiserror::Error, Debug)]
pub enum ConverterError {
    #[error("Provided packet label {label} is outside of [1, {max}]")]
    InvalidPacketLabel { label: u64, max: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum SampleError {
    #[error(
        "First sample is not an Indep frame, this is an unrecoverable error - please check the provided input file"
    )]
    FirstSampleNotIndependent,

    #[error("First sample carries no configuration and the track has none")]
    FirstSampleWithoutConfig,

    #[error("MHAS sample does not carry a frame packet")]
    MissingFramePacket,
}

#[derive(thiserror::Error, Debug)]
pub enum FileConversionError {
    #[error("Only single track files are supported, found {0} tracks")]
    TrackCount(usize),

    #[error("Codec of first track is neither mha nor mhm: {0}")]
    UnsupportedCodec(String),

    #[error("Input file contains no samples")]
    NoSamples,

    #[error("Sample {0} raw data is empty after conversion")]
    EmptySample(u64),
}
