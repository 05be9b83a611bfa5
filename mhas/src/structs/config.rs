//! Decoder configuration (`mpegh3daConfig()`) rewriting.
//!
//! ## Structure
//!
//! - **Fixed header**: profile level, sampling frequency, frame length index
//! - **SpeakerConfig3d**: reference loudspeaker layout
//! - **FrameworkConfig3d**: signal groups (channels, objects, SAOC, HOA)
//! - **DecoderConfig**: core coder elements (SCE, CPE, LFE, EXT)
//! - **Config extensions**: see [`crate::structs::config_extension`]
//!
//! The rewriter walks the grammar once, copying every field it reads into an
//! output bitstream. Only the extension section is altered: the audio scene
//! information is moved out and a compatible profile level set is added when
//! missing. Along the way it records the Baseline profile violations found in
//! the stream.

use std::fmt;

use anyhow::{Result, anyhow, bail};
use bitstream_io::UnsignedInteger;
use log::Level::Warn;
use log::{debug, trace};

use crate::log_or_err;
use crate::structs::profile_level::ProfileLevel;
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};
use crate::utils::errors::ConfigError;

/// `usacExtElementType` of the audio pre-roll extension element.
pub const ID_EXT_ELE_AUDIOPREROLL: u64 = 3;

/// Escape value of `usacSamplingFrequencyIndex`, followed by a 24-bit frequency.
pub const SAMPLING_FREQUENCY_INDEX_ESCAPE: u8 = 0x1F;

const SAMPLING_FREQUENCIES: [u32; 31] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    57600, 51200, 40000, 38400, 34150, 28800, 25600, 20000, 19200, 17075, 14400, 12800, 9600, 0, 0,
    0,
];

/// Maximum number of objects in a signal group for Baseline Level 3.
pub const BASELINE_L3_MAX_OBJECTS: u64 = 24;

/// Reasons a stream cannot be signaled as Baseline profile compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BaselineViolation {
    SignalTypeHoa = 1,
    SignalTypeSaoc = 2,
    InvalidQceIndex = 3,
    InvalidTwMdct = 5,
    InvalidFullbandLpd = 6,
}

impl BaselineViolation {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Insertion ordered set of violations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaselineViolations(Vec<BaselineViolation>);

impl BaselineViolations {
    pub fn push(&mut self, violation: BaselineViolation) {
        if !self.0.contains(&violation) {
            self.0.push(violation);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, violation: BaselineViolation) -> bool {
        self.0.contains(&violation)
    }

    pub fn iter(&self) -> impl Iterator<Item = BaselineViolation> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for BaselineViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", violation.code())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalGroupType {
    Channels = 0,
    Object = 1,
    Saoc = 2,
    Hoa = 3,
}

impl TryFrom<u8> for SignalGroupType {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Channels,
            1 => Self::Object,
            2 => Self::Saoc,
            3 => Self::Hoa,
            v => return Err(ConfigError::UnknownSignalGroupType(v)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalGroup {
    pub signal_type: SignalGroupType,
    pub num_signals: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsacElementType {
    Sce = 0,
    Cpe = 1,
    Lfe = 2,
    Ext = 3,
}

impl From<u8> for UsacElementType {
    fn from(value: u8) -> Self {
        match value & 3 {
            0 => Self::Sce,
            1 => Self::Cpe,
            2 => Self::Lfe,
            _ => Self::Ext,
        }
    }
}

/// Loudspeaker layout signaled by a `SpeakerConfig3d()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerLayout {
    /// Single CICP layout index.
    Cicp(u8),
    /// List of CICP loudspeaker indices.
    CicpSpeakers(u64),
    /// Explicit geometry, number of loudspeakers.
    Flexible(u64),
}

/// Everything learned about a configuration while rewriting it.
#[derive(Debug, Clone)]
pub struct ConfigurationInfo {
    pub violations: BaselineViolations,
    pub fulfills_level3_base_level_restrictions: bool,
    pub profile_level: ProfileLevel,
    pub compatible_profile_level: ProfileLevel,

    pub sampling_frequency_index: u8,
    pub explicit_sampling_frequency: Option<u32>,
    pub core_sbr_frame_length_index: u8,
    pub reference_layout: Option<SpeakerLayout>,
    pub signal_groups: Vec<SignalGroup>,
    pub transport_index_bits: u32,
    pub elements: Vec<UsacElementType>,
    pub extension_types: Vec<u64>,
}

impl Default for ConfigurationInfo {
    fn default() -> Self {
        Self {
            violations: BaselineViolations::default(),
            fulfills_level3_base_level_restrictions: true,
            profile_level: ProfileLevel::default(),
            compatible_profile_level: ProfileLevel::default(),
            sampling_frequency_index: 0,
            explicit_sampling_frequency: None,
            core_sbr_frame_length_index: 0,
            reference_layout: None,
            signal_groups: Vec::new(),
            transport_index_bits: 0,
            elements: Vec::new(),
            extension_types: Vec::new(),
        }
    }
}

impl ConfigurationInfo {
    pub fn sampling_frequency(&self) -> Option<u32> {
        if let Some(freq) = self.explicit_sampling_frequency {
            return Some(freq);
        }

        SAMPLING_FREQUENCIES
            .get(self.sampling_frequency_index as usize)
            .copied()
            .filter(|&f| f != 0)
    }

    pub fn num_signals(&self, signal_type: SignalGroupType) -> u64 {
        self.signal_groups
            .iter()
            .filter(|g| g.signal_type == signal_type)
            .map(|g| g.num_signals)
            .sum()
    }

    pub fn total_signals(&self) -> u64 {
        self.signal_groups.iter().map(|g| g.num_signals).sum()
    }
}

/// Output of a configuration rewrite.
#[derive(Debug, Clone)]
pub struct RewrittenConfig {
    /// Rewritten `mpegh3daConfig()`, byte aligned.
    pub config: Vec<u8>,
    /// Payload of the audio scene information extension, if any.
    pub asi: Option<Vec<u8>>,
    pub info: ConfigurationInfo,
}

/// Single pass reader/writer over one `mpegh3daConfig()`.
pub struct ConfigRewriter<'a> {
    pub(crate) reader: BsIoSliceReader<'a>,
    pub(crate) writer: BitstreamIoWriter,
    pub info: ConfigurationInfo,
    pub fail_level: log::Level,
}

impl<'a> ConfigRewriter<'a> {
    pub fn new(config: &'a [u8]) -> Self {
        Self {
            reader: BsIoSliceReader::from_slice(config),
            writer: BitstreamIoWriter::default(),
            info: ConfigurationInfo::default(),
            fail_level: log::Level::Error,
        }
    }

    pub fn with_fail_level(mut self, level: log::Level) -> Self {
        self.fail_level = level;
        self
    }

    /// Rewrites the whole configuration.
    ///
    /// Collected Baseline violations are returned in the info and are not an
    /// error by themselves. A non-zero QCE index aborts immediately.
    pub fn rewrite(mut self) -> Result<RewrittenConfig> {
        self.copy_until_config_extension()?;
        let asi = self.rewrite_config_extensions()?;

        trace!(
            "Rewritten config: {} bits in, {} bits out",
            self.reader.position()?,
            self.writer.bits_written()
        );

        Ok(RewrittenConfig {
            config: self.writer.into_bytes()?,
            asi,
            info: self.info,
        })
    }

    #[inline(always)]
    pub(crate) fn copy_bit(&mut self) -> Result<bool> {
        let bit = self.reader.get()?;
        self.writer.put(bit)?;
        Ok(bit)
    }

    #[inline(always)]
    pub(crate) fn copy_n<U: UnsignedInteger + Default + Copy>(&mut self, n: u32) -> Result<U> {
        let value = self.reader.get_n::<U>(n)?;
        self.writer.put_n(n, value)?;
        Ok(value)
    }

    #[inline(always)]
    pub(crate) fn copy_escaped(&mut self, n1: u32, n2: u32, n3: u32) -> Result<u64> {
        let value = self.reader.get_escaped(n1, n2, n3)?;
        self.writer.put_escaped(value, n1, n2, n3)?;
        Ok(value)
    }

    pub(crate) fn copy_bytes(&mut self, len: u64) -> Result<()> {
        let bytes = self.reader.get_bytes(len as usize)?;
        self.writer.put_bytes(&bytes)?;
        Ok(())
    }

    fn copy_until_config_extension(&mut self) -> Result<()> {
        let profile_level = self.copy_n::<u8>(8)?;
        self.info.profile_level.set(profile_level);

        let sf_index = self.copy_n::<u8>(5)?;
        self.info.sampling_frequency_index = sf_index;
        if sf_index == SAMPLING_FREQUENCY_INDEX_ESCAPE {
            self.info.explicit_sampling_frequency = Some(self.copy_n::<u32>(24)?);
        }

        let frame_length_index = self.copy_n::<u8>(3)?;
        if frame_length_index >= 2 {
            bail!(ConfigError::UnsupportedFrameLengthIndex(frame_length_index));
        }
        self.info.core_sbr_frame_length_index = frame_length_index;

        // receiverDelayCompensation, reserved
        self.copy_n::<u8>(2)?;

        let layout = self.copy_speaker_config_3d()?;
        self.info.reference_layout = Some(layout);

        let num_bits = self.copy_framework_config_3d()?;
        self.info.transport_index_bits = num_bits;

        self.copy_decoder_config(num_bits)?;

        debug!(
            "Config: profile level {:#04X}, {} signal groups, {} elements",
            profile_level,
            self.info.signal_groups.len(),
            self.info.elements.len()
        );

        Ok(())
    }

    fn copy_speaker_config_3d(&mut self) -> Result<SpeakerLayout> {
        let layout_type = self.copy_n::<u8>(2)?;
        if layout_type == 0 {
            let cicp = self.copy_n::<u8>(6)?;
            return Ok(SpeakerLayout::Cicp(cicp));
        }

        let num_speakers = self.copy_escaped(5, 8, 16)? + 1;

        match layout_type {
            1 => {
                for _ in 0..num_speakers {
                    self.copy_n::<u8>(7)?;
                }
                Ok(SpeakerLayout::CicpSpeakers(num_speakers))
            }
            2 => {
                self.copy_flexible_speaker_config(num_speakers)?;
                Ok(SpeakerLayout::Flexible(num_speakers))
            }
            t => bail!(ConfigError::UnsupportedSpeakerLayoutType(t)),
        }
    }

    fn copy_flexible_speaker_config(&mut self, num_speakers: u64) -> Result<()> {
        let angular_precision = self.copy_bit()?;

        let mut i = 0;
        while i < num_speakers {
            let lateral = self.copy_speaker_description(angular_precision)?;
            if lateral {
                let add_symmetric_pair = self.copy_bit()?;
                if add_symmetric_pair {
                    i += 1;
                }
            }
            i += 1;
        }

        Ok(())
    }

    /// Copies one `mpegh3daSpeakerDescription()`, returns whether the
    /// loudspeaker is off the median plane.
    fn copy_speaker_description(&mut self, angular_precision: bool) -> Result<bool> {
        let is_cicp = self.copy_bit()?;
        if is_cicp {
            self.copy_n::<u8>(7)?;
            return Ok(false);
        }

        let elevation_class = self.copy_n::<u8>(2)?;
        if elevation_class == 3 {
            let elevation_angle = self.copy_n::<u8>(if angular_precision { 7 } else { 5 })?;
            if elevation_angle != 0 {
                // ElevationDirection
                self.copy_bit()?;
            }
        }

        let azimuth = if angular_precision {
            self.copy_n::<u32>(8)?
        } else {
            self.copy_n::<u32>(6)? * 5
        };

        let lateral = azimuth != 0 && azimuth != 180;
        if lateral {
            // AzimuthDirection
            self.copy_bit()?;
        }

        // isLFE
        self.copy_bit()?;

        Ok(lateral)
    }

    /// Copies `FrameworkConfig3d()`, returns the bit width of a transport signal index.
    fn copy_framework_config_3d(&mut self) -> Result<u32> {
        let num_groups = self.copy_n::<u8>(5)? as usize + 1;

        for _ in 0..num_groups {
            let signal_type = SignalGroupType::try_from(self.copy_n::<u8>(3)?)?;
            let num_signals = self.copy_escaped(5, 8, 16)? + 1;

            match signal_type {
                SignalGroupType::Object => {
                    if num_signals > BASELINE_L3_MAX_OBJECTS {
                        self.info.fulfills_level3_base_level_restrictions = false;
                    }
                }
                SignalGroupType::Channels => {
                    self.info.fulfills_level3_base_level_restrictions = false;
                    let differs_from_reference_layout = self.copy_bit()?;
                    if differs_from_reference_layout {
                        self.copy_speaker_config_3d()?;
                    }
                }
                SignalGroupType::Saoc => {
                    self.info.fulfills_level3_base_level_restrictions = false;
                    self.info.violations.push(BaselineViolation::SignalTypeSaoc);
                    let saoc_dmx_layout_present = self.copy_bit()?;
                    if saoc_dmx_layout_present {
                        self.copy_speaker_config_3d()?;
                    }
                }
                SignalGroupType::Hoa => {
                    self.info.fulfills_level3_base_level_restrictions = false;
                    self.info.violations.push(BaselineViolation::SignalTypeHoa);
                }
            }

            self.info.signal_groups.push(SignalGroup {
                signal_type,
                num_signals,
            });
        }

        Ok(transport_index_bits(self.info.total_signals()))
    }

    fn copy_decoder_config(&mut self, num_bits: u32) -> Result<()> {
        let num_elements = self.copy_escaped(4, 8, 16)? + 1;

        // elementLengthPresent
        self.copy_bit()?;

        for i in 0..num_elements as usize {
            let element_type = UsacElementType::from(self.copy_n::<u8>(2)?);
            self.info.elements.push(element_type);

            match element_type {
                UsacElementType::Sce => {
                    self.copy_core_config()?;
                }
                UsacElementType::Cpe => self.copy_cpe_config(num_bits)?,
                UsacElementType::Lfe => {}
                UsacElementType::Ext => self.copy_ext_element_config(i)?,
            }
        }

        Ok(())
    }

    /// Copies `mpegh3daCoreConfig()`, returns `enhancedNoiseFilling`.
    fn copy_core_config(&mut self) -> Result<bool> {
        let tw_mdct = self.copy_bit()?;
        if tw_mdct {
            self.info.violations.push(BaselineViolation::InvalidTwMdct);
        }

        let fullband_lpd = self.copy_bit()?;
        if fullband_lpd {
            self.info.violations.push(BaselineViolation::InvalidFullbandLpd);
        }

        // noiseFilling
        self.copy_bit()?;

        let enhanced_noise_filling = self.copy_bit()?;
        if enhanced_noise_filling {
            // igfUseEnf, igfUseHighRes, igfUseWhitening, igfAfterTnsSynth,
            // igfStartIndex, igfStopIndex
            self.copy_n::<u16>(13)?;
        }

        Ok(enhanced_noise_filling)
    }

    fn copy_cpe_config(&mut self, num_bits: u32) -> Result<()> {
        let enhanced_noise_filling = self.copy_core_config()?;
        if enhanced_noise_filling {
            // igfIndependentTiling
            self.copy_bit()?;
        }

        let qce_index = self.copy_n::<u8>(2)?;
        if qce_index != 0 {
            self.info.violations.push(BaselineViolation::InvalidQceIndex);
            bail!(ConfigError::NotBaselineCompatible(
                self.info.violations.clone()
            ));
        }

        let shift_index1 = self.copy_bit()?;
        if shift_index1 {
            self.copy_n::<u64>(num_bits)?;
        }

        // lpdStereoIndex
        self.copy_bit()?;

        Ok(())
    }

    fn copy_ext_element_config(&mut self, element_index: usize) -> Result<()> {
        let ext_type = self.copy_escaped(4, 8, 16)?;
        if ext_type == ID_EXT_ELE_AUDIOPREROLL && element_index != 0 {
            log_or_err!(
                self,
                Warn,
                anyhow!(ConfigError::PreRollNotFirst(element_index))
            );
        }

        let config_length = self.copy_escaped(4, 8, 16)?;

        let default_length_present = self.copy_bit()?;
        if default_length_present {
            self.copy_escaped(8, 16, 0)?;
        }

        // usacExtElementPayloadFrag
        self.copy_bit()?;

        self.copy_bytes(config_length)
    }
}

/// Bit length of `total - 1`, the width of a transport signal index.
pub fn transport_index_bits(total: u64) -> u32 {
    if total <= 1 {
        0
    } else {
        u64::BITS - (total - 1).leading_zeros()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Builders for synthetic configurations.

    use crate::utils::bitstream_io::BitstreamIoWriter;

    #[derive(Debug, Clone)]
    pub enum TestElement {
        Sce { tw_mdct: bool },
        Cpe { qce_index: u8 },
        Lfe,
        Ext { ext_type: u64, payload: Vec<u8> },
    }

    #[derive(Debug, Clone)]
    pub struct TestConfig {
        pub profile_level: u8,
        pub frame_length_index: u8,
        /// `(signal group type, number of signals)`
        pub signal_groups: Vec<(u8, u64)>,
        pub elements: Vec<TestElement>,
        /// `(usacConfigExtType, payload)`
        pub extensions: Vec<(u64, Vec<u8>)>,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            Self {
                profile_level: 0x0D,
                frame_length_index: 1,
                signal_groups: vec![(1, 6)],
                elements: vec![
                    TestElement::Ext {
                        ext_type: 3,
                        payload: vec![],
                    },
                    TestElement::Cpe { qce_index: 0 },
                    TestElement::Sce { tw_mdct: false },
                    TestElement::Lfe,
                ],
                extensions: vec![],
            }
        }
    }

    impl TestConfig {
        pub fn with_extensions(mut self, extensions: Vec<(u64, Vec<u8>)>) -> Self {
            self.extensions = extensions;
            self
        }

        pub fn build(&self) -> Vec<u8> {
            let mut w = BitstreamIoWriter::default();
            self.write(&mut w).expect("test config");
            w.into_bytes().expect("test config")
        }

        fn write(&self, w: &mut BitstreamIoWriter) -> std::io::Result<()> {
            w.put_n(8, self.profile_level)?;
            w.put_n(5, 3u8)?;
            w.put_n(3, self.frame_length_index)?;
            w.put_n(2, 0u8)?;

            // SpeakerConfig3d: CICP layout 6
            w.put_n(2, 0u8)?;
            w.put_n(6, 6u8)?;

            w.put_n(5, self.signal_groups.len() as u8 - 1)?;
            for &(signal_type, num_signals) in &self.signal_groups {
                w.put_n(3, signal_type)?;
                w.put_escaped(num_signals - 1, 5, 8, 16)?;
                if signal_type == 0 || signal_type == 2 {
                    w.put(false)?;
                }
            }

            w.put_escaped(self.elements.len() as u64 - 1, 4, 8, 16)?;
            w.put(false)?;
            for element in &self.elements {
                match element {
                    TestElement::Sce { tw_mdct } => {
                        w.put_n(2, 0u8)?;
                        Self::write_core(w, *tw_mdct)?;
                    }
                    TestElement::Cpe { qce_index } => {
                        w.put_n(2, 1u8)?;
                        Self::write_core(w, false)?;
                        w.put_n(2, *qce_index)?;
                        w.put(false)?;
                        w.put(false)?;
                    }
                    TestElement::Lfe => w.put_n(2, 2u8)?,
                    TestElement::Ext { ext_type, payload } => {
                        w.put_n(2, 3u8)?;
                        w.put_escaped(*ext_type, 4, 8, 16)?;
                        w.put_escaped(payload.len() as u64, 4, 8, 16)?;
                        w.put(false)?;
                        w.put(false)?;
                        w.put_bytes(payload)?;
                    }
                }
            }

            if self.extensions.is_empty() {
                w.put(false)?;
            } else {
                w.put(true)?;
                w.put_escaped(self.extensions.len() as u64 - 1, 2, 4, 8)?;
                for (ext_type, payload) in &self.extensions {
                    w.put_escaped(*ext_type, 4, 8, 16)?;
                    w.put_escaped(payload.len() as u64, 4, 8, 16)?;
                    w.put_bytes(payload)?;
                }
            }

            Ok(())
        }

        fn write_core(w: &mut BitstreamIoWriter, tw_mdct: bool) -> std::io::Result<()> {
            w.put(tw_mdct)?;
            w.put(false)?;
            w.put(true)?;
            w.put(false)
        }
    }
}
