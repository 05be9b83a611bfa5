use anyhow::{Result, bail};
use log::{debug, info, warn};

use crate::process::convert::Converter;
use crate::process::sample::{
    MhaSampleConverter, MhmSampleConverter, SampleConverter, SyncPacketPolicy,
};
use crate::process::track::{Codec, TrackReader, TrackWriter, TrackWriterConfig};
use crate::structs::profile_level::ProfileLevel;
use crate::utils::errors::FileConversionError;

/// Output major brand.
pub const OUTPUT_MAJOR_BRAND: [u8; 4] = *b"mp42";

/// What to do with the edit list of the input track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditListMode {
    #[default]
    Copy,
    Omit,
    /// Copy with every media time set to zero.
    Reset,
}

/// Knobs of a file conversion.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub copy_user_data: bool,
    /// Write the resolved compatible profile level as `mhaP`.
    pub copy_mhap: bool,
    pub edit_list: EditListMode,
    pub sync_policy: SyncPacketPolicy,
    pub packet_label: u64,
    pub fail_level: log::Level,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            copy_user_data: true,
            copy_mhap: true,
            edit_list: EditListMode::Copy,
            sync_policy: SyncPacketPolicy::EveryFrame,
            packet_label: 1,
            fail_level: log::Level::Error,
        }
    }
}

/// Result of [`FileConverter::process`].
#[derive(Debug, Clone, Default)]
pub struct ConversionSummary {
    pub samples_written: u64,
    pub interrupted: bool,
    pub compatible_profile_level: ProfileLevel,
}

/// Drives the conversion of one track from reader to writer.
///
/// Progress and interruption are polled once per sample. An interrupted
/// conversion returns early and leaves whatever was written in place.
pub struct FileConverter<'a> {
    options: ConversionOptions,
    progress: Box<dyn FnMut(u16) + 'a>,
    interrupt: Box<dyn Fn() -> bool + 'a>,
}

impl<'a> FileConverter<'a> {
    pub fn new(options: ConversionOptions) -> Self {
        Self {
            options,
            progress: Box::new(|_| {}),
            interrupt: Box::new(|| false),
        }
    }

    /// Called with a value in `0..=100` after every sample.
    pub fn with_progress_callback(mut self, progress: impl FnMut(u16) + 'a) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn with_interrupt_callback(mut self, interrupt: impl Fn() -> bool + 'a) -> Self {
        self.interrupt = Box::new(interrupt);
        self
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    /// Converts every sample of `reader`.
    ///
    /// `open_writer` is called once with the output track parameters. The
    /// writer is returned so the caller can finalize it, also after an
    /// interruption.
    pub fn process<R, W, F>(
        &mut self,
        reader: &mut R,
        open_writer: F,
    ) -> Result<(W, ConversionSummary)>
    where
        R: TrackReader,
        W: TrackWriter,
        F: FnOnce(TrackWriterConfig) -> Result<W>,
    {
        let meta = reader.metadata().clone();

        if meta.track_count != 1 {
            bail!(FileConversionError::TrackCount(meta.track_count));
        }

        let mut sample_converter: Box<dyn SampleConverter> = match &meta.codec {
            Codec::Mha => {
                let mut converter = Converter::new(self.options.packet_label)?;
                converter.set_fail_level(self.options.fail_level);
                Box::new(MhaSampleConverter::new(
                    converter,
                    meta.decoder_config_record
                        .as_ref()
                        .map(|record| record.mpegh3da_config.clone()),
                    self.options.sync_policy,
                ))
            }
            Codec::Mhm => Box::new(MhmSampleConverter::new(self.options.sync_policy)),
            Codec::Other(codec) => {
                bail!(FileConversionError::UnsupportedCodec(codec.clone()))
            }
        };

        let mut summary = ConversionSummary::default();

        // Own session, must not share label state with the sample loop.
        let config_record = match meta.decoder_config_record.clone() {
            Some(mut record) => {
                let mut converter = Converter::new(self.options.packet_label)?;
                converter.set_fail_level(self.options.fail_level);

                let converted = converter.convert_config(&record.mpegh3da_config)?;
                summary.compatible_profile_level = converted.compatible_profile_level;
                info!(
                    "Profile Level {}",
                    converted.compatible_profile_level.get()
                );

                record.set_mpegh3da_config(converted.full_config);
                Some(record)
            }
            None => {
                warn!("No Config on MP4-Level of input file, will write no MP4-Level Config");
                None
            }
        };

        let profile_and_level_compatible_sets = if self.options.copy_mhap {
            let level = summary.compatible_profile_level.get();
            info!("Transferring profileAndLevelCompatibleSet from bitstream: {level}");
            vec![level]
        } else {
            warn!("Copy profileAndLevelCompatibleSets is disabled");
            Vec::new()
        };

        let mut writer = open_writer(TrackWriterConfig {
            major_brand: OUTPUT_MAJOR_BRAND,
            compatible_brands: meta.compatible_brands.clone(),
            movie_timescale: meta.movie_timescale,
            language: meta.language.clone(),
            media_timescale: meta.timescale,
            sample_rate: meta.sample_rate,
            config_record,
            profile_and_level_compatible_sets,
        })?;

        if self.options.copy_user_data {
            for entry in &meta.user_data {
                writer.add_user_data(entry)?;
            }
        }

        if self.options.edit_list != EditListMode::Omit {
            for entry in &meta.edit_list {
                let mut entry = *entry;
                if self.options.edit_list == EditListMode::Reset {
                    entry.media_time = 0;
                }
                writer.add_edit_list_entry(&entry)?;
            }
        }

        let total = meta.sample_count;
        if total == 0 {
            bail!(FileConversionError::NoSamples);
        }

        while let Some(sample) = reader.next_sample()? {
            let out = sample_converter.convert_sample(&sample)?;
            if out.data.is_empty() {
                bail!(FileConversionError::EmptySample(summary.samples_written));
            }

            writer.add_sample(&out)?;
            summary.samples_written += 1;

            if (self.interrupt)() {
                summary.interrupted = true;
                return Ok((writer, summary));
            }

            let progress = summary.samples_written * 100 / total;
            if progress <= 100 {
                (self.progress)(progress as u16);
            }
        }

        debug!("Converted {} samples", summary.samples_written);

        (self.progress)(100);
        if (self.interrupt)() {
            summary.interrupted = true;
            info!("Processing Thread Cancelled");
        } else {
            info!("Processing Thread Finished");
        }

        Ok((writer, summary))
    }
}
