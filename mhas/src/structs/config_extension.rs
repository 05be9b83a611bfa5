//! `mpegh3daConfigExtension()` handling.
//!
//! - **Audio scene information** (type 3) is removed from the config and
//!   returned separately, it travels in its own MHAS packet.
//! - **Compatible profile level set** (type 7) is copied, its last
//!   indication becomes the compatible profile level.
//! - Any other extension is copied unchanged.
//!
//! When a Low Complexity stream carries no compatible profile level set, one
//! is synthesized that points at the matching Baseline level.

use anyhow::{Result, bail};
use log::{info, trace, warn};

use crate::structs::config::ConfigRewriter;
use crate::structs::profile_level::{
    BASELINE_LEVEL_1, BASELINE_LEVEL_3, BASELINE_OFFSET, LOW_COMPLEXITY_LEVEL_4, is_low_complexity,
};
use crate::utils::bitstream_io::BitstreamIoWriter;
use crate::utils::errors::ConfigError;

pub const ID_CONFIG_EXT_FILL: u64 = 0;
pub const ID_CONFIG_EXT_DOWNMIX: u64 = 1;
pub const ID_CONFIG_EXT_LOUDNESS_INFO: u64 = 2;
pub const ID_CONFIG_EXT_AUDIOSCENE_INFO: u64 = 3;
pub const ID_CONFIG_EXT_HOA_MATRIX: u64 = 4;
pub const ID_CONFIG_EXT_ICG: u64 = 5;
pub const ID_CONFIG_EXT_SIG_GROUP_INFO: u64 = 6;
pub const ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET: u64 = 7;

pub fn config_extension_name(ext_type: u64) -> &'static str {
    match ext_type {
        ID_CONFIG_EXT_FILL => "ID_CONFIG_EXT_FILL",
        ID_CONFIG_EXT_DOWNMIX => "ID_CONFIG_EXT_DOWNMIX",
        ID_CONFIG_EXT_LOUDNESS_INFO => "ID_CONFIG_EXT_LOUDNESS_INFO",
        ID_CONFIG_EXT_AUDIOSCENE_INFO => "ID_CONFIG_EXT_AUDIOSCENE_INFO",
        ID_CONFIG_EXT_HOA_MATRIX => "ID_CONFIG_EXT_HOA_MATRIX",
        ID_CONFIG_EXT_ICG => "ID_CONFIG_EXT_ICG",
        ID_CONFIG_EXT_SIG_GROUP_INFO => "ID_CONFIG_EXT_SIG_GROUP_INFO",
        ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET => "ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET",
        _ => "reserved",
    }
}

impl ConfigRewriter<'_> {
    /// Rewrites the extension section and byte aligns the output.
    ///
    /// Returns the audio scene information payload, if a non-empty one was found.
    pub(crate) fn rewrite_config_extensions(&mut self) -> Result<Option<Vec<u8>>> {
        let extensions_present = self.reader.get()?;
        let num_extensions = if extensions_present {
            self.reader.get_escaped(2, 4, 8)? + 1
        } else {
            0
        };

        let mut kept = BitstreamIoWriter::default();
        let mut num_kept = 0u64;
        let mut asi = None;
        let mut compatible_set_found = false;

        for _ in 0..num_extensions {
            let ext_type = self.reader.get_escaped(4, 8, 16)?;
            let length = self.reader.get_escaped(4, 8, 16)?;
            let payload = self.reader.get_bytes(length as usize)?;

            trace!(
                "Config extension {} ({ext_type}), {length} bytes",
                config_extension_name(ext_type)
            );

            match ext_type {
                ID_CONFIG_EXT_AUDIOSCENE_INFO => {
                    asi = Some(payload);
                    continue;
                }
                ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET => {
                    info!("Found ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET, will not be overwritten");
                    compatible_set_found = true;
                    if let Some(&last) = payload.last() {
                        info!("CompatibleProfileLevel {last}");
                        self.info.compatible_profile_level.set(last);
                    }
                }
                _ => {}
            }

            write_extension(&mut kept, ext_type, &payload)?;
            self.info.extension_types.push(ext_type);
            num_kept += 1;
        }

        if !compatible_set_found && self.info.profile_level.get() < BASELINE_LEVEL_1 {
            let indication = self.compatible_set_indication()?;
            info!("Adding CompatibleProfileLevel {indication}");
            write_extension(
                &mut kept,
                ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET,
                // bsNumCompatibleSets = 0, reserved = 0
                &[0x00, indication],
            )?;
            self.info
                .extension_types
                .push(ID_CONFIG_EXT_COMPATIBLE_PROFILELVL_SET);
            self.info.compatible_profile_level.set(indication);
            num_kept += 1;
        } else {
            warn!("Skipping CompatibleSetIndication (extension already present)");
        }

        if num_kept != 0 {
            self.writer.put(true)?;
            self.writer.put_escaped(num_kept - 1, 2, 4, 8)?;

            let kept_bits = kept.bits_written();
            let kept_bytes = kept.into_bytes()?;
            self.writer.put_bits_from(&kept_bytes, kept_bits)?;
        } else {
            self.writer.put(false)?;
        }

        self.writer.byte_align()?;

        Ok(asi.filter(|payload: &Vec<u8>| !payload.is_empty()))
    }

    /// Baseline level a Low Complexity stream is compatible with.
    fn compatible_set_indication(&self) -> Result<u8> {
        let level = self.info.profile_level.get();
        if !is_low_complexity(level) {
            bail!(ConfigError::NotLowComplexity(level));
        }

        if level == LOW_COMPLEXITY_LEVEL_4 && self.info.fulfills_level3_base_level_restrictions {
            Ok(BASELINE_LEVEL_3)
        } else {
            Ok(level + BASELINE_OFFSET)
        }
    }
}

fn write_extension(writer: &mut BitstreamIoWriter, ext_type: u64, payload: &[u8]) -> Result<()> {
    writer.put_escaped(ext_type, 4, 8, 16)?;
    writer.put_escaped(payload.len() as u64, 4, 8, 16)?;
    writer.put_bytes(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::config::fixtures::TestConfig;

    fn rewrite(config: &TestConfig) -> Result<crate::structs::config::RewrittenConfig> {
        ConfigRewriter::new(&config.build()).rewrite()
    }

    #[test]
    fn synthesizes_baseline_compatible_set() -> Result<()> {
        for (level, expected) in [(0x0B, 0x10), (0x0D, 0x12), (0x0F, 0x14)] {
            let input = TestConfig {
                profile_level: level,
                ..Default::default()
            };
            let out = rewrite(&input)?;

            let expected_config = TestConfig {
                profile_level: level,
                ..Default::default()
            }
            .with_extensions(vec![(7, vec![0x00, expected])])
            .build();

            assert_eq!(out.config, expected_config);
            assert_eq!(out.info.compatible_profile_level.raw(), Some(expected));
            assert_eq!(out.asi, None);
        }
        Ok(())
    }

    #[test]
    fn lc4_with_level3_restrictions_maps_to_baseline_3() -> Result<()> {
        let objects = TestConfig {
            profile_level: 0x0E,
            signal_groups: vec![(1, 16)],
            ..Default::default()
        };
        assert_eq!(
            rewrite(&objects)?.info.compatible_profile_level.raw(),
            Some(0x12)
        );

        let channels = TestConfig {
            profile_level: 0x0E,
            signal_groups: vec![(0, 2)],
            ..Default::default()
        };
        assert_eq!(
            rewrite(&channels)?.info.compatible_profile_level.raw(),
            Some(0x13)
        );
        Ok(())
    }

    #[test]
    fn asi_is_extracted_and_unknown_extensions_kept_in_place() -> Result<()> {
        let asi = vec![0x11, 0x22, 0x33, 0x44];
        let input = TestConfig::default().with_extensions(vec![
            (9, vec![1, 2, 3]),
            (3, asi.clone()),
            (2, vec![0xFE; 20]),
        ]);
        let out = rewrite(&input)?;

        let expected = TestConfig::default()
            .with_extensions(vec![
                (9, vec![1, 2, 3]),
                (2, vec![0xFE; 20]),
                (7, vec![0x00, 0x12]),
            ])
            .build();

        assert_eq!(out.config, expected);
        assert_eq!(out.asi, Some(asi));
        assert_eq!(out.info.extension_types, vec![9, 2, 7]);
        Ok(())
    }

    #[test]
    fn empty_asi_counts_as_absent() -> Result<()> {
        let out = rewrite(&TestConfig::default().with_extensions(vec![(3, vec![])]))?;
        assert_eq!(out.asi, None);
        Ok(())
    }

    #[test]
    fn existing_compatible_set_is_not_overwritten() -> Result<()> {
        let input = TestConfig::default().with_extensions(vec![(7, vec![0x10, 0x11, 0x12])]);
        let out = rewrite(&input)?;

        assert_eq!(out.config, input.build());
        assert_eq!(out.info.compatible_profile_level.raw(), Some(0x12));
        Ok(())
    }

    #[test]
    fn baseline_stream_gets_no_compatible_set() -> Result<()> {
        let input = TestConfig {
            profile_level: 0x12,
            ..Default::default()
        };
        let out = rewrite(&input)?;

        assert_eq!(out.config, input.build());
        assert_eq!(out.info.compatible_profile_level.raw(), None);
        Ok(())
    }

    #[test]
    fn non_lc_profile_cannot_be_made_compatible() {
        let input = TestConfig {
            profile_level: 0x03,
            ..Default::default()
        };
        let err = rewrite(&input).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NotLowComplexity(0x03))
        ));
    }
}
