use anyhow::{Result, anyhow, bail};
use log::{debug, info};

use crate::structs::config::{ConfigRewriter, ConfigurationInfo};
use crate::structs::packet::{
    ConfigPackets, MAX_PACKET_LABEL_MAIN_STREAM, MhasPacketType, packetize,
};
use crate::structs::preroll::{PreRollRewriter, is_independent, is_ipf};
use crate::structs::profile_level::ProfileLevel;
use crate::utils::errors::{ConfigError, ConverterError, FrameError};

/// Output of [`Converter::convert_config`].
#[derive(Debug, Clone)]
pub struct ConfigConversion {
    /// MPEGH3DACFG packet.
    pub config: Vec<u8>,
    /// AUDIOSCENEINFO packet.
    pub asi: Option<Vec<u8>>,
    /// Rewritten `mpegh3daConfig()` without packet header.
    pub full_config: Vec<u8>,
    pub compatible_profile_level: ProfileLevel,
    pub info: ConfigurationInfo,
}

/// Output of [`Converter::convert_frame`].
#[derive(Debug, Clone, Default)]
pub struct FrameConversion {
    /// MPEGH3DAFRAME packet.
    pub frame: Vec<u8>,
    /// Config packet to place in front of the frame, set for IPFs.
    pub config: Option<Vec<u8>>,
    pub asi: Option<Vec<u8>>,
    pub is_ipf: bool,
    pub is_independent: bool,
}

#[derive(Debug)]
struct ConverterState {
    current_config: Option<Vec<u8>>,
    current_asi: Option<Vec<u8>>,
    current_label: u64,
    frame_number: u64,
    fail_level: log::Level,
}

/// Stateful MHA to MHAS conversion session.
///
/// Keeps the last emitted config and ASI packets and the packet label. The
/// label advances only when the effective configuration changes, so a
/// decoder sees a new label exactly on reconfiguration.
#[derive(Debug)]
pub struct Converter {
    state: ConverterState,
}

impl Default for Converter {
    fn default() -> Self {
        Self {
            state: ConverterState {
                current_config: None,
                current_asi: None,
                current_label: 1,
                frame_number: 1,
                fail_level: log::Level::Error,
            },
        }
    }
}

impl Converter {
    /// Creates a session starting at `initial_label`, which must be in `1..=16`.
    pub fn new(initial_label: u64) -> Result<Self> {
        if initial_label == 0 || initial_label > MAX_PACKET_LABEL_MAIN_STREAM {
            bail!(ConverterError::InvalidPacketLabel {
                label: initial_label,
                max: MAX_PACKET_LABEL_MAIN_STREAM,
            });
        }

        let mut converter = Self::default();
        converter.state.current_label = initial_label;
        Ok(converter)
    }

    /// Sets the failure level for recoverable stream issues.
    ///
    /// - `log::Level::Error`: Only fail on Error level messages (default)
    /// - `log::Level::Warn`: Fail on Warning level and above (strict mode)
    pub fn set_fail_level(&mut self, level: log::Level) {
        self.state.fail_level = level;
    }

    pub fn current_packet_label(&self) -> u64 {
        self.state.current_label
    }

    pub fn frame_number(&self) -> u64 {
        self.state.frame_number
    }

    /// Last emitted config and ASI packets.
    pub fn current_packets(&self) -> Option<ConfigPackets> {
        self.state.current_config.as_ref().map(|config| ConfigPackets {
            config: config.clone(),
            asi: self.state.current_asi.clone(),
        })
    }

    /// Rewrites a `mpegh3daConfig()` and packetizes it under the current label.
    ///
    /// Fails if the configuration is not Baseline compatible.
    pub fn convert_config(&mut self, mpegh3da_config: &[u8]) -> Result<ConfigConversion> {
        let rewritten = ConfigRewriter::new(mpegh3da_config)
            .with_fail_level(self.state.fail_level)
            .rewrite()?;

        let (mut config, mut asi) = self.packetize_config(&rewritten.config, &rewritten.asi)?;

        if !rewritten.info.violations.is_empty() {
            bail!(ConfigError::NotBaselineCompatible(
                rewritten.info.violations.clone()
            ));
        }

        let changed = self
            .state
            .current_config
            .as_ref()
            .is_some_and(|current| *current != config || self.state.current_asi != asi);

        if changed {
            self.advance_label();
            (config, asi) = self.packetize_config(&rewritten.config, &rewritten.asi)?;
            self.state.current_asi = asi.clone();
        } else if asi.is_some() {
            self.state.current_asi = asi.clone();
        }
        self.state.current_config = Some(config.clone());

        Ok(ConfigConversion {
            config,
            asi,
            full_config: rewritten.config,
            compatible_profile_level: rewritten.info.compatible_profile_level,
            info: rewritten.info,
        })
    }

    /// Packetizes one `mpegh3daFrame()`.
    ///
    /// Immediate playout frames get their embedded config removed, the
    /// resolved config and ASI packets are returned alongside the frame.
    pub fn convert_frame(&mut self, mpegh3da_frame: &[u8]) -> Result<FrameConversion> {
        let Some(&first) = mpegh3da_frame.first() else {
            bail!(FrameError::EmptyFrame);
        };

        let ipf = is_ipf(first);
        let mut out = if ipf {
            self.convert_ipf(mpegh3da_frame)?
        } else {
            FrameConversion {
                frame: packetize(
                    MhasPacketType::Mpegh3daFrame,
                    self.state.current_label,
                    mpegh3da_frame,
                )?,
                ..Default::default()
            }
        };

        out.is_ipf = ipf;
        out.is_independent = ipf || is_independent(first);
        self.state.frame_number += 1;

        Ok(out)
    }

    fn convert_ipf(&mut self, mpegh3da_frame: &[u8]) -> Result<FrameConversion> {
        let rewriter = PreRollRewriter::new(mpegh3da_frame, self.state.frame_number)
            .with_fail_level(self.state.fail_level);

        let rewritten = rewriter.rewrite(|embedded| match embedded {
            Some(config) => {
                let converted = self.convert_config(&config)?;
                Ok(ConfigPackets {
                    config: converted.config,
                    asi: converted.asi,
                })
            }
            None => self
                .current_packets()
                .ok_or_else(|| anyhow!(FrameError::NoCachedConfig)),
        })?;

        Ok(FrameConversion {
            frame: packetize(
                MhasPacketType::Mpegh3daFrame,
                self.state.current_label,
                &rewritten.frame,
            )?,
            config: Some(rewritten.packets.config),
            asi: rewritten.packets.asi,
            ..Default::default()
        })
    }

    fn packetize_config(
        &self,
        config: &[u8],
        asi: &Option<Vec<u8>>,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>)> {
        let label = self.state.current_label;
        let config = packetize(MhasPacketType::Mpegh3daConfig, label, config)?;
        let asi = asi
            .as_deref()
            .map(|asi| packetize(MhasPacketType::AudioSceneInfo, label, asi))
            .transpose()?;

        Ok((config, asi))
    }

    fn advance_label(&mut self) {
        let mut label = (self.state.current_label + 1) % (MAX_PACKET_LABEL_MAIN_STREAM + 1);
        if label == 0 {
            label = 1;
        }

        debug!(
            "Configuration changed, packet label {} -> {}",
            self.state.current_label, label
        );
        info!("Switching to packet label {label}");
        self.state.current_label = label;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::config::fixtures::TestConfig;
    use crate::structs::packet::{MhasPacket, parse_packets};
    use crate::structs::preroll::fixtures::ipf;

    fn single_packet(bytes: &[u8]) -> Result<MhasPacket> {
        let mut packets = parse_packets(bytes)?;
        assert_eq!(packets.len(), 1);
        Ok(packets.remove(0))
    }

    fn config_a() -> Vec<u8> {
        TestConfig::default()
            .with_extensions(vec![(3, vec![0xA5; 8])])
            .build()
    }

    fn config_b() -> Vec<u8> {
        TestConfig {
            signal_groups: vec![(1, 4)],
            ..Default::default()
        }
        .with_extensions(vec![(3, vec![0xA5; 8])])
        .build()
    }

    #[test]
    fn initial_label_is_validated() {
        assert!(Converter::new(0).is_err());
        assert!(Converter::new(17).is_err());
        assert_eq!(Converter::new(16).map(|c| c.current_packet_label()).ok(), Some(16));
    }

    #[test]
    fn unchanged_config_keeps_label() -> Result<()> {
        let mut converter = Converter::new(1)?;
        let first = converter.convert_config(&config_a())?;
        let second = converter.convert_config(&config_a())?;

        assert_eq!(converter.current_packet_label(), 1);
        assert_eq!(first.config, second.config);
        assert_eq!(first.asi, second.asi);

        let packet = single_packet(&first.config)?;
        assert_eq!(packet.packet_type, MhasPacketType::Mpegh3daConfig);
        assert_eq!(packet.label, 1);
        assert_eq!(packet.payload, first.full_config);

        let asi = single_packet(first.asi.as_deref().unwrap_or_default())?;
        assert_eq!(asi.packet_type, MhasPacketType::AudioSceneInfo);
        assert_eq!(asi.payload, vec![0xA5; 8]);
        Ok(())
    }

    #[test]
    fn changed_config_advances_label() -> Result<()> {
        let mut converter = Converter::new(1)?;
        converter.convert_config(&config_a())?;
        let changed = converter.convert_config(&config_b())?;

        assert_eq!(converter.current_packet_label(), 2);
        assert_eq!(single_packet(&changed.config)?.label, 2);
        assert_eq!(
            single_packet(changed.asi.as_deref().unwrap_or_default())?.label,
            2
        );
        Ok(())
    }

    #[test]
    fn asi_presence_change_advances_label() -> Result<()> {
        let without_asi = TestConfig::default().build();
        let mut converter = Converter::new(1)?;
        converter.convert_config(&config_a())?;
        let out = converter.convert_config(&without_asi)?;

        assert_eq!(converter.current_packet_label(), 2);
        assert!(out.asi.is_none());
        assert_eq!(converter.current_packets().and_then(|p| p.asi), None);
        Ok(())
    }

    #[test]
    fn label_wraps_to_one() -> Result<()> {
        let mut converter = Converter::new(16)?;
        converter.convert_config(&config_a())?;
        converter.convert_config(&config_b())?;
        assert_eq!(converter.current_packet_label(), 1);
        Ok(())
    }

    #[test]
    fn violations_fail_the_conversion() {
        let saoc = TestConfig {
            signal_groups: vec![(2, 2)],
            ..Default::default()
        }
        .build();

        let mut converter = Converter::default();
        let err = converter.convert_config(&saoc).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error parsing config, bitstream is not baseline compatible: 2"
        );
        assert!(converter.current_packets().is_none());
    }

    #[test]
    fn plain_frame_is_wrapped() -> Result<()> {
        let mut converter = Converter::new(5)?;
        let frame = vec![0x80, 0x01, 0x02];
        let out = converter.convert_frame(&frame)?;

        assert!(!out.is_ipf);
        assert!(out.is_independent);
        assert!(out.config.is_none());

        let packet = single_packet(&out.frame)?;
        assert_eq!(packet.packet_type, MhasPacketType::Mpegh3daFrame);
        assert_eq!(packet.label, 5);
        assert_eq!(packet.payload, frame);

        assert!(!converter.convert_frame(&[0x00])?.is_independent);
        assert_eq!(converter.frame_number(), 3);
        Ok(())
    }

    #[test]
    fn empty_frame_is_rejected() {
        let err = Converter::default().convert_frame(&[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::EmptyFrame)
        ));
    }

    #[test]
    fn ipf_without_config_needs_cache() -> Result<()> {
        let frame = ipf(&[], &[vec![0x80, 0x00]], true, &[0x12, 0x34]);

        let err = Converter::default().convert_frame(&frame).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::NoCachedConfig)
        ));

        let mut converter = Converter::default();
        let cached = converter.convert_config(&config_a())?;
        let out = converter.convert_frame(&frame)?;

        assert!(out.is_ipf);
        assert!(out.is_independent);
        assert_eq!(out.config, Some(cached.config));
        assert_eq!(out.asi, cached.asi);
        assert_eq!(single_packet(&out.frame)?.payload, frame);
        Ok(())
    }

    #[test]
    fn ipf_with_new_config_switches_label() -> Result<()> {
        let frame = ipf(&config_b(), &[vec![0x80, 0x00]], true, &[0x12, 0x34]);

        let mut converter = Converter::default();
        converter.convert_config(&config_a())?;
        let out = converter.convert_frame(&frame)?;

        assert_eq!(converter.current_packet_label(), 2);
        let config = single_packet(out.config.as_deref().unwrap_or_default())?;
        assert_eq!(config.label, 2);

        let packet = single_packet(&out.frame)?;
        assert_eq!(packet.label, 2);
        assert_eq!(
            packet.payload,
            ipf(&[], &[vec![0x80, 0x00]], true, &[0x12, 0x34])
        );
        Ok(())
    }
}
