use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};
use mhas::process::file::EditListMode;
use mhas::process::sample::SyncPacketPolicy;
use mhas::structs::packet::MAX_PACKET_LABEL_MAIN_STREAM;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", mhas ",
    env!("MHAS_VERSION"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = VERSION,
    author     = env!("CARGO_PKG_AUTHORS"),
    about      = "Tools for converting MPEG-H 3D Audio MP4 tracks into MHAS packetized streams",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert an mha1/mha2 (or mhm1/mhm2) MP4 file into an mhm1 MP4 file.
    Convert(ConvertArgs),

    /// Print track and configuration information
    Info(InfoArgs),
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Input MP4 file.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Output MP4 file.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,

    /// Handling of the input edit list.
    #[arg(long, value_enum, default_value_t = EditListArg::Copy)]
    pub edit_list: EditListArg,

    /// Initial MHAS packet label (1-16).
    #[arg(
        long,
        value_name = "LABEL",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..=MAX_PACKET_LABEL_MAIN_STREAM)
    )]
    pub packet_label: u64,

    /// When to insert MHAS sync packets.
    #[arg(long, value_enum, default_value_t = SyncArg::EveryFrame)]
    pub sync: SyncArg,

    /// Do not copy track user data boxes.
    #[arg(long)]
    pub no_user_data: bool,

    /// Do not write the profile and level compatibility box (mhaP).
    #[arg(long)]
    pub no_mhap: bool,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Input MP4 file.
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum EditListArg {
    /// Copy the edit list unchanged.
    Copy,
    /// Write no edit list.
    Omit,
    /// Copy the edit list with every media time set to 0.
    Reset,
}

impl From<EditListArg> for EditListMode {
    fn from(arg: EditListArg) -> Self {
        match arg {
            EditListArg::Copy => EditListMode::Copy,
            EditListArg::Omit => EditListMode::Omit,
            EditListArg::Reset => EditListMode::Reset,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum SyncArg {
    /// Before every frame.
    EveryFrame,
    /// Before the first frame only.
    FirstFrame,
    /// Before every immediate playout frame.
    EveryIpf,
    /// Never.
    None,
}

impl From<SyncArg> for SyncPacketPolicy {
    fn from(arg: SyncArg) -> Self {
        match arg {
            SyncArg::EveryFrame => SyncPacketPolicy::EveryFrame,
            SyncArg::FirstFrame => SyncPacketPolicy::FirstFrame,
            SyncArg::EveryIpf => SyncPacketPolicy::EveryIpf,
            SyncArg::None => SyncPacketPolicy::Never,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_defaults() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["mhasconv", "convert", "in.mp4", "-o", "out.mp4"])?;
        let Commands::Convert(args) = cli.command else {
            anyhow::bail!("expected convert");
        };
        assert_eq!(args.packet_label, 1);
        assert_eq!(args.edit_list, EditListArg::Copy);
        assert_eq!(args.sync, SyncArg::EveryFrame);
        assert!(!args.no_user_data);
        assert!(!args.no_mhap);
        Ok(())
    }

    #[test]
    fn packet_label_range() {
        for label in ["0", "17"] {
            let parsed = Cli::try_parse_from([
                "mhasconv",
                "convert",
                "in.mp4",
                "-o",
                "out.mp4",
                "--packet-label",
                label,
            ]);
            assert!(parsed.is_err(), "label {label} accepted");
        }
    }

    #[test]
    fn options_map_to_library() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "mhasconv",
            "--strict",
            "convert",
            "in.mp4",
            "-o",
            "out.mp4",
            "--edit-list",
            "reset",
            "--sync",
            "every-ipf",
            "--packet-label",
            "16",
        ])?;
        assert!(cli.strict);
        let Commands::Convert(args) = cli.command else {
            anyhow::bail!("expected convert");
        };
        assert_eq!(EditListMode::from(args.edit_list), EditListMode::Reset);
        assert_eq!(SyncPacketPolicy::from(args.sync), SyncPacketPolicy::EveryIpf);
        assert_eq!(args.packet_label, 16);
        Ok(())
    }
}
