use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result, bail};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::Level;

use super::command::{Cli, ConvertArgs};
use crate::mp4::reader::Mp4Reader;
use crate::mp4::writer::Mp4Writer;
use mhas::process::file::{ConversionOptions, FileConverter};
use mhas::structs::profile_level::profile_level_name;

pub fn create_progress_bar(multi: &MultiProgress) -> Result<ProgressBar> {
    let pb = multi.add(ProgressBar::new(100));
    pb.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}%\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
    )?);

    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message("converting samples");
    Ok(pb)
}

fn same_file(input: &Path, output: &Path) -> bool {
    match (input.canonicalize(), output.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    }
}

pub fn conversion_options(args: &ConvertArgs, cli: &Cli) -> ConversionOptions {
    ConversionOptions {
        copy_user_data: !args.no_user_data,
        copy_mhap: !args.no_mhap,
        edit_list: args.edit_list.into(),
        sync_policy: args.sync.into(),
        packet_label: args.packet_label,
        fail_level: if cli.strict { Level::Warn } else { Level::Error },
    }
}

pub fn cmd_convert(args: &ConvertArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    if same_file(&args.input, &args.output) {
        bail!("Input and output file must differ");
    }

    log::info!(
        "Converting {} -> {} (strict mode: {})",
        args.input.display(),
        args.output.display(),
        cli.strict
    );

    let options = conversion_options(args, cli);
    log::debug!("{options:?}");

    let input = File::open(&args.input).context("Open input file failed")?;
    let mut reader = Mp4Reader::new(BufReader::new(input)).context("Open input file failed")?;

    let pb = match multi {
        Some(multi) => Some(create_progress_bar(multi)?),
        None => None,
    };

    let start = std::time::Instant::now();

    let output_path = args.output.as_path();
    let (mut writer, summary) = FileConverter::new(options)
        .with_progress_callback(|progress| {
            if let Some(pb) = &pb {
                pb.set_position(progress as u64);
            }
        })
        .process(&mut reader, |config| {
            let output = File::create(output_path).context("Open output file failed")?;
            Mp4Writer::new(BufWriter::new(output), config).context("Open output file failed")
        })?;

    writer.finish()?;

    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }

    let level = summary.compatible_profile_level.get();
    log::info!(
        "Wrote {} samples to {} in {:.3}s, compatible profile level: {}",
        summary.samples_written,
        args.output.display(),
        start.elapsed().as_secs_f64(),
        profile_level_name(level).unwrap_or_else(|| format!("0x{level:02X}"))
    );

    if summary.interrupted {
        log::warn!("Conversion interrupted, output is incomplete");
    }

    Ok(())
}
