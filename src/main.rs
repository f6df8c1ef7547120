use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use log::info;
use structopt::StructOpt;

use uf2pack::{serial, uf2, ConvertOptions};

mod cli;

fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("uf2")
}

fn convert(opts: &cli::ConvertOpts) -> Result<(), anyhow::Error> {
    let output = opts
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&opts.input));

    let mut options = ConvertOptions::new(opts.family);
    options.base_address = opts.base_address;

    println!(
        "Converting {} to {} for {}",
        opts.input.display(),
        output.display(),
        opts.family
    );

    let summary = uf2pack::convert_file(&opts.input, &output, &options).with_context(|| {
        format!(
            "Failed to convert '{}' to a UF2 image",
            opts.input.display()
        )
    })?;

    println!(
        "Wrote {} blocks ({} bytes) from {} segments to {}",
        summary.blocks,
        summary.bytes_written,
        summary.segments,
        output.display()
    );

    Ok(())
}

fn info<P: AsRef<Path>>(path: P) -> Result<(), anyhow::Error> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open UF2 image '{}'", path.display()))?;

    let blocks = uf2::read_blocks(&mut file)
        .with_context(|| format!("Failed to read blocks from '{}'", path.display()))?;
    let info = uf2::inspect(&blocks)
        .with_context(|| format!("'{}' is not a valid UF2 image", path.display()))?;

    println!("Blocks:        {}", info.block_count);
    println!("Payload bytes: {}", info.payload_bytes);
    println!(
        "Address range: {:#010x}..{:#010x}",
        info.start_addr, info.end_addr
    );

    match info.family() {
        Some(family) => println!("Family:        {} ({:#010x})", family, info.family_id),
        None => println!("Family:        unknown ({:#010x})", info.family_id),
    }

    Ok(())
}

fn serve(opts: &cli::ServeOpts) -> Result<(), anyhow::Error> {
    let baud_rate = opts.baud_rate.unwrap_or(serial::DEFAULT_BAUD_RATE);
    let print_duration = opts
        .print_seconds
        .map(Duration::from_secs)
        .unwrap_or(serial::DEFAULT_PRINT_DURATION);

    println!(
        "Using serial device {:?} at {} baud",
        opts.serial_port, baud_rate
    );

    let port = serial::open(&opts.serial_port, baud_rate)?;

    info!("Waiting for kiosk heartbeat");

    serial::serve(port, print_duration)
        .with_context(|| format!("Lost connection on {}", opts.serial_port))?;

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    use cli::Command;

    // Create a logger with a timestamp, filtered through RUST_LOG
    pretty_env_logger::init_timed();

    // Parse the command-line arguments
    let opts = cli::Opts::from_args();

    match &opts.command {
        Command::Convert(convert_opts) => convert(convert_opts)?,
        Command::Info(cli::InfoOpts { filename }) => info(filename)?,
        Command::Serve(serve_opts) => serve(serve_opts)?,
    }

    Ok(())
}
