use std::num::ParseIntError;
use std::path::PathBuf;

use structopt::StructOpt;
use uf2pack::Family;

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Convert an elf image or raw binary to a UF2 image
    Convert(ConvertOpts),
    /// Validate a UF2 image and print a summary of it
    Info(InfoOpts),
    /// Run the print controller on a serial port
    Serve(ServeOpts),
}

#[derive(StructOpt, Debug)]
pub struct ConvertOpts {
    /// The elf or raw binary filename
    #[structopt(required = true)]
    pub input: PathBuf,
    /// The UF2 filename, defaults to the input filename with an .uf2 extension
    #[structopt(short = "o", long = "output")]
    pub output: Option<PathBuf>,
    /// The chip family to tag the image for
    #[structopt(
        env = "UF2_FAMILY",
        short = "f",
        long = "family",
        default_value = "rp2040",
        possible_values = &Family::NAMES,
        case_insensitive = true
    )]
    pub family: Family,
    /// Load address for raw binaries, defaults to the family's flash base
    #[structopt(long = "base-address", parse(try_from_str = parse_address))]
    pub base_address: Option<u32>,
}

#[derive(StructOpt, Debug)]
pub struct InfoOpts {
    /// The UF2 filename
    #[structopt(required = true)]
    pub filename: PathBuf,
}

#[derive(StructOpt, Debug)]
pub struct ServeOpts {
    /// The serial device to connect to
    #[structopt(
        env = "SERIAL_PORT",
        short = "p",
        long = "port",
        default_value = "/dev/ttyACM0"
    )]
    pub serial_port: String,
    /// The serial baud rate the kiosk uses, defaults to 115200
    #[structopt(env = "BAUD_RATE", short = "b", long = "baud-rate")]
    pub baud_rate: Option<u32>,
    /// Seconds a simulated print job takes, defaults to 5
    #[structopt(long = "print-seconds")]
    pub print_seconds: Option<u64>,
}

#[derive(StructOpt, Debug)]
#[structopt(about = "ELF to UF2 firmware image packager")]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,
}

/// Parses a decimal or `0x` prefixed hexadecimal address
pub fn parse_address(s: &str) -> Result<u32, ParseIntError> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(&hex.replace('_', ""), 16)
    } else {
        s.replace('_', "").parse()
    }
}
