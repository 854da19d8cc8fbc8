//! CLI argument parsing for exembellish

use crate::codec::UnitFormat;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "exembellish")]
#[command(version)]
#[command(
    about = "Instrument compiled units so exception messages carry the call history with arguments",
    long_about = None
)]
pub struct Cli {
    /// Unit file to instrument
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Agent options (e.g., "inclusion_pattern=com\.acme\..*;parm_size_limit=40")
    #[arg(long = "options", value_name = "OPTIONS")]
    pub options: Option<String>,

    /// Unit name to load the file as (defaults to the name inside the file)
    #[arg(short = 'n', long = "name", value_name = "UNIT")]
    pub name: Option<String>,

    /// Container format of the input and output files
    #[arg(long = "format", value_enum, default_value = "msgpack")]
    pub format: UnitFormat,

    /// Write the instrumented unit to this file
    #[arg(short = 'o', long = "output", value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print a listing of the resulting unit
    #[arg(short = 'l', long = "listing")]
    pub listing: bool,

    /// Dump rewritten units under ~/exembellish-units
    #[arg(long = "dump")]
    pub dump: bool,

    /// Dump rewritten units under this directory (implies --dump)
    #[arg(long = "dump-dir", value_name = "DIR")]
    pub dump_dir: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    pub fn wants_dump(&self) -> bool {
        self.dump || self.dump_dir.is_some()
    }
}
