use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "codec-cli", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Engine configuration (TOML); missing keys take defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the wait for a free input buffer, in microseconds
    #[arg(long, global = true)]
    pub input_timeout_us: Option<u64>,

    /// Override the wait for decoded output, in microseconds
    #[arg(long, global = true)]
    pub output_timeout_us: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the selected audio track as JSON
    Probe {
        /// Path to a media file
        path: PathBuf,
    },

    /// Decode to raw interleaved s16le PCM
    Decode {
        /// Path to a media file
        path: PathBuf,

        /// Output file for the PCM stream
        #[arg(long)]
        out: PathBuf,

        /// Seek before decoding (milliseconds)
        #[arg(long)]
        seek_ms: Option<u64>,

        /// Give up after this many consecutive "try again" results
        #[arg(long, default_value_t = 1000)]
        max_retries: u32,

        /// Only decode `length` bytes of the file starting at `offset`
        #[arg(long, requires = "length")]
        offset: Option<u64>,

        #[arg(long, requires = "offset")]
        length: Option<u64>,
    },
}
