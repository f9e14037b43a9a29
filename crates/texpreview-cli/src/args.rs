//! Command-line surface for `texpreview-cli`.

#![deny(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueHint};

#[derive(Parser, Debug)]
#[command(name = "texpreview-cli", version, about = "texpreview API client", long_about = None)]
pub struct Cli {
    /// Service base URL, e.g. <http://127.0.0.1:5000>
    #[arg(long, env = "TEXPREVIEW_URL", default_value = "http://127.0.0.1:5000")]
    pub server: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile a LaTeX file remotely and save the first page as PNG
    Compile {
        /// LaTeX source file
        #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Destination PNG
        #[arg(long, short = 'o', value_name = "PNG", value_hint = ValueHint::FilePath)]
        output: PathBuf,
    },
    /// Check that the service is up
    Health,
}
