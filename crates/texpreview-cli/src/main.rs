//! texpreview-cli: command-line client for the texpreview compile API.
#![deny(clippy::all, clippy::pedantic)]

mod args;
mod client;

use clap::Parser;

use args::{Cli, Commands};
use client::{CliError, Ctx};

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = Ctx::new(&cli.server)?;

    match cli.command {
        Commands::Compile { file, output } => {
            let bytes = client::compile_file(&ctx, &file, &output).await?;
            println!("wrote {bytes} bytes to {}", output.display());
        }
        Commands::Health => {
            let message = ctx.health().await?;
            println!("{message}");
        }
    }

    Ok(())
}
