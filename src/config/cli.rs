use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the texpreview binary.
#[derive(Debug, Parser)]
#[command(
    name = "texpreview",
    version,
    about = "Render the first page of a LaTeX snippet as PNG"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TEXPREVIEW_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Compile a source file once and write its first page to disk.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// LaTeX source to compile.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Where to write the PNG.
    #[arg(
        long = "output",
        short = 'o',
        value_name = "PNG",
        value_hint = ValueHint::FilePath
    )]
    pub output: PathBuf,
}

/// Overrides shared by every command that runs the pipeline.
#[derive(Debug, Args, Default, Clone)]
pub struct PipelineOverrides {
    /// Override the directory holding per-job workspaces.
    #[arg(long = "scratch-dir", value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// Override the compiler executable.
    #[arg(long = "compiler-program", value_name = "PATH")]
    pub compiler_program: Option<PathBuf>,

    /// Override the compile time limit.
    #[arg(long = "compiler-timeout-seconds", value_name = "SECONDS")]
    pub compiler_timeout_seconds: Option<u64>,

    /// Override the largest accepted source, in bytes.
    #[arg(long = "compiler-max-source-bytes", value_name = "BYTES")]
    pub compiler_max_source_bytes: Option<u64>,

    /// Override the rasterizer executable.
    #[arg(long = "rasterizer-program", value_name = "PATH")]
    pub rasterizer_program: Option<PathBuf>,

    /// Override the output resolution.
    #[arg(long = "dpi", value_name = "DPI")]
    pub dpi: Option<u32>,

    /// Override the rasterizer time limit.
    #[arg(long = "rasterizer-timeout-seconds", value_name = "SECONDS")]
    pub rasterizer_timeout_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", env = "PORT", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,
}
