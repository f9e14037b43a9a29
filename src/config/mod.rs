//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroU64,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, PipelineOverrides, RenderArgs, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "texpreview";
const ENV_PREFIX: &str = "TEXPREVIEW";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_SCRATCH_DIR: &str = "/tmp/texpreview";
const DEFAULT_COMPILER_PROGRAM: &str = "pdflatex";
const DEFAULT_COMPILER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_SOURCE_BYTES: u64 = 1024 * 1024;
const DEFAULT_RASTERIZER_PROGRAM: &str = "pdftoppm";
const DEFAULT_DPI: u32 = 200;
const MAX_DPI: u32 = 2400;
const DEFAULT_RASTERIZER_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub workspace: WorkspaceSettings,
    pub compiler: CompilerSettings,
    pub rasterizer: RasterizerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub program: PathBuf,
    pub timeout: Duration,
    pub max_source_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct RasterizerSettings {
    pub program: PathBuf,
    pub dpi: u32,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_pipeline_overrides(&args.pipeline),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    workspace: RawWorkspaceSettings,
    compiler: RawCompilerSettings,
    rasterizer: RawRasterizerSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }

        self.apply_pipeline_overrides(&overrides.pipeline);
    }

    fn apply_pipeline_overrides(&mut self, overrides: &PipelineOverrides) {
        if let Some(dir) = overrides.scratch_dir.as_ref() {
            self.workspace.scratch_dir = Some(dir.clone());
        }
        if let Some(program) = overrides.compiler_program.as_ref() {
            self.compiler.program = Some(program.clone());
        }
        if let Some(seconds) = overrides.compiler_timeout_seconds {
            self.compiler.timeout_seconds = Some(seconds);
        }
        if let Some(bytes) = overrides.compiler_max_source_bytes {
            self.compiler.max_source_bytes = Some(bytes);
        }
        if let Some(program) = overrides.rasterizer_program.as_ref() {
            self.rasterizer.program = Some(program.clone());
        }
        if let Some(dpi) = overrides.dpi {
            self.rasterizer.dpi = Some(dpi);
        }
        if let Some(seconds) = overrides.rasterizer_timeout_seconds {
            self.rasterizer.timeout_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            workspace,
            compiler,
            rasterizer,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            workspace: build_workspace_settings(workspace)?,
            compiler: build_compiler_settings(compiler)?,
            rasterizer: build_rasterizer_settings(rasterizer)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_shutdown = positive_seconds(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_workspace_settings(
    workspace: RawWorkspaceSettings,
) -> Result<WorkspaceSettings, LoadError> {
    let scratch_dir = workspace
        .scratch_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SCRATCH_DIR));
    if scratch_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "workspace.scratch_dir",
            "path must not be empty",
        ));
    }

    Ok(WorkspaceSettings { scratch_dir })
}

fn build_compiler_settings(compiler: RawCompilerSettings) -> Result<CompilerSettings, LoadError> {
    let program = non_empty_path(
        compiler.program,
        DEFAULT_COMPILER_PROGRAM,
        "compiler.program",
    )?;
    let timeout = positive_seconds(
        compiler.timeout_seconds,
        DEFAULT_COMPILER_TIMEOUT_SECS,
        "compiler.timeout_seconds",
    )?;
    let max_source_bytes =
        NonZeroU64::new(compiler.max_source_bytes.unwrap_or(DEFAULT_MAX_SOURCE_BYTES))
            .ok_or_else(|| {
                LoadError::invalid("compiler.max_source_bytes", "must be greater than zero")
            })?;
    if usize::try_from(max_source_bytes.get()).is_err() {
        return Err(LoadError::invalid(
            "compiler.max_source_bytes",
            "value exceeds supported range for this platform",
        ));
    }

    Ok(CompilerSettings {
        program,
        timeout,
        max_source_bytes,
    })
}

fn build_rasterizer_settings(
    rasterizer: RawRasterizerSettings,
) -> Result<RasterizerSettings, LoadError> {
    let program = non_empty_path(
        rasterizer.program,
        DEFAULT_RASTERIZER_PROGRAM,
        "rasterizer.program",
    )?;

    let dpi = rasterizer.dpi.unwrap_or(DEFAULT_DPI);
    if !(1..=MAX_DPI).contains(&dpi) {
        return Err(LoadError::invalid(
            "rasterizer.dpi",
            format!("must be between 1 and {MAX_DPI}"),
        ));
    }

    let timeout = positive_seconds(
        rasterizer.timeout_seconds,
        DEFAULT_RASTERIZER_TIMEOUT_SECS,
        "rasterizer.timeout_seconds",
    )?;

    Ok(RasterizerSettings {
        program,
        dpi,
        timeout,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkspaceSettings {
    scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompilerSettings {
    program: Option<PathBuf>,
    timeout_seconds: Option<u64>,
    max_source_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRasterizerSettings {
    program: Option<PathBuf>,
    dpi: Option<u32>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(
    value: Option<u64>,
    default: u64,
    key: &'static str,
) -> Result<Duration, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "must be greater than zero")),
        seconds => Ok(Duration::from_secs(seconds)),
    }
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}
