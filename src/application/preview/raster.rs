use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use bytes::Bytes;
use imagesize::{ImageError, ImageType};
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::infra::process::{ProcessError, ProcessOutcome, run_bounded};

pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("rasterizer exited with {exit_code:?}: {stderr}")]
    Rasterizer {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("rasterizer did not finish within {limit:?}")]
    TimedOut { limit: Duration },
    #[error("rasterizer produced no image")]
    MissingOutput,
    #[error("failed to read rendered image: {0}")]
    Read(io::Error),
    #[error("rendered image is not a valid PNG: {0}")]
    InvalidImage(String),
}

/// A rendered page, already validated as a decodable PNG.
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub png: Bytes,
    pub width: usize,
    pub height: usize,
}

/// Converts page 1 of a PDF to PNG with a `pdftoppm`-compatible program.
#[derive(Debug, Clone)]
pub struct PageRasterizer {
    program: PathBuf,
    time_limit: Duration,
}

impl PageRasterizer {
    pub fn new(program: PathBuf, time_limit: Duration) -> Self {
        Self {
            program,
            time_limit,
        }
    }

    /// Render the first page of `document` at `dpi`.
    ///
    /// The image is written next to the document with a `.png` extension.
    pub async fn render_first_page(
        &self,
        document: &Path,
        dpi: u32,
    ) -> Result<RasterImage, ConversionError> {
        let started_at = Instant::now();
        let prefix = document.with_extension("");
        let image_path = document.with_extension("png");

        let mut command = Command::new(&self.program);
        command
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg("1")
            .arg("-singlefile")
            .arg(document)
            .arg(&prefix);
        if let Some(dir) = document.parent() {
            command.current_dir(dir);
        }

        let output = match run_bounded(command, self.time_limit).await? {
            ProcessOutcome::Exited(output) => output,
            ProcessOutcome::TimedOut { .. } => {
                return Err(ConversionError::TimedOut {
                    limit: self.time_limit,
                });
            }
        };

        if !output.success() {
            let exit_code = output.exit_code();
            let stderr = output.combined_output();
            warn!(
                target = "application::preview::raster",
                op = "raster::render_first_page",
                result = "error",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "Rasterizer failed"
            );
            return Err(ConversionError::Rasterizer { exit_code, stderr });
        }

        let png = match tokio::fs::read(&image_path).await {
            Ok(png) => png,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ConversionError::MissingOutput);
            }
            Err(err) => return Err(ConversionError::Read(err)),
        };
        let image = validate_png(Bytes::from(png))?;

        info!(
            target = "application::preview::raster",
            op = "raster::render_first_page",
            result = "ok",
            dpi,
            width = image.width,
            height = image.height,
            png_bytes = image.png.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "First page rasterized"
        );
        Ok(image)
    }
}

fn validate_png(png: Bytes) -> Result<RasterImage, ConversionError> {
    if !png.starts_with(&PNG_SIGNATURE) {
        return Err(ConversionError::InvalidImage(
            "missing PNG signature".to_string(),
        ));
    }

    match imagesize::image_type(&png) {
        Ok(ImageType::Png) => {}
        Ok(other) => {
            return Err(ConversionError::InvalidImage(format!(
                "unexpected image type {other:?}"
            )));
        }
        Err(err) => return Err(ConversionError::InvalidImage(describe(err))),
    }

    let size =
        imagesize::blob_size(&png).map_err(|err| ConversionError::InvalidImage(describe(err)))?;
    if size.width == 0 || size.height == 0 {
        return Err(ConversionError::InvalidImage(format!(
            "empty image {}x{}",
            size.width, size.height
        )));
    }

    Ok(RasterImage {
        png,
        width: size.width,
        height: size.height,
    })
}

fn describe(err: ImageError) -> String {
    match err {
        ImageError::NotSupported => "unsupported image format".to_string(),
        ImageError::CorruptedImage => "corrupted image".to_string(),
        ImageError::IoError(err) => err.to_string(),
    }
}
