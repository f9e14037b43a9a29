#![deny(clippy::all, clippy::pedantic)]

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, Response, Url};
use texpreview_api_types::{CompileRequest, CompileResponse, ErrorResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read input file {path}: {source}")]
    InputFile {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write output file {path}: {source}")]
    OutputFile {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded {status}: {}", format_server_error(.error, .details.as_deref()))]
    Server {
        status: u16,
        error: String,
        details: Option<String>,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

fn format_server_error(error: &str, details: Option<&str>) -> String {
    match details {
        Some(details) => format!("{error}\n{details}"),
        None => error.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct Ctx {
    pub client: Client,
    pub base: Url,
}

impl Ctx {
    pub fn new(server: &str) -> Result<Self, CliError> {
        let mut base = Url::parse(server)?;
        // Relative joins replace the last segment unless the path ends in a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().user_agent(Self::user_agent()).build()?;
        Ok(Self { client, base })
    }

    pub fn user_agent() -> &'static str {
        concat!("texpreview-cli/", env!("CARGO_PKG_VERSION"))
    }

    pub fn url(&self, path: &str) -> Result<Url, CliError> {
        self.base.join(path).map_err(CliError::Url)
    }

    /// Submit `source` and return the decoded PNG bytes.
    pub async fn compile(&self, source: String) -> Result<Vec<u8>, CliError> {
        let resp = self
            .client
            .post(self.url("compile")?)
            .json(&CompileRequest::new(source))
            .send()
            .await?;
        let body: CompileResponse = Self::handle(resp).await?;
        STANDARD
            .decode(body.image.as_bytes())
            .map_err(|e| CliError::InvalidResponse(format!("image is not base64: {e}")))
    }

    pub async fn health(&self) -> Result<String, CliError> {
        let resp = self.client.get(self.url("health")?).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(CliError::Server {
                status: status.as_u16(),
                error: text,
                details: None,
            });
        }
        Ok(text)
    }

    async fn handle<T: for<'de> serde::Deserialize<'de>>(resp: Response) -> Result<T, CliError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let (error, details) = match serde_json::from_slice::<ErrorResponse>(&bytes) {
                Ok(body) => (body.error, body.details),
                Err(_) => (String::from_utf8_lossy(&bytes).into_owned(), None),
            };
            return Err(CliError::Server {
                status: status.as_u16(),
                error,
                details,
            });
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| CliError::InvalidResponse(format!("failed to parse body: {e}")))
    }
}

/// Read `file`, compile it remotely and write the PNG to `output`. Returns the byte count.
pub async fn compile_file(ctx: &Ctx, file: &Path, output: &Path) -> Result<usize, CliError> {
    let source = tokio::fs::read_to_string(file)
        .await
        .map_err(|source| CliError::InputFile {
            path: file.display().to_string(),
            source,
        })?;
    let png = ctx.compile(source).await?;
    tokio::fs::write(output, &png)
        .await
        .map_err(|source| CliError::OutputFile {
            path: output.display().to_string(),
            source,
        })?;
    Ok(png.len())
}
