#![allow(dead_code)]

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use texpreview::{
    application::preview::{LatexCompiler, PageRasterizer, PreviewLimits, PreviewService},
    infra::{
        http::{HttpState, build_router},
        workspace::WorkspaceManager,
    },
};
use tower::ServiceExt;

pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A valid 1x1 RGBA PNG.
pub const TINY_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Compiler stand-in that writes a document named after the source's stem.
pub const COMPILER_OK: &str = r#"for last; do :; done
echo '%PDF-1.5' > "$(dirname "$last")/$(basename "$last" .tex).pdf"
echo 'Output written.'
"#;

/// Compiler stand-in that fails the way pdflatex does on a missing `\end{document}`.
pub const COMPILER_UNTERMINATED: &str = r#"printf '%s\n' '! Emergency stop.'
printf '%s\n' '*** (job aborted, no legal \end found)'
exit 1
"#;

pub struct Harness {
    pub dir: TempDir,
    pub scratch: PathBuf,
    pub router: Router,
}

pub struct HarnessBuilder {
    compiler: String,
    rasterizer: Option<String>,
    compile_timeout: Duration,
    max_source_bytes: usize,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            compiler: COMPILER_OK.to_string(),
            rasterizer: None,
            compile_timeout: Duration::from_secs(10),
            max_source_bytes: 64 * 1024,
        }
    }
}

impl HarnessBuilder {
    pub fn compiler(mut self, body: &str) -> Self {
        self.compiler = body.to_string();
        self
    }

    pub fn rasterizer(mut self, body: &str) -> Self {
        self.rasterizer = Some(body.to_string());
        self
    }

    pub fn compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout = timeout;
        self
    }

    pub fn max_source_bytes(mut self, bytes: usize) -> Self {
        self.max_source_bytes = bytes;
        self
    }

    pub fn build(self) -> Harness {
        let dir = TempDir::new().expect("temp dir");
        let fixture = dir.path().join("fixture.png");
        std::fs::write(&fixture, TINY_PNG).expect("fixture");

        let rasterizer_body = self.rasterizer.unwrap_or_else(|| {
            format!(
                "for last; do :; done\ncp '{}' \"$last.png\"\n",
                fixture.display()
            )
        });
        let compiler = fake_program(dir.path(), "fake-pdflatex", &self.compiler);
        let rasterizer = fake_program(dir.path(), "fake-pdftoppm", &rasterizer_body);

        let scratch = dir.path().join("scratch");
        let service = PreviewService::new(
            WorkspaceManager::new(scratch.clone()).expect("workspaces"),
            LatexCompiler::new(compiler),
            PageRasterizer::new(rasterizer, Duration::from_secs(10)),
            PreviewLimits {
                compile_timeout: self.compile_timeout,
                dpi: 200,
                max_source_bytes: self.max_source_bytes,
            },
        );
        let router = build_router(HttpState::new(Arc::new(service)));

        Harness {
            dir,
            scratch,
            router,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(&self.scratch)
            .expect("scratch root")
            .count()
    }

    pub async fn compile(&self, source: &str) -> (StatusCode, serde_json::Value) {
        let body = serde_json::json!({ "source": source }).to_string();
        self.post_raw("/compile", "application/json", body).await
    }

    pub async fn post_raw(
        &self,
        uri: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, content_type)
            .body(body.into())
            .expect("request should build");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request should build");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub fn fake_program(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write fake program");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make fake program executable");
    path
}

/// Whether `pid` is a live process. Zombies count as dead.
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}
