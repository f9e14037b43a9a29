use std::{future::IntoFuture, path::Path, process};

use texpreview::{
    application::{
        error::AppError,
        preview::{PreviewError, PreviewService},
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let preview = PreviewService::from_settings(&settings)?;
    let router = http::build_router(HttpState::new(preview));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "texpreview::serve",
        addr = %settings.server.addr,
        scratch_dir = %settings.workspace.scratch_dir.display(),
        compiler = %settings.compiler.program.display(),
        rasterizer = %settings.rasterizer.program.display(),
        dpi = settings.rasterizer.dpi,
        "Listening"
    );

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());
    let grace = settings.server.graceful_shutdown;

    // In-flight jobs still clean up when the grace period cuts them off: their
    // workspace handles are dropped with the aborted connections.
    tokio::select! {
        result = server.into_future() => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "texpreview::serve",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown window elapsed; dropping remaining connections"
            );
        }
    }

    info!(target = "texpreview::serve", "Server stopped");
    Ok(())
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let source = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let preview = PreviewService::from_settings(&settings)?;

    match preview.render(source).await {
        Ok(preview) => {
            write_png(&args.output, &preview.image.png).await?;
            info!(
                target = "texpreview::render",
                job_id = %preview.job_id,
                width = preview.image.width,
                height = preview.image.height,
                output = %args.output.display(),
                "Preview written"
            );
            Ok(())
        }
        Err(err) => {
            if let PreviewError::Compile { diagnostics }
            | PreviewError::OutputMissing { diagnostics } = &err
            {
                eprintln!("{diagnostics}");
            }
            Err(AppError::unexpected(format!(
                "failed to render {}: {err}",
                args.file.display()
            )))
        }
    }
}

async fn write_png(path: &Path, png: &[u8]) -> Result<(), AppError> {
    tokio::fs::write(path, png)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
