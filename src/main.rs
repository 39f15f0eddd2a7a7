use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xmlpress::{
    Backend, Cli, Command, ConfigManager, FeedbackSubmission, PriceUpdate, RenderedDocument,
    ServiceError,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_filter());

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            match err.downcast_ref::<ServiceError>() {
                Some(service) => eprintln!("{}: {}", service.kind(), service.public_message()),
                None => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so rendered views can be piped from stdout
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = ConfigManager::load_config(&cli)
        .await
        .map_err(ServiceError::from)?;
    let backend = Backend::from_config(&config)?;

    match cli.command {
        Command::Price { plant, price, date } => {
            backend
                .record_price(&PriceUpdate { plant, price, date })
                .await?;
        }
        Command::Feedback {
            username,
            rating,
            comment,
        } => {
            backend
                .submit_feedback(&FeedbackSubmission {
                    username,
                    rating,
                    comment,
                })
                .await?;
        }
        Command::Dashboard { dt } => {
            print_view(backend.dashboard(dt.as_deref()).await?).await?;
        }
        Command::FeedbackView { success, error } => {
            print_view(backend.feedback_view(&success, &error).await?).await?;
        }
        Command::Report { dt, output } => {
            let pdf = backend.report(dt.as_deref()).await?;
            save(&pdf, output).await?;
        }
        Command::Convert {
            input,
            output,
            token,
        } => {
            let artifact = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let pdf = backend.convert(&artifact, token.as_deref()).await?;
            save(&pdf, output).await?;
        }
        Command::Check { document, schema } => {
            let report = backend.check(&document, &schema).await?;
            if report.ok {
                println!("{}: valid against {schema}", document.display());
            } else {
                println!("{}: invalid against {schema}", document.display());
                for error in &report.errors {
                    println!("  {error}");
                }
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn print_view(view: RenderedDocument) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(&view.bytes).await?;
    stdout.flush().await?;
    Ok(())
}

/// Write a rendered payload to `output`, or to its suggested name in the
/// working directory
async fn save(document: &RenderedDocument, output: Option<PathBuf>) -> anyhow::Result<()> {
    let path = output
        .or_else(|| document.filename.as_deref().map(PathBuf::from))
        .unwrap_or_else(|| Path::new("report.pdf").to_path_buf());
    tokio::fs::write(&path, &document.bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}
