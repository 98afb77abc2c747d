use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    DatasetFile, HttpGateway, StepOutcome, WorkflowEvent, WorkflowSession, WorkflowSnapshot,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, ClientSettings};

#[derive(Parser, Debug)]
struct Args {
    /// Overrides the configured backend base URL.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a dataset, train a model on it and optionally run inference.
    Run {
        dataset: PathBuf,
        #[arg(long)]
        predict: Option<PathBuf>,
    },
    /// Download the example dataset.
    Example {
        #[arg(long, default_value = "example.csv")]
        out: PathBuf,
    },
    /// Upload a dataset and save its data-quality report.
    Report {
        dataset: PathBuf,
        #[arg(long, default_value = "report.html")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
    }
    info!(api = %settings.api_base_url, "using backend");

    let gateway = HttpGateway::with_timeout(&settings.api_base_url, settings.request_timeout())?;
    let session = WorkflowSession::new(Arc::new(gateway));

    match args.command {
        Command::Run { dataset, predict } => run(&session, &settings, dataset, predict).await,
        Command::Example { out } => {
            let bytes = session.download_example().await?;
            tokio::fs::write(&out, &bytes)
                .await
                .with_context(|| format!("failed to write '{}'", out.display()))?;
            println!("Saved example dataset to {}", out.display());
            Ok(())
        }
        Command::Report { dataset, out } => {
            upload(&session, dataset).await?;
            let html = session.report().await?;
            tokio::fs::write(&out, html)
                .await
                .with_context(|| format!("failed to write '{}'", out.display()))?;
            println!("Saved data-quality report to {}", out.display());
            Ok(())
        }
    }
}

async fn run(
    session: &WorkflowSession<HttpGateway>,
    settings: &ClientSettings,
    dataset: PathBuf,
    predict: Option<PathBuf>,
) -> Result<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let WorkflowEvent::StageFailed(err) = event {
                warn!(stage = %err.stage(), "{}", err.message());
            }
        }
    });

    upload(session, dataset).await?;
    if let Some(analysis) = session.snapshot().await.analysis {
        let summary = &analysis.summary;
        println!(
            "Dataset: {} rows x {} columns, {} duplicate rows",
            summary.rows(),
            summary.columns(),
            summary.duplicates
        );
        if summary.is_complete() {
            println!("No missing values");
        }
        for (column, count) in summary.columns_with_missing() {
            println!("  missing in {column}: {count}");
        }
        match &analysis.detected_target {
            Some(target) => println!("Target column: {target}"),
            None => println!("No target column detected; training an anomaly detector"),
        }
    }

    expect_applied(session.train().await?)?;
    let snapshot = session.snapshot().await;
    if let Some(model) = &snapshot.model {
        println!("Trained {} model {}", model.model_type(), model.id);
    }
    print_chart(&snapshot);

    let Some(predict) = predict else {
        return Ok(());
    };
    expect_applied(session.predict(read_dataset(predict).await?).await?)?;
    let snapshot = session.snapshot().await;
    if let Some(inference) = &snapshot.inference {
        println!(
            "{} rows scored ({} model)",
            inference.len(),
            inference.model_type()
        );
        for (row, value) in inference.preview(settings.preview_rows).iter().enumerate() {
            println!("  {row:>4}  {value}");
        }
    }
    print_chart(&snapshot);
    Ok(())
}

async fn upload(session: &WorkflowSession<HttpGateway>, dataset: PathBuf) -> Result<()> {
    expect_applied(session.upload(read_dataset(dataset).await?).await?)
}

async fn read_dataset(path: PathBuf) -> Result<DatasetFile> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(DatasetFile::new(file_name, bytes))
}

fn expect_applied(outcome: StepOutcome) -> Result<()> {
    match outcome {
        StepOutcome::Applied => Ok(()),
        StepOutcome::Failed(err) => bail!("{err}"),
        StepOutcome::Stale => bail!("operation was superseded"),
    }
}

fn print_chart(snapshot: &WorkflowSnapshot) {
    let Some(chart) = &snapshot.chart else {
        return;
    };
    if chart.is_empty() {
        println!("No prediction history yet");
        return;
    }
    println!("{}:", chart.series_label());
    for (label, value) in chart.points() {
        println!("  {label}  {value:.4}");
    }
}
