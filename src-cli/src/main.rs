mod render;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evalwatch::api::EvaluationApi;
use evalwatch::config::{resolve_config, validate_config};
use evalwatch::model::{ReportFilter, ReportFormat};
use evalwatch::{HttpEvaluationApi, SessionHandle, StartEvaluationRequest, WatchConfig, WatchSession};
use log::info;
use tokio::task::JoinHandle;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Parser, Debug)]
#[command(name = "evalwatch", version, about = "Follow QCM evaluation runs live")]
struct Cli {
    /// Config file (JSON or YAML). Defaults to the platform config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the backend base URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow an evaluation until interrupted.
    Watch {
        /// Evaluation to follow. Without it the first active one is adopted.
        #[arg(long)]
        evaluation: Option<String>,
        /// Print raw session updates as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Start a new evaluation run.
    Start {
        #[arg(long = "document", required = true)]
        documents: Vec<String>,
        #[arg(long)]
        test_mode: bool,
        #[arg(long = "criterion")]
        criteria: Vec<String>,
        #[arg(long = "advanced")]
        advanced: Vec<String>,
        /// Keep following the run after it started.
        #[arg(long)]
        watch: bool,
    },
    /// List evaluations known to the backend.
    List,
    /// List uploaded documents.
    Documents,
    /// Show one uploaded document.
    Document { id: String },
    /// Delete an uploaded document and its stored file.
    DeleteDocument { id: String },
    /// List generated reports.
    Reports {
        #[arg(long)]
        evaluation: Option<String>,
        #[arg(long)]
        document: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long, default_value = "html")]
        format: ReportFormat,
    },
    /// Show one report and its download links.
    Report {
        id: String,
        /// Also print the report's JSON data.
        #[arg(long)]
        data: bool,
    },
    /// Describe the evaluated model and its aggregate scores.
    Llm,
    /// Check backend health.
    Health,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_log::LogTracer::init().context("failed to bridge log records")?;

    let installed = if json {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr));
        tracing::subscriber::set_global_default(subscriber)
    };
    installed.context("failed to install tracing subscriber")
}

fn load_config(cli: &Cli) -> Result<WatchConfig> {
    let mut config = resolve_config(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.trim().to_string();
        validate_config(&config)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    let config = load_config(&cli)?;
    info!("evalwatch v{} against {}", env!("CARGO_PKG_VERSION"), config.base_url);

    match cli.command {
        Command::Watch { evaluation, json } => {
            let mut session = WatchSession::from_config(config)?;
            if let Some(id) = evaluation {
                session = session.tracking(id);
            }
            let renderer = tokio::spawn(render::run(session.subscribe(), json));
            let handle = session.spawn()?;
            wait_for_interrupt(handle, renderer).await
        }
        Command::Start {
            documents,
            test_mode,
            criteria,
            advanced,
            watch,
        } => {
            let request = StartEvaluationRequest {
                document_ids: documents,
                test_mode,
                selected_criteria: criteria,
                advanced_criteria: advanced,
            };

            if watch {
                let session = WatchSession::from_config(config)?;
                let renderer = tokio::spawn(render::run(session.subscribe(), false));
                let handle = session.spawn()?;
                let started = handle.start_evaluation(&request).await?;
                println!("Started evaluation {}", started.evaluation_id);
                wait_for_interrupt(handle, renderer).await
            } else {
                let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
                let started = api.start_evaluation(&request).await?;
                println!("{}", started.evaluation_id);
                Ok(())
            }
        }
        Command::List => {
            let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
            let evaluations = api.list_evaluations().await?;
            if evaluations.is_empty() {
                println!("No evaluations");
            }
            for evaluation in evaluations {
                println!(
                    "{}  {:<9} {:>5.1}%  {}/{} QCM  {}",
                    evaluation.id,
                    evaluation.status.to_string(),
                    evaluation.progress,
                    evaluation.completed_qcm,
                    evaluation.total_qcm,
                    evaluation.start_time.as_deref().unwrap_or("-"),
                );
            }
            Ok(())
        }
        Command::Documents => {
            let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
            for document in api.list_documents().await? {
                println!(
                    "{}  {:?}  {}",
                    document.id, document.status, document.original_name
                );
            }
            Ok(())
        }
        Command::Document { id } => {
            let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
            let document = api.get_document(&id).await?;
            println!(
                "{}  {:?}  {}  {} bytes  {}",
                document.id,
                document.status,
                document.original_name,
                document.size.unwrap_or(0),
                document.upload_date.as_deref().unwrap_or("-"),
            );
            Ok(())
        }
        Command::DeleteDocument { id } => {
            let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
            let deleted = api.delete_document(&id).await?;
            if !deleted.success {
                anyhow::bail!("backend refused to delete document {}", id);
            }
            println!(
                "{}",
                deleted
                    .message
                    .unwrap_or_else(|| format!("Document {} deleted", id))
            );
            Ok(())
        }
        Command::Report { id, data } => {
            let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
            let detail = api.get_report(&id).await?;
            let report = &detail.report;
            println!(
                "{}  evaluation {}  {} QCM  score {:.1}  {}",
                report.id,
                report.evaluation_id,
                report.total_qcm,
                report.score,
                report.creation_date.as_deref().unwrap_or("-"),
            );
            for name in report.report_files.keys() {
                if let Ok(format) = name.parse::<ReportFormat>() {
                    println!("  {:<4}  {}", name, api.report_download_url(&report.id, format)?);
                }
            }
            if data {
                if let Some(data) = &detail.data {
                    println!("{}", serde_json::to_string_pretty(data)?);
                }
            }
            Ok(())
        }
        Command::Llm => {
            let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
            let info = api.llm_info().await?;
            println!(
                "{} {}  {}",
                info.model,
                info.version.as_deref().unwrap_or(""),
                info.role.as_deref().unwrap_or("")
            );
            let stats = api.llm_statistics().await?;
            println!(
                "{} evaluations  {} QCM  score {:.1}%  success {:.1}%",
                stats.total_evaluations, stats.total_qcm, stats.overall_score, stats.success_rate
            );
            for (criterion, score) in stats.ranked_criteria() {
                println!("  {:<18} {:>5.1}%", criterion, score);
            }
            Ok(())
        }
        Command::Reports {
            evaluation,
            document,
            from,
            to,
            format,
        } => {
            let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
            let filter = ReportFilter {
                evaluation_id: evaluation,
                document_id: document,
                date_from: from,
                date_to: to,
            };
            for report in api.list_reports(&filter).await? {
                let url = api.report_download_url(&report.id, format)?;
                println!(
                    "{}  evaluation {}  {} QCM  score {:.1}  {}",
                    report.id, report.evaluation_id, report.total_qcm, report.score, url
                );
            }
            Ok(())
        }
        Command::Health => {
            let api = HttpEvaluationApi::new(&config.base_url, &config.http)?;
            let health = api.health().await?;
            println!(
                "{} {}",
                health.status,
                health.timestamp.as_deref().unwrap_or("")
            );
            Ok(())
        }
    }
}

async fn wait_for_interrupt(handle: SessionHandle, renderer: JoinHandle<()>) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Interrupted, shutting down session");
    handle.shutdown().await?;
    renderer.abort();
    Ok(())
}
