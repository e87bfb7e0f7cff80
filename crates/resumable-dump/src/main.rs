use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use resumable_dump::{config::Config, dump::output::copy_decoded, service::App};

#[derive(Parser)]
#[command(name = "resumable-dump")]
#[command(version)]
#[command(about = "Time-boxed, resumable MySQL dumps driven by a tick queue")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config.toml")]
    config: String,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create a dump job and run its first resumption
    Create,
    /// Run one resumption of a job
    Resume { job: String, resumption: u32 },
    /// Show job status, running due resumptions if the job looks stalled
    Status { job: String },
    /// Copy a finished artifact to a file or stdout
    Download {
        job: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write plain SQL even if the artifact is gzip compressed
        #[arg(long)]
        decompress: bool,
    },
    /// Cancel pending resumptions and remove the job and its artifact
    Delete { job: String },
    /// Run every resumption that is due now
    Tick,
    /// Keep running due resumptions until interrupted
    Run,
}

fn init_logging(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("resumable_dump={}", cli.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);
    if let Some(database_url) = cli.database_url.clone() {
        config.database.url = database_url;
    }

    let app = App::from_config(config).await?;

    match cli.command {
        Command::Create => {
            let created = app.service.create().await?;
            info!(job_id = %created.job.id, "First resumption: {:?}", created.outcome);
            print_json(&app.service.status(&created.job.id).await?)?;
        }
        Command::Resume { job, resumption } => {
            let outcome = app.engine.resume(&job, resumption).await;
            println!("{outcome:?}");
        }
        Command::Status { job } => {
            let mut report = app.service.status(&job).await?;
            if report.stalled {
                let ran = app.runner().run_once().await?;
                info!(job_id = %job, "Job looked stalled, ran {} due resumptions", ran);
                report = app.service.status(&job).await?;
            }
            print_json(&report)?;
        }
        Command::Download {
            job,
            output,
            decompress,
        } => {
            let artifact = app.service.artifact(&job).await?;
            let decode = decompress && artifact.compressed;
            let copied = match output {
                Some(path) => {
                    let mut file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    let copied = copy_decoded(&artifact.path, decode, &mut file)?;
                    file.flush()?;
                    copied
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut lock = stdout.lock();
                    let copied = copy_decoded(&artifact.path, decode, &mut lock)?;
                    lock.flush()?;
                    copied
                }
            };
            info!(job_id = %job, "Copied {} bytes from {}", copied, artifact.path.display());
        }
        Command::Delete { job } => {
            if app.service.delete(&job).await? {
                println!("Deleted {job}");
            } else {
                println!("No job {job}");
            }
        }
        Command::Tick => {
            let ran = app.runner().run_once().await?;
            println!("Ran {ran} resumptions");
        }
        Command::Run => {
            let token = CancellationToken::new();
            let shutdown = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received shutdown signal");
                }
                shutdown.cancel();
            });
            app.runner().run(token).await?;
        }
    }

    Ok(())
}
