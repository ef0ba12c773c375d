use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use cs_sender::api::{ApiClient, ApiRequest, Backend, BackendFuture, HttpBackend};
use cs_sender::collectors::ForwardLogger;
use cs_sender::config::{Config, JobInfo};
use cs_sender::payloads::StatsReport;
use cs_sender::stats::{MemoryStats, StatsStore};
use cs_sender::Telemetry;
use log::{error, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command-line arguments for the telemetry sender
#[derive(Parser)]
#[command(
    name = "cs-sender",
    about = "Forward crawl telemetry to the monitoring backend",
    long_about = "Registers monitor rules, pushes stats snapshots, and runs a telemetry \
                  session that reports error log rates and error records for a crawl job."
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", help = "Configuration file path (TOML format)")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose logging output (sets RUST_LOG=debug)")]
    verbose: bool,

    /// Record requests instead of sending them
    #[arg(long, help = "Log the requests that would be sent without contacting the backend")]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the monitor rule of a job
    Rule {
        #[command(subcommand)]
        action: RuleAction,
    },
    /// Push a stats snapshot from a JSON file
    Stats {
        /// JSON object holding the stats table
        file: PathBuf,

        #[command(flatten)]
        job: JobArgs,
    },
    /// Run a telemetry session for a job until interrupted
    Watch {
        #[command(flatten)]
        job: JobArgs,
    },
}

#[derive(Subcommand)]
enum RuleAction {
    /// Register the monitor rule
    Add {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Remove the monitor rule
    Delete {
        /// Job id whose rule is removed
        #[arg(long)]
        job: String,
    },
}

/// Identity of the crawl job
#[derive(Args, Debug, Clone)]
struct JobArgs {
    /// Project name (defaults to SCRAPY_PROJECT)
    #[arg(long)]
    project: Option<String>,

    /// Spider name
    #[arg(long)]
    spider: String,

    /// Job id (defaults to SCRAPY_JOB, or a generated id)
    #[arg(long)]
    job: Option<String>,

    /// Host name reported to the backend
    #[arg(long)]
    host: Option<String>,
}

impl JobArgs {
    fn to_job(&self) -> JobInfo {
        let mut job = JobInfo::from_env(self.spider.clone());
        if let Some(project) = &self.project {
            job.project = project.clone();
        }
        if let Some(job_id) = &self.job {
            job.job_id = job_id.clone();
        }
        if let Some(host) = &self.host {
            job = job.with_host(host.clone());
        }
        job
    }
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// Missing config files are allowed (defaults are used); a directory is not.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() && !config_path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    config_path.display()
                ));
            }
            if config_path.extension().is_some_and(|ext| ext != "toml") {
                warn!(
                    "Configuration file does not have .toml extension: {}",
                    config_path.display()
                );
            }
        }
        Ok(())
    }
}

/// Read a stats table from a JSON object file
fn read_stats_file(path: &Path) -> anyhow::Result<BTreeMap<String, Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read stats file {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("Stats file {} is not valid JSON", path.display()))?;
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => bail!("Stats file {} must contain a JSON object", path.display()),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env_overrides()?;
    Ok(config)
}

/// Backend that logs each request instead of sending it
struct DryRunBackend;

impl Backend for DryRunBackend {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> BackendFuture<'a> {
        Box::pin(async move {
            let body = request.body()?;
            info!(
                "[dry-run] {} {} {}",
                if request.is_delete() { "DELETE" } else { "POST" },
                request.endpoint().path(),
                body
            );
            Ok(String::new())
        })
    }
}

fn make_backend(cli: &Cli, config: &Config) -> anyhow::Result<Arc<dyn Backend>> {
    if cli.dry_run {
        return Ok(Arc::new(DryRunBackend));
    }
    Ok(Arc::new(HttpBackend::from_config(config)?))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let backend = make_backend(&cli, &config)?;

    match &cli.command {
        Command::Rule { action } => {
            let api = ApiClient::new(backend, config);
            match action {
                RuleAction::Add { job } => api.add_monitor_rule(&job.to_job()).await,
                RuleAction::Delete { job } => api.del_monitor_rule(job).await,
            }
        }
        Command::Stats { file, job } => {
            let stats = read_stats_file(file)?;
            let api = ApiClient::new(backend, config);
            let report = StatsReport::new(&job.to_job(), chrono::Local::now(), stats, None);
            api.send_stats_data(report).await;
        }
        Command::Watch { job } => {
            let stats: Arc<dyn StatsStore> = Arc::new(MemoryStats::new());
            stats.set_value(
                "start_time",
                Value::from(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            );

            let telemetry = Telemetry::builder(config, job.to_job(), Arc::clone(&stats))
                .backend(backend)
                .forward_logs_to(ForwardLogger::console())
                .build()?;
            telemetry.install_log_handler()?;

            let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
            ctrlc::set_handler(move || {
                let _ = shutdown_tx.send(());
            })
            .context("Failed to set SIGINT handler")?;

            telemetry.spider_opened().await;
            info!("Telemetry session running. Press Ctrl+C to stop.");

            shutdown_rx.recv().await;
            info!("Received interrupt signal, closing telemetry session");

            stats.set_value("finish_reason", Value::from("shutdown"));
            telemetry.spider_closed("shutdown").await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    } else if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    // The watch session installs its own logger wrapping the console one
    if !matches!(cli.command, Command::Watch { .. }) {
        env_logger::init();
    }

    if let Err(e) = cli.validate() {
        eprintln!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("cs-sender: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli_with_config(config: Option<PathBuf>) -> Cli {
        Cli {
            config,
            verbose: false,
            dry_run: true,
            command: Command::Rule {
                action: RuleAction::Delete {
                    job: "job-1".to_string(),
                },
            },
        }
    }

    #[test]
    fn test_cli_validation_with_missing_file() {
        let cli = cli_with_config(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_cli_validation_with_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_with_config(Some(dir.path().to_path_buf()));
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_cli_parses_rule_add() {
        let cli = Cli::try_parse_from([
            "cs-sender",
            "--dry-run",
            "rule",
            "add",
            "--project",
            "news",
            "--spider",
            "articles",
            "--job",
            "job-77",
            "--host",
            "crawler-01",
        ])
        .unwrap();

        assert!(cli.dry_run);
        match cli.command {
            Command::Rule {
                action: RuleAction::Add { job },
            } => {
                let job = job.to_job();
                assert_eq!(job.project, "news");
                assert_eq!(job.spider, "articles");
                assert_eq!(job.job_id, "job-77");
                assert_eq!(job.host, "crawler-01");
            }
            _ => panic!("Expected rule add"),
        }
    }

    #[test]
    fn test_cli_requires_spider_for_watch() {
        assert!(Cli::try_parse_from(["cs-sender", "watch"]).is_err());
    }

    #[test]
    fn test_read_stats_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"item_scraped_count": 5, "finish_reason": "finished"}}"#).unwrap();

        let stats = read_stats_file(file.path()).unwrap();
        assert_eq!(stats["item_scraped_count"], Value::from(5));
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn test_read_stats_file_rejects_arrays() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[1, 2, 3]").unwrap();

        assert!(read_stats_file(file.path()).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_backend_answers_without_sending() {
        let cli = cli_with_config(None);
        let backend = make_backend(&cli, &Config::default()).unwrap();

        let request = ApiRequest::DelMonitorRule(cs_sender::payloads::MonitorRuleRemoval {
            spider_job_id: "job-1".to_string(),
        });
        assert_eq!(backend.send(&request).await, Ok(String::new()));
    }
}
