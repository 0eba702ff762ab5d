//! Release train daemon
//!
//! The `traind` command consumes queued GitHub deliveries and runs them
//! through the release train managers.
//!
//! ## Commands
//!
//! - `run`: Consume the spool queue until interrupted
//! - `dispatch`: Handle one payload file and print the response
//! - `enqueue`: Validate a delivery and add it to the spool queue
//! - `check-config`: Show the effective configuration and registered managers

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use train_clients::{GitHubClient, SlackNotifier};
use train_core::telemetry::level_for_verbosity;
use train_core::{
    default_registry, GitHubApi, GitTagger, HookRequest, ManagerContext, ManifestChangelog,
    MessageQueue, NotificationRouter, QueueConsumer, SecureHook, SpoolQueue, TrainConfig,
    WebhookService,
};

#[derive(Parser)]
#[command(name = "traind")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Release train webhook automation", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "TRAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the spool queue until Ctrl-C
    Run,

    /// Handle one webhook payload file and print the response as JSON
    Dispatch {
        /// Payload file (JSON)
        file: PathBuf,
    },

    /// Validate a delivery and add it to the spool queue
    Enqueue {
        /// Raw request body
        file: PathBuf,

        /// `X-Hub-Signature-256` header value
        #[arg(long, conflicts_with = "token")]
        signature: Option<String>,

        /// Shared token
        #[arg(long)]
        token: Option<String>,

        /// Endpoint the delivery was received on
        #[arg(long, default_value = "/webhooks")]
        url: String,
    },

    /// Load and validate the configuration, then print it without secrets
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    train_core::init_tracing(cli.json, level_for_verbosity(cli.verbose));

    let config =
        TrainConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Dispatch { file } => cmd_dispatch(&config, &file).await,
        Commands::Enqueue {
            file,
            signature,
            token,
            url,
        } => {
            let id = cmd_enqueue(
                &config,
                &file,
                signature.as_deref(),
                token.as_deref(),
                &url,
            )
            .await?;
            println!("{id}");
            Ok(())
        }
        Commands::CheckConfig => {
            let report = cmd_check_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

/// Production capabilities: the REST client plus the manifest collaborators.
fn build_context(config: &TrainConfig) -> Result<ManagerContext> {
    let github: Arc<dyn GitHubApi> =
        Arc::new(GitHubClient::new(&config.github).context("Failed to create GitHub client")?);
    let platform = &config.platform;
    Ok(ManagerContext {
        changelog: Arc::new(ManifestChangelog::new(
            github.clone(),
            &platform.repo,
            &platform.changelog,
        )),
        tagger: Arc::new(GitTagger::new(github.clone(), &platform.repo)),
        github,
        config: Arc::new(config.clone()),
    })
}

/// Slack delivery when a token is configured; otherwise notifications are dropped.
fn build_router(config: &TrainConfig) -> Result<NotificationRouter> {
    let router = NotificationRouter::new(&config.slack.channel);
    if config.slack.token.is_none() {
        tracing::warn!("slack.token is not configured; notifications will not be delivered");
        return Ok(router);
    }
    let slack = SlackNotifier::new(&config.slack).context("Failed to create Slack client")?;
    Ok(router.with_notifier(Arc::new(slack)))
}

fn build_service(config: &TrainConfig) -> Result<WebhookService> {
    WebhookService::from_context(build_context(config)?, build_router(config)?)
        .context("Failed to build manager registry")
}

async fn cmd_run(config: TrainConfig) -> Result<()> {
    let service = Arc::new(build_service(&config)?);
    let queue = SpoolQueue::open(&config.queue.spool_dir)
        .await
        .with_context(|| format!("Failed to open spool {}", config.queue.spool_dir.display()))?;
    info!(spool = %queue.dir().display(), env = ?config.env, "traind starting");

    let consumer = QueueConsumer::new(Arc::new(queue), service, &config.queue);
    consumer
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
        })
        .await;
    Ok(())
}

async fn cmd_dispatch(config: &TrainConfig, file: &Path) -> Result<()> {
    let payload = read_payload(file)?;
    let service = build_service(config)?;
    let response = service
        .handle(&payload)
        .await
        .context("Manager result contract violated")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn cmd_enqueue(
    config: &TrainConfig,
    file: &Path,
    signature: Option<&str>,
    token: Option<&str>,
    url: &str,
) -> Result<String> {
    let body = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let payload = SecureHook::from_config(config)
        .validate(&HookRequest {
            url,
            token,
            signature,
            body: &body,
        })
        .map_err(|rejection| {
            anyhow::anyhow!("delivery rejected ({}): {rejection}", rejection.code())
        })?;

    let queue = SpoolQueue::open(&config.queue.spool_dir).await?;
    let id = queue.enqueue(&payload).await?;
    info!(id = %id, "delivery enqueued");
    Ok(id)
}

#[derive(Debug, Serialize)]
struct ManagerSummary {
    name: String,
    shapes: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct ConfigReport {
    version: &'static str,
    config: TrainConfig,
    managers: Vec<ManagerSummary>,
}

fn cmd_check_config(config: &TrainConfig) -> Result<ConfigReport> {
    config.validate()?;
    let registry = default_registry(&build_context(config)?)?;
    let managers = registry
        .descriptors()
        .iter()
        .map(|d| ManagerSummary {
            name: d.name().to_string(),
            shapes: d.shapes().iter().map(|s| s.name()).collect(),
        })
        .collect();
    Ok(ConfigReport {
        version: train_core::VERSION,
        config: config.clone(),
        managers,
    })
}

fn read_payload(file: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use train_core::signature::sign;
    use train_core::Consumed;

    fn config(dir: &Path) -> TrainConfig {
        let mut config = TrainConfig::default();
        config.github.token = Some("test-token".to_string());
        config.github.webhook_secret = Some("s3cret".to_string());
        config.security.tokens = vec!["chat-token".to_string()];
        config.queue.spool_dir = dir.join("spool");
        config
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "traind", "-vv", "--json", "--config", "train.toml", "dispatch", "event.json",
        ]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        assert_eq!(cli.config.as_deref(), Some(Path::new("train.toml")));
        assert!(matches!(cli.command, Commands::Dispatch { .. }));
    }

    #[test]
    fn test_enqueue_rejects_signature_and_token_together() {
        let parsed = Cli::try_parse_from([
            "traind", "enqueue", "body.json", "--signature", "sha256=00", "--token", "t",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_signed_delivery_is_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let body = br#"{"zen":"Approachable is better than simple."}"#;
        let file = dir.path().join("body.json");
        std::fs::write(&file, body).unwrap();
        let signature = sign(b"s3cret", body).unwrap();

        let id = cmd_enqueue(&config, &file, Some(signature.as_str()), None, "/webhooks")
            .await
            .unwrap();

        let service = Arc::new(build_service(&config).unwrap());
        let queue = Arc::new(SpoolQueue::open(&config.queue.spool_dir).await.unwrap());
        let consumer = QueueConsumer::new(queue, service, &config.queue);
        match consumer.process_next().await.unwrap() {
            Consumed::Handled { id: handled, response } => {
                assert_eq!(handled, id);
                assert_eq!(response.code, 202);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsigned_delivery_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let file = dir.path().join("body.json");
        std::fs::write(&file, br#"{"zen":"hi"}"#).unwrap();

        let err = cmd_enqueue(&config, &file, None, None, "/webhooks")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rejected (400)"));
        assert!(!config.queue.spool_dir.exists());
    }

    #[test]
    fn test_check_config_lists_managers_without_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let report = cmd_check_config(&config(dir.path())).unwrap();
        let names: Vec<&str> = report.managers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "backmergeManager",
                "trainManager",
                "manifestUpdateManager",
                "backmergeConflictManager"
            ]
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("test-token"));
        assert!(!json.contains("s3cret"));
    }

    #[test]
    fn test_check_config_requires_github_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.github.token = None;
        assert!(cmd_check_config(&config).is_err());
    }
}
