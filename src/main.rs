//! tg-relay binary: load configuration, wire the relay and serve HTTP.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tg_relay::agent::HttpAgentClient;
use tg_relay::config::{ConfigOverrides, RelayConfig, Secret};
use tg_relay::gateway::{AppState, start_server};
use tg_relay::relay::{CommandHandler, ConnectionManager, HandlerSettings};
use tg_relay::store::{UserConfigStore, open_session_store};
use tg_relay::telegram::TelegramClient;
use tg_relay::templates::MessageTemplates;
use tracing_subscriber::prelude::*;

/// Telegram webhook relay between chats and the command agent
#[derive(Parser)]
#[command(name = "tg-relay", version)]
struct Cli {
    /// TOML config file layered over the built-in defaults
    #[arg(short = 'c', long, env = "TG_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Application secret, also used as the webhook secret token
    #[arg(long)]
    secret_key: Option<String>,

    /// Public base URL Telegram delivers webhooks to
    #[arg(long)]
    server_address: Option<String>,

    /// Base URL of the command agent
    #[arg(long)]
    agent_url: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Re-check every stored bot's webhook after startup
    #[arg(long)]
    sync_webhooks: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config_file: self.config.clone(),
            secret_key: self.secret_key.clone(),
            server_address: self.server_address.clone(),
            agent_url: self.agent_url.clone(),
            host: self.host.clone(),
            port: self.port,
            debug: self.debug.then_some(true),
        }
    }
}

fn env_filter(debug: bool) -> anyhow::Result<tracing_subscriber::EnvFilter> {
    let directive = if debug { "tg_relay=debug" } else { "tg_relay=info" };
    Ok(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?))
}

/// Initialize the tracing subscriber: stdout, plus a daily rolling file when
/// `log_dir` is set. The returned guard must live as long as the process.
fn init_tracing(
    config: &RelayConfig,
    json: bool,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let stdout_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let Some(dir) = &config.log_dir else {
        tracing_subscriber::registry()
            .with(env_filter(config.debug)?)
            .with(stdout_layer)
            .init();
        return Ok(None);
    };

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!(
            "Warning: Failed to create log directory '{}': {}. Falling back to stdout-only.",
            dir.display(),
            e
        );
        tracing_subscriber::registry()
            .with(env_filter(config.debug)?)
            .with(stdout_layer)
            .init();
        return Ok(None);
    }

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("tg-relay")
        .filename_suffix("log")
        .build(dir)
        .context("Failed to create rolling file appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter(config.debug)?)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(Some(guard))
}

fn load_templates(path: Option<&Path>) -> anyhow::Result<MessageTemplates> {
    match path {
        Some(path) => {
            let templates = MessageTemplates::from_file(path)
                .with_context(|| format!("Failed to load templates from {}", path.display()))?;
            tracing::info!("Message templates loaded from {}", path.display());
            Ok(templates)
        }
        None => Ok(MessageTemplates::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Configuration first: tracing depends on it.
    let config = RelayConfig::load(&cli.overrides()).context("Failed to load configuration")?;
    let _guard = init_tracing(&config, cli.json_logs)?;

    tracing::info!(version = tg_relay::VERSION, "Starting tg-relay");
    tracing::debug!(?config, "Configuration loaded");

    let templates = Arc::new(load_templates(config.templates_path.as_deref())?);
    let bot = Arc::new(
        TelegramClient::new(&config.telegram_api_url, config.http_timeout)
            .context("Failed to build Telegram client")?,
    );
    let agent = Arc::new(
        HttpAgentClient::new(&config.agent_url, config.http_timeout)
            .context("Failed to build agent client")?,
    );
    let configs = UserConfigStore::new(&config.config_dir)
        .with_context(|| format!("Failed to open {}", config.config_dir.display()))?;
    let sessions = open_session_store(&config.session)
        .await
        .context("Failed to open session store")?;

    let webhook_secret: Option<Secret> = config
        .require_webhook_secret
        .then(|| config.secret_key.clone());

    let handler = Arc::new(CommandHandler::new(
        bot.clone(),
        agent,
        sessions,
        configs.clone(),
        templates.clone(),
        HandlerSettings {
            auth_reply_fallthrough: config.auth_reply_fallthrough,
            session_ttl: config.session_ttl,
        },
    ));
    let connections = Arc::new(ConnectionManager::new(
        bot,
        configs,
        templates,
        config.server_address.clone(),
        webhook_secret.clone(),
    ));

    if cli.sync_webhooks {
        let connections = connections.clone();
        tokio::spawn(async move {
            match connections.set_webhooks().await {
                Ok(report) => {
                    let registered = report.iter().filter(|c| c.registered).count();
                    let failed = report.iter().filter(|c| c.error.is_some()).count();
                    tracing::info!(
                        bots = report.len(),
                        registered,
                        failed,
                        "Webhook sync finished"
                    );
                }
                Err(e) => tracing::error!(error = %e, "Webhook sync failed"),
            }
        });
    }

    let state = AppState {
        handler,
        connections,
        webhook_secret,
    };
    start_server(state, &config.bind_addr()).await
}
