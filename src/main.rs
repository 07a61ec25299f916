//! Foreman server binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use foreman::domain::models::Permission;
use foreman::gateway::auth::AuthManager;
use foreman::gateway::connection::ConnectionManager;
use foreman::gateway::handlers::GatewayContext;
use foreman::gateway::Gateway;
use foreman::infrastructure::{
    ForemanConfig, InMemoryWorkOrderRepository, LlmExecutionEngine, ShellCommandExecutor,
};
use foreman::llm::{ProviderManager, ProviderReviewer};
use foreman::services::{
    ApprovalService, EscalationHandler, EventBus, EventBusConfig, QualityGateRunner, RetryHandler,
    SchedulerCore,
};

#[derive(Debug, Parser)]
#[command(name = "foreman", about = "Autonomous-agent orchestration server", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the gateway and scheduler.
    Serve {
        /// Path to foreman.yaml.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the configured listen host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
        /// Print a fresh admin pairing token at startup.
        #[arg(long)]
        issue_token: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("foreman=info")),
        )
        .init();

    let cli = Cli::parse();
    let (config_path, host, port, issue_token) = match cli.command {
        Some(Command::Serve {
            config,
            host,
            port,
            issue_token,
        }) => (config, host, port, issue_token),
        None => (None, None, None, false),
    };

    let mut config =
        ForemanConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    serve(config, issue_token).await
}

async fn serve(config: ForemanConfig, issue_token: bool) -> anyhow::Result<()> {
    let repository = Arc::new(InMemoryWorkOrderRepository::new());
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let provider = Arc::new(ProviderManager::new(config.llm.clone(), event_bus.clone()));

    let escalations = Arc::new(EscalationHandler::new(
        repository.clone(),
        event_bus.clone(),
        config.stuck.clone(),
    ));
    let gates = Arc::new(QualityGateRunner::new(
        Arc::new(ShellCommandExecutor::new()),
        Arc::new(ProviderReviewer::new(provider.clone())),
        config.verification.clone(),
    ));
    let engine = Arc::new(LlmExecutionEngine::new(provider.clone()));

    let scheduler = SchedulerCore::new(
        config.scheduler.clone(),
        config.lanes.clone(),
        repository.clone(),
        engine,
        event_bus.clone(),
        provider.clone(),
        RetryHandler::new(config.retry.clone()),
        escalations.clone(),
        gates,
    );
    scheduler
        .restore_lanes_from_runs()
        .await
        .context("lane recovery failed")?;
    if config.scheduler.auto_start {
        scheduler.start();
    }

    let auth = Arc::new(AuthManager::new(Duration::from_millis(
        config.gateway.auth_timeout_ms,
    )));
    if issue_token {
        let issued = auth.create_token(Permission::all(), None).await;
        // Shown once; only the hash survives in memory.
        info!(token_id = %issued.id, token = issued.token.as_str(), "admin pairing token issued");
    }

    let connections = ConnectionManager::new(config.gateway.clone());
    let approvals = Arc::new(ApprovalService::new(repository.clone(), event_bus.clone()));
    let context = Arc::new(GatewayContext {
        repository,
        event_bus,
        scheduler: scheduler.clone(),
        approvals,
        escalations,
        connections,
        auth: auth.clone(),
    });

    let gateway = Gateway::new(config.gateway, context, auth);

    let server = gateway.clone();
    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            scheduler.stop();
            gateway.stop().await;
        }
    }
    Ok(())
}
