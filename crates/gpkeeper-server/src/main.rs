use std::sync::Arc;

use clap::Parser;
use gpkeeper_core::acl;
use gpkeeper_server::cli::{Cli, Command};
use gpkeeper_server::config::{AppConfig, LogFormat};
use gpkeeper_server::rest;
use gpkeeper_server::service::AdminService;
use gpkeeper_storage::PgSessionProvider;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.log.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json();
            registry.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer().pretty();
            registry.with(fmt_layer).init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Some(Command::DecodeAcl { rules, aggregate }) => run_decode_acl(&rules, aggregate),
        Some(Command::CheckConfig) => run_check_config(&config),
        Some(Command::Serve) | None => run_serve(config).await,
    }
}

fn run_decode_acl(rules: &[String], aggregate: bool) -> Result<(), Box<dyn std::error::Error>> {
    let output = if aggregate {
        serde_json::to_string_pretty(&acl::aggregate(rules)?)?
    } else {
        serde_json::to_string_pretty(&acl::decode_many(rules)?)?
    };
    println!("{output}");
    Ok(())
}

fn run_check_config(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("Configuration is valid");
    println!("  HTTP:     {}", config.http_addr());
    println!(
        "  Engine:   deep_revoke={} install_dblink={} grant_with_admin_option={}",
        config.engine.deep_revoke,
        config.engine.install_dblink,
        config.engine.grant_with_admin_option
    );
    println!("  Timeout:  {}s", config.connection.connect_timeout_secs);
    for context in &config.contexts {
        println!(
            "  Context:  {} -> {}@{}:{}/{}",
            context.alias, context.role, context.host, context.port, context.database
        );
    }
    Ok(())
}

async fn run_serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        http_addr = %config.http_addr(),
        contexts = config.contexts.len(),
        "starting gpkeeper server"
    );

    let provider = Arc::new(
        PgSessionProvider::new(config.connection_contexts(), config.credential_store())
            .with_connect_timeout(config.connect_timeout()),
    );
    let service = Arc::new(AdminService::new(provider, config.to_engine_config()));
    let router = rest::create_router(rest::AppState { service });

    let http_addr: std::net::SocketAddr = config.http_addr().parse()?;
    tracing::info!(%http_addr, "REST server listening");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(());
    tokio::spawn(shutdown_signal(shutdown_tx));

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "REST server error");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => { tracing::info!("received SIGINT"); }
                _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler, using SIGINT only");
            let _ = ctrl_c.await;
            tracing::info!("received SIGINT");
        }
    }

    let _ = shutdown_tx.send(());
}
