use clap::Parser;
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use remit_core::adapters::{
    PostgresClientDirectory, PostgresSweepLock, PostgresTransactionStore,
};
use remit_core::cli::{Cli, Commands, DbCommands, TxCommands};
use remit_core::config::Config;
use remit_core::domain::ProviderType;
use remit_core::providers::{CardGatewayAdapter, ProviderRegistry, WalletRailAdapter};
use remit_core::services::{
    GatewayService, LoggingNotifier, LoggingReceipts, ReconcilePolicy, Reconciler,
};
use remit_core::{cli, create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
        Commands::Tx(TxCommands::Expire { tx_id }) => {
            let pool = db::create_pool(&config).await?;
            let gateway = build_gateway(&pool, &config);
            cli::handle_tx_expire(&gateway, tx_id).await
        }
    }
}

fn build_registry(config: &Config) -> ProviderRegistry {
    let timeout = config.provider_timeout();
    ProviderRegistry::new()
        .register(Arc::new(WalletRailAdapter::new(
            ProviderType::MtnMomo,
            config.mtn_momo_base_url.clone(),
            timeout,
        )))
        .register(Arc::new(WalletRailAdapter::new(
            ProviderType::AirtelMoney,
            config.airtel_money_base_url.clone(),
            timeout,
        )))
        .register(Arc::new(CardGatewayAdapter::new(
            config.card_gateway_base_url.clone(),
            timeout,
        )))
}

fn build_gateway(pool: &PgPool, config: &Config) -> Arc<GatewayService> {
    Arc::new(GatewayService::new(
        Arc::new(PostgresTransactionStore::new(pool.clone())),
        Arc::new(PostgresClientDirectory::new(pool.clone())),
        build_registry(config),
        Arc::new(LoggingNotifier),
        Arc::new(LoggingReceipts),
        config.amount_ceiling,
        config.session_window(),
    ))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // Database pool
    let pool = db::create_pool(&config).await?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let gateway = build_gateway(&pool, &config);

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(PostgresTransactionStore::new(pool.clone())),
        gateway.clone(),
        build_registry(&config),
        Arc::new(PostgresSweepLock::new(pool.clone())),
        ReconcilePolicy {
            batch_size: config.reconcile_batch_size,
            dispatch_grace: config.dispatch_grace(),
            pending_timeout: config.pending_timeout(),
            processing_timeout: config.processing_timeout(),
            interval: config.reconcile_interval(),
        },
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    tokio::spawn(reconciler.run(shutdown_tx.subscribe()));

    let app = create_app(AppState {
        db: pool.clone(),
        gateway,
        webhook_secret: config.webhook_secret.clone(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        })
        .await?;

    Ok(())
}
