use operate_backend::api::{self, ApiState};
use operate_backend::chains::ledger::{LedgerHelper, MasterWallet, RpcTimeouts};
use operate_backend::chains::traits::{ChainType, KeyProvider, WalletProvider};
use operate_backend::chains::{HttpGatewayClient, HttpGatewayFactory};
use operate_backend::config::{AppConfig, ChainProfiles};
use operate_backend::health::HealthChecker;
use operate_backend::logging::{init_tracing, mask_address};
use operate_backend::services::ServiceManager;
use operate_backend::storage::FileServiceRepository;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        e
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        home = %config.storage.home.display(),
        "🚀 Starting operate backend service"
    );

    // Chain profiles
    let profiles = ChainProfiles::load(config.storage.chain_profiles.as_deref()).map_err(|e| {
        error!("❌ Failed to load chain profiles: {}", e);
        e
    })?;
    for profile in profiles.iter() {
        info!(
            chain = %profile.chain,
            rpc = %profile.default_rpc,
            staking = profile.staking_contract.is_some(),
            "Chain profile loaded"
        );
    }

    // Record store
    info!("📁 Initializing service record store...");
    let repository = FileServiceRepository::new(config.storage.services_dir());
    repository.setup().await?;
    info!(root = %repository.root().display(), "✅ Service record store ready");

    // Ledger gateway and key custody
    let gateway_client = HttpGatewayClient::new(
        &config.gateway.url,
        Duration::from_secs(config.gateway.request_timeout),
    )?;
    info!(url = %gateway_client.base_url(), "✅ Ledger gateway client initialized");
    let keys: Arc<dyn KeyProvider> = Arc::new(gateway_client.clone());
    let gateways = Arc::new(HttpGatewayFactory::new(gateway_client));

    // Master wallet, one RPC helper per chain of its ledger family
    let timeouts = RpcTimeouts {
        request: Duration::from_secs(config.gateway.request_timeout),
        confirmation: Duration::from_secs(config.wallet.confirmation_timeout),
        ..RpcTimeouts::default()
    };
    let mut wallet = MasterWallet::new(
        config.wallet.address.clone(),
        config.wallet.safe_address.clone(),
        config.wallet.ledger_type,
    );
    let mut rpc_helpers: Vec<(ChainType, LedgerHelper)> = Vec::new();
    for profile in profiles.iter() {
        if profile.ledger_type != config.wallet.ledger_type {
            continue;
        }
        match LedgerHelper::for_ledger(profile.ledger_type, &profile.default_rpc, timeouts) {
            Ok(helper) => {
                rpc_helpers.push((profile.chain, helper.clone()));
                wallet = wallet.with_chain(profile.chain, helper)?;
            }
            Err(e) => warn!(chain = %profile.chain, error = %e, "⚠️  Skipping chain RPC"),
        }
    }
    info!(
        address = %mask_address(config.wallet.address.as_str()),
        ledger = %config.wallet.ledger_type,
        chains = rpc_helpers.len(),
        "✅ Master wallet initialized"
    );

    let mut wallets: HashMap<_, Arc<dyn WalletProvider>> = HashMap::new();
    wallets.insert(config.wallet.ledger_type, Arc::new(wallet));

    // Health checker
    info!("🏥 Initializing health checker...");
    let health_checker = HealthChecker::new(config.storage.services_dir(), rpc_helpers);
    let health = health_checker.check_health().await;
    if health.is_healthy() {
        info!("✅ All components healthy");
    } else {
        warn!(status = ?health.status, "⚠️  Starting with degraded components");
    }

    let manager = Arc::new(ServiceManager::new(
        Arc::new(repository),
        gateways,
        wallets,
        keys,
        profiles,
    ));

    info!("🛣️  Setting up application routes...");
    let app = api::app(ApiState {
        manager,
        health_checker,
    });
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║          🚀 OPERATE BACKEND SERVER IS RUNNING 🚀             ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  🌐 Server Address:  http://{}", addr);
    println!("║  📁 Services:        {}", config.storage.services_dir().display());
    println!("║  🔗 Ledger gateway:  {}", config.gateway.url);
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  GET  /health                         - Health check         ║");
    println!("║  GET  /api/services                   - List services        ║");
    println!("║  GET  /api/services/{{hash}}            - Service record       ║");
    println!("║  PUT  /api/services/{{hash}}            - Update service       ║");
    println!("║  POST /api/services/{{hash}}/deploy     - Deploy service       ║");
    println!("║  POST /api/services/{{hash}}/{{op}}       - terminate, unbond,   ║");
    println!("║                                         stake, unstake, fund ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!("❌ Server error: {}", e);
            e
        })?;

    info!("👋 Server shut down gracefully");
    Ok(())
}
