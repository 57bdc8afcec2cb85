mod logs;

use anyhow::Context;
use bbrconfig::Config;
use bbrssdp::{RelayConfigExt, SsdpRelay};
use tracing::info;

/// Résout à la réception de Ctrl+C (ou SIGTERM sous unix)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("⚠️ Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("⚠️ Failed to listen for SIGTERM: {}", e);
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
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration ==========
    // `.env` et `config.yaml` sont lus avant que le niveau de log soit connu
    let config = tracing::subscriber::with_default(logs::bootstrap_subscriber(), || {
        Config::load_config("")
    })
    .context("Failed to load BambuRelay configuration")?;
    logs::init_logging(&config);
    info!(
        "📄 Configuration loaded (directory: {}, file: {})",
        config.config_dir(),
        config.path()
    );

    let relay_config = config
        .relay_config()
        .context("Invalid relay configuration")?;
    for target in &relay_config.targets {
        info!("  - target {}:{}", target, relay_config.destination_port());
    }

    // ========== PHASE 2 : Démarrage du relais ==========
    info!("📡 Starting UDP relay...");
    let relay = SsdpRelay::bind(relay_config)
        .await
        .context("Failed to start SSDP relay")?;

    info!("✅ BambuRelay is ready!");
    info!("Press Ctrl+C to stop...");
    let stats = relay.run_until(shutdown_signal()).await;

    info!(
        "👋 BambuRelay stopped ({} datagram(s) relayed, {} dropped)",
        stats.relayed, stats.dropped
    );
    Ok(())
}
