//! garner-node: the Garner network daemon.
//!
//! One OS process on a Tokio runtime: gateway and transports, identity
//! cache, supplier storage, relay router, and the customer-side backup
//! machinery, assembled by [`garner_node::NodeServices`].

use std::path::PathBuf;

use garner_keyring::{ring::KeyRing, store as keyring_store};
use garner_node::{NodeConfig, NodeServices};
use garner_session::tcp;
use garner_types::IdUrl;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("garner.toml"));
    let config = NodeConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("garner={}", config.logging.level).parse()?),
        )
        .init();
    info!("garner node starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // Key material: load the registry or generate a fresh one.
    let keys_path = data_dir.join("keys.json");
    let keyring = if keys_path.exists() {
        keyring_store::load(&keys_path)?
    } else {
        let keyring = KeyRing::generate();
        keyring_store::save(&keyring, &keys_path)?;
        info!(path = %keys_path.display(), "generated new key registry");
        keyring
    };

    if config.identity.idurl.is_empty() {
        anyhow::bail!("identity.idurl is not configured; register an identity first");
    }
    let me = IdUrl::parse(&config.identity.idurl)?;

    let node = NodeServices::build(config, keyring, me)?;

    // Wire transport.
    let bind_addr = format!("0.0.0.0:{}", node.config.network.listen_port).parse()?;
    let (local_addr, _accept_task) = tcp::listen(node.gateway.clone(), bind_addr).await?;
    info!(%local_addr, "listening");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.control.abort_all();
    if let Err(err) = node.save_catalog() {
        warn!(error = %err, "catalog save on shutdown failed");
    }
    Ok(())
}
