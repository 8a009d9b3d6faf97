use twinportal::activity::ActivityTracker;
use twinportal::config::PortalConfig;
use twinportal::fiware::{IotAgentClient, KeyrockClient, OrionClient, Tenant};
use twinportal::inventory::{Inventory, InventorySettings};
use twinportal::scheduler::StatusTicker;
use twinportal::web::Server;

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("twinportal=info".parse()?))
        .init();

    let cfg = PortalConfig::load();
    tracing::info!("Starting TwinPortal on port {}...", cfg.http_port);
    tracing::info!(
        "IoT Agent at {}, Orion at {}, Keyrock at {}",
        cfg.iot_agent_url,
        cfg.orion_url,
        cfg.keyrock_url
    );

    let http = reqwest::Client::new();
    let tenant = Tenant::new(&cfg.fiware_service, cfg.service_path());

    let agent = IotAgentClient::new(http.clone(), &cfg.iot_agent_url, tenant.clone());
    let orion = OrionClient::new(http.clone(), &cfg.orion_url, tenant);
    let keyrock = KeyrockClient::new(
        http,
        &cfg.keyrock_url,
        &cfg.keyrock_client_id,
        &cfg.keyrock_client_secret,
    );

    let tracker = ActivityTracker::new(orion, &cfg.entity_type);
    let inventory = Arc::new(Mutex::new(Inventory::new(
        agent,
        tracker,
        InventorySettings::from(&cfg),
    )));

    // Start status ticker
    let period = cfg.status_tick_interval.to_std()?;
    let ticker = StatusTicker::new(inventory.clone(), period);
    ticker.start().await;

    // Start web server
    let server = Server::new(cfg, keyrock, inventory);
    let result = server.start().await;

    ticker.stop().await;
    result
}
