//! Portal HTTP API.

mod handlers;

pub use handlers::*;

use crate::config::PortalConfig;
use crate::fiware::KeyrockClient;
use crate::inventory::Inventory;
use crate::session::SessionStore;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
///
/// The session store lock is released before the inventory lock is taken.
#[derive(Clone)]
pub struct AppState {
    pub config: PortalConfig,
    pub keyrock: KeyrockClient,
    pub sessions: SessionStore,
    pub inventory: Arc<Mutex<Inventory>>,
}

/// Web server for the portal API.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: PortalConfig, keyrock: KeyrockClient, inventory: Arc<Mutex<Inventory>>) -> Self {
        Self {
            state: AppState {
                config,
                keyrock,
                sessions: SessionStore::new(),
                inventory,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/session", post(handlers::handle_login).delete(handlers::handle_logout))
            .route("/api/inventory", get(handlers::handle_get_inventory))
            .route("/api/inventory/refresh", post(handlers::handle_refresh_inventory))
            .route("/api/service-groups", post(handlers::handle_create_service_group))
            .route("/api/service-groups/{key}", delete(handlers::handle_delete_service_group))
            .route("/api/apikey-suggestion", get(handlers::handle_suggest_apikey))
            .route("/api/devices", post(handlers::handle_create_device))
            .route("/api/devices/{device_id}", delete(handlers::handle_delete_device))
            .route("/api/activity/{id}", get(handlers::handle_get_activity))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Portal API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityTracker;
    use crate::fiware::{IotAgentClient, OrionClient, Tenant};
    use crate::inventory::InventorySettings;
    use crate::testing::spawn_fake;

    use axum::{http::StatusCode, Form, Json};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    /// Keyrock, IoT Agent and Orion on one fake server.
    fn fake_fiware() -> Router {
        Router::new()
            .route(
                "/oauth2/token",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    if form.get("password").map(String::as_str) == Some("secret") {
                        (StatusCode::OK, Json(json!({ "access_token": "tok" })))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid grant" })))
                    }
                }),
            )
            .route(
                "/iot/services",
                get(|| async {
                    Json(json!({ "services": [{
                        "apikey": "k1", "resource": "/iot/json", "entity_type": "Machine",
                        "cbroker": "http://orion-v2:1026", "service": "openiot", "subservice": "/"
                    }] }))
                }),
            )
            .route(
                "/iot/devices",
                get(|| async {
                    Json(json!({ "devices": [{
                        "device_id": "m1", "entity_name": "urn:ngsi-ld:Machine:m1",
                        "entity_type": "Machine", "service": { "apikey": "k1", "resource": "/iot/json" }
                    }] }))
                }),
            )
            .route(
                "/v2/entities",
                get(|| async { Json(json!([{ "id": "urn:ngsi-ld:Machine:m1", "type": "Machine" }])) }),
            )
    }

    async fn portal() -> String {
        let fiware = spawn_fake(fake_fiware()).await;
        let cfg = PortalConfig::default();
        let http = reqwest::Client::new();
        let tenant = Tenant::new(&cfg.fiware_service, cfg.service_path());

        let agent = IotAgentClient::new(http.clone(), &fiware, tenant.clone());
        let tracker = ActivityTracker::new(OrionClient::new(http.clone(), &fiware, tenant), &cfg.entity_type);
        let inventory = Arc::new(Mutex::new(Inventory::new(agent, tracker, InventorySettings::from(&cfg))));
        let keyrock = KeyrockClient::new(http, &fiware, "portal", "portal-secret");

        let server = Server::new(cfg, keyrock, inventory);
        spawn_fake(server.routes()).await
    }

    async fn sign_in(client: &reqwest::Client, base: &str) -> String {
        let body: Value = client
            .post(format!("{base}/api/session"))
            .json(&json!({ "email": "admin@test.com", "password": "secret" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let base = portal().await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{base}/api/inventory")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = client
            .post(format!("{base}/api/session"))
            .json(&json!({ "email": "admin@test.com", "password": "wrong" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Invalid grant");

        let resp = client
            .post(format!("{base}/api/session"))
            .json(&json!({ "email": "admin@test.com", "password": "secret" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["report"]["devices"], 1);
        assert_eq!(body["token"], "tok");

        let view: Value = client
            .get(format!("{base}/api/inventory"))
            .bearer_auth("tok")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["devices"][0]["device_id"], "m1");
        assert_eq!(view["devices"][0]["status"], "Offline");
        assert_eq!(view["service_groups"][0]["broker_label"], "orion-v2");

        let resp = client
            .delete(format!("{base}/api/session"))
            .bearer_auth("tok")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = client
            .get(format!("{base}/api/inventory"))
            .bearer_auth("tok")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_other_callers_do_not_share_a_session() {
        let base = portal().await;
        let token = sign_in(&reqwest::Client::new(), &base).await;

        let stranger = reqwest::Client::new();
        let resp = stranger.get(format!("{base}/api/inventory")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = stranger.delete(format!("{base}/api/devices/m1")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = stranger
            .get(format!("{base}/api/activity/urn:ngsi-ld:Machine:m1"))
            .bearer_auth("forged")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = stranger.delete(format!("{base}/api/session")).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // The signed-in caller is unaffected.
        let resp = stranger
            .get(format!("{base}/api/inventory"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let base = portal().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/session"))
            .json(&json!({ "email": "", "password": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = client
            .post(format!("{base}/api/devices"))
            .json(&json!({ "device_id": "m9" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let token = sign_in(&client, &base).await;

        let resp = client
            .post(format!("{base}/api/service-groups"))
            .bearer_auth(&token)
            .json(&json!({ "apikey": "k2", "broker": "http://orion-v2:1026", "resource": "/iot/json/", "entity_type": "Machine" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(
            body["error"],
            "Resource path \"/iot/json\" is already registered. Choose a unique path."
        );

        let resp = client
            .delete(format!("{base}/api/devices/ghost"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = client
            .get(format!("{base}/api/activity/ghost"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let activity: Value = client
            .get(format!("{base}/api/activity/urn:ngsi-ld:Machine:m1"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(activity["status"], "Offline");
    }

    #[tokio::test]
    async fn test_apikey_suggestion() {
        let base = portal().await;
        let body: Value = reqwest::Client::new()
            .get(format!("{base}/api/apikey-suggestion?name=Line%20A"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["apikey"], "line-a");
    }
}
