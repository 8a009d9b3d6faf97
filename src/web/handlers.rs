//! HTTP request handlers.

use super::AppState;
use crate::fiware::FiwareError;
use crate::inventory::{suggest_apikey, InventoryError, InventoryView, LoadReport, NewDevice, NewServiceGroup};
use crate::session::Session;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn inventory_error(err: InventoryError) -> Response {
    let status = match &err {
        InventoryError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        InventoryError::UnknownDevice(_) | InventoryError::UnknownServiceGroup(_) => StatusCode::NOT_FOUND,
        InventoryError::Fiware(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::BAD_REQUEST,
    };
    error_response(status, err)
}

// ============================================================================
// Session
// ============================================================================

/// The caller's own session, looked up from the bearer token it presents.
///
/// Requests without a known token are rejected with 401.
#[derive(Debug, Clone)]
pub struct AuthSession(pub Session);

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();

        match state.sessions.get(token).await {
            Some(session) => Ok(AuthSession(session)),
            None => Err(inventory_error(InventoryError::NotAuthenticated)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub email: String,
    /// Bearer token for subsequent requests
    pub token: String,
    pub report: LoadReport,
}

pub async fn handle_login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> impl IntoResponse {
    let email = req.email.trim();
    if email.is_empty() || req.password.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Please enter both email and password.");
    }

    let token = match state.keyrock.login(email, &req.password).await {
        Ok(token) => token,
        Err(FiwareError::Auth(msg)) => {
            tracing::warn!("Login failed for {}: {}", email, msg);
            return error_response(StatusCode::UNAUTHORIZED, msg);
        }
        Err(e) => {
            tracing::error!("Identity provider error: {}", e);
            return error_response(StatusCode::BAD_GATEWAY, e);
        }
    };

    let session = Session::new(email, token.clone());
    state.sessions.insert(session.clone()).await;
    tracing::info!("Signed in as {}", email);

    let report = state.inventory.lock().await.load(&session, Utc::now()).await;
    Json(LoginResponse {
        email: session.email,
        token,
        report,
    })
    .into_response()
}

/// Ends the caller's session. Loaded state is dropped once nobody is signed in.
pub async fn handle_logout(State(state): State<AppState>, AuthSession(session): AuthSession) -> impl IntoResponse {
    let remaining = state.sessions.remove(session.token().unwrap_or_default()).await;
    tracing::info!("Signed out {}", session.email);
    if remaining == 0 {
        state.inventory.lock().await.clear();
    }
    StatusCode::NO_CONTENT
}

// ============================================================================
// Inventory
// ============================================================================

pub async fn handle_get_inventory(State(state): State<AppState>, _auth: AuthSession) -> impl IntoResponse {
    let view = state.inventory.lock().await.view(Utc::now());
    Json(view)
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub report: LoadReport,
    pub inventory: InventoryView,
}

pub async fn handle_refresh_inventory(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
) -> impl IntoResponse {
    let mut inventory = state.inventory.lock().await;
    let now = Utc::now();

    let report = inventory.load(&session, now).await;
    if !report.authenticated {
        return inventory_error(InventoryError::NotAuthenticated);
    }
    Json(RefreshResponse {
        report,
        inventory: inventory.view(now),
    })
    .into_response()
}

// ============================================================================
// API: Service groups
// ============================================================================

pub async fn handle_create_service_group(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Json(form): Json<NewServiceGroup>,
) -> impl IntoResponse {
    let mut inventory = state.inventory.lock().await;

    match inventory.register_service_group(&session, &form, Utc::now()).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(json!({ "key": created.value, "reload": created.reload })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Error creating service group: {}", e);
            inventory_error(e)
        }
    }
}

pub async fn handle_delete_service_group(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let mut inventory = state.inventory.lock().await;

    match inventory.delete_service_group(&session, &key, Utc::now()).await {
        Ok(deleted) => Json(json!({ "deleted": deleted.value, "reload": deleted.reload })).into_response(),
        Err(e) => {
            tracing::warn!("Error deleting service group: {}", e);
            inventory_error(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApikeyQuery {
    #[serde(default)]
    pub name: String,
}

pub async fn handle_suggest_apikey(Query(q): Query<ApikeyQuery>) -> impl IntoResponse {
    Json(json!({ "apikey": suggest_apikey(&q.name) }))
}

// ============================================================================
// API: Devices
// ============================================================================

pub async fn handle_create_device(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Json(form): Json<NewDevice>,
) -> impl IntoResponse {
    let mut inventory = state.inventory.lock().await;

    match inventory.register_device(&session, &form, Utc::now()).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(json!({ "device_id": created.value, "reload": created.reload })),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Error creating machine: {}", e);
            inventory_error(e)
        }
    }
}

pub async fn handle_delete_device(
    State(state): State<AppState>,
    AuthSession(session): AuthSession,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let mut inventory = state.inventory.lock().await;

    match inventory.delete_device(&session, &device_id, Utc::now()).await {
        Ok(deleted) => Json(json!({ "deleted": deleted.value, "reload": deleted.reload })).into_response(),
        Err(e) => {
            tracing::warn!("Error deleting machine: {}", e);
            inventory_error(e)
        }
    }
}

// ============================================================================
// API: Activity
// ============================================================================

pub async fn handle_get_activity(
    State(state): State<AppState>,
    _auth: AuthSession,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.inventory.lock().await.activity(&id, Utc::now()) {
        Some(activity) => Json(activity).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("No activity recorded for {}", id)),
    }
}
