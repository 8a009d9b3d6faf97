//! Clients for the FIWARE collaborators: the IoT Agent, the Orion Context
//! Broker and the Keyrock identity manager.
//!
//! These are thin request/response wrappers. Every request carries the tenant
//! headers and the forwarded session token.

mod iot_agent;
mod keyrock;
mod orion;

pub use iot_agent::*;
pub use keyrock::*;
pub use orion::*;

use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;

/// Collaborator error types.
#[derive(Error, Debug)]
pub enum FiwareError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{message}")]
    Status { status: StatusCode, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("{0}")]
    Auth(String),
    #[error("invalid URL: {0}")]
    Url(String),
}

/// Tenant scoping applied to every IoT Agent and Orion request.
#[derive(Debug, Clone)]
pub struct Tenant {
    /// `Fiware-Service`, omitted when empty
    pub service: String,
    /// `Fiware-ServicePath`, `/` when empty
    pub service_path: String,
}

impl Tenant {
    pub fn new(service: &str, service_path: &str) -> Self {
        Self {
            service: service.to_string(),
            service_path: service_path.to_string(),
        }
    }

    /// Attach the tenant headers and the session token to a request.
    fn apply(&self, req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let mut req = req.header(reqwest::header::ACCEPT, "application/json");
        if !self.service.is_empty() {
            req = req.header("Fiware-Service", self.service.as_str());
        }
        let path = if self.service_path.is_empty() {
            "/"
        } else {
            self.service_path.as_str()
        };
        req = req.header("Fiware-ServicePath", path);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            req = req.header("X-Auth-Token", token);
        }
        req
    }
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Turn a non-success response into a [`FiwareError::Status`], passing
/// successful responses through.
pub(crate) async fn check_status(resp: Response) -> Result<Response, FiwareError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(FiwareError::Status {
        status,
        message: error_message(status, &body),
    })
}

/// Extract a human-readable description from an error body.
///
/// Tries the JSON `description`, `error` and `message` members, then the raw
/// text, then the status reason, then `HTTP <code>`.
pub fn error_message(status: StatusCode, body: &str) -> String {
    if body.is_empty() {
        return status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["description", "error", "message"] {
            if let Some(text) = value.get(field).and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
        }
    }

    body.to_string()
}
