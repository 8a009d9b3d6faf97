//! Keyrock identity manager client (OAuth2 password grant).

use super::{join_url, FiwareError};

use serde::Deserialize;

/// Client that exchanges user credentials for a session token.
#[derive(Debug, Clone)]
pub struct KeyrockClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenError {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl KeyrockClient {
    pub fn new(http: reqwest::Client, base_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    /// Authenticate and return the bearer token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, FiwareError> {
        let email = email.trim();
        let password = password.trim();
        if email.is_empty() || password.is_empty() {
            return Err(FiwareError::Auth(
                "Please enter both email and password.".to_string(),
            ));
        }

        let form = [
            ("grant_type", "password"),
            ("username", email),
            ("password", password),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", "perms"),
        ];

        let resp = self
            .http
            .post(join_url(&self.base_url, "/oauth2/token"))
            .form(&form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.json::<TokenError>().await.unwrap_or_default();
            let message = err
                .error
                .filter(|e| !e.is_empty())
                .or(err.error_description.filter(|e| !e.is_empty()))
                .unwrap_or_else(|| "Authentication failed.".to_string());
            return Err(FiwareError::Auth(message));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| FiwareError::Decode(e.to_string()))?;

        match body.access_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!("Keyrock: authenticated {}", email);
                Ok(token)
            }
            None => Err(FiwareError::Auth("No access_token received.".to_string())),
        }
    }
}
