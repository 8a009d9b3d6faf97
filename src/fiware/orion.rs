//! Orion Context Broker read client.

use super::{check_status, join_url, FiwareError, Tenant};

use serde_json::Value;

/// Read-only client for the context broker NGSI v2 API.
#[derive(Debug, Clone)]
pub struct OrionClient {
    http: reqwest::Client,
    base_url: String,
    tenant: Tenant,
}

impl OrionClient {
    pub fn new(http: reqwest::Client, base_url: &str, tenant: Tenant) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            tenant,
        }
    }

    /// List every entity of `entity_type` in the simplified key-value form.
    ///
    /// A body that is not a JSON array is reported as `None`.
    pub async fn list_entities(
        &self,
        entity_type: &str,
        token: Option<&str>,
    ) -> Result<Option<Vec<Value>>, FiwareError> {
        let url = join_url(&self.base_url, "/v2/entities");
        let mut req = self
            .tenant
            .apply(self.http.get(url), token)
            .query(&[("type", entity_type), ("options", "keyValues")]);
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            req = req.bearer_auth(token);
        }

        let resp = check_status(req.send().await?).await?;
        let body = resp.text().await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Array(entities)) => Ok(Some(entities)),
            Ok(_) => Ok(None),
            Err(e) => Err(FiwareError::Decode(e.to_string())),
        }
    }
}
