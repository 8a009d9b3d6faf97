//! IoT Agent north-bound API client for service groups and devices.

use super::{check_status, join_url, FiwareError, Tenant};

use reqwest::Url;
use serde_json::{json, Value};

/// Client for the IoT Agent provisioning API.
#[derive(Debug, Clone)]
pub struct IotAgentClient {
    http: reqwest::Client,
    base_url: String,
    tenant: Tenant,
}

impl IotAgentClient {
    pub fn new(http: reqwest::Client, base_url: &str, tenant: Tenant) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            tenant,
        }
    }

    /// List registered service groups as raw agent records.
    pub async fn list_service_groups(&self, token: Option<&str>) -> Result<Vec<Value>, FiwareError> {
        let url = join_url(&self.base_url, "/iot/services");
        let resp = self.tenant.apply(self.http.get(url), token).send().await?;
        let payload = read_json(check_status(resp).await?).await;
        Ok(take_array(payload, "services"))
    }

    /// Register one or more service groups.
    pub async fn register_service_groups(
        &self,
        groups: &[Value],
        token: Option<&str>,
    ) -> Result<(), FiwareError> {
        let url = join_url(&self.base_url, "/iot/services");
        let body = json!({ "services": groups });
        let resp = self
            .tenant
            .apply(self.http.post(url), token)
            .json(&body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Delete the service group identified by `resource` and `apikey`.
    pub async fn delete_service_group(
        &self,
        resource: &str,
        apikey: &str,
        token: Option<&str>,
    ) -> Result<(), FiwareError> {
        let url = join_url(&self.base_url, "/iot/services");
        let resp = self
            .tenant
            .apply(self.http.delete(url), token)
            .query(&[("resource", resource), ("apikey", apikey)])
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// List provisioned devices as raw agent records.
    pub async fn list_devices(&self, token: Option<&str>) -> Result<Vec<Value>, FiwareError> {
        let url = join_url(&self.base_url, "/iot/devices");
        let resp = self.tenant.apply(self.http.get(url), token).send().await?;
        let payload = read_json(check_status(resp).await?).await;
        Ok(take_array(payload, "devices"))
    }

    /// Register one or more devices.
    pub async fn register_devices(&self, devices: &[Value], token: Option<&str>) -> Result<(), FiwareError> {
        let url = join_url(&self.base_url, "/iot/devices");
        let body = json!({ "devices": devices });
        let resp = self
            .tenant
            .apply(self.http.post(url), token)
            .json(&body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Delete a device by its external id.
    pub async fn delete_device(&self, device_id: &str, token: Option<&str>) -> Result<(), FiwareError> {
        let url = self.device_url(device_id)?;
        let resp = self.tenant.apply(self.http.delete(url), token).send().await?;
        check_status(resp).await?;
        Ok(())
    }

    fn device_url(&self, device_id: &str) -> Result<Url, FiwareError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| FiwareError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| FiwareError::Url(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["iot", "devices", device_id]);
        Ok(url)
    }
}

/// Bodies that are not JSON are treated as empty, like an empty listing.
async fn read_json(resp: reqwest::Response) -> Value {
    resp.json::<Value>().await.unwrap_or(Value::Null)
}

fn take_array(mut payload: Value, field: &str) -> Vec<Value> {
    match payload.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}
