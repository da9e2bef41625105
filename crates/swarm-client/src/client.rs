//! Swarm manager API client
//!
//! Implements the swarm-mode subset of the Docker Engine API used by deployd:
//! `/nodes`, `/services` and `/tasks`.

use crate::error::SwarmError;
use crate::models::*;
use crate::swarm_trait::SwarmClientTrait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Engine error body
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Swarm manager API client
#[derive(Debug, Clone)]
pub struct SwarmClient {
    client: Client,
    base_url: String,
}

impl SwarmClient {
    /// Create a new Swarm client
    ///
    /// # Arguments
    /// * `base_url` - Manager endpoint (e.g., "http://swarm-manager:2375")
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, SwarmError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a full URL from a path
    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Encode filters as the Engine API `filters` JSON map
    fn build_filters(filters: &[(&str, &str)]) -> Result<String, SwarmError> {
        if filters.is_empty() {
            return Ok(String::new());
        }
        let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for &(key, value) in filters {
            map.entry(key).or_default().push(value);
        }
        let json = serde_json::to_string(&map)?;
        Ok(format!("?filters={}", urlencoding::encode(&json)))
    }

    /// Turn a non-success response into a typed error, keeping the manager message
    async fn error_from(response: Response, what: &str) -> SwarmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);

        if status == StatusCode::NOT_FOUND {
            return SwarmError::NotFound(format!("{what}: {message}"));
        }
        // Older managers report a stale version as a 500 with this text
        if status == StatusCode::CONFLICT || message.contains("update out of sequence") {
            return SwarmError::Conflict(format!("{what}: {message}"));
        }
        SwarmError::Api {
            status: status.as_u16(),
            message,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str, what: &str) -> Result<T, SwarmError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, what).await);
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait::async_trait]
impl SwarmClientTrait for SwarmClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn ping(&self) -> Result<(), SwarmError> {
        let url = self.build_url("/_ping");
        debug!("Pinging Swarm manager at {}", self.base_url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "ping").await);
        }
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, SwarmError> {
        self.get_json("/nodes", "list nodes").await
    }

    async fn list_services(&self, filters: &[(&str, &str)]) -> Result<Vec<Service>, SwarmError> {
        let path = format!("/services{}", Self::build_filters(filters)?);
        self.get_json(&path, "list services").await
    }

    async fn inspect_service(&self, name: &str) -> Result<Service, SwarmError> {
        let path = format!("/services/{}", urlencoding::encode(name));
        self.get_json(&path, &format!("service {name}")).await
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<ServiceCreateResponse, SwarmError> {
        let url = self.build_url("/services/create");
        debug!("POST {} for service {}", url, spec.name);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(spec)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, &format!("create service {}", spec.name)).await);
        }

        Ok(response.json().await?)
    }

    async fn update_service(&self, id: &str, version: u64, spec: &ServiceSpec) -> Result<(), SwarmError> {
        let url = self.build_url(&format!(
            "/services/{}/update?version={}",
            urlencoding::encode(id),
            version
        ));
        debug!("POST {} for service {}", url, spec.name);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(spec)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, &format!("update service {}", spec.name)).await);
        }
        Ok(())
    }

    async fn remove_service(&self, name: &str) -> Result<(), SwarmError> {
        let url = self.build_url(&format!("/services/{}", urlencoding::encode(name)));
        debug!("DELETE {}", url);

        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, &format!("remove service {name}")).await);
        }
        Ok(())
    }

    async fn list_tasks(&self, filters: &[(&str, &str)]) -> Result<Vec<Task>, SwarmError> {
        let path = format!("/tasks{}", Self::build_filters(filters)?);
        self.get_json(&path, "list tasks").await
    }
}
