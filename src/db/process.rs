// src/db/process.rs

//! Control over the process that hosts the backing store.

use crate::errors::StoreError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Start, stop and health-check the process behind the store.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Cheap readiness check; never errors, an unreachable store is `false`.
    async fn is_healthy(&self) -> bool;
    async fn start(&self) -> Result<(), StoreError>;
    async fn stop(&self) -> Result<(), StoreError>;
}

/// For stores that live inside this process. Always ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedProcess;

#[async_trait]
impl ProcessManager for EmbeddedProcess {
    async fn is_healthy(&self) -> bool {
        true
    }

    async fn start(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A single-node search engine running in a local docker container.
pub struct DockerProcess {
    container: String,
    image: String,
    health_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct ClusterHealth {
    status: String,
}

impl DockerProcess {
    pub const DEFAULT_IMAGE: &'static str = "docker.elastic.co/elasticsearch/elasticsearch:7.17.0";

    pub fn new(container: impl Into<String>, base_url: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            container: container.into(),
            image: Self::DEFAULT_IMAGE.to_string(),
            health_url: format!("{}/_cluster/health", base_url.trim_end_matches('/')),
            client,
        })
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    async fn docker(&self, args: &[&str]) -> Result<String, StoreError> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| StoreError::Backend(format!("docker unavailable: {e}")))?;

        if !output.status.success() {
            return Err(StoreError::Backend(format!(
                "docker {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn is_running(&self) -> bool {
        matches!(
            self.docker(&["inspect", "-f", "{{.State.Running}}", &self.container]).await,
            Ok(out) if out == "true"
        )
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        let names = self.docker(&["ps", "-a", "--format", "{{.Names}}"]).await?;
        Ok(names.lines().any(|name| name == self.container))
    }
}

#[async_trait]
impl ProcessManager for DockerProcess {
    async fn is_healthy(&self) -> bool {
        let Ok(resp) = self.client.get(&self.health_url).send().await else {
            return false;
        };
        if !resp.status().is_success() {
            return false;
        }
        match resp.json::<ClusterHealth>().await {
            Ok(health) => health.status == "green" || health.status == "yellow",
            Err(_) => false,
        }
    }

    async fn start(&self) -> Result<(), StoreError> {
        if self.is_running().await {
            debug!(container = %self.container, "container already running");
            return Ok(());
        }

        if self.exists().await? {
            info!(container = %self.container, "container exists, restarting");
            self.docker(&["restart", &self.container]).await?;
        } else {
            info!(container = %self.container, image = %self.image, "creating container");
            let volume = format!("{}-data:/usr/share/elasticsearch/data", self.container);
            self.docker(&[
                "run",
                "-d",
                "--name",
                &self.container,
                "-p",
                "9200:9200",
                "-p",
                "9300:9300",
                "-e",
                "discovery.type=single-node",
                "-v",
                &volume,
                &self.image,
            ])
            .await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), StoreError> {
        if !self.is_running().await {
            debug!(container = %self.container, "container not running");
            return Ok(());
        }
        info!(container = %self.container, "stopping container");
        self.docker(&["stop", &self.container]).await?;
        Ok(())
    }
}
