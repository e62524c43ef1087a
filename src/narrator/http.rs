use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use crate::config::NarratorConfig;

use super::{Narrative, Narrator, RunSummary};

/// Posts the run summary to an HTTP endpoint and reads back a `Narrative`.
#[derive(Debug, Clone)]
pub struct HttpNarrator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNarrator {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build narrator HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// Build from config. Returns `None` when narration is disabled or no endpoint is set.
    pub fn from_config(config: &NarratorConfig) -> anyhow::Result<Option<Self>> {
        match (&config.enabled, &config.endpoint) {
            (true, Some(endpoint)) => Ok(Some(Self::new(
                endpoint,
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Narrator for HttpNarrator {
    async fn summarize(&self, summary: &RunSummary) -> anyhow::Result<Narrative> {
        self.client
            .post(&self.endpoint)
            .json(summary)
            .send()
            .await
            .context("Failed to send run summary to narrator")?
            .error_for_status()
            .context("Narrator returned error status")?
            .json::<Narrative>()
            .await
            .context("Failed to parse narrator response")
    }
}
