//! Report export contract.
//!
//! Map composition, symbology, and PDF emission belong to an external
//! renderer; the pipeline only hands over the finished notify layer and its
//! metadata. The webhook exporter ships that metadata to a chat channel so
//! a run's outcome is visible without opening the map document.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::models::NotifyResult;

const USERNAME: &str = "Culex";

/// Everything an exporter gets about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    /// Name of the final notify layer.
    pub layer: String,
    /// Feature count of that layer.
    pub count: usize,
    /// User-supplied report subtitle.
    pub subtitle: String,
    pub generated_at: DateTime<Utc>,
}

impl ReportMeta {
    pub fn new(result: &NotifyResult, subtitle: &str) -> Self {
        Self {
            layer: result.layer.name.clone(),
            count: result.count,
            subtitle: subtitle.to_string(),
            generated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ReportExporter {
    async fn export(&self, meta: &ReportMeta) -> Result<()>;
}

#[derive(Serialize, Debug)]
struct WebhookEmbed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
}

#[derive(Serialize, Debug)]
struct WebhookPayload {
    username: String,
    embeds: Vec<WebhookEmbed>,
}

/// Posts run summaries to a Discord-compatible webhook.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ReportExporter for WebhookNotifier {
    async fn export(&self, meta: &ReportMeta) -> Result<()> {
        let payload = WebhookPayload {
            username: USERNAME.to_string(),
            embeds: vec![WebhookEmbed {
                title: format!("West Nile Virus Outbreak: {}", meta.subtitle),
                description: format!(
                    "**{}** addresses need to be notified (layer `{}`)",
                    meta.count, meta.layer
                ),
                color: 0x00FF00,
                timestamp: meta.generated_at.to_rfc3339(),
            }],
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            error!("Failed to send run notification: {}", error_text);
            anyhow::bail!("run notification failed: {}", error_text);
        }

        info!("Sent run notification for layer {}", meta.layer);
        Ok(())
    }
}
