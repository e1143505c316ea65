use anyhow::Context;
use reqwest::multipart;
use std::path::Path;
use sttq_protocol::{PoolStatus, StatusResponse};

/// Thin wrapper around the server's HTTP contract. Holds a single reqwest
/// client so connections are pooled across submissions and polls.
#[derive(Clone)]
pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub async fn pool_status(&self) -> anyhow::Result<PoolStatus> {
        let resp = self
            .http
            .get(format!("{}/pool/status", self.base_url))
            .send()
            .await
            .context("GET /pool/status")?
            .error_for_status()
            .context("pool status returned an error")?;
        resp.json().await.context("decoding pool status")
    }

    pub async fn submit(&self, task_id: &str, model: &str, password: &str, bundle_path: &Path) -> anyhow::Result<()> {
        let bundle_bytes = tokio::fs::read(bundle_path).await.context("reading bundle for upload")?;
        let part = multipart::Part::bytes(bundle_bytes).file_name("bundle.bin");
        let form = multipart::Form::new()
            .text("task_id", task_id.to_string())
            .text("model", model.to_string())
            .text("password", password.to_string())
            .part("audio_file", part);

        let resp = self
            .http
            .post(format!("{}/tasks/submit", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("POST /tasks/submit")?;

        let status = resp.status();
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("submit for '{task_id}' failed with {status}: {body}");
    }

    pub async fn status(&self, task_id: &str) -> anyhow::Result<StatusResponse> {
        let resp = self
            .http
            .get(format!("{}/tasks/{task_id}/status", self.base_url))
            .send()
            .await
            .context("GET task status")?
            .error_for_status()
            .context("task status returned an error")?;
        resp.json().await.context("decoding task status")
    }

    pub async fn download_result(&self, task_id: &str) -> anyhow::Result<bytes::Bytes> {
        let resp = self
            .http
            .get(format!("{}/tasks/{task_id}/result/download", self.base_url))
            .send()
            .await
            .context("GET result download")?
            .error_for_status()
            .context("result download returned an error")?;
        resp.bytes().await.context("reading result body")
    }
}
