//! RPC client the skill runtime process uses to talk to the update
//! sidecar process over HTTP (C9). The two processes share only this
//! wire contract and the shared secret file, matching the reference
//! implementation's split between the main app and its sidecar.

use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::sidecar::models::{RollbackRequest, SidecarStatus, UpdateRequest, UpdateResult};
use crate::update::Diagnostics;

pub struct SidecarClient {
    base_url: String,
    secret: String,
    http: reqwest::Client,
}

impl SidecarClient {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(CoreError::Http)?;
        Ok(Self {
            base_url: base_url.into(),
            secret: secret.into(),
            http,
        })
    }

    async fn authed(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request.header("X-Updater-Secret", &self.secret).send().await.map_err(CoreError::Http)
    }

    pub async fn health(&self) -> bool {
        matches!(self.http.get(format!("{}/health", self.base_url)).send().await, Ok(resp) if resp.status().is_success())
    }

    pub async fn status(&self) -> Result<SidecarStatus> {
        let resp = self.authed(self.http.get(format!("{}/status", self.base_url))).await?;
        resp.json().await.map_err(CoreError::Http)
    }

    pub async fn apply(&self, tag: &str, version: Option<&str>) -> Result<UpdateResult> {
        let resp = self
            .authed(self.http.post(format!("{}/update/apply", self.base_url)).json(&UpdateRequest {
                tag: tag.to_string(),
                version: version.map(str::to_string),
            }))
            .await?;
        resp.json().await.map_err(CoreError::Http)
    }

    pub async fn rollback(&self, previous_sha: &str) -> Result<UpdateResult> {
        let resp = self
            .authed(self.http.post(format!("{}/update/rollback", self.base_url)).json(&RollbackRequest {
                previous_sha: previous_sha.to_string(),
            }))
            .await?;
        resp.json().await.map_err(CoreError::Http)
    }

    pub async fn diagnostics(&self) -> Result<Diagnostics> {
        let resp = self.authed(self.http.get(format!("{}/diagnostics", self.base_url))).await?;
        resp.json().await.map_err(CoreError::Http)
    }
}
