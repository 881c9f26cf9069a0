//! HTTP client for the PromptX service.
//!
//! The base URL is injected at construction so every caller (and every test)
//! decides which endpoint it talks to. `OptimizeApi` is the seam the
//! orchestrator and session store are written against.

use crate::model::{HistoryEntry, LoginResponse, OptimizeParams, PollResponse, SubmitResponse, User};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level failure (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success status; carries the server-provided detail when present.
    #[error("{0}")]
    Rejected(String),
    /// 2xx response whose body did not decode as expected.
    #[error("unexpected response from the service")]
    Malformed,
}

#[async_trait]
pub trait OptimizeApi: Send + Sync {
    async fn submit_job(
        &self,
        token: &str,
        prompt: &str,
        params: &OptimizeParams,
    ) -> Result<SubmitResponse, ApiError>;
    async fn job_status(&self, job_id: &str) -> Result<PollResponse, ApiError>;
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError>;
    async fn register(&self, email: &str, password: &str) -> Result<(), ApiError>;
    async fn me(&self, token: &str) -> Result<User, ApiError>;
    async fn prompt_history(&self, token: &str) -> Result<Vec<HistoryEntry>, ApiError>;
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ImproveBody<'a> {
    prompt: &'a str,
    max_iterations: u32,
    min_consecutive_improvements: u32,
}

#[derive(Debug, Serialize)]
struct CredentialsBody<'a> {
    email: &'a str,
    password: &'a str,
}

/// FastAPI-style error payload.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("promptx/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-success response into `Rejected`, preferring the `detail`
    /// field the service puts in error bodies.
    async fn rejected(resp: reqwest::Response) -> ApiError {
        let status = resp.status();
        let detail = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.detail)
            .filter(|d| !d.trim().is_empty());
        ApiError::Rejected(detail.unwrap_or_else(|| format!("request failed with status {status}")))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, ApiError> {
        if !resp.status().is_success() {
            return Err(Self::rejected(resp).await);
        }
        resp.json::<T>().await.map_err(|_| ApiError::Malformed)
    }
}

#[async_trait]
impl OptimizeApi for ApiClient {
    async fn submit_job(
        &self,
        token: &str,
        prompt: &str,
        params: &OptimizeParams,
    ) -> Result<SubmitResponse, ApiError> {
        let resp = self
            .http
            .post(self.url("/improve-prompt"))
            .bearer_auth(token)
            .json(&ImproveBody {
                prompt,
                max_iterations: params.max_iterations,
                min_consecutive_improvements: params.min_consecutive_improvements,
            })
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn job_status(&self, job_id: &str) -> Result<PollResponse, ApiError> {
        let resp = self
            .http
            .get(self.url(&format!("/job/{job_id}")))
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&CredentialsBody { email, password })
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn register(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/auth/register"))
            .json(&CredentialsBody { email, password })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::rejected(resp).await);
        }
        Ok(())
    }

    async fn me(&self, token: &str) -> Result<User, ApiError> {
        let resp = self
            .http
            .get(self.url("/auth/me"))
            .bearer_auth(token)
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn prompt_history(&self, token: &str) -> Result<Vec<HistoryEntry>, ApiError> {
        let resp = self
            .http
            .get(self.url("/prompt-history"))
            .bearer_auth(token)
            .send()
            .await?;
        Self::decode(resp).await
    }
}
