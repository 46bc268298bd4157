//! Sandbox Adapter — the core's only dependency on the external
//! container/tool-server subsystem. The actual container runtime is
//! out of scope; this module defines the narrow HTTPS contract the core
//! requires from it and a client that speaks it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox authentication failed")]
    AuthFailed,
    #[error("sandbox unreachable: {0}")]
    Unreachable(String),
    #[error("invalid sandbox endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("sandbox tool execution error: {0}")]
    ExecutionError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub workspace_id: String,
    pub api_url: String,
    pub auth_token: String,
    pub tool_server_port: u16,
    pub agent_id: String,
}

/// External interface the core depends on. A concrete implementation
/// talks to the container-runtime's control plane; it is not part of this
/// crate's scope.
#[async_trait]
pub trait SandboxManager: Send + Sync {
    /// `existing_token` lets siblings under one scan share a workspace;
    /// `local_sources` are host paths the runtime mounts into it.
    async fn create_sandbox(
        &self,
        agent_id: &str,
        existing_token: Option<&str>,
        local_sources: &[String],
    ) -> Result<SandboxHandle, SandboxError>;

    fn get_sandbox_url(&self, workspace_id: &str, port: u16) -> String;

    async fn destroy_sandbox(&self, workspace_id: &str) -> Result<(), SandboxError>;
}

/// HTTPS client for the `{server_url}/execute` tool-server contract. Used
/// by the tool dispatcher whenever a tool's [`ToolSpec`] is `SandboxProxied`
/// and the calling agent isn't already executing inside the sandbox.
///
/// [`ToolSpec`]: crate::tools::ToolSpec
pub struct SandboxToolClient {
    http: reqwest::Client,
    connect_timeout: Duration,
    execution_timeout: Duration,
}

impl SandboxToolClient {
    pub fn new(connect_timeout: Duration, execution_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(execution_timeout)
            .build()
            .unwrap_or_default();
        Self { http, connect_timeout, execution_timeout }
    }

    /// Resolves a path like `execute` against the handle's base URL,
    /// validating the base as a real URL rather than trusting string
    /// concatenation.
    fn endpoint(handle: &SandboxHandle, path: &str) -> Result<Url, SandboxError> {
        let mut url = Url::parse(&handle.api_url).map_err(|e| SandboxError::InvalidEndpoint(format!("{}: {e}", handle.api_url)))?;
        url.path_segments_mut()
            .map_err(|()| SandboxError::InvalidEndpoint(format!("{} cannot be a base URL", handle.api_url)))?
            .pop_if_empty()
            .push(path);
        Ok(url)
    }

    pub async fn register_agent(&self, handle: &SandboxHandle) -> Result<(), SandboxError> {
        let mut url = Self::endpoint(handle, "register_agent")?;
        url.query_pairs_mut().append_pair("agent_id", &handle.agent_id);
        let resp = self
            .http
            .post(url)
            .bearer_auth(&handle.auth_token)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;
        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SandboxError::AuthFailed);
        }
        if !resp.status().is_success() {
            return Err(SandboxError::ExecutionError(format!("register_agent returned {}", resp.status())));
        }
        Ok(())
    }

    /// POST `{server_url}/execute` with `{agent_id, tool_name, kwargs}`.
    pub async fn execute(&self, handle: &SandboxHandle, tool_name: &str, kwargs: Value) -> Result<Value, SandboxError> {
        let url = Self::endpoint(handle, "execute")?;
        let body = serde_json::json!({
            "agent_id": handle.agent_id,
            "tool_name": tool_name,
            "kwargs": kwargs,
        });

        let resp = self
            .http
            .post(url)
            .bearer_auth(&handle.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SandboxError::AuthFailed);
        }
        if !resp.status().is_success() {
            return Err(SandboxError::ExecutionError(format!("sandbox returned {}", resp.status())));
        }

        let parsed: Value = resp.json().await.map_err(|e| SandboxError::ExecutionError(e.to_string()))?;
        if let Some(err) = parsed.get("error").and_then(|v| v.as_str()) {
            return Err(SandboxError::ExecutionError(err.to_string()));
        }
        Ok(parsed.get("result").cloned().unwrap_or(parsed))
    }

    fn classify(err: &reqwest::Error) -> SandboxError {
        if err.is_timeout() {
            SandboxError::Unreachable(format!("timed out: {err}"))
        } else if err.is_connect() {
            SandboxError::Unreachable(err.to_string())
        } else {
            SandboxError::ExecutionError(err.to_string())
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_construction_applies_timeouts() {
        let client = SandboxToolClient::new(Duration::from_secs(10), Duration::from_secs(500));
        assert_eq!(client.connect_timeout(), Duration::from_secs(10));
        assert_eq!(client.execution_timeout(), Duration::from_secs(500));
    }

    fn handle(api_url: &str) -> SandboxHandle {
        SandboxHandle { workspace_id: "ws".into(), api_url: api_url.into(), auth_token: "tok".into(), tool_server_port: 8443, agent_id: "a1".into() }
    }

    #[test]
    fn endpoint_joins_with_and_without_trailing_slash() {
        let with = SandboxToolClient::endpoint(&handle("https://sandbox.test/"), "execute").unwrap();
        let without = SandboxToolClient::endpoint(&handle("https://sandbox.test"), "execute").unwrap();
        assert_eq!(with.as_str(), "https://sandbox.test/execute");
        assert_eq!(without.as_str(), "https://sandbox.test/execute");
    }

    #[test]
    fn endpoint_rejects_garbage_base() {
        let err = SandboxToolClient::endpoint(&handle("not a url"), "execute");
        assert!(matches!(err, Err(SandboxError::InvalidEndpoint(_))));
    }
}
