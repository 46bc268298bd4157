//! Configuration schema for the scan orchestration core.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly. Missing sections fall back to their `Default` impl.
//!
//! Example `~/.scanforge/config.toml`:
//! ```toml
//! [llm]
//! model = "anthropic/claude-sonnet-4.5"
//! api_base = "https://api.example.test/v1"
//!
//! [sandbox]
//! mode = "proxied"
//! connect_timeout_secs = 10
//! execution_timeout_secs = 500
//!
//! [limits]
//! max_iterations = 300
//! verifier_max_iterations = 50
//! ```

use serde::{Deserialize, Serialize};

// ─── LlmConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Model selector (e.g. `"anthropic/claude-sonnet-4.5"`).
    pub model: String,
    /// Optional API key; when absent, providers read their own env var.
    pub api_key: Option<String>,
    /// Optional API base URL override.
    pub api_base: Option<String>,
    /// Overall request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Maximum concurrent in-flight requests admitted by the request queue.
    pub max_concurrent_requests: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4.5".to_owned(),
            api_key: None,
            api_base: None,
            request_timeout_secs: 120,
            max_concurrent_requests: 4,
        }
    }
}

// ─── SandboxMode ─────────────────────────────────────────────────────────────

/// Controls whether sandbox-flagged tool calls are actually proxied over
/// HTTPS to a tool-server, or executed in-process (useful for tests and for
/// environments with no sandbox adapter attached).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// No sandboxing — every tool call runs locally.
    Off,
    /// Tools flagged `runs_in_sandbox` are proxied to the tool-server.
    #[default]
    Proxied,
}

// ─── SandboxConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    pub mode: SandboxMode,
    /// Connect timeout for sandbox tool-server calls, seconds.
    pub connect_timeout_secs: u64,
    /// Total execution timeout for sandbox tool-server calls, seconds.
    pub execution_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            connect_timeout_secs: 10,
            execution_timeout_secs: 500,
        }
    }
}

// ─── LimitsConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum iterations for the root agent and ordinary spawned agents.
    pub max_iterations: u32,
    /// Maximum iterations for verifier agents.
    pub verifier_max_iterations: u32,
    /// Idle-waiting timeout in seconds before an agent auto-resumes.
    pub waiting_timeout_secs: u64,
    /// Verification watchdog timeout in seconds.
    pub verification_timeout_secs: u64,
    /// Cap on concurrently executing tool invocations within a parallel wave.
    pub parallel_wave_cap: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            verifier_max_iterations: 50,
            waiting_timeout_secs: 600,
            verification_timeout_secs: 600,
            parallel_wave_cap: 16,
        }
    }
}

// ─── TracerConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TracerConfig {
    /// Directory the tracer writes run artifacts into. `None` disables
    /// persistence; the queues stay in memory only.
    pub run_dir: Option<std::path::PathBuf>,
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.scanforge/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    pub limits: LimitsConfig,
    pub tracer: TracerConfig,
}
