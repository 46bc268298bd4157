//! TOML configuration loading and environment variable overrides.
//!
//! # Loading order
//! 1. Parse `~/.scanforge/config.toml` (or the path in `SCANFORGE_CONFIG`)
//! 2. Apply `SCANFORGE_*` environment variable overrides
//! 3. Fall back to [`AppConfig::default()`] if the file is missing

use std::{env, fs, path::{Path, PathBuf}};

use super::schema::AppConfig;

/// Return the default config file path: `~/.scanforge/config.toml`.
pub fn default_config_path() -> Result<PathBuf, String> {
    dirs::home_dir()
        .map(|h| h.join(".scanforge").join("config.toml"))
        .ok_or_else(|| "could not determine home directory".to_string())
}

/// Load [`AppConfig`] from the given path, falling back to defaults if the
/// file does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| format!("failed to parse config at {path:?}: {e}"))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(format!("failed to read config at {path:?}: {e}")),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from the default path (or `SCANFORGE_CONFIG` override).
pub fn load_default_config() -> AppConfig {
    let path = env::var("SCANFORGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path().unwrap_or_else(|_| PathBuf::from("config.toml")));

    load_config(&path).unwrap_or_default()
}

/// Apply `SCANFORGE_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `SCANFORGE_MODEL`                 → `llm.model`
/// - `SCANFORGE_API_KEY`               → `llm.api_key`
/// - `SCANFORGE_API_BASE`              → `llm.api_base`
/// - `SCANFORGE_LLM_TIMEOUT_SECS`      → `llm.request_timeout_secs`
/// - `SCANFORGE_SANDBOX_MODE`          → `sandbox.mode` (`off` | `proxied`)
/// - `SCANFORGE_SANDBOX_CONNECT_SECS`  → `sandbox.connect_timeout_secs`
/// - `SCANFORGE_SANDBOX_EXEC_SECS`     → `sandbox.execution_timeout_secs`
/// - `SCANFORGE_MAX_ITERATIONS`        → `limits.max_iterations`
/// - `SCANFORGE_RUN_DIR`               → `tracer.run_dir`
fn apply_env_overrides(config: &mut AppConfig) {
    fn set_string(key: &str, slot: &mut String) {
        if let Ok(value) = env::var(key) {
            *slot = value;
        }
    }
    fn set_opt_string(key: &str, slot: &mut Option<String>) {
        if let Ok(value) = env::var(key) {
            *slot = Some(value);
        }
    }
    fn set_parsed<T: std::str::FromStr>(key: &str, slot: &mut T) {
        if let Some(value) = env::var(key).ok().and_then(|v| v.parse().ok()) {
            *slot = value;
        }
    }

    set_string("SCANFORGE_MODEL", &mut config.llm.model);
    set_opt_string("SCANFORGE_API_KEY", &mut config.llm.api_key);
    set_opt_string("SCANFORGE_API_BASE", &mut config.llm.api_base);
    set_parsed("SCANFORGE_LLM_TIMEOUT_SECS", &mut config.llm.request_timeout_secs);
    set_parsed("SCANFORGE_SANDBOX_CONNECT_SECS", &mut config.sandbox.connect_timeout_secs);
    set_parsed("SCANFORGE_SANDBOX_EXEC_SECS", &mut config.sandbox.execution_timeout_secs);
    set_parsed("SCANFORGE_MAX_ITERATIONS", &mut config.limits.max_iterations);

    if let Ok(mode) = env::var("SCANFORGE_SANDBOX_MODE") {
        config.sandbox.mode = match mode.as_str() {
            "off" => super::schema::SandboxMode::Off,
            _ => super::schema::SandboxMode::Proxied,
        };
    }
    if let Ok(dir) = env::var("SCANFORGE_RUN_DIR") {
        config.tracer.run_dir = Some(PathBuf::from(dir));
    }
}

/// Atomically save `config` to `path`.
///
/// Writes to `<path>.tmp`, creates a backup of the existing file as
/// `<path>.bak`, then renames the temp file to `<path>`.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), String> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| format!("failed to serialise config: {e}"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create config dir: {e}"))?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &content).map_err(|e| format!("failed to write temp config: {e}"))?;

    if path.exists() {
        let bak_path = path.with_extension("toml.bak");
        fs::copy(path, &bak_path).map_err(|e| format!("failed to backup config: {e}"))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| format!("failed to replace config file: {e}"))?;
    Ok(())
}

#[cfg(test)]
#[allow(unsafe_code)] // env::set_var / remove_var are unsafe in Rust 2024; tests are single-threaded.
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[llm]\nmodel = \"openai/gpt-4o\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.llm.model, "openai/gpt-4o");
        assert_eq!(config.limits.max_iterations, 300);
        assert_eq!(config.sandbox.connect_timeout_secs, 10);
    }

    #[test]
    fn load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[llm]
model = "openai/gpt-4o"
request_timeout_secs = 30

[sandbox]
mode = "off"
connect_timeout_secs = 5
execution_timeout_secs = 120

[limits]
max_iterations = 100
verifier_max_iterations = 20
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.llm.request_timeout_secs, 30);
        assert_eq!(config.sandbox.mode, super::super::schema::SandboxMode::Off);
        assert_eq!(config.limits.max_iterations, 100);
        assert_eq!(config.limits.verifier_max_iterations, 20);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut original = AppConfig::default();
        original.llm.model = "openai/gpt-4o-mini".to_owned();
        original.limits.max_iterations = 50;

        save_config(&path, &original).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, original, "config should round-trip through save/load");
    }

    #[test]
    fn save_creates_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        save_config(&path, &AppConfig::default()).unwrap();
        save_config(&path, &AppConfig::default()).unwrap();
        let bak = path.with_extension("toml.bak");
        assert!(bak.exists(), "backup file should exist after second save");
    }

    #[test]
    fn env_override_model() {
        let key = "SCANFORGE_MODEL";
        // SAFETY: single-threaded test context; no other threads read this var.
        unsafe { env::set_var(key, "openai/gpt-4o"); }
        let config = load_default_config();
        // SAFETY: same as set_var above.
        unsafe { env::remove_var(key); }
        assert_eq!(config.llm.model, "openai/gpt-4o");
    }

    #[test]
    fn env_override_max_iterations() {
        let key = "SCANFORGE_MAX_ITERATIONS";
        // SAFETY: single-threaded test context; no other threads read this var.
        unsafe { env::set_var(key, "42"); }
        let config = load_default_config();
        // SAFETY: same as set_var above.
        unsafe { env::remove_var(key); }
        assert_eq!(config.limits.max_iterations, 42);
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "this is not valid toml!!!");
        assert!(load_config(&path).is_err());
    }
}
