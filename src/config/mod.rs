pub mod loader;
pub mod schema;

pub use loader::{default_config_path, load_config, load_default_config, save_config};
pub use schema::{AppConfig, LimitsConfig, LlmConfig, SandboxConfig, SandboxMode, TracerConfig};
