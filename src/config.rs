//! Configuration for nativex, read from `.nativex/nativex.toml`.
//!
//! Layering is file → environment → CLI. A missing file yields defaults and
//! every section and field is optional.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9090
//!
//! [database]
//! path = ".nativex/nativex.db"
//!
//! [sandbox]
//! projects_root = "/srv/projects"
//! network = "nativex-net"
//! image = "nativex-editor"
//! base_domain = "preview.example.com"
//! init_timeout_secs = 600
//!
//! [model]
//! base_url = "https://api.groq.com/openai/v1"
//! model = "llama3-70b-8192"
//! api_key_env = "GROQ_API_KEY"
//!
//! [actions]
//! sink = "container"
//! command_timeout_secs = 300
//!
//! [dispatcher]
//! workers = 2
//!
//! [logging]
//! dir = ".nativex/logs"
//! json = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default location of the config file relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".nativex/nativex.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NativexConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub sandbox: SandboxSettings,
    pub model: ModelSettings,
    pub actions: ActionSettings,
    pub dispatcher: DispatcherSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".nativex/nativex.db"),
        }
    }
}

/// Everything the lifecycle manager needs to name, mount and route a sandbox.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Host directory holding one subdirectory per project.
    pub projects_root: PathBuf,
    /// Shared virtual network every sandbox joins.
    pub network: String,
    pub image: String,
    pub container_prefix: String,
    pub base_domain: String,
    pub scheme: String,
    /// Mount point of the project directory inside the container.
    pub mount_target: String,
    pub backend_port: u16,
    pub init_marker: String,
    pub init_timeout_secs: u64,
    pub init_poll_interval_ms: u64,
    pub entrypoint: String,
    pub secure_entrypoint: String,
    pub cert_resolver: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            network: "nativex-net".to_string(),
            image: "nativex-editor".to_string(),
            container_prefix: "editor-".to_string(),
            base_domain: "nativex.localhost".to_string(),
            scheme: "http".to_string(),
            mount_target: "/home/coder/project".to_string(),
            backend_port: 8080,
            init_marker: ".init-done".to_string(),
            init_timeout_secs: 600,
            init_poll_interval_ms: 500,
            entrypoint: "web".to_string(),
            secure_entrypoint: "websecure".to_string(),
            cert_resolver: "myresolver".to_string(),
        }
    }
}

impl SandboxSettings {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn init_poll_interval(&self) -> Duration {
        Duration::from_millis(self.init_poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Replaces the built-in system prompt when set.
    pub system_prompt_file: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama3-70b-8192".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            system_prompt_file: None,
        }
    }
}

impl ModelSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Where generated commands execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Inside the project's container.
    #[default]
    Container,
    /// On the host, in the project directory.
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActionSettings {
    pub sink: SinkKind,
    pub command_timeout_secs: u64,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            sink: SinkKind::Container,
            command_timeout_secs: 300,
        }
    }
}

impl ActionSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub workers: usize,
    pub poll_interval_ms: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 1000,
        }
    }
}

impl DispatcherSettings {
    /// Idle wait between queue polls, at least 1ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl NativexConfig {
    /// Load from `path`, falling back to defaults when the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Load from `path` and apply `NATIVEX_*` environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("NATIVEX_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = var("NATIVEX_PROJECTS_ROOT") {
            self.sandbox.projects_root = PathBuf::from(v);
        }
        if let Some(v) = var("NATIVEX_BASE_DOMAIN") {
            self.sandbox.base_domain = v;
        }
        if let Some(v) = var("NATIVEX_MODEL") {
            self.model.model = v;
        }
        if let Some(v) = var("NATIVEX_MODEL_BASE_URL") {
            self.model.base_url = v;
        }
    }

    /// Directory for log files, if file logging is enabled.
    pub fn log_dir(&self) -> Option<&Path> {
        self.logging.dir.as_deref()
    }
}

/// `~/projects`, or `/home/user/projects` when no home directory is known.
fn default_projects_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("projects"))
        .unwrap_or_else(|| PathBuf::from("/home/user/projects"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn test_config_defaults() {
        let config = NativexConfig::default();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.sandbox.network, "nativex-net");
        assert_eq!(config.sandbox.container_prefix, "editor-");
        assert_eq!(config.sandbox.init_marker, ".init-done");
        assert_eq!(config.sandbox.init_timeout(), Duration::from_secs(600));
        assert_eq!(config.sandbox.init_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.model.api_key_env, "GROQ_API_KEY");
        assert_eq!(config.actions.sink, SinkKind::Container);
        assert_eq!(config.dispatcher.workers, 2);
        assert!(config.logging.dir.is_none());
    }

    #[test]
    fn test_config_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = NativexConfig::load(&dir.path().join("nativex.toml")).unwrap();
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn test_config_load_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nativex.toml");
        fs::write(
            &path,
            r#"
[server]
host = "0.0.0.0"
port = 3002

[database]
path = "/var/lib/nativex/db.sqlite"

[sandbox]
projects_root = "/srv/projects"
network = "preview-net"
image = "editor:latest"
base_domain = "preview.example.com"
scheme = "https"
backend_port = 3000
init_timeout_secs = 60
init_poll_interval_ms = 250

[model]
model = "llama-3.3-70b"
api_key_env = "MY_KEY"

[actions]
sink = "local"
command_timeout_secs = 30

[dispatcher]
workers = 8
poll_interval_ms = 200

[logging]
dir = "/var/log/nativex"
json = true
"#,
        )
        .unwrap();

        let config = NativexConfig::load(&path).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3002);
        assert_eq!(config.database.path, PathBuf::from("/var/lib/nativex/db.sqlite"));
        assert_eq!(config.sandbox.projects_root, PathBuf::from("/srv/projects"));
        assert_eq!(config.sandbox.network, "preview-net");
        assert_eq!(config.sandbox.scheme, "https");
        assert_eq!(config.sandbox.backend_port, 3000);
        assert_eq!(config.sandbox.init_timeout(), Duration::from_secs(60));
        assert_eq!(config.model.model, "llama-3.3-70b");
        assert_eq!(config.model.api_key_env, "MY_KEY");
        assert_eq!(config.actions.sink, SinkKind::Local);
        assert_eq!(config.actions.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.dispatcher.workers, 8);
        assert_eq!(config.log_dir(), Some(Path::new("/var/log/nativex")));
        assert!(config.logging.json);
    }

    #[test]
    fn test_config_load_partial() {
        let config = NativexConfig::from_toml(
            r#"
[sandbox]
base_domain = "apps.example.org"
"#,
        )
        .unwrap();
        assert_eq!(config.sandbox.base_domain, "apps.example.org");
        assert_eq!(config.sandbox.network, "nativex-net"); // default
        assert_eq!(config.sandbox.mount_target, "/home/coder/project"); // default
        assert_eq!(config.server.port, 9090); // default
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nativex.toml");
        fs::write(&path, "not valid toml {{{{").unwrap();
        assert!(NativexConfig::load(&path).is_err());
    }

    #[test]
    fn test_zero_poll_interval_is_clamped() {
        let config = NativexConfig::from_toml("[dispatcher]\npoll_interval_ms = 0\n").unwrap();
        assert_eq!(config.dispatcher.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_config_rejects_unknown_sink() {
        assert!(NativexConfig::from_toml("[actions]\nsink = \"ssh\"\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("NATIVEX_DB_PATH", "/tmp/x.db"),
            ("NATIVEX_BASE_DOMAIN", "dev.local"),
            ("NATIVEX_MODEL", "mixtral"),
        ]
        .into_iter()
        .collect();

        let mut config = NativexConfig::default();
        config.apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.sandbox.base_domain, "dev.local");
        assert_eq!(config.model.model, "mixtral");
        assert_eq!(config.sandbox.projects_root, default_projects_root());
    }
}
