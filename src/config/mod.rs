use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// The hosted generation backend.
pub const DEFAULT_BACKEND_URL: &str = "https://game-forge-backend.onrender.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the generation service and games gateway.
    pub backend_url: String,

    /// Per-call timeout for generation requests, in seconds. Generation is
    /// slow; the default is generous.
    pub request_timeout_secs: u64,

    /// How long a preview waits for the artifact frame before keeping the
    /// placeholder, in milliseconds.
    pub preview_grace_ms: u64,

    /// Default arcade knobs applied to the first prompt of a session.
    pub weapon: Option<String>,
    pub vibe: Option<String>,
    pub target: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout_secs: 120,
            preview_grace_ms: 4000,
            weapon: None,
            vibe: None,
            target: None,
        }
    }
}

/// Platform config dir for this app.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("gameforge"))
        .unwrap_or_else(|| PathBuf::from(".gameforge"))
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn preview_grace(&self) -> Duration {
        Duration::from_millis(self.preview_grace_ms)
    }

    pub fn path() -> PathBuf {
        config_dir().join("config.toml")
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.preview_grace(), Duration::from_millis(4000));
        assert!(config.weapon.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            backend_url = "http://localhost:8000"
            weapon = "Laser"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend_url, "http://localhost:8000");
        assert_eq!(config.weapon.as_deref(), Some("Laser"));
        assert_eq!(config.request_timeout_secs, 120);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.backend_url = "http://localhost:9999".to_string();
        config.vibe = Some("Underwater".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.backend_url, "http://localhost:9999");
        assert_eq!(loaded.vibe.as_deref(), Some("Underwater"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
    }
}
