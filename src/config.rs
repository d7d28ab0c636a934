use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};

/// engine configuration stored in `<gitdir>/twig.toml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    /// configured remotes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<Remote>,
}

/// repository-wide settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreConfig {
    /// path comparisons ignore case; probed from the filesystem when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_case: Option<bool>,
    /// honour the executable bit of working tree files
    #[serde(default = "default_true")]
    pub file_mode: bool,
    /// repository has no working tree
    #[serde(default)]
    pub bare: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ignore_case: None,
            file_mode: true,
            bare: false,
        }
    }
}

/// network settings shared by all transports
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    format!("git/2.0 (twig {})", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> u64 {
    30
}

impl Config {
    /// create a new config for a repository with or without a working tree
    pub fn new(bare: bool) -> Self {
        Self {
            core: CoreConfig {
                bare,
                ..CoreConfig::default()
            },
            ..Self::default()
        }
    }

    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// add a remote
    pub fn add_remote(&mut self, name: impl Into<String>, url: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.remotes.iter().any(|r| r.name == name) {
            return Err(Error::InvalidRef(format!("remote '{}' already exists", name)));
        }
        self.remotes.push(Remote {
            name,
            url: url.into(),
        });
        Ok(())
    }

    /// remove a remote
    pub fn remove_remote(&mut self, name: &str) -> Result<()> {
        let pos = self
            .remotes
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::RemoteNotFound(name.to_string()))?;
        self.remotes.remove(pos);
        Ok(())
    }

    /// get remote by name
    pub fn get_remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }
}

/// a configured remote repository
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
}

impl Remote {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config {
            core: CoreConfig {
                ignore_case: Some(true),
                file_mode: false,
                bare: false,
            },
            transport: TransportConfig::default(),
            remotes: vec![
                Remote::new("origin", "https://example.com/repo.git"),
                Remote::new("backup", "/mnt/backup/repo.git"),
            ],
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.core.ignore_case, Some(true));
        assert!(!parsed.core.file_mode);
        assert_eq!(config.remotes, parsed.remotes);
    }

    #[test]
    fn test_config_add_remove_remote() {
        let mut config = Config::default();

        config.add_remote("origin", "git://foo/bar").unwrap();
        assert_eq!(config.remotes.len(), 1);

        // duplicate should fail
        assert!(config.add_remote("origin", "git://other").is_err());

        let r = config.get_remote("origin").unwrap();
        assert_eq!(r.url, "git://foo/bar");

        config.remove_remote("origin").unwrap();
        assert!(config.remotes.is_empty());

        assert!(matches!(
            config.remove_remote("origin"),
            Err(Error::RemoteNotFound(_))
        ));
    }

    #[test]
    fn test_config_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.core.file_mode);
        assert!(!config.core.bare);
        assert!(config.core.ignore_case.is_none());
        assert_eq!(config.transport.connect_timeout_secs, 30);
        assert!(config.remotes.is_empty());
    }
}
