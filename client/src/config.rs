use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::channel::{fresh_id, ReconnectPolicy};

pub const PROGNAME: &str = "wss";
pub const CONFIG_NAME: &str = "client.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("reading config file at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing config file as TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub url: String,
    /// Empty means a fresh id per process.
    pub client_id: String,
    pub root: String,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub max_failures: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws/".to_string(),
            client_id: String::new(),
            root: "/".to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_ms: policy.initial.as_millis() as u64,
            max_ms: policy.max.as_millis() as u64,
            max_failures: policy.max_failures,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial: Duration::from_millis(self.initial_ms),
            max: Duration::from_millis(self.max_ms.max(self.initial_ms)),
            max_failures: self.max_failures,
        }
    }
}

impl ClientConfig {
    pub fn from_toml(conts: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(conts)?)
    }

    /// Reads `path`, a missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(conts) => Self::from_toml(&conts),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No config at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(PROGNAME).join(CONFIG_NAME))
    }

    pub fn client_id(&self) -> String {
        if self.client_id.is_empty() {
            fresh_id("c")
        } else {
            self.client_id.clone()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let conf = ClientConfig::from_toml(
            r#"
            url = "ws://example.org:9000/ws/"
            [reconnect]
            max_failures = 3
            "#,
        )
        .unwrap();
        assert_eq!(conf.url, "ws://example.org:9000/ws/");
        assert_eq!(conf.root, "/");
        assert_eq!(conf.reconnect.max_failures, 3);
        assert_eq!(conf.reconnect.policy().initial, Duration::from_secs(1));
        assert_eq!(conf.reconnect.policy().max, Duration::from_secs(30));
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert_eq!(ClientConfig::load(&missing).unwrap(), ClientConfig::default());

        let path = dir.path().join(CONFIG_NAME);
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "client_id = \"me\"").unwrap();
        let conf = ClientConfig::load(&path).unwrap();
        assert_eq!(conf.client_id(), "me");

        fs::write(&path, "url = [").unwrap();
        assert!(matches!(
            ClientConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_generated_client_id() {
        let conf = ClientConfig::default();
        assert!(conf.client_id().starts_with('c'));
        assert_ne!(conf.client_id(), conf.client_id());
    }
}
