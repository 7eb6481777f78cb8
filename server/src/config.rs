use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use tokio::sync::OnceCell;

pub const PROGNAME: &str = "wss";
pub const CONFIG_NAME: &str = "server.toml";

static CONF: OnceCell<Config> = OnceCell::const_new();

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    bind: String,
    root: PathBuf,
    shell: String,
    watch: Watch,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct Watch {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub ignore_dirs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            root: PathBuf::from("."),
            shell: "nu".to_string(),
            watch: Watch::default(),
        }
    }
}

impl Default for Watch {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 250,
            ignore_dirs: vec!["target".into(), ".git".into(), "node_modules".into()],
        }
    }
}

impl Watch {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn parse_config(conts: &str) -> anyhow::Result<Config> {
    let conf: Config = toml::from_str(conts).context("parsing config file as TOML")?;
    if conf.shell.trim().is_empty() {
        anyhow::bail!("The shell must not be empty");
    }
    Ok(conf)
}

/// Reads `path`, or `server.toml` in the config dir. A missing default file
/// gives the defaults, a missing explicit one is an error.
pub fn init_config(path: Option<&Path>) -> anyhow::Result<()> {
    let conf = match path {
        Some(p) => {
            let conts = fs::read_to_string(p)
                .with_context(|| format!("reading config file at {:?}", p))?;
            parse_config(&conts)?
        }
        None => {
            let conf_file = conf_dir()?.join(CONFIG_NAME);
            match fs::read_to_string(&conf_file) {
                Ok(conts) => parse_config(&conts)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::info!("No config at {:?}, using defaults", conf_file);
                    Config::default()
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("reading config file at {:?}", conf_file))
                }
            }
        }
    };

    let root = conf
        .root
        .canonicalize()
        .with_context(|| format!("project root {:?} does not exist", conf.root))?;
    CONF.set(Config { root, ..conf })
        .context("setting the global conf variable")?;
    Ok(())
}

fn get_instance() -> &'static Config {
    CONF.get().expect("Config was not initialized")
}

pub fn bind() -> &'static str {
    &get_instance().bind
}

pub fn root() -> &'static Path {
    &get_instance().root
}

pub fn shell() -> &'static str {
    &get_instance().shell
}

pub fn watch() -> &'static Watch {
    &get_instance().watch
}

pub fn conf_dir() -> anyhow::Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("could not get config dir")?
        .join(PROGNAME))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let conf = parse_config("").unwrap();
        assert_eq!(conf, Config::default());
        assert_eq!(conf.shell, "nu");
        assert_eq!(conf.watch.debounce(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial() {
        let conf = parse_config(
            r#"
            bind = "0.0.0.0:9000"
            shell = "sh"
            [watch]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(conf.bind, "0.0.0.0:9000");
        assert!(!conf.watch.enabled);
        assert_eq!(conf.watch.debounce_ms, 250);
        assert_eq!(conf.watch.ignore_dirs, Watch::default().ignore_dirs);
    }

    #[test]
    fn test_rejects_empty_shell() {
        assert!(parse_config("shell = \"  \"").is_err());
        assert!(parse_config("bind = 3").is_err());
    }
}
