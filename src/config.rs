use std::{
    collections::{BTreeMap, BTreeSet},
    env,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, persist};

const CONFIG_DIR: &str = ".config/rift";
const CONFIG_FILE: &str = "config.yaml";
const STATE_FILE: &str = "state.json";

/// Regions scanned when the config names none.
pub const DEFAULT_REGIONS: [&str; 2] = ["us-east-1", "us-west-2"];

/// User configuration, stored as YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sso_start_url: String,
    #[serde(default)]
    pub sso_region: String,
    #[serde(default)]
    pub regions: Vec<String>,
    /// Default kube namespace per inferred environment (`prod`, `dev`, ...).
    #[serde(default)]
    pub namespace_defaults: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub discover_namespaces: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sso_start_url: String::new(),
            sso_region: String::new(),
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
            namespace_defaults: BTreeMap::new(),
            discover_namespaces: true,
        }
    }
}

impl Config {
    /// Read, normalize and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_yaml::from_str(&text).map_err(|err| Error::Parse {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut config = self.clone();
        config.normalize();
        config.validate()?;
        let text = serde_yaml::to_string(&config).map_err(|err| Error::Encode(err.into()))?;
        persist::write_atomic(path, text.as_bytes())
    }

    pub fn normalize(&mut self) {
        let regions: BTreeSet<String> = self
            .regions
            .iter()
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .collect();
        self.regions = if regions.is_empty() {
            DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect()
        } else {
            regions.into_iter().collect()
        };

        self.namespace_defaults = std::mem::take(&mut self.namespace_defaults)
            .into_iter()
            .filter_map(|(env, ns)| {
                let env = env.trim().to_lowercase();
                (!env.is_empty()).then(|| (env, ns.trim().to_string()))
            })
            .collect();

        self.sso_start_url = self.sso_start_url.trim().to_string();
        self.sso_region = self.sso_region.trim().to_lowercase();
    }

    pub fn validate(&self) -> Result<()> {
        if self.sso_start_url.is_empty() {
            return Err(Error::InvalidConfig("missing sso_start_url".into()));
        }
        if self.sso_region.is_empty() {
            return Err(Error::InvalidConfig("missing sso_region".into()));
        }
        if self.regions.is_empty() {
            return Err(Error::InvalidConfig("missing regions".into()));
        }
        Ok(())
    }

    /// Default namespace configured for `env`; `staging` and `stg` alias each other.
    pub fn namespace_for_env(&self, env: &str) -> Option<&str> {
        let key = env.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }
        let lookup = |k: &str| {
            self.namespace_defaults
                .get(k)
                .map(|ns| ns.trim())
                .filter(|ns| !ns.is_empty())
        };
        lookup(&key).or_else(|| match key.as_str() {
            "staging" => lookup("stg"),
            "stg" => lookup("staging"),
            _ => None,
        })
    }

    /// First configured region, used as the default region of generated profiles.
    pub fn default_region(&self) -> Option<&str> {
        self.regions.first().map(String::as_str)
    }
}

/// Filesystem locations of every store the pipeline reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub config: PathBuf,
    pub state: PathBuf,
    pub aws_config: PathBuf,
    pub token_cache: PathBuf,
    pub kubeconfig: PathBuf,
}

impl Paths {
    /// Resolve the default locations under the user's home directory.
    ///
    /// The cluster-client config honours the first entry of `KUBECONFIG`.
    pub fn discover() -> Result<Self> {
        let home = dirs::home_dir().ok_or(Error::NoHomeDir)?;
        let kubeconfig = match kubeconfig_from_env(env::var_os("KUBECONFIG")) {
            Some(path) => resolve_path(&path)?,
            None => home.join(".kube").join("config"),
        };
        Ok(Self {
            config: home.join(CONFIG_DIR).join(CONFIG_FILE),
            state: home.join(CONFIG_DIR).join(STATE_FILE),
            aws_config: home.join(".aws").join("config"),
            token_cache: home.join(".aws").join("sso").join("cache"),
            kubeconfig,
        })
    }
}

fn kubeconfig_from_env(value: Option<std::ffi::OsString>) -> Option<String> {
    let value = value?;
    env::split_paths(&value)
        .map(|p| p.to_string_lossy().trim().to_string())
        .find(|p| !p.is_empty())
}

/// Expand a leading `~` and make the path absolute.
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let path = path.trim();
    if path.is_empty() {
        return Err(Error::InvalidConfig("path is empty".into()));
    }
    let expanded = if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().ok_or(Error::NoHomeDir)?;
        match path.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => home,
        }
    } else {
        PathBuf::from(path)
    };
    std::path::absolute(&expanded)
        .map_err(|err| Error::InvalidConfig(format!("resolve {path}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_normalizes_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
sso_start_url: https://example.awsapps.com/start
sso_region: US-EAST-1
regions:
  - us-west-2
  - us-east-1
  - us-west-2
namespace_defaults:
  Prod: kube-system
  DEV: dev-ns
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sso_region, "us-east-1");
        assert_eq!(config.regions, vec!["us-east-1", "us-west-2"]);
        assert_eq!(config.namespace_for_env("prod"), Some("kube-system"));
        assert_eq!(config.namespace_for_env("dev"), Some("dev-ns"));
        assert!(config.discover_namespaces);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rift").join("config.yaml");

        let mut config = Config::default();
        config.sso_start_url = "https://example.awsapps.com/start".into();
        config.sso_region = "us-east-1".into();
        config
            .namespace_defaults
            .insert("prod".into(), "kube-system".into());
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn validate_rejects_missing_start_url() {
        let mut config = Config::default();
        config.sso_region = "us-east-1".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn empty_regions_fall_back_to_defaults() {
        let mut config = Config {
            regions: vec!["  ".into()],
            ..Config::default()
        };
        config.normalize();
        assert_eq!(config.regions, DEFAULT_REGIONS.to_vec());
    }

    #[test]
    fn staging_and_stg_alias_each_other() {
        let mut config = Config::default();
        config.namespace_defaults.insert("stg".into(), "apps".into());
        assert_eq!(config.namespace_for_env("staging"), Some("apps"));
        assert_eq!(config.namespace_for_env("other"), None);
    }

    #[test]
    fn kubeconfig_env_uses_first_non_empty_entry() {
        let joined = env::join_paths(["/tmp/a.yaml", "/tmp/b.yaml"]).unwrap();
        assert_eq!(kubeconfig_from_env(Some(joined)).as_deref(), Some("/tmp/a.yaml"));
        assert_eq!(kubeconfig_from_env(None), None);
    }
}
