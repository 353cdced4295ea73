use crate::error::DevError;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const CONFIG_FILE_NAME: &str = "k8s-dev.yaml";
pub const CONFIG_ENV: &str = "K8S_DEV_CONFIG";
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub tools: Tools,
    pub minikube: MinikubeConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub vagrant: String,
    pub minikube: String,
    pub ansible_playbook: String,
    pub ansible: String,
    pub kubectl: String,
    pub helm: String,
    pub virtctl: String,
    pub dashboard: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MinikubeConfig {
    pub profile: String,
    pub home: String,
    pub default_cni: String,
    pub listen_address: String,
    pub host_address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub kube_context: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            tools: Tools::default(),
            minikube: MinikubeConfig::default(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            vagrant: "vagrant".to_string(),
            minikube: "minikube".to_string(),
            ansible_playbook: "ansible-playbook".to_string(),
            ansible: "ansible".to_string(),
            kubectl: "kubectl".to_string(),
            helm: "helm".to_string(),
            virtctl: "virtctl".to_string(),
            dashboard: "octant".to_string(),
        }
    }
}

impl Default for MinikubeConfig {
    fn default() -> Self {
        Self {
            profile: "minikube".to_string(),
            home: String::new(),
            default_cni: "flannel".to_string(),
            listen_address: "0.0.0.0".to_string(),
            host_address: String::new(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kube_context: "default".to_string(),
        }
    }
}

impl Tools {
    /// Configured program names, keyed by the setting that names them.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("vagrant", self.vagrant.as_str()),
            ("minikube", self.minikube.as_str()),
            ("ansible_playbook", self.ansible_playbook.as_str()),
            ("ansible", self.ansible.as_str()),
            ("kubectl", self.kubectl.as_str()),
            ("helm", self.helm.as_str()),
            ("virtctl", self.virtctl.as_str()),
            ("dashboard", self.dashboard.as_str()),
        ]
    }
}

impl MinikubeConfig {
    /// Directory holding minikube's CA and profile certificates.
    pub fn home_dir(&self) -> PathBuf {
        let configured = self.home.trim();
        if !configured.is_empty() {
            return PathBuf::from(expand_path(configured));
        }
        if let Ok(path) = env::var("MINIKUBE_HOME") {
            if !path.trim().is_empty() {
                return minikube_dir_under(Path::new(path.trim()));
            }
        }
        home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".minikube")
    }

    pub fn host_address_override(&self) -> Option<&str> {
        let value = self.host_address.trim();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// minikube stores its files in `$MINIKUBE_HOME/.minikube` unless the variable already names that directory.
fn minikube_dir_under(base: &Path) -> PathBuf {
    if base.file_name().is_some_and(|name| name == ".minikube") {
        base.to_path_buf()
    } else {
        base.join(".minikube")
    }
}

pub fn resolve_config_path(override_path: Option<&PathBuf>, project_root: &Path) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    project_root.join(CONFIG_FILE_NAME)
}

pub fn read_config_from_str(content: &str) -> Result<Config, DevError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != SUPPORTED_VERSION {
        return Err(DevError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Reads the config file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<Config, DevError> {
    match fs::read_to_string(path) {
        Ok(content) => read_config_from_str(&content),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
        Err(err) => Err(DevError::Io(err)),
    }
}

pub fn validate_config(cfg: &Config) -> Result<(), DevError> {
    for (name, program) in cfg.tools.entries() {
        if program.trim().is_empty() {
            return Err(DevError::Config(format!("tools.{name} must be non-empty")));
        }
    }
    if cfg.minikube.profile.trim().is_empty() {
        return Err(DevError::Config(
            "minikube.profile must be non-empty".to_string(),
        ));
    }
    if crate::guard::Cni::parse(&cfg.minikube.default_cni).is_none() {
        return Err(DevError::Config(format!(
            "minikube.default_cni '{}' is invalid. Valid options: calico, cilium, flannel",
            cfg.minikube.default_cni
        )));
    }
    if cfg.minikube.listen_address.trim().is_empty() {
        return Err(DevError::Config(
            "minikube.listen_address must be non-empty".to_string(),
        ));
    }
    if let Some(address) = cfg.minikube.host_address_override() {
        if address.parse::<std::net::IpAddr>().is_err() {
            return Err(DevError::Config(format!(
                "minikube.host_address '{address}' is not an IP address"
            )));
        }
    }
    if cfg.cluster.kube_context.trim().is_empty() {
        return Err(DevError::Config(
            "cluster.kube_context must be non-empty".to_string(),
        ));
    }
    Ok(())
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}
