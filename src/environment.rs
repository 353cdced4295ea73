use crate::error::DevError;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const KUBECONFIG_FILE: &str = ".kubectl.cfg";
pub const VAGRANT_STATE_DIR: &str = ".vagrant";
pub const MINIKUBE_STATE_DIR: &str = ".minikube";
pub const VAGRANTFILE: &str = "Vagrantfile";
pub const PLAYBOOK_DIR: &str = "playbooks";
pub const SCRATCH_DIR: &str = ".tmp";

/// Well-known locations inside a project directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kubeconfig(&self) -> PathBuf {
        self.root.join(KUBECONFIG_FILE)
    }

    pub fn vagrant_state(&self) -> PathBuf {
        self.root.join(VAGRANT_STATE_DIR)
    }

    pub fn minikube_state(&self) -> PathBuf {
        self.root.join(MINIKUBE_STATE_DIR)
    }

    pub fn vagrantfile(&self) -> PathBuf {
        self.root.join(VAGRANTFILE)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// A playbook given either by bare name (`config`) or by path relative to the project.
    pub fn playbook(&self, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.components().count() > 1 || candidate.is_absolute() {
            return self.root.join(candidate);
        }
        let file = if name.ends_with(".yml") || name.ends_with(".yaml") {
            name.to_string()
        } else {
            format!("{name}.yml")
        };
        self.root.join(PLAYBOOK_DIR).join(file)
    }

    /// Project-relative form of `path` for argument lists; absolute paths outside the project pass through.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    pub fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    pub fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    pub fn probe(&self) -> ProbeReport {
        ProbeReport {
            vagrant_state: self.is_dir(&self.vagrant_state()),
            minikube_state: self.is_dir(&self.minikube_state()),
            kubeconfig: self.is_file(&self.kubeconfig()),
        }
    }
}

/// Filesystem signals used to classify a project directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProbeReport {
    pub vagrant_state: bool,
    pub minikube_state: bool,
    pub kubeconfig: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Vagrant,
    Minikube,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vagrant => "vagrant",
            Self::Minikube => "minikube",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvironmentState {
    None,
    Vagrant { deployed: bool },
    Minikube { deployed: bool, running: bool },
}

impl EnvironmentState {
    pub fn provider(&self) -> Option<Provider> {
        match self {
            Self::None => None,
            Self::Vagrant { .. } => Some(Provider::Vagrant),
            Self::Minikube { .. } => Some(Provider::Minikube),
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn deployed(&self) -> bool {
        match self {
            Self::None => false,
            Self::Vagrant { deployed } | Self::Minikube { deployed, .. } => *deployed,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::None => "no environment".to_string(),
            Self::Vagrant { deployed } => format!(
                "vagrant environment ({})",
                if *deployed { "deployed" } else { "not deployed" }
            ),
            Self::Minikube { deployed, running } => format!(
                "minikube environment ({}, {})",
                if *running { "running" } else { "stopped" },
                if *deployed { "deployed" } else { "not deployed" }
            ),
        }
    }
}

/// Result of asking minikube whether its cluster is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Stopped,
    Unknown(String),
}

/// minikube status sets bits 1, 2 and 4 for a stopped host, kubelet and apiserver.
pub fn is_stopped_status(code: i32) -> bool {
    (1..=7).contains(&code)
}

pub fn liveness_from_status(code: i32, output: &str) -> Liveness {
    if code == 0 {
        Liveness::Running
    } else if is_stopped_status(code) {
        Liveness::Stopped
    } else {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            Liveness::Unknown(format!("minikube status exited with {code}"))
        } else {
            Liveness::Unknown(format!("minikube status exited with {code}: {trimmed}"))
        }
    }
}

/// Classifies a project from its probe report. `liveness` runs only for a minikube project.
pub fn classify<F>(report: &ProbeReport, liveness: F) -> Result<EnvironmentState, DevError>
where
    F: FnOnce() -> Liveness,
{
    match (report.vagrant_state, report.minikube_state) {
        (false, false) => Ok(EnvironmentState::None),
        (true, true) => Err(DevError::Inconsistent(format!(
            "both '{VAGRANT_STATE_DIR}/' and '{MINIKUBE_STATE_DIR}/' exist in this project; \
remove the one that does not belong to the active environment"
        ))),
        (false, true) => {
            let running = match liveness() {
                Liveness::Running => true,
                Liveness::Stopped => false,
                Liveness::Unknown(reason) => {
                    warn!(%reason, "could not determine whether minikube is running; treating it as stopped");
                    false
                }
            };
            Ok(EnvironmentState::Minikube {
                deployed: report.kubeconfig,
                running,
            })
        }
        (true, false) => Ok(EnvironmentState::Vagrant {
            deployed: report.kubeconfig,
        }),
    }
}
