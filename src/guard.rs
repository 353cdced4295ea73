//! Precondition rules for every lifecycle operation.
//!
//! `guard` is pure: it looks only at the classified environment and the operation's own options,
//! and it decides before anything touches the filesystem or spawns a tool.

use crate::environment::{EnvironmentState, Provider, KUBECONFIG_FILE};
use crate::error::DevError;
use clap::ValueEnum;
use serde::Serialize;

pub const ENVIRONMENT_NOT_FOUND: &str = "a Kubernetes development environment not found";
pub const VAGRANT_NOT_FOUND: &str = "the vagrant environment does not exist";
pub const MINIKUBE_NOT_RUNNING: &str = "the minikube environment is not running";
pub const CREATE_REFUSED: &str = "environment cannot be created while it exists";
pub const DESTROY_REFUSED: &str = "destroy cancelled; the environment was left in place";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cni {
    Calico,
    Cilium,
    Flannel,
}

impl Cni {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calico => "calico",
            Self::Cilium => "cilium",
            Self::Flannel => "flannel",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "calico" => Some(Self::Calico),
            "cilium" => Some(Self::Cilium),
            "flannel" => Some(Self::Flannel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateOptions {
    pub provider: Option<Provider>,
    pub provision: bool,
    pub cni: Option<Cni>,
    pub total_nodes: u32,
    pub ha: bool,
    pub deploy: bool,
    pub force: bool,
}

impl CreateOptions {
    /// Explicit provider, else the existing environment's, else vagrant.
    pub fn target(&self, state: &EnvironmentState) -> Provider {
        self.provider
            .or_else(|| state.provider())
            .unwrap_or(Provider::Vagrant)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigureOptions {
    pub k8s: bool,
    pub pre_config: Option<String>,
    pub pods: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeployOptions {
    pub nodes: bool,
    pub pods: bool,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DestroyOptions {
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HaltOptions {
    pub node: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpOptions {
    pub node: Option<String>,
    pub provision: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResetOptions {
    pub recreate: bool,
    pub provision: bool,
    pub nodes: bool,
    pub deploy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PodsOptions {
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestOptions {
    pub role: String,
    pub verbose: bool,
    pub step: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassthroughTool {
    Control,
    Helm,
    Virtual,
}

impl PassthroughTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Helm => "helm",
            Self::Virtual => "virtual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create(CreateOptions),
    Configure(ConfigureOptions),
    Deploy(DeployOptions),
    Destroy(DestroyOptions),
    Halt(HaltOptions),
    Up(UpOptions),
    Reset(ResetOptions),
    Status,
    Nodes,
    Pods(PodsOptions),
    Test(TestOptions),
    Ping,
    Reboot,
    Dashboard,
    Passthrough {
        tool: PassthroughTool,
        args: Vec<String>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Configure(_) => "configure",
            Self::Deploy(_) => "deploy",
            Self::Destroy(_) => "destroy",
            Self::Halt(_) => "halt",
            Self::Up(_) => "up",
            Self::Reset(_) => "reset",
            Self::Status => "status",
            Self::Nodes => "nodes",
            Self::Pods(_) => "pods",
            Self::Test(_) => "test",
            Self::Ping => "ping",
            Self::Reboot => "reboot",
            Self::Dashboard => "dashboard",
            Self::Passthrough { tool, .. } => tool.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    Precondition(String),
    MissingArtifact(String),
}

impl Denial {
    pub fn reason(&self) -> &str {
        match self {
            Self::Precondition(reason) | Self::MissingArtifact(reason) => reason,
        }
    }
}

impl From<Denial> for DevError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Precondition(reason) => DevError::Precondition(reason),
            Denial::MissingArtifact(reason) => DevError::MissingArtifact(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub prompt: String,
    pub refusal: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Confirm(Confirmation),
    Deny(Denial),
}

fn deny(reason: impl Into<String>) -> Verdict {
    Verdict::Deny(Denial::Precondition(reason.into()))
}

fn missing_kubeconfig() -> Verdict {
    Verdict::Deny(Denial::MissingArtifact(format!(
        "can't find the kube-config file '{KUBECONFIG_FILE}'; kubernetes has not been deployed yet"
    )))
}

fn vagrant_only(operation: &str) -> Verdict {
    deny(format!(
        "'{operation}' is only available for a vagrant environment"
    ))
}

/// Whether creating `target` over `state` must tear the existing environment down first.
pub fn create_requires_teardown(state: &EnvironmentState, target: Provider) -> bool {
    match *state {
        EnvironmentState::None => false,
        EnvironmentState::Vagrant { deployed } => target != Provider::Vagrant || deployed,
        EnvironmentState::Minikube { deployed, running } => {
            target != Provider::Minikube || deployed || running
        }
    }
}

pub fn guard(operation: &Operation, state: &EnvironmentState) -> Verdict {
    match operation {
        Operation::Create(opts) => guard_create(opts, state),
        Operation::Configure(opts) => guard_configure(opts, state),
        Operation::Deploy(opts) => guard_deploy(opts, state),
        Operation::Destroy(opts) => {
            if !state.exists() {
                return deny(ENVIRONMENT_NOT_FOUND);
            }
            if opts.force {
                Verdict::Allow
            } else {
                Verdict::Confirm(Confirmation {
                    prompt: "Are you sure you want to destroy the environment?".to_string(),
                    refusal: DESTROY_REFUSED.to_string(),
                })
            }
        }
        Operation::Halt(_) => match state {
            EnvironmentState::Minikube { .. } => vagrant_only("halt"),
            EnvironmentState::None => deny(VAGRANT_NOT_FOUND),
            EnvironmentState::Vagrant { .. } => Verdict::Allow,
        },
        Operation::Up(_) => match state {
            EnvironmentState::Minikube { .. } => vagrant_only("up"),
            _ => Verdict::Allow,
        },
        Operation::Reset(_) => match state {
            EnvironmentState::Minikube { .. } => vagrant_only("reset"),
            EnvironmentState::None => deny(VAGRANT_NOT_FOUND),
            EnvironmentState::Vagrant { deployed: false } => missing_kubeconfig(),
            EnvironmentState::Vagrant { deployed: true } => Verdict::Allow,
        },
        Operation::Status | Operation::Test(_) => {
            if !state.exists() {
                deny(ENVIRONMENT_NOT_FOUND)
            } else if !state.deployed() {
                missing_kubeconfig()
            } else {
                Verdict::Allow
            }
        }
        Operation::Nodes | Operation::Pods(_) | Operation::Dashboard => {
            if state.deployed() {
                Verdict::Allow
            } else {
                missing_kubeconfig()
            }
        }
        Operation::Ping => match state {
            EnvironmentState::Minikube { .. } => vagrant_only("ping"),
            EnvironmentState::None => deny(VAGRANT_NOT_FOUND),
            EnvironmentState::Vagrant { .. } => Verdict::Allow,
        },
        Operation::Reboot => match state {
            EnvironmentState::Minikube { .. } => vagrant_only("reboot"),
            EnvironmentState::None => deny(VAGRANT_NOT_FOUND),
            EnvironmentState::Vagrant { deployed: false } => missing_kubeconfig(),
            EnvironmentState::Vagrant { deployed: true } => Verdict::Allow,
        },
        Operation::Passthrough { tool, .. } => match (tool, state) {
            (PassthroughTool::Virtual, EnvironmentState::Minikube { .. }) => {
                vagrant_only("virtual")
            }
            _ if state.deployed() => Verdict::Allow,
            _ => missing_kubeconfig(),
        },
    }
}

fn guard_create(opts: &CreateOptions, state: &EnvironmentState) -> Verdict {
    let target = opts.target(state);
    if target == Provider::Vagrant {
        if opts.ha {
            return deny("'ha' is not valid in a Vagrant environment");
        }
        if opts.total_nodes > 0 {
            return deny("'total-nodes' is not valid in a Vagrant environment");
        }
        if opts.cni.is_some() {
            return deny("'cni' is not valid in a Vagrant environment");
        }
    }
    if !create_requires_teardown(state, target) || opts.force {
        return Verdict::Allow;
    }
    Verdict::Confirm(Confirmation {
        prompt: format!(
            "A {} exists. Are you sure you want to recreate the environment?",
            state.describe()
        ),
        refusal: CREATE_REFUSED.to_string(),
    })
}

fn guard_configure(opts: &ConfigureOptions, state: &EnvironmentState) -> Verdict {
    match *state {
        EnvironmentState::None => deny(ENVIRONMENT_NOT_FOUND),
        EnvironmentState::Minikube { running: false, .. } => deny(MINIKUBE_NOT_RUNNING),
        _ if !state.deployed() && !opts.k8s => deny(format!(
            "kubernetes has not been deployed yet; run `k8s-dev deploy` first or pass --k8s \
(the kube-config file '{KUBECONFIG_FILE}' is missing)"
        )),
        _ => Verdict::Allow,
    }
}

fn guard_deploy(opts: &DeployOptions, state: &EnvironmentState) -> Verdict {
    match *state {
        EnvironmentState::None => deny(ENVIRONMENT_NOT_FOUND),
        EnvironmentState::Minikube { running: false, .. } => deny(MINIKUBE_NOT_RUNNING),
        _ if state.deployed() && !opts.force => {
            deny("kubernetes has already been deployed; use --force to redeploy")
        }
        _ => Verdict::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: EnvironmentState = EnvironmentState::None;
    const VAGRANT_FRESH: EnvironmentState = EnvironmentState::Vagrant { deployed: false };
    const VAGRANT_DEPLOYED: EnvironmentState = EnvironmentState::Vagrant { deployed: true };
    const MINIKUBE_LIVE: EnvironmentState = EnvironmentState::Minikube {
        deployed: true,
        running: true,
    };
    const MINIKUBE_STOPPED: EnvironmentState = EnvironmentState::Minikube {
        deployed: true,
        running: false,
    };

    fn all_operations() -> Vec<Operation> {
        vec![
            Operation::Create(CreateOptions::default()),
            Operation::Configure(ConfigureOptions {
                k8s: true,
                ..Default::default()
            }),
            Operation::Deploy(DeployOptions {
                force: true,
                ..Default::default()
            }),
            Operation::Destroy(DestroyOptions { force: true }),
            Operation::Halt(HaltOptions::default()),
            Operation::Up(UpOptions::default()),
            Operation::Reset(ResetOptions::default()),
            Operation::Status,
            Operation::Nodes,
            Operation::Pods(PodsOptions::default()),
            Operation::Test(TestOptions {
                role: "web".to_string(),
                ..Default::default()
            }),
            Operation::Ping,
            Operation::Reboot,
            Operation::Dashboard,
            Operation::Passthrough {
                tool: PassthroughTool::Control,
                args: vec!["get".to_string(), "ns".to_string()],
            },
            Operation::Passthrough {
                tool: PassthroughTool::Helm,
                args: vec!["list".to_string()],
            },
            Operation::Passthrough {
                tool: PassthroughTool::Virtual,
                args: vec!["version".to_string()],
            },
        ]
    }

    #[test]
    fn only_create_and_up_run_without_an_environment() {
        for operation in all_operations() {
            let verdict = guard(&operation, &NONE);
            match operation {
                Operation::Create(_) | Operation::Up(_) => {
                    assert_eq!(verdict, Verdict::Allow, "{}", operation.name())
                }
                _ => assert!(
                    matches!(verdict, Verdict::Deny(_)),
                    "{} should be denied, got {verdict:?}",
                    operation.name()
                ),
            }
        }
    }

    #[test]
    fn create_over_fresh_vagrant_is_allowed() {
        let verdict = guard(&Operation::Create(CreateOptions::default()), &VAGRANT_FRESH);
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn create_over_deployed_vagrant_needs_confirmation_unless_forced() {
        let verdict = guard(&Operation::Create(CreateOptions::default()), &VAGRANT_DEPLOYED);
        match verdict {
            Verdict::Confirm(confirmation) => {
                assert!(confirmation.prompt.contains("recreate the environment"));
                assert_eq!(confirmation.refusal, CREATE_REFUSED);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        let forced = CreateOptions {
            force: true,
            ..Default::default()
        };
        assert_eq!(
            guard(&Operation::Create(forced), &VAGRANT_DEPLOYED),
            Verdict::Allow
        );
    }

    #[test]
    fn create_rejects_minikube_options_for_vagrant() {
        let cases = [
            (
                CreateOptions {
                    ha: true,
                    ..Default::default()
                },
                "'ha'",
            ),
            (
                CreateOptions {
                    total_nodes: 3,
                    ..Default::default()
                },
                "'total-nodes'",
            ),
            (
                CreateOptions {
                    cni: Some(Cni::Cilium),
                    ..Default::default()
                },
                "'cni'",
            ),
        ];
        for (opts, flag) in cases {
            match guard(&Operation::Create(opts.clone()), &NONE) {
                Verdict::Deny(Denial::Precondition(reason)) => assert!(reason.contains(flag)),
                other => panic!("expected denial for {flag}, got {other:?}"),
            }
            let forced = CreateOptions {
                force: true,
                ..opts
            };
            assert!(matches!(
                guard(&Operation::Create(forced), &VAGRANT_DEPLOYED),
                Verdict::Deny(_)
            ));
        }
    }

    #[test]
    fn create_infers_provider_from_existing_environment() {
        let opts = CreateOptions {
            cni: Some(Cni::Calico),
            total_nodes: 2,
            ..Default::default()
        };
        assert_eq!(opts.target(&MINIKUBE_LIVE), Provider::Minikube);
        assert!(matches!(
            guard(&Operation::Create(opts), &MINIKUBE_LIVE),
            Verdict::Confirm(_)
        ));
    }

    #[test]
    fn create_over_other_provider_requires_teardown() {
        assert!(create_requires_teardown(&VAGRANT_FRESH, Provider::Minikube));
        assert!(create_requires_teardown(
            &EnvironmentState::Minikube {
                deployed: false,
                running: false
            },
            Provider::Vagrant
        ));
        assert!(!create_requires_teardown(
            &EnvironmentState::Minikube {
                deployed: false,
                running: false
            },
            Provider::Minikube
        ));
        assert!(create_requires_teardown(&MINIKUBE_STOPPED, Provider::Minikube));
    }

    #[test]
    fn reset_is_denied_for_minikube_regardless_of_flags() {
        for opts in [
            ResetOptions::default(),
            ResetOptions {
                recreate: true,
                provision: true,
                nodes: true,
                deploy: true,
            },
        ] {
            for state in [MINIKUBE_LIVE, MINIKUBE_STOPPED] {
                match guard(&Operation::Reset(opts.clone()), &state) {
                    Verdict::Deny(Denial::Precondition(reason)) => {
                        assert!(reason.contains("only available for a vagrant environment"))
                    }
                    other => panic!("expected denial, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn reset_requires_deployed_vagrant() {
        assert!(matches!(
            guard(&Operation::Reset(ResetOptions::default()), &VAGRANT_FRESH),
            Verdict::Deny(Denial::MissingArtifact(_))
        ));
        assert_eq!(
            guard(&Operation::Reset(ResetOptions::default()), &VAGRANT_DEPLOYED),
            Verdict::Allow
        );
    }

    #[test]
    fn deploy_refuses_redeploy_without_force() {
        let verdict = guard(&Operation::Deploy(DeployOptions::default()), &VAGRANT_DEPLOYED);
        assert!(matches!(verdict, Verdict::Deny(Denial::Precondition(reason)) if reason.contains("already been deployed")));
        assert_eq!(
            guard(&Operation::Deploy(DeployOptions::default()), &VAGRANT_FRESH),
            Verdict::Allow
        );
        let forced = DeployOptions {
            force: true,
            ..Default::default()
        };
        assert_eq!(
            guard(&Operation::Deploy(forced.clone()), &VAGRANT_DEPLOYED),
            Verdict::Allow
        );
        assert_eq!(
            guard(&Operation::Deploy(forced), &MINIKUBE_STOPPED),
            Verdict::Deny(Denial::Precondition(MINIKUBE_NOT_RUNNING.to_string()))
        );
    }

    #[test]
    fn configure_needs_deployment_or_k8s_flag() {
        assert!(matches!(
            guard(
                &Operation::Configure(ConfigureOptions::default()),
                &VAGRANT_FRESH
            ),
            Verdict::Deny(_)
        ));
        let k8s = ConfigureOptions {
            k8s: true,
            ..Default::default()
        };
        assert_eq!(
            guard(&Operation::Configure(k8s), &VAGRANT_FRESH),
            Verdict::Allow
        );
        assert_eq!(
            guard(
                &Operation::Configure(ConfigureOptions::default()),
                &MINIKUBE_LIVE
            ),
            Verdict::Allow
        );
    }

    #[test]
    fn destroy_confirms_unless_forced() {
        assert!(matches!(
            guard(&Operation::Destroy(DestroyOptions::default()), &MINIKUBE_LIVE),
            Verdict::Confirm(_)
        ));
        assert_eq!(
            guard(&Operation::Destroy(DestroyOptions { force: true }), &VAGRANT_FRESH),
            Verdict::Allow
        );
    }

    #[test]
    fn vagrant_only_operations_reject_minikube() {
        for operation in [
            Operation::Halt(HaltOptions::default()),
            Operation::Up(UpOptions::default()),
            Operation::Ping,
            Operation::Reboot,
            Operation::Passthrough {
                tool: PassthroughTool::Virtual,
                args: Vec::new(),
            },
        ] {
            match guard(&operation, &MINIKUBE_LIVE) {
                Verdict::Deny(Denial::Precondition(reason)) => {
                    assert!(reason.contains(operation.name()), "{reason}")
                }
                other => panic!("expected denial for {}, got {other:?}", operation.name()),
            }
        }
    }

    #[test]
    fn cluster_queries_need_kubeconfig() {
        for operation in [
            Operation::Status,
            Operation::Nodes,
            Operation::Pods(PodsOptions::default()),
            Operation::Dashboard,
            Operation::Passthrough {
                tool: PassthroughTool::Helm,
                args: Vec::new(),
            },
        ] {
            assert!(matches!(
                guard(&operation, &VAGRANT_FRESH),
                Verdict::Deny(Denial::MissingArtifact(_))
            ));
            assert_eq!(guard(&operation, &VAGRANT_DEPLOYED), Verdict::Allow);
            assert_eq!(guard(&operation, &MINIKUBE_LIVE), Verdict::Allow);
        }
    }

    #[test]
    fn denial_maps_to_error_kind() {
        let err: DevError = Denial::MissingArtifact("gone".to_string()).into();
        assert_eq!(err.kind(), "missing_artifact");
        let err: DevError = Denial::Precondition("no".to_string()).into();
        assert_eq!(err.kind(), "precondition_violation");
    }

    #[test]
    fn cni_parsing_is_case_insensitive() {
        assert_eq!(Cni::parse("Cilium"), Some(Cni::Cilium));
        assert_eq!(Cni::parse("weave"), None);
    }
}
