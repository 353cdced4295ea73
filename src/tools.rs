use crate::environment::{liveness_from_status, Liveness};
use crate::error::DevError;
use crate::guard::{Cni, PassthroughTool};
use crate::runner::{execute, probe, CommandOutput, Invocation, ToolRunner};
use crate::{detail, Context};
use std::path::Path;

pub const VERIFY_SSL_ENV: &str = "K8S_AUTH_VERIFY_SSL";

/// Typed front for every external program the orchestrator drives.
pub struct Backend<'a, R: ToolRunner> {
    ctx: &'a Context,
    runner: &'a R,
}

impl<'a, R: ToolRunner> Backend<'a, R> {
    pub fn new(ctx: &'a Context, runner: &'a R) -> Self {
        Self { ctx, runner }
    }

    fn kubeconfig_arg(&self) -> String {
        format!("--kubeconfig={}", self.ctx.paths.kubeconfig().display())
    }

    /// Long-running steps stream to the terminal, except under --json where stdout stays clean.
    fn step(&self, invocation: &Invocation) -> Result<CommandOutput, DevError> {
        execute(self.runner, self.ctx.paths.root(), invocation, self.ctx.json)
    }

    fn query(&self, invocation: &Invocation) -> Result<String, DevError> {
        let output = execute(self.runner, self.ctx.paths.root(), invocation, true)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub fn vagrant_up(&self, node: Option<&str>, provision: bool) -> Result<(), DevError> {
        let mut invocation = Invocation::new(&self.ctx.config.tools.vagrant).arg("up");
        match node {
            Some(name) => {
                detail(self.ctx, &format!("Bringing '{name}' online..."));
                invocation = invocation.arg(name);
            }
            None => detail(self.ctx, "Bringing all vagrant machines online..."),
        }
        if provision {
            invocation = invocation.arg("--provision");
        }
        self.step(&invocation).map(|_| ())
    }

    pub fn vagrant_halt(&self, node: Option<&str>, force: bool) -> Result<(), DevError> {
        let mut invocation = Invocation::new(&self.ctx.config.tools.vagrant).arg("halt");
        match node {
            Some(name) => {
                detail(self.ctx, &format!("Halting '{name}' machine..."));
                invocation = invocation.arg(name);
            }
            None => detail(self.ctx, "Halting all vagrant machines..."),
        }
        if force {
            invocation = invocation.arg("--force");
        }
        self.step(&invocation).map(|_| ())
    }

    pub fn vagrant_destroy(&self) -> Result<(), DevError> {
        detail(self.ctx, "Destroying all vagrant machines...");
        let invocation = Invocation::new(&self.ctx.config.tools.vagrant)
            .arg("destroy")
            .arg("--force");
        self.step(&invocation).map(|_| ())
    }

    pub fn vagrant_status(&self) -> Result<String, DevError> {
        self.query(&Invocation::new(&self.ctx.config.tools.vagrant).arg("status"))
    }

    pub fn vagrant_provision(&self) -> Result<(), DevError> {
        let invocation = Invocation::new(&self.ctx.config.tools.vagrant).arg("provision");
        self.step(&invocation).map(|_| ())
    }

    fn minikube(&self, subcommand: &str) -> Invocation {
        Invocation::new(&self.ctx.config.tools.minikube)
            .arg(subcommand)
            .arg(format!("--profile={}", self.ctx.config.minikube.profile))
            .env(
                "KUBECONFIG",
                self.ctx.paths.kubeconfig().to_string_lossy().to_string(),
            )
    }

    pub fn minikube_start(&self, cni: Cni, total_nodes: u32, ha: bool) -> Result<(), DevError> {
        detail(
            self.ctx,
            &format!("Starting minikube with the {} CNI...", cni.as_str()),
        );
        let mut invocation = self
            .minikube("start")
            .arg(format!("--cni={}", cni.as_str()))
            .arg(format!(
                "--listen-address={}",
                self.ctx.config.minikube.listen_address
            ));
        if total_nodes > 0 {
            invocation = invocation.arg(format!("--nodes={total_nodes}"));
        }
        if ha {
            invocation = invocation.arg("--ha");
        }
        self.step(&invocation).map(|_| ())
    }

    /// Raw `minikube status`; non-zero exits are reported, not raised.
    pub fn minikube_status(&self) -> Result<CommandOutput, DevError> {
        let invocation = self.minikube("status");
        probe(self.runner, self.ctx.paths.root(), &invocation).map_err(|err| DevError::Tool {
            message: format!("failed to run command `{}`: {err}", invocation.render()),
            details: crate::error::ProcessErrorDetails {
                error_code: "process_spawn_failed".to_string(),
                hint: None,
                command: Some(invocation.render()),
                exit_code: None,
                raw_output: None,
            },
        })
    }

    pub fn minikube_liveness(&self) -> Liveness {
        match self.minikube_status() {
            Ok(output) => liveness_from_status(output.status_code, &output.combined()),
            Err(err) => Liveness::Unknown(err.to_string()),
        }
    }

    pub fn minikube_stop(&self) -> Result<(), DevError> {
        detail(self.ctx, "Stopping minikube...");
        self.step(&self.minikube("stop")).map(|_| ())
    }

    pub fn minikube_delete(&self) -> Result<(), DevError> {
        detail(self.ctx, "Deleting the minikube cluster...");
        self.step(&self.minikube("delete")).map(|_| ())
    }

    pub fn minikube_dashboard(&self) -> Result<(), DevError> {
        self.step(&self.minikube("dashboard")).map(|_| ())
    }

    pub fn playbook(
        &self,
        playbook: &Path,
        extra_args: &[String],
        verify_ssl: bool,
    ) -> Result<(), DevError> {
        let relative = self.ctx.paths.relative(playbook);
        detail(self.ctx, &format!("Running playbook '{relative}'..."));
        let mut invocation = Invocation::new(&self.ctx.config.tools.ansible_playbook)
            .args(extra_args.iter().cloned())
            .arg(relative);
        if !verify_ssl {
            invocation = invocation.env(VERIFY_SSL_ENV, "false");
        }
        self.step(&invocation).map(|_| ())
    }

    pub fn ansible_ping(&self) -> Result<(), DevError> {
        let invocation = Invocation::new(&self.ctx.config.tools.ansible).args(["-m", "ping", "all"]);
        self.step(&invocation).map(|_| ())
    }

    pub fn kubectl_get(&self, resource: &[&str]) -> Result<String, DevError> {
        let invocation = Invocation::new(&self.ctx.config.tools.kubectl)
            .arg(self.kubeconfig_arg())
            .arg("--insecure-skip-tls-verify=true")
            .arg("get")
            .args(resource.iter().copied());
        self.query(&invocation)
    }

    /// Forwards `args` verbatim, appending the project kube-config.
    pub fn passthrough(
        &self,
        tool: PassthroughTool,
        args: &[String],
    ) -> Result<CommandOutput, DevError> {
        let tools = &self.ctx.config.tools;
        let program = match tool {
            PassthroughTool::Control => &tools.kubectl,
            PassthroughTool::Helm => &tools.helm,
            PassthroughTool::Virtual => &tools.virtctl,
        };
        let mut invocation = Invocation::new(program)
            .args(args.iter().cloned())
            .arg(self.kubeconfig_arg());
        if tool == PassthroughTool::Helm {
            invocation = invocation.arg(format!(
                "--kube-context={}",
                self.ctx.config.cluster.kube_context
            ));
        }
        self.step(&invocation)
    }

    pub fn vagrant_dashboard(&self) -> Result<(), DevError> {
        let invocation =
            Invocation::new(&self.ctx.config.tools.dashboard).arg(self.kubeconfig_arg());
        self.step(&invocation).map(|_| ())
    }
}
