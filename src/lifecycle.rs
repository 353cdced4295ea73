//! Runs lifecycle operations: classify the project, check preconditions, then drive the tools.
//!
//! Shared step sequences (`run_deploy_sequence`, `run_nodes_query`, `run_pods_query`, `teardown`)
//! are plain methods composed by several operations. Any failing step aborts the rest.

use crate::environment::{classify, EnvironmentState, Provider};
use crate::error::DevError;
use crate::guard::{
    create_requires_teardown, guard, Cni, ConfigureOptions, CreateOptions, DeployOptions,
    HaltOptions, Operation, PassthroughTool, PodsOptions, ResetOptions, TestOptions, UpOptions,
    Verdict, ENVIRONMENT_NOT_FOUND,
};
use crate::kubeconfig::{outbound_address, MaterializeReport, Materializer};
use crate::prompt::Prompter;
use crate::runner::ToolRunner;
use crate::tools::Backend;
use crate::{detail, notice, Context};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TEST_PLAY_FILE: &str = "play.yml";

pub fn detect<R: ToolRunner>(ctx: &Context, runner: &R) -> Result<EnvironmentState, DevError> {
    let report = ctx.paths.probe();
    debug!(?report, root = %ctx.paths.root().display(), "probed project directory");
    classify(&report, || Backend::new(ctx, runner).minikube_liveness())
}

pub fn run_operation<R: ToolRunner, P: Prompter>(
    ctx: &Context,
    runner: &R,
    prompter: &P,
    operation: &Operation,
) -> Result<Value, DevError> {
    let state = detect(ctx, runner)?;
    debug!(
        operation = operation.name(),
        state = %state.describe(),
        "evaluating preconditions"
    );
    let confirmation = match guard(operation, &state) {
        Verdict::Deny(denial) => return Err(denial.into()),
        Verdict::Confirm(confirmation) => Some(confirmation),
        Verdict::Allow => None,
    };
    preflight(ctx, operation, &state)?;
    if let Some(confirmation) = confirmation {
        if !prompter.confirm(&confirmation.prompt)? {
            return Err(DevError::Precondition(confirmation.refusal));
        }
    }

    let lifecycle = Lifecycle {
        ctx,
        backend: Backend::new(ctx, runner),
    };
    match operation {
        Operation::Create(opts) => lifecycle.create(&state, opts),
        Operation::Configure(opts) => lifecycle.configure(&state, opts),
        Operation::Deploy(opts) => lifecycle.deploy(&state, opts),
        Operation::Destroy(_) => lifecycle.teardown(&state),
        Operation::Halt(opts) => lifecycle.halt(opts),
        Operation::Up(opts) => lifecycle.up(opts),
        Operation::Reset(opts) => lifecycle.reset(opts),
        Operation::Status => lifecycle.status(&state),
        Operation::Nodes => Ok(json!({ "nodes": lifecycle.run_nodes_query()? })),
        Operation::Pods(opts) => lifecycle.pods(opts),
        Operation::Test(opts) => lifecycle.test(opts),
        Operation::Ping => lifecycle.ping(),
        Operation::Reboot => lifecycle.reboot(),
        Operation::Dashboard => lifecycle.dashboard(&state),
        Operation::Passthrough { tool, args } => lifecycle.passthrough(*tool, args),
    }
}

fn deploy_playbook(ctx: &Context, provider: Provider) -> PathBuf {
    match provider {
        Provider::Vagrant => ctx.paths.playbook("init"),
        Provider::Minikube => ctx.paths.playbook("config"),
    }
}

/// Files an operation reads before it starts anything.
fn required_artifacts(
    ctx: &Context,
    operation: &Operation,
    state: &EnvironmentState,
) -> Vec<PathBuf> {
    let paths = &ctx.paths;
    let mut required = Vec::new();
    match operation {
        Operation::Create(opts) => {
            let target = opts.target(state);
            let destroys_vagrant = state.provider() == Some(Provider::Vagrant)
                && create_requires_teardown(state, target);
            if target == Provider::Vagrant || destroys_vagrant {
                required.push(paths.vagrantfile());
            }
            if opts.deploy {
                required.push(deploy_playbook(ctx, target));
            }
        }
        Operation::Configure(opts) => {
            if let Some(pre_config) = &opts.pre_config {
                required.push(paths.playbook(pre_config));
            }
            if let (true, Some(provider)) = (opts.k8s, state.provider()) {
                required.push(deploy_playbook(ctx, provider));
            }
            required.push(paths.playbook("config"));
        }
        Operation::Deploy(_) => {
            if let Some(provider) = state.provider() {
                required.push(deploy_playbook(ctx, provider));
            }
        }
        Operation::Destroy(_) => {
            if state.provider() == Some(Provider::Vagrant) {
                required.push(paths.vagrantfile());
            }
        }
        Operation::Halt(_) | Operation::Up(_) | Operation::Ping => {
            required.push(paths.vagrantfile());
        }
        Operation::Reset(opts) => {
            required.push(paths.vagrantfile());
            required.push(paths.playbook(if opts.recreate { "init" } else { "reset" }));
            if opts.deploy {
                required.push(paths.playbook("init"));
            }
        }
        Operation::Reboot => {
            required.push(paths.vagrantfile());
            required.push(paths.playbook("reboot"));
        }
        _ => {}
    }
    required
}

pub fn preflight(
    ctx: &Context,
    operation: &Operation,
    state: &EnvironmentState,
) -> Result<(), DevError> {
    for path in required_artifacts(ctx, operation, state) {
        if !ctx.paths.is_file(&path) {
            return Err(DevError::MissingArtifact(format!(
                "can't find '{}'; run `k8s-dev init` to generate the project files",
                ctx.paths.relative(&path)
            )));
        }
    }
    Ok(())
}

pub fn remove_path(path: &Path) -> Result<bool, DevError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(DevError::Io(err)),
    };
    if meta.file_type().is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

#[derive(Debug, Serialize)]
struct TestPlay<'a> {
    hosts: &'a str,
    gather_facts: bool,
    vars: TestVars,
    roles: Vec<RoleRef<'a>>,
}

#[derive(Debug, Serialize)]
struct TestVars {
    k8s_config: String,
}

#[derive(Debug, Serialize)]
struct RoleRef<'a> {
    role: &'a str,
}

/// A single play applying `role` to localhost with the project kube-config.
pub fn render_test_play(role: &str) -> Result<String, DevError> {
    let play = TestPlay {
        hosts: "127.0.0.1",
        gather_facts: false,
        vars: TestVars {
            k8s_config: format!("../{}", crate::environment::KUBECONFIG_FILE),
        },
        roles: vec![RoleRef { role }],
    };
    let body = serde_yaml::to_string(&vec![play])?;
    Ok(format!("---\n{body}"))
}

struct Lifecycle<'a, R: ToolRunner> {
    ctx: &'a Context,
    backend: Backend<'a, R>,
}

impl<'a, R: ToolRunner> Lifecycle<'a, R> {
    fn provider(&self, state: &EnvironmentState) -> Result<Provider, DevError> {
        state
            .provider()
            .ok_or_else(|| DevError::Precondition(ENVIRONMENT_NOT_FOUND.to_string()))
    }

    fn echo(&self, text: &str) {
        if !self.ctx.json && !text.is_empty() {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
    }

    fn default_cni(&self) -> Result<Cni, DevError> {
        let configured = &self.ctx.config.minikube.default_cni;
        Cni::parse(configured).ok_or_else(|| {
            DevError::Config(format!("minikube.default_cni '{configured}' is invalid"))
        })
    }

    fn host_address(&self) -> Result<String, DevError> {
        if let Some(address) = self.ctx.config.minikube.host_address_override() {
            return Ok(address.to_string());
        }
        Ok(outbound_address()?.to_string())
    }

    fn materialize(&self) -> Result<MaterializeReport, DevError> {
        let minikube = &self.ctx.config.minikube;
        let host_address = self.host_address()?;
        let report =
            Materializer::for_minikube(&self.ctx.paths, &minikube.home_dir(), &minikube.profile)
                .materialize(&host_address)?;
        if report.changed() {
            info!(
                host_address = %report.host_address,
                inlined = ?report.inlined,
                "materialized minikube kube-config"
            );
        } else {
            warn!("minikube kube-config had no certificate paths or loopback server to rewrite");
        }
        Ok(report)
    }

    fn create(&self, state: &EnvironmentState, opts: &CreateOptions) -> Result<Value, DevError> {
        let target = opts.target(state);
        let replaced = if create_requires_teardown(state, target) {
            notice(self.ctx, &format!("Replacing the existing {}", state.describe()));
            Some(self.teardown(state)?)
        } else {
            None
        };

        notice(self.ctx, &format!("Creating a {target} environment"));
        let kubeconfig = match target {
            Provider::Vagrant => {
                self.backend.vagrant_up(None, opts.provision)?;
                None
            }
            Provider::Minikube => {
                let cni = match opts.cni {
                    Some(cni) => cni,
                    None => self.default_cni()?,
                };
                self.backend.minikube_start(cni, opts.total_nodes, opts.ha)?;
                Some(self.materialize()?)
            }
        };

        let deployed = if opts.deploy {
            Some(self.run_deploy_sequence(target, false, false)?)
        } else {
            None
        };
        Ok(json!({
            "provider": target,
            "replaced": replaced,
            "kubeconfig": kubeconfig,
            "deploy": deployed,
        }))
    }

    fn run_deploy_sequence(
        &self,
        provider: Provider,
        nodes: bool,
        pods: bool,
    ) -> Result<Value, DevError> {
        notice(self.ctx, "Deploying kubernetes");
        let playbook = deploy_playbook(self.ctx, provider);
        self.backend
            .playbook(&playbook, &[], provider == Provider::Vagrant)?;
        let nodes = if nodes {
            Some(self.run_nodes_query()?)
        } else {
            None
        };
        let pods = if pods {
            Some(self.run_pods_query(None)?)
        } else {
            None
        };
        Ok(json!({
            "playbook": self.ctx.paths.relative(&playbook),
            "nodes": nodes,
            "pods": pods,
        }))
    }

    fn run_nodes_query(&self) -> Result<String, DevError> {
        let text = self.backend.kubectl_get(&["nodes"])?;
        self.echo(&text);
        Ok(text)
    }

    fn run_pods_query(&self, namespace: Option<&str>) -> Result<String, DevError> {
        let text = match namespace {
            Some(namespace) => self
                .backend
                .kubectl_get(&["pods", "--namespace", namespace])?,
            None => self.backend.kubectl_get(&["pods", "--all-namespaces"])?,
        };
        self.echo(&text);
        Ok(text)
    }

    /// Destroys the provider's machines, then always removes the kube-config and state directory.
    fn teardown(&self, state: &EnvironmentState) -> Result<Value, DevError> {
        let state_dir = match *state {
            EnvironmentState::None => return Ok(json!({ "destroyed": false })),
            EnvironmentState::Vagrant { .. } => {
                self.backend.vagrant_destroy()?;
                self.ctx.paths.vagrant_state()
            }
            EnvironmentState::Minikube { running, .. } => {
                if running {
                    self.backend.minikube_stop()?;
                }
                self.backend.minikube_delete()?;
                self.ctx.paths.minikube_state()
            }
        };
        let kubeconfig = self.ctx.paths.kubeconfig();
        let kubeconfig_removed = remove_path(&kubeconfig)?;
        let state_dir_removed = remove_path(&state_dir)?;
        debug!(
            kubeconfig_removed,
            state_dir_removed, "removed environment files"
        );
        detail(self.ctx, "Environment destroyed.");
        Ok(json!({
            "destroyed": true,
            "provider": state.provider(),
            "removed": {
                "kubeconfig": kubeconfig_removed,
                "state_dir": state_dir_removed,
            },
        }))
    }

    fn configure(
        &self,
        state: &EnvironmentState,
        opts: &ConfigureOptions,
    ) -> Result<Value, DevError> {
        let provider = self.provider(state)?;
        if let Some(pre_config) = &opts.pre_config {
            self.backend
                .playbook(&self.ctx.paths.playbook(pre_config), &[], false)?;
        }
        let deployed = if opts.k8s {
            Some(self.run_deploy_sequence(provider, false, false)?)
        } else {
            None
        };
        let config = self.ctx.paths.playbook("config");
        // The minikube deploy sequence is the config playbook itself.
        if deployed.is_none() || provider != Provider::Minikube {
            notice(self.ctx, "Configuring the cluster");
            self.backend.playbook(&config, &[], false)?;
        }
        let pods = if opts.pods {
            Some(self.run_pods_query(None)?)
        } else {
            None
        };
        Ok(json!({
            "provider": provider,
            "pre_config": opts.pre_config,
            "deploy": deployed,
            "playbook": self.ctx.paths.relative(&config),
            "pods": pods,
        }))
    }

    fn deploy(&self, state: &EnvironmentState, opts: &DeployOptions) -> Result<Value, DevError> {
        let provider = self.provider(state)?;
        self.run_deploy_sequence(provider, opts.nodes, opts.pods)
    }

    fn halt(&self, opts: &HaltOptions) -> Result<Value, DevError> {
        self.backend.vagrant_halt(opts.node.as_deref(), opts.force)?;
        Ok(json!({ "halted": opts.node.as_deref().unwrap_or("all") }))
    }

    fn up(&self, opts: &UpOptions) -> Result<Value, DevError> {
        self.backend.vagrant_up(opts.node.as_deref(), opts.provision)?;
        Ok(json!({
            "up": opts.node.as_deref().unwrap_or("all"),
            "provision": opts.provision,
        }))
    }

    fn reset(&self, opts: &ResetOptions) -> Result<Value, DevError> {
        if opts.recreate {
            notice(self.ctx, "Recreating the vagrant machines");
            self.backend.vagrant_destroy()?;
            remove_path(&self.ctx.paths.kubeconfig())?;
            self.backend.vagrant_up(None, opts.provision)?;
            self.backend
                .playbook(&self.ctx.paths.playbook("init"), &[], true)?;
        } else {
            notice(self.ctx, "Resetting the cluster");
            self.backend
                .playbook(&self.ctx.paths.playbook("reset"), &[], true)?;
        }
        let deployed = if opts.deploy {
            Some(self.run_deploy_sequence(Provider::Vagrant, false, false)?)
        } else {
            None
        };
        let nodes = if opts.nodes {
            Some(self.run_nodes_query()?)
        } else {
            None
        };
        Ok(json!({
            "recreated": opts.recreate,
            "deploy": deployed,
            "nodes": nodes,
        }))
    }

    fn status(&self, state: &EnvironmentState) -> Result<Value, DevError> {
        let (provider_status, reachable) = match *state {
            EnvironmentState::Minikube { running, .. } => {
                let output = self.backend.minikube_status()?;
                (output.combined(), running)
            }
            _ => (self.backend.vagrant_status()?, true),
        };
        self.echo(&provider_status);
        let (nodes, pods) = if reachable {
            (
                Some(self.run_nodes_query()?),
                Some(self.run_pods_query(None)?),
            )
        } else {
            detail(self.ctx, "The cluster is not running; skipping nodes and pods.");
            (None, None)
        };
        Ok(json!({
            "environment": state,
            "provider_status": provider_status,
            "nodes": nodes,
            "pods": pods,
        }))
    }

    fn pods(&self, opts: &PodsOptions) -> Result<Value, DevError> {
        let pods = self.run_pods_query(opts.namespace.as_deref())?;
        Ok(json!({ "namespace": opts.namespace, "pods": pods }))
    }

    fn test(&self, opts: &TestOptions) -> Result<Value, DevError> {
        let scratch = self.ctx.paths.scratch_dir();
        fs::create_dir_all(&scratch)?;
        let play = scratch.join(TEST_PLAY_FILE);
        fs::write(&play, render_test_play(&opts.role)?)?;

        let mut args = Vec::new();
        if opts.verbose {
            args.push("-v".to_string());
        }
        if opts.step {
            args.push("--step".to_string());
        }
        let result = self.backend.playbook(&play, &args, true);
        let cleanup = remove_path(&scratch);
        result?;
        cleanup?;
        Ok(json!({ "role": opts.role }))
    }

    fn ping(&self) -> Result<Value, DevError> {
        self.backend.vagrant_provision()?;
        self.backend.ansible_ping()?;
        Ok(json!({ "ping": "all" }))
    }

    fn reboot(&self) -> Result<Value, DevError> {
        let playbook = self.ctx.paths.playbook("reboot");
        self.backend.playbook(&playbook, &[], true)?;
        Ok(json!({ "playbook": self.ctx.paths.relative(&playbook) }))
    }

    fn dashboard(&self, state: &EnvironmentState) -> Result<Value, DevError> {
        let provider = self.provider(state)?;
        match provider {
            Provider::Minikube => self.backend.minikube_dashboard()?,
            Provider::Vagrant => self.backend.vagrant_dashboard()?,
        }
        Ok(json!({ "provider": provider }))
    }

    fn passthrough(&self, tool: PassthroughTool, args: &[String]) -> Result<Value, DevError> {
        let output = self.backend.passthrough(tool, args)?;
        Ok(json!({
            "tool": tool,
            "stdout": String::from_utf8_lossy(&output.stdout),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::environment::{ProjectPaths, KUBECONFIG_FILE};
    use crate::guard::{DestroyOptions, CREATE_REFUSED, DESTROY_REFUSED};
    use crate::prompt::FixedAnswer;
    use crate::runner::mock::MockRunner;
    use crate::runner::CommandOutput;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::{tempdir, TempDir};

    struct Project {
        _dir: TempDir,
        ctx: Context,
        home: PathBuf,
    }

    fn project() -> Project {
        let dir = tempdir().unwrap();
        let root = dir.path().join("project");
        let home = dir.path().join("minikube-home");
        fs::create_dir_all(root.join("playbooks")).unwrap();
        fs::create_dir_all(home.join("profiles/minikube")).unwrap();
        fs::write(home.join("ca.crt"), "CA").unwrap();
        fs::write(home.join("profiles/minikube/client.crt"), "CRT").unwrap();
        fs::write(home.join("profiles/minikube/client.key"), "KEY").unwrap();
        fs::write(root.join("Vagrantfile"), "Vagrant.configure(\"2\")\n").unwrap();
        for playbook in ["init", "config", "reset", "reboot"] {
            fs::write(root.join(format!("playbooks/{playbook}.yml")), "---\n").unwrap();
        }

        let mut config = Config::default();
        config.minikube.home = home.to_string_lossy().to_string();
        config.minikube.host_address = "192.168.50.5".to_string();
        Project {
            _dir: dir,
            ctx: Context {
                paths: ProjectPaths::new(&root),
                config_path: root.join("k8s-dev.yaml"),
                config,
                json: true,
            },
            home,
        }
    }

    fn vagrant_project(deployed: bool) -> Project {
        let project = project();
        fs::create_dir_all(project.ctx.paths.vagrant_state()).unwrap();
        if deployed {
            fs::write(project.ctx.paths.kubeconfig(), "apiVersion: v1\n").unwrap();
        }
        project
    }

    /// `minikube start` writes a kube-config that points at the certificates in `home`.
    fn fake_minikube(runner: &MockRunner, home: &Path) {
        let home = home.to_path_buf();
        runner.on_call("minikube", move |call, cwd| {
            if call.args.first().map(String::as_str) == Some("start") {
                let content = format!(
                    "clusters:\n- cluster:\n    certificate-authority: {}\n    server: https://127.0.0.1:8443\nusers:\n- name: minikube\n  user:\n    client-certificate: {}\n    client-key: {}\n",
                    home.join("ca.crt").display(),
                    home.join("profiles/minikube/client.crt").display(),
                    home.join("profiles/minikube/client.key").display(),
                );
                fs::write(cwd.join(KUBECONFIG_FILE), content).unwrap();
            }
        });
    }

    fn minikube_create(force: bool) -> Operation {
        Operation::Create(CreateOptions {
            provider: Some(Provider::Minikube),
            provision: true,
            cni: Some(Cni::Cilium),
            total_nodes: 3,
            force,
            ..Default::default()
        })
    }

    #[test]
    fn minikube_create_then_recreate() {
        let project = project();
        let ctx = &project.ctx;
        let runner = MockRunner::default();
        fake_minikube(&runner, &project.home);

        run_operation(ctx, &runner, &FixedAnswer(false), &minikube_create(false))
            .expect("first create");
        assert_eq!(
            detect(ctx, &runner).unwrap(),
            EnvironmentState::Minikube {
                deployed: true,
                running: true
            }
        );
        let kubeconfig = fs::read_to_string(ctx.paths.kubeconfig()).unwrap();
        assert!(kubeconfig.contains("certificate-authority-data: "));
        assert!(kubeconfig.contains("https://192.168.50.5:8443"));
        assert!(runner.lines().contains(
            &"minikube start --profile=minikube --cni=cilium --listen-address=0.0.0.0 --nodes=3"
                .to_string()
        ));

        let err = run_operation(ctx, &runner, &FixedAnswer(false), &minikube_create(false))
            .expect_err("second create is refused");
        assert!(matches!(err, DevError::Precondition(ref reason) if reason == CREATE_REFUSED));
        assert!(err.to_string().contains("cannot be created while it exists"));

        let before = runner.calls().len();
        run_operation(ctx, &runner, &FixedAnswer(false), &minikube_create(true))
            .expect("forced create");
        let lines: Vec<String> = runner.lines().into_iter().skip(before).collect();
        let position = |prefix: &str| {
            lines
                .iter()
                .position(|line| line.starts_with(prefix))
                .unwrap_or_else(|| panic!("missing `{prefix}` in {lines:?}"))
        };
        assert!(position("minikube stop") < position("minikube delete"));
        assert!(position("minikube delete") < position("minikube start"));
        assert_eq!(
            detect(ctx, &runner).unwrap(),
            EnvironmentState::Minikube {
                deployed: true,
                running: true
            }
        );
    }

    #[test]
    fn create_tolerates_kubeconfig_with_nothing_to_rewrite() {
        let project = project();
        let ctx = &project.ctx;
        let runner = MockRunner::default();
        runner.on_call("minikube", |call, cwd| {
            if call.args.first().map(String::as_str) == Some("start") {
                fs::write(
                    cwd.join(KUBECONFIG_FILE),
                    "clusters:\n- cluster:\n    certificate-authority-data: Q0E=\n    server: https://10.0.0.2:8443\n",
                )
                .unwrap();
            }
        });
        let result = run_operation(ctx, &runner, &FixedAnswer(false), &minikube_create(false))
            .expect("create");
        assert_eq!(result["kubeconfig"]["inlined"], json!([]));
        assert_eq!(result["kubeconfig"]["server_rewritten"], json!(false));
        let kubeconfig = fs::read_to_string(ctx.paths.kubeconfig()).unwrap();
        assert!(kubeconfig.contains("server: https://10.0.0.2:8443"));
    }

    #[test]
    fn confirmed_create_replaces_deployed_vagrant() {
        let project = vagrant_project(true);
        let ctx = &project.ctx;
        let runner = MockRunner::default();
        run_operation(
            ctx,
            &runner,
            &FixedAnswer(true),
            &Operation::Create(CreateOptions {
                provision: true,
                ..Default::default()
            }),
        )
        .expect("create");
        assert_eq!(
            runner.lines(),
            vec!["vagrant destroy --force", "vagrant up --provision"]
        );
        assert!(!ctx.paths.kubeconfig().exists());
    }

    #[test]
    fn create_over_fresh_vagrant_resumes_machines() {
        let project = vagrant_project(false);
        let runner = MockRunner::default();
        run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Create(CreateOptions::default()),
        )
        .expect("create");
        assert_eq!(runner.lines(), vec!["vagrant up"]);
        assert!(project.ctx.paths.vagrant_state().is_dir());
    }

    #[test]
    fn destroy_removes_files_even_when_tool_is_a_no_op() {
        let project = vagrant_project(true);
        let ctx = &project.ctx;
        let runner = MockRunner::default();
        let result = run_operation(
            ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Destroy(DestroyOptions { force: true }),
        )
        .expect("destroy");
        assert_eq!(runner.lines(), vec!["vagrant destroy --force"]);
        assert!(!ctx.paths.kubeconfig().exists());
        assert!(!ctx.paths.vagrant_state().exists());
        assert!(ctx.paths.vagrantfile().exists());
        assert_eq!(result["removed"]["kubeconfig"], json!(true));
        assert_eq!(detect(ctx, &runner).unwrap(), EnvironmentState::None);
    }

    #[test]
    fn declined_destroy_leaves_environment_in_place() {
        let project = vagrant_project(true);
        let runner = MockRunner::default();
        let err = run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Destroy(DestroyOptions::default()),
        )
        .expect_err("declined");
        assert_eq!(err.to_string(), DESTROY_REFUSED);
        assert!(runner.calls().is_empty());
        assert!(project.ctx.paths.kubeconfig().exists());
    }

    #[test]
    fn stopped_minikube_destroy_skips_stop() {
        let project = project();
        let ctx = &project.ctx;
        fs::create_dir_all(ctx.paths.minikube_state()).unwrap();
        let runner = MockRunner::default();
        runner.push_output("minikube", CommandOutput::empty(7));
        run_operation(
            ctx,
            &runner,
            &FixedAnswer(true),
            &Operation::Destroy(DestroyOptions::default()),
        )
        .expect("destroy");
        assert_eq!(
            runner.lines(),
            vec![
                "minikube status --profile=minikube",
                "minikube delete --profile=minikube"
            ]
        );
        assert!(!ctx.paths.minikube_state().exists());
    }

    #[test]
    fn failing_playbook_aborts_deploy_sequence() {
        let project = vagrant_project(false);
        let runner = MockRunner::default();
        runner.push_output("ansible-playbook", CommandOutput::empty(4));
        let err = run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Deploy(DeployOptions {
                nodes: true,
                pods: true,
                force: false,
            }),
        )
        .expect_err("playbook failure");
        assert_eq!(err.exit_code(), 4);
        assert_eq!(runner.lines(), vec!["ansible-playbook playbooks/init.yml"]);
    }

    #[test]
    fn deploy_lists_nodes_and_pods_after_playbook() {
        let project = vagrant_project(false);
        let runner = MockRunner::default();
        let result = run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Deploy(DeployOptions {
                nodes: true,
                pods: true,
                force: false,
            }),
        )
        .expect("deploy");
        let lines = runner.lines();
        assert_eq!(lines[0], "ansible-playbook playbooks/init.yml");
        assert!(lines[1].ends_with("--insecure-skip-tls-verify=true get nodes"));
        assert!(lines[2].ends_with("get pods --all-namespaces"));
        assert_eq!(result["playbook"], json!("playbooks/init.yml"));
    }

    #[test]
    fn configure_runs_pre_config_then_config_playbook() {
        let project = vagrant_project(true);
        let ctx = &project.ctx;
        fs::write(ctx.paths.playbook("prepare"), "---\n").unwrap();
        let runner = MockRunner::default();
        run_operation(
            ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Configure(ConfigureOptions {
                k8s: false,
                pre_config: Some("prepare".to_string()),
                pods: true,
            }),
        )
        .expect("configure");
        let calls = runner.calls();
        assert_eq!(calls[0].line(), "ansible-playbook playbooks/prepare.yml");
        assert_eq!(calls[1].line(), "ansible-playbook playbooks/config.yml");
        assert_eq!(
            calls[1]
                .env_overrides
                .get(crate::tools::VERIFY_SSL_ENV)
                .map(String::as_str),
            Some("false")
        );
        assert_eq!(calls[2].program, "kubectl");
    }

    fn configure_with_k8s() -> Operation {
        Operation::Configure(ConfigureOptions {
            k8s: true,
            ..Default::default()
        })
    }

    #[test]
    fn configure_k8s_on_vagrant_deploys_then_configures() {
        let project = vagrant_project(false);
        let runner = MockRunner::default();
        run_operation(&project.ctx, &runner, &FixedAnswer(false), &configure_with_k8s())
            .expect("configure");
        assert_eq!(
            runner.lines(),
            vec![
                "ansible-playbook playbooks/init.yml",
                "ansible-playbook playbooks/config.yml",
            ]
        );
    }

    #[test]
    fn configure_k8s_on_minikube_runs_config_playbook_once() {
        let project = project();
        let ctx = &project.ctx;
        fs::create_dir_all(ctx.paths.minikube_state()).unwrap();
        let runner = MockRunner::default();
        let result = run_operation(ctx, &runner, &FixedAnswer(false), &configure_with_k8s())
            .expect("configure");
        assert_eq!(
            runner.lines(),
            vec![
                "minikube status --profile=minikube",
                "ansible-playbook playbooks/config.yml",
            ]
        );
        assert_eq!(result["playbook"], json!("playbooks/config.yml"));
    }

    #[test]
    fn missing_pre_config_playbook_fails_before_any_tool_runs() {
        let project = vagrant_project(true);
        let runner = MockRunner::default();
        let err = run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Configure(ConfigureOptions {
                pre_config: Some("absent".to_string()),
                ..Default::default()
            }),
        )
        .expect_err("missing playbook");
        assert!(matches!(err, DevError::MissingArtifact(ref reason) if reason.contains("playbooks/absent.yml")));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_vagrantfile_blocks_halt() {
        let project = vagrant_project(false);
        fs::remove_file(project.ctx.paths.vagrantfile()).unwrap();
        let runner = MockRunner::default();
        let err = run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Halt(HaltOptions::default()),
        )
        .expect_err("no Vagrantfile");
        assert!(matches!(err, DevError::MissingArtifact(_)));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn reset_recreate_rebuilds_and_reprovisions() {
        let project = vagrant_project(true);
        let ctx = &project.ctx;
        let runner = MockRunner::default();
        run_operation(
            ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Reset(ResetOptions {
                recreate: true,
                provision: true,
                nodes: false,
                deploy: false,
            }),
        )
        .expect("reset");
        assert_eq!(
            runner.lines(),
            vec![
                "vagrant destroy --force",
                "vagrant up --provision",
                "ansible-playbook playbooks/init.yml"
            ]
        );
        assert!(!ctx.paths.kubeconfig().exists());
    }

    #[test]
    fn reset_without_recreate_runs_reset_playbook() {
        let project = vagrant_project(true);
        let runner = MockRunner::default();
        run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Reset(ResetOptions::default()),
        )
        .expect("reset");
        assert_eq!(runner.lines(), vec!["ansible-playbook playbooks/reset.yml"]);
    }

    #[test]
    fn status_of_stopped_minikube_skips_cluster_queries() {
        let project = project();
        let ctx = &project.ctx;
        fs::create_dir_all(ctx.paths.minikube_state()).unwrap();
        fs::write(ctx.paths.kubeconfig(), "apiVersion: v1\n").unwrap();
        let runner = MockRunner::default();
        runner.push_output(
            "minikube",
            CommandOutput {
                status_code: 7,
                stdout: b"host: Stopped\n".to_vec(),
                stderr: Vec::new(),
            },
        );
        runner.push_output(
            "minikube",
            CommandOutput {
                status_code: 7,
                stdout: b"host: Stopped\n".to_vec(),
                stderr: Vec::new(),
            },
        );
        let result = run_operation(ctx, &runner, &FixedAnswer(false), &Operation::Status)
            .expect("status");
        assert_eq!(result["provider_status"], json!("host: Stopped\n"));
        assert_eq!(result["nodes"], Value::Null);
        assert!(runner.calls().iter().all(|call| call.program != "kubectl"));
    }

    #[test]
    fn test_role_writes_scratch_play_and_cleans_up() {
        let project = vagrant_project(true);
        let ctx = &project.ctx;
        let runner = MockRunner::default();
        let seen = Rc::new(RefCell::new(String::new()));
        let captured = Rc::clone(&seen);
        runner.on_call("ansible-playbook", move |_, cwd| {
            *captured.borrow_mut() = fs::read_to_string(cwd.join(".tmp/play.yml")).unwrap();
        });
        run_operation(
            ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Test(TestOptions {
                role: "ingress".to_string(),
                verbose: true,
                step: false,
            }),
        )
        .expect("test");

        assert_eq!(
            runner.lines(),
            vec!["ansible-playbook -v .tmp/play.yml"]
        );
        assert!(!ctx.paths.scratch_dir().exists());
        let play = seen.borrow();
        assert!(play.starts_with("---\n"));
        let parsed: serde_yaml::Value = serde_yaml::from_str(&play).unwrap();
        assert_eq!(parsed[0]["hosts"], serde_yaml::Value::from("127.0.0.1"));
        assert_eq!(parsed[0]["gather_facts"], serde_yaml::Value::from(false));
        assert_eq!(
            parsed[0]["vars"]["k8s_config"],
            serde_yaml::Value::from("../.kubectl.cfg")
        );
        assert_eq!(
            parsed[0]["roles"][0]["role"],
            serde_yaml::Value::from("ingress")
        );
    }

    #[test]
    fn failed_test_run_still_removes_scratch_dir() {
        let project = vagrant_project(true);
        let runner = MockRunner::default();
        runner.push_output("ansible-playbook", CommandOutput::empty(2));
        let err = run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Test(TestOptions {
                role: "web".to_string(),
                ..Default::default()
            }),
        )
        .expect_err("failure");
        assert_eq!(err.exit_code(), 2);
        assert!(!project.ctx.paths.scratch_dir().exists());
    }

    #[test]
    fn ping_provisions_then_pings() {
        let project = vagrant_project(false);
        let runner = MockRunner::default();
        run_operation(&project.ctx, &runner, &FixedAnswer(false), &Operation::Ping)
            .expect("ping");
        assert_eq!(
            runner.lines(),
            vec!["vagrant provision", "ansible -m ping all"]
        );
    }

    #[test]
    fn vagrant_dashboard_uses_configured_tool() {
        let project = vagrant_project(true);
        let runner = MockRunner::default();
        run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Dashboard,
        )
        .expect("dashboard");
        let calls = runner.calls();
        assert_eq!(calls[0].program, "octant");
        assert!(calls[0].args[0].starts_with("--kubeconfig="));
    }

    #[test]
    fn pods_query_honours_namespace() {
        let project = vagrant_project(true);
        let runner = MockRunner::default();
        runner.push_output(
            "kubectl",
            CommandOutput {
                status_code: 0,
                stdout: b"NAME READY\nweb-0 1/1\n".to_vec(),
                stderr: Vec::new(),
            },
        );
        let result = run_operation(
            &project.ctx,
            &runner,
            &FixedAnswer(false),
            &Operation::Pods(PodsOptions {
                namespace: Some("apps".to_string()),
            }),
        )
        .expect("pods");
        assert!(runner.lines()[0].ends_with("get pods --namespace apps"));
        assert_eq!(result["pods"], json!("NAME READY\nweb-0 1/1\n"));
    }

    #[test]
    fn inconsistent_project_is_reported_before_guard() {
        let project = vagrant_project(true);
        fs::create_dir_all(project.ctx.paths.minikube_state()).unwrap();
        let runner = MockRunner::default();
        let err = run_operation(&project.ctx, &runner, &FixedAnswer(true), &Operation::Nodes)
            .expect_err("inconsistent");
        assert_eq!(err.kind(), "inconsistent_environment");
        assert!(runner.calls().is_empty());
    }
}
