mod config;
mod doctor;
mod environment;
mod error;
mod guard;
mod kubeconfig;
mod lifecycle;
mod prompt;
mod runner;
mod scaffold;
mod tools;

use crate::config::{
    load_config, read_config_from_str, resolve_config_path, Config, DEFAULT_CONFIG_YAML,
};
use crate::environment::{ProjectPaths, Provider};
use crate::error::{DevError, ProcessErrorDetails};
use crate::guard::{
    Cni, ConfigureOptions, CreateOptions, DeployOptions, DestroyOptions, HaltOptions, Operation,
    PassthroughTool, PodsOptions, ResetOptions, TestOptions, UpOptions,
};
use crate::prompt::TerminalPrompter;
use crate::runner::SystemRunner;
use crate::scaffold::{ScaffoldOptions, DEFAULT_AGENTS, DEFAULT_BOX, DEFAULT_SERVERS};
use clap::{ArgAction, Parser, Subcommand};
use dialoguer::console::style;
use serde::Serialize;
use serde_json::json;
use std::env;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "K8S_DEV_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "k8s-dev",
    version,
    about = "Manage a Kubernetes development environment backed by vagrant or minikube"
)]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    path: Option<PathBuf>,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scaffold a vagrant project
    Init {
        #[arg(short, long, default_value_t = DEFAULT_SERVERS)]
        servers: u32,
        #[arg(short, long, default_value_t = DEFAULT_AGENTS)]
        agents: u32,
        #[arg(short = 'b', long = "box", default_value = DEFAULT_BOX)]
        image: String,
        #[arg(short, long)]
        force: bool,
    },
    Create {
        #[arg(long, conflicts_with = "minikube")]
        vagrant: bool,
        #[arg(long)]
        minikube: bool,
        #[arg(short, long, num_args = 0..=1, default_value_t = true, default_missing_value = "true", action = ArgAction::Set)]
        provision: bool,
        #[arg(long, value_enum)]
        cni: Option<Cni>,
        /// Number of nodes for minikube; 0 lets minikube decide
        #[arg(short, long, default_value_t = 0)]
        total_nodes: u32,
        #[arg(long)]
        ha: bool,
        #[arg(short, long)]
        deploy: bool,
        #[arg(short, long)]
        force: bool,
    },
    Configure {
        #[arg(long)]
        k8s: bool,
        /// Playbook run before the configuration playbook
        #[arg(long)]
        pre_config: Option<String>,
        #[arg(short, long)]
        pods: bool,
    },
    Deploy {
        #[arg(short, long, num_args = 0..=1, default_value_t = true, default_missing_value = "true", action = ArgAction::Set)]
        nodes: bool,
        #[arg(short, long)]
        pods: bool,
        #[arg(short, long)]
        force: bool,
    },
    #[command(visible_alias = "down")]
    Destroy {
        #[arg(short, long)]
        force: bool,
    },
    Halt {
        node: Option<String>,
        #[arg(short, long)]
        force: bool,
    },
    Up {
        node: Option<String>,
        #[arg(short, long, num_args = 0..=1, default_value_t = true, default_missing_value = "true", action = ArgAction::Set)]
        provision: bool,
    },
    Reset {
        #[arg(long)]
        recreate: bool,
        #[arg(short, long, num_args = 0..=1, default_value_t = true, default_missing_value = "true", action = ArgAction::Set)]
        provision: bool,
        #[arg(short, long, num_args = 0..=1, default_value_t = true, default_missing_value = "true", action = ArgAction::Set)]
        nodes: bool,
        #[arg(short, long)]
        deploy: bool,
    },
    Status,
    Nodes,
    Pods {
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Apply a single role to the cluster; --verbose is passed on to ansible
    Test {
        role: String,
        #[arg(long)]
        step: bool,
    },
    Ping,
    Reboot,
    Dashboard,
    #[command(visible_alias = "kubectl")]
    Control {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    Helm {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    #[command(visible_alias = "virtctl")]
    Virtual {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    Doctor {
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Init,
    Validate,
    Show,
}

#[derive(Debug, Serialize)]
pub struct JsonResult<T: Serialize> {
    pub ok: bool,
    pub result: Option<T>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ProcessErrorDetails>,
}

/// Everything an invocation needs to know about where it runs.
#[derive(Debug, Clone)]
pub struct Context {
    pub paths: ProjectPaths,
    pub config_path: PathBuf,
    pub config: Config,
    pub json: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    let result = build_context(&cli).and_then(|ctx| dispatch(&ctx, cli.command, cli.verbose));
    if let Err(err) = result {
        if json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
                error_kind: Some(err.kind()),
                error_details: err.details().cloned(),
            };
            if let Err(print_err) = print_json(&payload) {
                eprintln!("{print_err}");
            }
        } else {
            eprintln!("{} {err}", style("Error:").red().bold());
        }
        std::process::exit(err.exit_code());
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // Fails only if a global subscriber is already installed; the first one stays.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_context(cli: &Cli) -> Result<Context, DevError> {
    let cwd = env::current_dir()?;
    let root = match &cli.path {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => cwd.join(path),
        None => cwd,
    };
    let config_path = resolve_config_path(cli.config.as_ref(), &root);
    // `config` subcommands load the file themselves.
    let config = match cli.command {
        Commands::Config { .. } => Config::default(),
        _ => load_config(&config_path)?,
    };
    Ok(Context {
        paths: ProjectPaths::new(root),
        config_path,
        config,
        json: cli.json,
    })
}

fn provider_flag(vagrant: bool, minikube: bool) -> Option<Provider> {
    if minikube {
        Some(Provider::Minikube)
    } else if vagrant {
        Some(Provider::Vagrant)
    } else {
        None
    }
}

fn dispatch(ctx: &Context, command: Commands, verbose: bool) -> Result<(), DevError> {
    let runner = SystemRunner;
    let operation = match command {
        Commands::Init {
            servers,
            agents,
            image,
            force,
        } => {
            return handle_init(
                ctx,
                ScaffoldOptions {
                    servers,
                    agents,
                    image,
                    force,
                },
            )
        }
        Commands::Doctor { strict } => return doctor::handle_doctor(ctx, &runner, strict),
        Commands::Config { command } => return handle_config(ctx, command),
        Commands::Create {
            vagrant,
            minikube,
            provision,
            cni,
            total_nodes,
            ha,
            deploy,
            force,
        } => Operation::Create(CreateOptions {
            provider: provider_flag(vagrant, minikube),
            provision,
            cni,
            total_nodes,
            ha,
            deploy,
            force,
        }),
        Commands::Configure {
            k8s,
            pre_config,
            pods,
        } => Operation::Configure(ConfigureOptions {
            k8s,
            pre_config,
            pods,
        }),
        Commands::Deploy { nodes, pods, force } => {
            Operation::Deploy(DeployOptions { nodes, pods, force })
        }
        Commands::Destroy { force } => Operation::Destroy(DestroyOptions { force }),
        Commands::Halt { node, force } => Operation::Halt(HaltOptions { node, force }),
        Commands::Up { node, provision } => Operation::Up(UpOptions { node, provision }),
        Commands::Reset {
            recreate,
            provision,
            nodes,
            deploy,
        } => Operation::Reset(ResetOptions {
            recreate,
            provision,
            nodes,
            deploy,
        }),
        Commands::Status => Operation::Status,
        Commands::Nodes => Operation::Nodes,
        Commands::Pods { namespace } => Operation::Pods(PodsOptions { namespace }),
        Commands::Test { role, step } => Operation::Test(TestOptions {
            role,
            verbose,
            step,
        }),
        Commands::Ping => Operation::Ping,
        Commands::Reboot => Operation::Reboot,
        Commands::Dashboard => Operation::Dashboard,
        Commands::Control { args } => Operation::Passthrough {
            tool: PassthroughTool::Control,
            args,
        },
        Commands::Helm { args } => Operation::Passthrough {
            tool: PassthroughTool::Helm,
            args,
        },
        Commands::Virtual { args } => Operation::Passthrough {
            tool: PassthroughTool::Virtual,
            args,
        },
    };

    let payload = lifecycle::run_operation(ctx, &runner, &TerminalPrompter, &operation)?;
    if ctx.json {
        return output(ctx, payload);
    }
    if let Some(message) = completion_message(&operation) {
        println!("{}", style(message).green());
    }
    Ok(())
}

fn completion_message(operation: &Operation) -> Option<&'static str> {
    match operation {
        Operation::Create(_) => Some("Environment created."),
        Operation::Configure(_) => Some("Cluster configured."),
        Operation::Deploy(_) => Some("Kubernetes deployed."),
        Operation::Halt(_) => Some("Machines halted."),
        Operation::Up(_) => Some("Machines are up."),
        Operation::Reset(_) => Some("Cluster reset."),
        Operation::Reboot => Some("Cluster rebooted."),
        _ => None,
    }
}

fn handle_init(ctx: &Context, opts: ScaffoldOptions) -> Result<(), DevError> {
    notice(ctx, "Initializing development environment...");
    let report = scaffold::scaffold(ctx, &opts)?;
    if ctx.json {
        return output(ctx, json!(report));
    }
    println!(
        "{}",
        style(format!("Project scaffolded in {}", report.root)).green()
    );
    Ok(())
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), DevError> {
    match command {
        ConfigCommand::Init => {
            if ctx.config_path.exists() {
                return output(ctx, json!({"path": ctx.config_path, "created": false}));
            }
            if let Some(parent) = ctx.config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            output(ctx, json!({"path": ctx.config_path, "created": true}))
        }
        ConfigCommand::Validate => {
            let content = fs::read_to_string(&ctx.config_path).map_err(|err| {
                DevError::Config(format!(
                    "cannot read {}: {err}",
                    ctx.config_path.display()
                ))
            })?;
            read_config_from_str(&content)?;
            output(ctx, json!({"path": ctx.config_path, "valid": true}))
        }
        ConfigCommand::Show => {
            let cfg = load_config(&ctx.config_path)?;
            if ctx.json {
                return output(
                    ctx,
                    json!({
                        "path": ctx.config_path,
                        "exists": ctx.config_path.exists(),
                        "config": cfg,
                    }),
                );
            }
            print!("{}", serde_yaml::to_string(&cfg)?);
            Ok(())
        }
    }
}

/// Section heading for a multi-step operation; silent under --json.
pub fn notice(ctx: &Context, message: &str) {
    if !ctx.json {
        println!("{}", style(message).cyan().bold());
    }
}

/// Progress line inside a section; silent under --json.
pub fn detail(ctx: &Context, message: &str) {
    if !ctx.json {
        println!("  {}", style(message).dim());
    }
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), DevError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
            error_kind: None,
            error_details: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

pub fn print_json<T: Serialize>(payload: &T) -> Result<(), DevError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
