use crate::environment::{PLAYBOOK_DIR, VAGRANTFILE};
use crate::error::DevError;
use crate::{detail, Context};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;

pub const DEFAULT_SERVERS: u32 = 2;
pub const DEFAULT_AGENTS: u32 = 3;
pub const DEFAULT_BOX: &str = "debian/bookworm64";
/// Node addresses are `192.168.57.1<i>` and `192.168.57.2<i>`, so each group holds at most nine.
pub const MAX_NODES_PER_GROUP: u32 = 9;

const DIRECTORIES: [&str; 4] = ["collections", "group_vars", PLAYBOOK_DIR, "roles"];

const ANSIBLE_CFG: &str = include_str!("../templates/ansible.cfg");
const ANSIBLE_LINT: &str = include_str!("../templates/ansible-lint.yml");
const REQUIREMENTS: &str = include_str!("../templates/requirements.yml");
const VAGRANTFILE_BODY: &str = include_str!("../templates/Vagrantfile.rb");
const GROUP_VARS_ALL: &str = include_str!("../templates/all.yml");
const GROUP_VARS_CLUSTER: &str = include_str!("../templates/k3s_cluster.yml");
const PLAYBOOK_INIT: &str = include_str!("../templates/init.yml");
const PLAYBOOK_CONFIG: &str = include_str!("../templates/config.yml");
const PLAYBOOK_RESET: &str = include_str!("../templates/reset.yml");
const PLAYBOOK_REBOOT: &str = include_str!("../templates/reboot.yml");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldOptions {
    pub servers: u32,
    pub agents: u32,
    pub image: String,
    pub force: bool,
}

impl Default for ScaffoldOptions {
    fn default() -> Self {
        Self {
            servers: DEFAULT_SERVERS,
            agents: DEFAULT_AGENTS,
            image: DEFAULT_BOX.to_string(),
            force: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaffoldReport {
    pub root: String,
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

pub fn inventory(servers: u32, agents: u32) -> String {
    let mut text = String::from("[k3s_cluster:children]\nmaster\nnode\n\n[master]\n");
    for i in 1..=servers {
        let _ = writeln!(text, "control-{i} ansible_host=192.168.57.1{i}");
    }
    text.push_str("\n[node]\n");
    for i in 1..=agents {
        let _ = writeln!(text, "work-{i} ansible_host=192.168.57.2{i}");
    }
    text.push_str("\n[all:vars]\n");
    text.push_str("ansible_user=vagrant\n");
    text.push_str("ansible_ssh_common_args='-o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o CheckHostIP=no'\n");
    text.push_str("ansible_ssh_private_key_file=~/.ssh/insecure_private_key\n");
    text
}

pub fn vagrantfile(servers: u32, agents: u32, image: &str) -> String {
    format!(
        "IMAGE_NAME = \"{image}\"\nSERVER_NUMBER = {servers}\nAGENT_NUMBER = {agents}\n\n{VAGRANTFILE_BODY}"
    )
}

fn project_files(opts: &ScaffoldOptions) -> Vec<(String, String)> {
    let playbook = |name: &str| format!("{PLAYBOOK_DIR}/{name}.yml");
    vec![
        ("ansible.cfg".to_string(), ANSIBLE_CFG.to_string()),
        (".ansible-lint".to_string(), ANSIBLE_LINT.to_string()),
        ("hosts.ini".to_string(), inventory(opts.servers, opts.agents)),
        ("requirements.yml".to_string(), REQUIREMENTS.to_string()),
        (
            VAGRANTFILE.to_string(),
            vagrantfile(opts.servers, opts.agents, &opts.image),
        ),
        ("group_vars/all.yml".to_string(), GROUP_VARS_ALL.to_string()),
        (
            "group_vars/k3s_cluster.yml".to_string(),
            GROUP_VARS_CLUSTER.to_string(),
        ),
        (playbook("init"), PLAYBOOK_INIT.to_string()),
        (playbook("config"), PLAYBOOK_CONFIG.to_string()),
        (playbook("reset"), PLAYBOOK_RESET.to_string()),
        (playbook("reboot"), PLAYBOOK_REBOOT.to_string()),
    ]
}

fn validate(opts: &ScaffoldOptions) -> Result<(), DevError> {
    if opts.servers == 0 || opts.servers > MAX_NODES_PER_GROUP {
        return Err(DevError::Precondition(format!(
            "'servers' must be between 1 and {MAX_NODES_PER_GROUP}"
        )));
    }
    if opts.agents > MAX_NODES_PER_GROUP {
        return Err(DevError::Precondition(format!(
            "'agents' must be between 0 and {MAX_NODES_PER_GROUP}"
        )));
    }
    if opts.image.trim().is_empty() {
        return Err(DevError::Precondition("'box' must be non-empty".to_string()));
    }
    Ok(())
}

/// Writes the vagrant project skeleton. Nothing is written when any entry exists and `force` is off.
pub fn scaffold(ctx: &Context, opts: &ScaffoldOptions) -> Result<ScaffoldReport, DevError> {
    validate(opts)?;
    let root = ctx.paths.root();
    let files = project_files(opts);

    if !opts.force {
        let entries = DIRECTORIES
            .iter()
            .map(|dir| dir.to_string())
            .chain(files.iter().map(|(name, _)| name.clone()));
        for entry in entries {
            if root.join(&entry).exists() {
                return Err(DevError::Precondition(format!(
                    "'{entry}' already exists, would be overwritten, and --force was not provided"
                )));
            }
        }
    }

    if !root.is_dir() {
        detail(ctx, "creating development folder...");
        fs::create_dir_all(root)?;
    }
    for dir in DIRECTORIES {
        detail(ctx, &format!("creating '{dir}/'"));
        fs::create_dir_all(root.join(dir))?;
    }
    for (name, content) in &files {
        detail(ctx, &format!("creating '{name}'"));
        fs::write(root.join(name), content)?;
    }

    Ok(ScaffoldReport {
        root: root.display().to_string(),
        directories: DIRECTORIES.iter().map(|dir| format!("{dir}/")).collect(),
        files: files.into_iter().map(|(name, _)| name).collect(),
    })
}
