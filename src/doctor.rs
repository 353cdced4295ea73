use crate::error::DevError;
use crate::lifecycle::detect;
use crate::runner::ToolRunner;
use crate::{print_json, Context, JsonResult};
use dialoguer::console::style;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
pub struct DoctorCheck {
    pub id: String,
    pub ok: bool,
    pub severity: String,
    pub strict_fail: bool,
    pub message: String,
    pub remediation: String,
    pub details: serde_json::Value,
}

fn doctor_check(
    id: &str,
    ok: bool,
    severity: &str,
    strict_fail: bool,
    message: impl Into<String>,
    remediation: &str,
    details: serde_json::Value,
) -> DoctorCheck {
    DoctorCheck {
        id: id.to_string(),
        ok,
        severity: severity.to_string(),
        strict_fail,
        message: message.into(),
        remediation: remediation.to_string(),
        details,
    }
}

pub fn collect_doctor_checks<R: ToolRunner>(ctx: &Context, runner: &R) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    for (name, program) in ctx.config.tools.entries() {
        let resolved = which::which(program).ok();
        let ok = resolved.is_some();
        checks.push(doctor_check(
            &format!("tool_{name}"),
            ok,
            "warning",
            true,
            if ok {
                format!("{program} is available")
            } else {
                format!("{program} is not installed or not in PATH")
            },
            &format!("Install `{program}` or set tools.{name} in the config file."),
            json!({ "program": program, "resolved": resolved }),
        ));
    }

    let vagrantfile = ctx.paths.vagrantfile();
    let has_vagrantfile = ctx.paths.is_file(&vagrantfile);
    checks.push(doctor_check(
        "vagrantfile",
        has_vagrantfile,
        "warning",
        false,
        if has_vagrantfile {
            "Vagrantfile present"
        } else {
            "no Vagrantfile in the project directory"
        },
        "Run `k8s-dev init` to scaffold a vagrant project.",
        json!({ "path": vagrantfile }),
    ));

    match detect(ctx, runner) {
        Ok(state) => checks.push(doctor_check(
            "environment",
            true,
            "error",
            false,
            state.describe(),
            "",
            json!({ "state": state }),
        )),
        Err(err) => checks.push(doctor_check(
            "environment",
            false,
            "error",
            true,
            err.to_string(),
            "Remove the state directory that does not belong to the active environment.",
            json!({ "kind": err.kind() }),
        )),
    }

    checks
}

pub fn handle_doctor<R: ToolRunner>(ctx: &Context, runner: &R, strict: bool) -> Result<(), DevError> {
    let checks = collect_doctor_checks(ctx, runner);
    let has_error = checks
        .iter()
        .any(|check| !check.ok && check.severity == "error");
    let has_strict_warning = checks.iter().any(|check| !check.ok && check.strict_fail);
    let ok = !has_error && (!strict || !has_strict_warning);
    let primary_error = checks
        .iter()
        .find(|check| !check.ok && check.severity == "error")
        .or_else(|| {
            checks
                .iter()
                .find(|check| !check.ok && strict && check.strict_fail)
        })
        .or_else(|| checks.iter().find(|check| !check.ok))
        .map(|check| check.message.clone());

    if ctx.json {
        let payload = JsonResult {
            ok,
            result: Some(json!({ "checks": checks, "strict": strict })),
            error: if ok { None } else { primary_error },
            error_kind: None,
            error_details: None,
        };
        print_json(&payload)?;
        return Ok(());
    }

    for check in &checks {
        let state = if check.ok {
            style("ok").green()
        } else {
            style("fail").red()
        };
        println!(
            "[{}] {} ({}) - {}",
            state, check.id, check.severity, check.message
        );
        if !check.ok && !check.remediation.is_empty() {
            println!("  remediation: {}", check.remediation);
        }
    }
    if ok {
        return Ok(());
    }
    if strict && has_strict_warning && !has_error {
        return Err(DevError::Precondition(
            "doctor strict mode failed".to_string(),
        ));
    }
    Err(DevError::Precondition(primary_error.unwrap_or_else(|| {
        "one or more readiness checks failed".to_string()
    })))
}
