//! Default executor: drives the `docker`, `terraform` and `kubectl` CLIs.
//!
//! Each invocation runs directly (no shell) with the component's resolved
//! directory as working directory. A non-zero exit is a failed outcome with
//! stderr (or stdout) as diagnostics.

use std::collections::BTreeMap;
use std::path::Path;

use crate::action::{ActionExecutor, ActionOutcome, ActionRequest, Invocation};
use crate::error::Result;
use crate::utils::command::{self, CommandOutput};
use crate::utils::shell;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    pub docker_bin: String,
    pub terraform_bin: String,
    pub kubectl_bin: String,
    /// Read `terraform output -json` after a successful apply and publish
    /// string outputs for later `valueFrom` lookups.
    pub collect_terraform_outputs: bool,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            terraform_bin: "terraform".to_string(),
            kubectl_bin: "kubectl".to_string(),
            collect_terraform_outputs: true,
        }
    }
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program and arguments for `action`. `iidfile` is where docker writes
    /// the built image id.
    pub fn command_for(
        &self,
        action: &ActionRequest,
        iidfile: Option<&Path>,
    ) -> (String, Vec<String>) {
        match action {
            ActionRequest::Docker { image, dockerfile } => {
                let mut args = vec![
                    "build".to_string(),
                    "-t".to_string(),
                    image.clone(),
                    "-f".to_string(),
                    dockerfile.display().to_string(),
                ];
                if let Some(iidfile) = iidfile {
                    args.push("--iidfile".to_string());
                    args.push(iidfile.display().to_string());
                }
                args.push(".".to_string());
                (self.docker_bin.clone(), args)
            }
            ActionRequest::Terraform { target, vars } => {
                let mut args = vec![
                    "apply".to_string(),
                    "-auto-approve".to_string(),
                    "-input=false".to_string(),
                ];
                if !target.is_empty() {
                    args.push(format!("-target={}", target));
                }
                for var in vars {
                    args.push("-var".to_string());
                    args.push(format!("{}={}", var.name, var.value));
                }
                (self.terraform_bin.clone(), args)
            }
            ActionRequest::Kubernetes => (
                self.kubectl_bin.clone(),
                vec!["apply".to_string(), "-f".to_string(), ".".to_string()],
            ),
        }
    }

    fn terraform_outputs(&self, invocation: &Invocation) -> BTreeMap<String, String> {
        let args = vec!["output".to_string(), "-json".to_string()];
        let output = match command::run_in_dir(&self.terraform_bin, &args, &invocation.dir, &[]) {
            Ok(output) if output.success => output,
            Ok(output) => {
                tracing::warn!(component = %invocation.component, error = %output.error_text(), "terraform output failed");
                return BTreeMap::new();
            }
            Err(err) => {
                tracing::warn!(component = %invocation.component, error = %err, "terraform output failed");
                return BTreeMap::new();
            }
        };
        parse_terraform_outputs(&output.stdout)
    }
}

/// String-valued entries of `terraform output -json`. Other value types are skipped.
pub fn parse_terraform_outputs(json: &str) -> BTreeMap<String, String> {
    let parsed: serde_json::Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(_) => return BTreeMap::new(),
    };
    let Some(entries) = parsed.as_object() else {
        return BTreeMap::new();
    };

    entries
        .iter()
        .filter_map(|(name, entry)| {
            entry
                .get("value")
                .and_then(|v| v.as_str())
                .map(|value| (name.clone(), value.to_string()))
        })
        .collect()
}

/// Outputs of a docker build: `image` (the tag) and `id` (the image id, when
/// docker wrote one).
pub fn docker_outputs(image: &str, iid: Option<&str>) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();
    outputs.insert("image".to_string(), image.to_string());
    if let Some(id) = iid.map(str::trim).filter(|id| !id.is_empty()) {
        outputs.insert("id".to_string(), id.to_string());
    }
    outputs
}

fn outcome_from(output: &CommandOutput) -> ActionOutcome {
    if output.success {
        ActionOutcome::succeeded()
    } else {
        let text = output.error_text();
        ActionOutcome::failed(if text.is_empty() {
            format!("exited with code {}", output.exit_code)
        } else {
            text
        })
    }
}

impl ActionExecutor for CommandExecutor {
    fn execute(&self, invocation: &Invocation) -> Result<ActionOutcome> {
        let iidfile = match &invocation.action {
            ActionRequest::Docker { .. } => Some(
                std::env::temp_dir().join(format!("kanvas-{}.iid", uuid::Uuid::new_v4())),
            ),
            _ => None,
        };
        let (program, args) = self.command_for(&invocation.action, iidfile.as_deref());
        log_status!(
            "apply",
            "{}: {}",
            invocation.component,
            shell::render_command(&program, &args)
        );

        let output = command::run_in_dir(&program, &args, &invocation.dir, &[]);
        let iid = iidfile.as_ref().and_then(|path| {
            let iid = std::fs::read_to_string(path).ok();
            let _ = std::fs::remove_file(path);
            iid
        });
        let mut outcome = outcome_from(&output?);
        if !outcome.success {
            return Ok(outcome);
        }

        match &invocation.action {
            ActionRequest::Docker { image, .. } => {
                outcome.outputs = docker_outputs(image, iid.as_deref());
            }
            ActionRequest::Terraform { .. } if self.collect_terraform_outputs => {
                outcome.outputs = self.terraform_outputs(invocation);
            }
            _ => {}
        }
        Ok(outcome)
    }
}
