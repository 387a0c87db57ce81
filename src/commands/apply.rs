use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use kanvas::engine::executor::CommandExecutor;
use kanvas::engine::pipeline::{default_concurrency, RunOptions, RunResult, RunStatus};
use kanvas::Error;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct ApplyArgs {
    /// Maximum components running at once within a batch (default: CPU count)
    #[arg(long, short = 'j')]
    concurrency: Option<usize>,

    /// docker binary
    #[arg(long, default_value = "docker")]
    docker_bin: String,

    /// terraform binary
    #[arg(long, default_value = "terraform")]
    terraform_bin: String,

    /// kubectl binary
    #[arg(long, default_value = "kubectl")]
    kubectl_bin: String,

    /// Don't read `terraform output -json` after an apply
    #[arg(long)]
    no_terraform_outputs: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
    pub run: RunResult,
}

pub fn run(args: ApplyArgs, global: &GlobalArgs) -> CmdResult<ApplyOutput> {
    let concurrency = args.concurrency.unwrap_or_else(default_concurrency);
    if concurrency == 0 {
        return Err(Error::validation_invalid_argument(
            "concurrency",
            "must be at least 1",
        ));
    }

    let orchestrator = global.orchestrator()?;
    let executor = CommandExecutor {
        docker_bin: args.docker_bin,
        terraform_bin: args.terraform_bin,
        kubectl_bin: args.kubectl_bin,
        collect_terraform_outputs: !args.no_terraform_outputs,
    };
    let options = RunOptions {
        concurrency,
        ..Default::default()
    };

    let run = orchestrator.apply_with_env(&executor, &options)?;
    let exit_code = match run.status {
        RunStatus::Success => 0,
        RunStatus::PartialSuccess | RunStatus::Failed | RunStatus::Cancelled => 20,
    };

    Ok((
        ApplyOutput {
            config: orchestrator.source().map(PathBuf::from),
            run,
        },
        exit_code,
    ))
}
