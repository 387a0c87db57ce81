use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use kanvas::engine::scheduler::PlanView;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct PlanArgs {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
    pub plan: PlanView,
}

pub fn run(_args: PlanArgs, global: &GlobalArgs) -> CmdResult<PlanOutput> {
    let orchestrator = global.orchestrator()?;

    Ok((
        PlanOutput {
            config: orchestrator.source().map(PathBuf::from),
            plan: orchestrator.plan_view(),
        },
        0,
    ))
}
