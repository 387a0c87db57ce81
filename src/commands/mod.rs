use std::path::PathBuf;

use kanvas::Orchestrator;

pub type CmdResult<T> = kanvas::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    /// Load and validate the configuration named by `--config`, or discover one
    /// in the current directory.
    pub fn orchestrator(&self) -> kanvas::Result<Orchestrator> {
        match &self.config {
            Some(path) => Orchestrator::from_file(path),
            None => {
                let cwd = std::env::current_dir().map_err(|e| {
                    kanvas::Error::internal_io(e.to_string(), Some("read current dir".to_string()))
                })?;
                Orchestrator::discover(&cwd)
            }
        }
    }
}

pub mod apply;
pub mod plan;

macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (kanvas::Result<serde_json::Value>, i32) {
    crate::tty::status("kanvas is working...");

    match command {
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Apply(args) => dispatch!(args, global, apply),
    }
}
