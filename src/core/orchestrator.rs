//! Entry point tying configuration, planning and execution together.
//!
//! [`Orchestrator::prepare`] is the validation pass: every structural error
//! (schema, unknown dependency, cycle, ambiguous action) surfaces there, before
//! any action runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::action::ActionExecutor;
use crate::component::ComponentTree;
use crate::config::{self, ComponentConfig};
use crate::engine::graph::DependencyGraph;
use crate::engine::pipeline::{self, RunContext, RunOptions, RunResult};
use crate::engine::scheduler::{self, ExecutionPlan, PlanView};
use crate::error::Result;
use crate::variable::{ChainLookup, EnvLookup, OutputStore, VariableLookup};

#[derive(Debug)]
pub struct Orchestrator {
    tree: ComponentTree,
    graph: DependencyGraph,
    plan: ExecutionPlan,
    source: Option<PathBuf>,
}

impl Orchestrator {
    pub fn prepare(root: &ComponentConfig, base_dir: &Path) -> Result<Self> {
        let tree = ComponentTree::build(root, base_dir)?;
        let graph = DependencyGraph::build(&tree)?;
        let plan = scheduler::plan(&tree, &graph)?;

        Ok(Self {
            tree,
            graph,
            plan,
            source: None,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let loaded = config::load(path)?;
        let mut orchestrator = Self::prepare(&loaded.root, &loaded.base_dir)?;
        orchestrator.source = Some(loaded.path);
        Ok(orchestrator)
    }

    /// Load `kanvas.yaml` (or `.yml`) from `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        Self::from_file(&config::discover(dir)?)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn plan_view(&self) -> PlanView {
        self.plan.view(&self.tree)
    }

    /// Run every batch. `valueFrom` keys resolve against outputs published
    /// during this run first, then `lookup`.
    pub fn apply(
        &self,
        executor: &dyn ActionExecutor,
        lookup: Arc<dyn VariableLookup>,
        options: &RunOptions,
    ) -> Result<RunResult> {
        let outputs = Arc::new(OutputStore::new());
        let chain = ChainLookup::new()
            .with(Arc::clone(&outputs) as Arc<dyn VariableLookup>)
            .with(lookup);

        let ctx = RunContext {
            executor,
            lookup: &chain,
            outputs: &*outputs,
        };
        pipeline::run(&self.tree, &self.graph, &self.plan, ctx, options)
    }

    /// [`Orchestrator::apply`] with the process environment as fallback lookup.
    pub fn apply_with_env(
        &self,
        executor: &dyn ActionExecutor,
        options: &RunOptions,
    ) -> Result<RunResult> {
        self.apply(executor, Arc::new(EnvLookup), options)
    }
}
