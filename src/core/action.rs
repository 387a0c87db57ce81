//! Invocation requests handed to an [`ActionExecutor`].
//!
//! Each actionable component maps to exactly one [`Invocation`]; grouping
//! nodes and leaves without an action map to none.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::component::{Action, ComponentNode};
use crate::error::Result;
use crate::variable::{self, ResolvedVar, VariableLookup};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionRequest {
    Docker {
        image: String,
        /// Dockerfile joined onto the component's directory.
        dockerfile: PathBuf,
    },
    Terraform {
        target: String,
        vars: Vec<ResolvedVar>,
    },
    Kubernetes,
}

impl ActionRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionRequest::Docker { .. } => "docker",
            ActionRequest::Terraform { .. } => "terraform",
            ActionRequest::Kubernetes => "kubernetes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub component: String,
    pub dir: PathBuf,
    pub action: ActionRequest,
}

/// What an executor reports back for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    /// Published as `<component>.<name>` for later `valueFrom` lookups.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl ActionOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostics: Some(diagnostics.into()),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}

pub trait ActionExecutor: Send + Sync {
    fn execute(&self, invocation: &Invocation) -> Result<ActionOutcome>;
}

/// Build the invocation for `node`, resolving terraform variables through `lookup`.
///
/// Returns `Ok(None)` for components without an action.
pub fn build_invocation(
    node: &ComponentNode,
    lookup: &dyn VariableLookup,
) -> Result<Option<Invocation>> {
    let action = match &node.action {
        Action::None => return Ok(None),
        Action::Docker(docker) => ActionRequest::Docker {
            image: docker.image.clone(),
            dockerfile: node.dir.join(&docker.file),
        },
        Action::Terraform(terraform) => ActionRequest::Terraform {
            target: terraform.target.clone(),
            vars: variable::resolve_all(&node.identity, &terraform.vars, lookup)?,
        },
        Action::Kubernetes => ActionRequest::Kubernetes,
    };

    Ok(Some(Invocation {
        component: node.identity.clone(),
        dir: node.dir.clone(),
        action,
    }))
}
