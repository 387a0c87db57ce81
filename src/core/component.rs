//! Arena-backed component tree.
//!
//! Nodes are addressed by [`ComponentId`]; parent/child links are id lists so
//! the tree and the dependency edges layered on top of it never form
//! ownership cycles. Identities are dot-joined paths from the root
//! (`product1.api`); the root itself has the empty identity.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::{ComponentConfig, Docker, Terraform};
use crate::error::{Error, Result};

pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ComponentId(usize);

impl ComponentId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The single action a component runs. Grouping nodes carry `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    None,
    Docker(Docker),
    Terraform(Terraform),
    Kubernetes,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::Docker(_) => "docker",
            Action::Terraform(_) => "terraform",
            Action::Kubernetes => "kubernetes",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Action::None)
    }

    fn from_config(identity: &str, config: &ComponentConfig) -> Result<Self> {
        let mut populated = Vec::new();
        if config.docker.is_some() {
            populated.push("docker".to_string());
        }
        if config.terraform.is_some() {
            populated.push("terraform".to_string());
        }
        if config.kubernetes.is_some() {
            populated.push("kubernetes".to_string());
        }
        if populated.len() > 1 {
            return Err(Error::action_ambiguous(identity, populated));
        }

        Ok(if let Some(docker) = &config.docker {
            Action::Docker(Docker {
                image: docker.image.clone(),
                file: if docker.file.is_empty() {
                    DEFAULT_DOCKERFILE.to_string()
                } else {
                    docker.file.clone()
                },
            })
        } else if let Some(terraform) = &config.terraform {
            Action::Terraform(terraform.clone())
        } else if config.kubernetes.is_some() {
            Action::Kubernetes
        } else {
            Action::None
        })
    }
}

#[derive(Debug, Clone)]
pub struct ComponentNode {
    pub id: ComponentId,
    pub name: String,
    pub identity: String,
    pub parent: Option<ComponentId>,
    pub children: Vec<ComponentId>,
    /// Resolved working directory (inheritance applied).
    pub dir: PathBuf,
    pub needs: Vec<String>,
    pub action: Action,
}

#[derive(Debug, Clone)]
pub struct ComponentTree {
    nodes: Vec<ComponentNode>,
    by_identity: HashMap<String, ComponentId>,
}

fn is_valid_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("component name pattern"))
        .is_match(name)
}

fn resolve_dir(parent_dir: &Path, dir: &str) -> PathBuf {
    if dir.is_empty() {
        return parent_dir.to_path_buf();
    }
    let expanded = PathBuf::from(shellexpand::tilde(dir).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        parent_dir.join(expanded)
    }
}

impl ComponentTree {
    /// Build the tree from the configuration root. `base_dir` is the root's default `dir`.
    pub fn build(root: &ComponentConfig, base_dir: &Path) -> Result<Self> {
        if !root.needs.is_empty() {
            return Err(Error::schema_invalid(
                "",
                "the top-level document cannot declare 'needs'",
            ));
        }
        if root.docker.is_some() || root.terraform.is_some() || root.kubernetes.is_some() {
            return Err(Error::schema_invalid(
                "",
                "the top-level document cannot declare an action; move it into a component",
            ));
        }

        let mut tree = Self {
            nodes: Vec::new(),
            by_identity: HashMap::new(),
        };
        let root_id = tree.push(ComponentNode {
            id: ComponentId(0),
            name: String::new(),
            identity: String::new(),
            parent: None,
            children: Vec::new(),
            dir: resolve_dir(base_dir, &root.dir),
            needs: Vec::new(),
            action: Action::None,
        });
        tree.add_children(root_id, root)?;

        tracing::debug!(components = tree.nodes.len() - 1, "built component tree");
        Ok(tree)
    }

    fn push(&mut self, mut node: ComponentNode) -> ComponentId {
        let id = ComponentId(self.nodes.len());
        node.id = id;
        self.by_identity.insert(node.identity.clone(), id);
        self.nodes.push(node);
        id
    }

    fn add_children(&mut self, parent: ComponentId, config: &ComponentConfig) -> Result<()> {
        let mut seen: Vec<&str> = Vec::with_capacity(config.components.len());

        for (name, child) in config.components.iter() {
            let parent_node = &self.nodes[parent.0];
            let identity = if parent_node.identity.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", parent_node.identity, name)
            };

            if !is_valid_name(name) {
                return Err(Error::schema_invalid(
                    identity,
                    "names may only contain letters, digits, '_' and '-'",
                ));
            }
            if seen.contains(&name) {
                return Err(Error::schema_invalid(
                    identity,
                    format!("duplicate component name '{}'", name),
                ));
            }
            seen.push(name);

            let node = ComponentNode {
                id: ComponentId(0),
                name: name.to_string(),
                dir: resolve_dir(&parent_node.dir, &child.dir),
                parent: Some(parent),
                children: Vec::new(),
                needs: child.needs.clone(),
                action: Action::from_config(&identity, child)?,
                identity,
            };
            let id = self.push(node);
            self.nodes[parent.0].children.push(id);
            self.add_children(id, child)?;
        }

        Ok(())
    }

    pub fn root(&self) -> ComponentId {
        ComponentId(0)
    }

    pub fn get(&self, id: ComponentId) -> &ComponentNode {
        &self.nodes[id.0]
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// All components except the root, in depth-first declaration order.
    pub fn components(&self) -> impl Iterator<Item = &ComponentNode> {
        self.nodes.iter().skip(1)
    }

    pub fn find(&self, identity: &str) -> Option<ComponentId> {
        if identity.is_empty() {
            return None;
        }
        self.by_identity.get(identity).copied()
    }

    /// Resolve a `needs` entry declared on `from`: a fully qualified identity
    /// first, then a sibling-relative path under `from`'s parent.
    pub fn resolve_need(&self, from: ComponentId, need: &str) -> Option<ComponentId> {
        if let Some(id) = self.find(need) {
            return Some(id);
        }
        let parent = self.get(from).parent?;
        let parent_identity = &self.get(parent).identity;
        if parent_identity.is_empty() {
            return None;
        }
        self.find(&format!("{}.{}", parent_identity, need))
    }

    /// Ancestors of `id` from nearest to farthest, excluding the root.
    pub fn ancestors(&self, id: ComponentId) -> impl Iterator<Item = ComponentId> + '_ {
        std::iter::successors(self.get(id).parent, move |current| self.get(*current).parent)
            .filter(move |ancestor| ancestor.0 != 0)
    }
}
