//! Terraform variable resolution.
//!
//! A [`Var`] resolves from its `valueFrom` key when the lookup has a value for
//! it, otherwise from its literal `value`. Lookups are shared across worker
//! threads and must tolerate concurrent reads.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::config::Var;
use crate::error::{Error, Result};

pub trait VariableLookup: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Reads `valueFrom` keys from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvLookup;

impl VariableLookup for EnvLookup {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Outputs published by completed components, keyed `<component>.<output>`.
#[derive(Debug, Default)]
pub struct OutputStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, component: &str, outputs: &BTreeMap<String, String>) {
        if outputs.is_empty() {
            return;
        }
        let mut values = match self.values.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (name, value) in outputs {
            values.insert(format!("{}.{}", component, name), value.clone());
        }
    }
}

impl VariableLookup for OutputStore {
    fn lookup(&self, key: &str) -> Option<String> {
        match self.values.read() {
            Ok(guard) => guard.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }
}

/// Tries each lookup in order; the first hit wins.
#[derive(Clone, Default)]
pub struct ChainLookup {
    sources: Vec<Arc<dyn VariableLookup>>,
}

impl ChainLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn VariableLookup>) -> Self {
        self.sources.push(source);
        self
    }
}

impl VariableLookup for ChainLookup {
    fn lookup(&self, key: &str) -> Option<String> {
        self.sources.iter().find_map(|source| source.lookup(key))
    }
}

impl VariableLookup for BTreeMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVar {
    pub name: String,
    pub value: String,
}

/// Resolve a single variable declared by `component`.
pub fn resolve(component: &str, var: &Var, lookup: &dyn VariableLookup) -> Result<String> {
    let value_from = var.value_from.as_deref().filter(|key| !key.is_empty());

    if let Some(key) = value_from {
        if let Some(found) = lookup.lookup(key) {
            return Ok(found);
        }
        tracing::debug!(component, var = %var.name, key, "valueFrom lookup missed");
    }

    var.value.clone().ok_or_else(|| {
        Error::variable_unresolved(component, &var.name, value_from.map(str::to_string))
    })
}

pub fn resolve_all(
    component: &str,
    vars: &[Var],
    lookup: &dyn VariableLookup,
) -> Result<Vec<ResolvedVar>> {
    vars.iter()
        .map(|var| {
            Ok(ResolvedVar {
                name: var.name.clone(),
                value: resolve(component, var, lookup)?,
            })
        })
        .collect()
}
