//! `kanvas.yaml` schema and loading.
//!
//! The document root is itself a [`ComponentConfig`]; nested components live
//! under `components`. Child order is preserved as written, and duplicate
//! sibling names survive deserialization so the tree builder can report them.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAMES: &[&str] = &["kanvas.yaml", "kanvas.yml"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentConfig {
    /// Directory to chdir into before running the action. Empty inherits the
    /// parent's directory; at the root it defaults to the config file's directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dir: String,
    #[serde(default, skip_serializing_if = "ComponentMap::is_empty")]
    pub components: ComponentMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<Docker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform: Option<Terraform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<Kubernetes>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Docker {
    /// Name of the image to build.
    #[serde(default)]
    pub image: String,
    /// Dockerfile path relative to the component's directory.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Terraform {
    /// Resource address passed as `-target`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars: Vec<Var>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Var {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Kubernetes {}

/// Ordered `name -> component` entries of a `components` mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentMap(Vec<(String, ComponentConfig)>);

impl ComponentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry. Duplicates are kept and rejected later by the tree builder.
    pub fn insert(&mut self, name: impl Into<String>, component: ComponentConfig) {
        self.0.push((name.into(), component));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ComponentConfig)> {
        self.0.iter().map(|(name, component)| (name.as_str(), component))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, ComponentConfig)> for ComponentMap {
    fn from_iter<I: IntoIterator<Item = (K, ComponentConfig)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Serialize for ComponentMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, component) in &self.0 {
            map.serialize_entry(name, component)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ComponentMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ComponentMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of component names to components")
            }

            fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(ComponentMap::new())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, component)) = access.next_entry::<String, ComponentConfig>()? {
                    entries.push((name, component));
                }
                Ok(ComponentMap(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// A parsed configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    /// Directory containing the config file; the root component's default `dir`.
    pub base_dir: PathBuf,
    pub root: ComponentConfig,
}

/// Parse a configuration document. `source` is only used in error details.
pub fn from_str(content: &str, source: &str) -> Result<ComponentConfig> {
    if content.trim().is_empty() {
        return Ok(ComponentConfig::default());
    }
    serde_yaml::from_str(content).map_err(|e| Error::config_invalid_yaml(source, e.to_string()))
}

/// Read and parse the configuration file at `path`.
pub fn load(path: &Path) -> Result<LoadedConfig> {
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| Error::internal_io(e.to_string(), Some("resolve cwd".to_string())))?
            .join(path)
    };

    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;
    let root = from_str(&content, &path.to_string_lossy())?;

    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    tracing::debug!(path = %path.display(), components = root.components.len(), "loaded config");

    Ok(LoadedConfig {
        path,
        base_dir,
        root,
    })
}

/// Find the configuration file in `dir`, trying each of [`CONFIG_FILE_NAMES`].
pub fn discover(dir: &Path) -> Result<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            Error::config_not_found(
                dir.to_string_lossy(),
                CONFIG_FILE_NAMES.iter().map(|s| s.to_string()).collect(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
components:
  product1:
    components:
      api:
        dir: containerimages/app
        docker:
          image: davinci-std/example
          file: Dockerfile
      base:
        dir: /terraform/module
        terraform:
          target: null_resource.eks_cluster
          vars:
          - name: containerimage_name
            valueFrom: product1.api.id
          - name: region
            value: ap-northeast-1
      argocd:
        dir: /tf2
        needs:
        - base
        terraform:
          target: aws_alb.argocd_api
      argocd_resources:
        dir: /tf2
        needs:
        - argocd
        kubernetes: {}
"#;

    #[test]
    fn parses_nested_components_in_document_order() {
        let root = from_str(SAMPLE, "kanvas.yaml").unwrap();
        let product = root.components.iter().next().unwrap();
        assert_eq!(product.0, "product1");

        let names: Vec<&str> = product.1.components.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["api", "base", "argocd", "argocd_resources"]);
    }

    #[test]
    fn parses_var_value_from_in_camel_case() {
        let root = from_str(SAMPLE, "kanvas.yaml").unwrap();
        let (_, product) = root.components.iter().next().unwrap();
        let (_, base) = product.components.iter().nth(1).unwrap();
        let vars = &base.terraform.as_ref().unwrap().vars;

        assert_eq!(vars[0].value_from.as_deref(), Some("product1.api.id"));
        assert_eq!(vars[0].value, None);
        assert_eq!(vars[1].value.as_deref(), Some("ap-northeast-1"));
    }

    #[test]
    fn empty_kubernetes_mapping_is_populated() {
        let root = from_str(SAMPLE, "kanvas.yaml").unwrap();
        let (_, product) = root.components.iter().next().unwrap();
        let (_, resources) = product.components.iter().nth(3).unwrap();
        assert_eq!(resources.kubernetes, Some(Kubernetes {}));
        assert_eq!(resources.needs, vec!["argocd".to_string()]);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = from_str("components:\n  a:\n    helm: {}\n", "kanvas.yaml").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_yaml");
    }

    #[test]
    fn empty_document_is_an_empty_root() {
        let root = from_str("\n", "kanvas.yaml").unwrap();
        assert!(root.components.is_empty());
    }

    #[test]
    fn load_uses_file_directory_as_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kanvas.yaml");
        std::fs::write(&path, "components:\n  a: {}\n").unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.base_dir, dir.path());
        assert_eq!(loaded.root.components.len(), 1);
    }

    #[test]
    fn discover_prefers_yaml_then_yml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kanvas.yml"), "").unwrap();
        assert_eq!(discover(dir.path()).unwrap(), dir.path().join("kanvas.yml"));

        std::fs::write(dir.path().join("kanvas.yaml"), "").unwrap();
        assert_eq!(discover(dir.path()).unwrap(), dir.path().join("kanvas.yaml"));
    }

    #[test]
    fn discover_reports_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(dir.path()).unwrap_err();
        assert_eq!(err.code.as_str(), "config.not_found");
    }

    #[test]
    fn serializes_back_to_mapping() {
        let root = from_str(SAMPLE, "kanvas.yaml").unwrap();
        let yaml = serde_yaml::to_string(&root).unwrap();
        assert_eq!(from_str(&yaml, "roundtrip").unwrap(), root);
    }
}
