use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigInvalidYaml,

    SchemaInvalid,
    DependencyUnknown,
    DependencyCycle,
    ActionAmbiguous,

    VariableUnresolved,
    ActionExecutionFailed,

    ValidationInvalidArgument,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "config.not_found",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",

            ErrorCode::SchemaInvalid => "schema.invalid",
            ErrorCode::DependencyUnknown => "dependency.unknown",
            ErrorCode::DependencyCycle => "dependency.cycle",
            ErrorCode::ActionAmbiguous => "action.ambiguous",

            ErrorCode::VariableUnresolved => "variable.unresolved",
            ErrorCode::ActionExecutionFailed => "action.execution_failed",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Structural errors are detected before any action runs and abort the whole run.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ErrorCode::SchemaInvalid
                | ErrorCode::DependencyUnknown
                | ErrorCode::DependencyCycle
                | ErrorCode::ActionAmbiguous
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInvalidDetails {
    pub component: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyUnknownDetails {
    pub component: String,
    pub dependency: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCycleDetails {
    pub cycle: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAmbiguousDetails {
    pub component: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableUnresolvedDetails {
    pub component: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionExecutionFailedDetails {
    pub component: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidYamlDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        let retryable = if code.is_structural() {
            Some(false)
        } else {
            None
        };
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable,
        }
    }

    pub fn schema_invalid(component: impl Into<String>, problem: impl Into<String>) -> Self {
        let component = component.into();
        let problem = problem.into();
        let message = if component.is_empty() {
            format!("Invalid configuration: {}", problem)
        } else {
            format!("Invalid component '{}': {}", component, problem)
        };
        Self::new(
            ErrorCode::SchemaInvalid,
            message,
            to_details(SchemaInvalidDetails { component, problem }),
        )
    }

    pub fn dependency_unknown(component: impl Into<String>, dependency: impl Into<String>) -> Self {
        let component = component.into();
        let dependency = dependency.into();
        Self::new(
            ErrorCode::DependencyUnknown,
            format!(
                "Component '{}' needs unknown component '{}'",
                component, dependency
            ),
            to_details(DependencyUnknownDetails {
                component,
                dependency,
            }),
        )
        .with_hint("Entries in 'needs' are dot-qualified paths such as 'parent.child'")
    }

    pub fn dependency_cycle(cycle: Vec<String>) -> Self {
        Self::new(
            ErrorCode::DependencyCycle,
            format!("Dependency cycle detected: {}", cycle.join(" -> ")),
            to_details(DependencyCycleDetails { cycle }),
        )
    }

    pub fn action_ambiguous(component: impl Into<String>, actions: Vec<String>) -> Self {
        let component = component.into();
        Self::new(
            ErrorCode::ActionAmbiguous,
            format!(
                "Component '{}' declares more than one action: {}",
                component,
                actions.join(", ")
            ),
            to_details(ActionAmbiguousDetails { component, actions }),
        )
        .with_hint("Split the actions into separate components and order them with 'needs'")
    }

    pub fn variable_unresolved(
        component: impl Into<String>,
        name: impl Into<String>,
        value_from: Option<String>,
    ) -> Self {
        let component = component.into();
        let name = name.into();
        let message = match value_from.as_deref() {
            Some(key) => format!(
                "Variable '{}' of component '{}' could not be resolved from '{}' and has no value",
                name, component, key
            ),
            None => format!(
                "Variable '{}' of component '{}' has neither valueFrom nor value",
                name, component
            ),
        };
        Self::new(
            ErrorCode::VariableUnresolved,
            message,
            to_details(VariableUnresolvedDetails {
                component,
                name,
                value_from,
            }),
        )
    }

    pub fn action_execution_failed(
        component: impl Into<String>,
        action: impl Into<String>,
        diagnostics: Option<String>,
    ) -> Self {
        let component = component.into();
        let action = action.into();
        Self::new(
            ErrorCode::ActionExecutionFailed,
            format!("{} action of component '{}' failed", action, component),
            to_details(ActionExecutionFailedDetails {
                component,
                action,
                diagnostics,
            }),
        )
    }

    pub fn config_not_found(dir: impl Into<String>, tried: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ConfigNotFound,
            "No kanvas configuration found",
            serde_json::json!({ "dir": dir.into(), "tried": tried }),
        )
        .with_hint("Create kanvas.yaml or pass --config <path>")
    }

    pub fn config_invalid_yaml(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidYaml,
            "Invalid YAML in configuration",
            to_details(ConfigInvalidYamlDetails {
                path: path.into(),
                error: error.into(),
            }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem: problem.into(),
            }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}
