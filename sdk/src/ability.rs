//! Ability contract
//!
//! An ability is a named action the agent can ask for in its reply. Each
//! ability describes itself with an [`AbilitySpec`] used to build the
//! catalogue shown to the model; the parameter list is documentation only
//! and is not enforced at dispatch time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Argument mapping produced by the model for an invocation
pub type AbilityArgs = serde_json::Map<String, serde_json::Value>;

/// One documented parameter of an ability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbilityParameter {
    pub name: String,
    pub description: String,
    /// JSON-schema-like type name ("string", "number", "object", ...)
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
}

impl AbilityParameter {
    /// A required parameter
    pub fn required(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind: kind.into(),
            required: true,
        }
    }

    /// An optional parameter
    pub fn optional(
        name: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Self-description of an ability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbilitySpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<AbilityParameter>,
    pub output_type: String,
}

impl AbilitySpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            output_type: "None".to_string(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, param: AbilityParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Set the documented output type
    pub fn returns(mut self, output_type: impl Into<String>) -> Self {
        self.output_type = output_type.into();
        self
    }
}

impl fmt::Display for AbilitySpec {
    /// Catalogue line: `name(param: type, other: type[, optional]) -> output: description`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .parameters
            .iter()
            .map(|p| {
                if p.required {
                    format!("{}: {}", p.name, p.kind)
                } else {
                    format!("{}: {}, optional", p.name, p.kind)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{}({}) -> {}: {}",
            self.name, params, self.output_type, self.description
        )
    }
}

/// Per-invocation context handed to an ability
#[derive(Debug, Clone)]
pub struct AbilityContext {
    /// Task the invocation belongs to; external stores are keyed by it
    pub task_id: String,

    /// Root directory of the task's workspace
    pub workspace: PathBuf,
}

impl AbilityContext {
    pub fn new(task_id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            task_id: task_id.into(),
            workspace: workspace.into(),
        }
    }
}

/// Raw result of an ability
#[derive(Debug, Clone, PartialEq)]
pub enum AbilityOutput {
    Text(String),
    Bytes(Vec<u8>),
    Empty,
}

impl AbilityOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Normalize to text: bytes are decoded lossily and empty output is ""
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Self::Empty => String::new(),
        }
    }
}

/// Ability-specific errors
#[derive(Debug, thiserror::Error)]
pub enum AbilityError {
    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Execution(String),

    #[error("Ability not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for AbilityError {
    fn from(err: std::io::Error) -> Self {
        AbilityError::Execution(err.to_string())
    }
}

/// Read a required string argument
pub fn arg_str<'a>(args: &'a AbilityArgs, key: &str) -> Result<&'a str, AbilityError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AbilityError::MissingArgument(key.to_string()))
}

/// Read an optional string argument; empty strings count as absent
pub fn arg_str_opt<'a>(args: &'a AbilityArgs, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

/// An action the agent can invoke
#[async_trait]
pub trait Ability: Send + Sync {
    /// Self-description for the catalogue
    fn spec(&self) -> AbilitySpec;

    /// Execute with the model-provided arguments
    async fn run(
        &self,
        ctx: &AbilityContext,
        args: &AbilityArgs,
    ) -> Result<AbilityOutput, AbilityError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_catalogue_line() {
        let spec = AbilitySpec::new("read_file", "Read a file from the workspace")
            .with_param(AbilityParameter::required("file_name", "string", "name"))
            .with_param(AbilityParameter::optional("encoding", "string", "enc"))
            .returns("string");

        assert_eq!(
            spec.to_string(),
            "read_file(file_name: string, encoding: string, optional) -> string: Read a file from the workspace"
        );
    }

    #[test]
    fn test_output_into_text() {
        assert_eq!(AbilityOutput::text("hi").into_text(), "hi");
        assert_eq!(AbilityOutput::Bytes(b"a.txt".to_vec()).into_text(), "a.txt");
        assert_eq!(AbilityOutput::Empty.into_text(), "");
    }

    #[test]
    fn test_arg_helpers() {
        let args = json!({"file_name": "notes.md", "url": ""});
        let args = args.as_object().cloned().unwrap_or_default();

        assert_eq!(arg_str(&args, "file_name").ok(), Some("notes.md"));
        assert!(matches!(
            arg_str(&args, "missing"),
            Err(AbilityError::MissingArgument(_))
        ));
        assert_eq!(arg_str_opt(&args, "url"), None);
    }
}
