//! Workflow Parser
//!
//! Loads workflow definitions from YAML. A file holds either a single
//! definition or a `workflows:` list of definitions. Every definition is
//! validated before it is returned.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde_yaml::Value as YamlValue;

use crate::error::DefinitionError;

use super::model::WorkflowDefinition;
use super::validator::validate_definition;

/// Parses one or more workflow definitions from YAML text.
pub fn parse_definitions(yaml: &str) -> Result<Vec<WorkflowDefinition>, DefinitionError> {
    let document: YamlValue = serde_yaml::from_str(yaml)
        .map_err(|e| DefinitionError::Parse(format!("invalid YAML: {}", e)))?;

    let definitions: Vec<WorkflowDefinition> = match document.get("workflows") {
        Some(list) => serde_yaml::from_value(list.clone())
            .map_err(|e| DefinitionError::Parse(e.to_string()))?,
        None => vec![serde_yaml::from_value(document)
            .map_err(|e| DefinitionError::Parse(e.to_string()))?],
    };

    for definition in &definitions {
        validate_definition(definition)?;
    }

    debug!("Parsed {} workflow definitions", definitions.len());
    Ok(definitions)
}

/// Loads workflow definitions from a YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use bimflow::workflow::load_definitions;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definitions = load_definitions("workflows.yaml")?;
///     println!("Loaded {} workflows", definitions.len());
///     Ok(())
/// }
/// ```
pub fn load_definitions(path: impl AsRef<Path>) -> Result<Vec<WorkflowDefinition>, DefinitionError> {
    let path = path.as_ref();
    info!("Loading workflow definitions from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        DefinitionError::Parse(format!(
            "failed to read '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());
    parse_definitions(&yaml_content)
}
