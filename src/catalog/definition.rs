use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Serialize, Deserialize};

use crate::error::PackagerError;

/// One data-source query of a collection.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<String>,
}

/// A named investigative procedure loaded from a definition file.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CollectionDefinition {
    pub name: String,
    pub collection_type: String,
    pub description: String,
    pub file_path: PathBuf,
    pub parameters: BTreeMap<String, String>,
    pub preconditions: Vec<String>,
    pub sources: Vec<Source>,
    /// Declared and extracted tool names, in order of first discovery
    pub dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ParameterEntry {
    name: String,
    #[serde(default)]
    default: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    name: String,
}

/// On-disk shape of a definition file. Unrecognised keys are ignored.
#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    collection_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Vec<ParameterEntry>,
    #[serde(default)]
    precondition: Option<String>,
    #[serde(default)]
    preconditions: Vec<String>,
    #[serde(default)]
    sources: Vec<Source>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    tools: Vec<ToolEntry>,
}

/// Render a YAML scalar default the way it reads in the file.
fn value_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

impl CollectionDefinition {
    /// Parse definition YAML. `path` is recorded as the origin.
    pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self, PackagerError> {
        let raw: DefinitionFile = serde_yaml::from_str(content)
            .map_err(|e| PackagerError::parse(path, e))?;

        let parameters = raw.parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.as_ref().map(value_to_string).unwrap_or_default()))
            .collect();

        let mut preconditions = Vec::new();
        if let Some(precondition) = raw.precondition {
            preconditions.push(precondition);
        }
        preconditions.extend(raw.preconditions);

        let mut definition = CollectionDefinition {
            name: raw.name.unwrap_or_default().trim().to_string(),
            collection_type: raw.collection_type.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            file_path: path.to_path_buf(),
            parameters,
            preconditions,
            sources: raw.sources,
            dependencies: Vec::new(),
        };

        let declared = raw.dependencies.into_iter().chain(raw.tools.into_iter().map(|t| t.name));
        for name in declared {
            definition.add_dependency(&name);
        }

        Ok(definition)
    }

    /// Read and parse a definition file.
    pub fn from_file(path: &Path) -> Result<Self, PackagerError> {
        let content = fs::read_to_string(path)
            .map_err(|e| PackagerError::parse(path, e))?;

        let definition = Self::from_yaml_str(&content, path)?;
        debug!("Parsed definition '{}' from {}", definition.name, path.display());
        Ok(definition)
    }

    /// Add a tool name unless it is already listed. Returns true when added.
    ///
    /// Names are lower-cased so declared and extracted references to the
    /// same tool collapse to one entry.
    pub fn add_dependency(&mut self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        if name.is_empty() || self.dependencies.contains(&name) {
            return false;
        }
        self.dependencies.push(name);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOWS_AUTORUNS: &str = r#"
name: Windows.Sysinternals.Autoruns
type: CLIENT
description: Uses autorunsc to enumerate persistence.
precondition: SELECT OS From info() where OS = 'windows'
parameters:
  - name: AutorunsArgs
    default: "-nobanner -accepteula"
  - name: ToolTimeout
    default: 300
tools:
  - name: autorunsc
    url: https://download.sysinternals.com/files/Autoruns.zip
sources:
  - query: |
      SELECT * FROM execve(argv=["autorunsc.exe", "-a", "*"])
"#;

    #[test]
    fn test_parse_full_definition() {
        let def = CollectionDefinition::from_yaml_str(WINDOWS_AUTORUNS, Path::new("autoruns.yaml")).unwrap();

        assert_eq!(def.name, "Windows.Sysinternals.Autoruns");
        assert_eq!(def.collection_type, "CLIENT");
        assert_eq!(def.file_path, PathBuf::from("autoruns.yaml"));
        assert_eq!(def.preconditions.len(), 1);
        assert_eq!(def.sources.len(), 1);
        assert_eq!(def.parameters.get("AutorunsArgs").map(String::as_str), Some("-nobanner -accepteula"));
        assert_eq!(def.parameters.get("ToolTimeout").map(String::as_str), Some("300"));
        assert_eq!(def.dependencies, vec!["autorunsc".to_string()]);
    }

    #[test]
    fn test_declared_dependencies_deduplicated() {
        let yaml = r#"
name: Dup
dependencies: [yara, yara]
tools:
  - name: yara
sources:
  - query: SELECT * FROM info()
"#;
        let def = CollectionDefinition::from_yaml_str(yaml, Path::new("dup.yaml")).unwrap();
        assert_eq!(def.dependencies, vec!["yara".to_string()]);
    }

    #[test]
    fn test_declared_and_extracted_names_share_one_entry() {
        let yaml = r#"
name: Windows.Yara
dependencies: [YARA]
tools:
  - name: Yara
sources:
  - query: SELECT * FROM execve(argv=["yara.exe", "-r"])
"#;
        let mut def = CollectionDefinition::from_yaml_str(yaml, Path::new("yara.yaml")).unwrap();
        assert_eq!(crate::catalog::extractor::enrich(&mut def), 0);
        assert_eq!(def.dependencies, vec!["yara".to_string()]);
    }

    #[test]
    fn test_precondition_forms_are_merged_in_order() {
        let yaml = r#"
name: Merge
precondition: first
preconditions: [second, third]
"#;
        let def = CollectionDefinition::from_yaml_str(yaml, Path::new("merge.yaml")).unwrap();
        assert_eq!(def.preconditions, vec!["first", "second", "third"]);
        assert!(def.sources.is_empty());
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let result = CollectionDefinition::from_yaml_str("name: [unclosed", Path::new("bad.yaml"));
        match result {
            Err(PackagerError::Parse { path, .. }) => assert_eq!(path, PathBuf::from("bad.yaml")),
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_add_dependency_ignores_blank_names() {
        let mut def = CollectionDefinition::default();
        assert!(!def.add_dependency("  "));
        assert!(def.add_dependency("lsof"));
        assert!(!def.add_dependency("LSOF"));
        assert_eq!(def.dependencies.len(), 1);
    }
}
