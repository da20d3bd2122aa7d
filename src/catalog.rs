//! Component catalog.
//!
//! Turns a component configuration file into component instances:
//!
//! ```json
//! {
//!   "components": ["base_population", {"name": "mortality", "params": {"rate": 0.01}}],
//!   "configuration": {"simulation_parameters": {"population_size": 1000}}
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::components::BasePopulation;
use crate::engine::Component;
use crate::error::{ConfigurationError, SimResult};

static NO_PARAMS: JsonValue = JsonValue::Null;

/// One entry of the `components` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentEntry {
    /// A bare component name.
    Name(String),
    /// A name with constructor parameters.
    Detailed {
        name: String,
        #[serde(default)]
        params: JsonValue,
    },
}

impl ComponentEntry {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }

    /// Constructor parameters; `Null` for a bare name.
    #[must_use]
    pub fn params(&self) -> &JsonValue {
        match self {
            Self::Name(_) => &NO_PARAMS,
            Self::Detailed { params, .. } => params,
        }
    }
}

/// Parsed component configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfiguration {
    pub components: Vec<ComponentEntry>,
    /// Configuration overrides shipped with the components.
    #[serde(default)]
    pub configuration: JsonValue,
}

impl ComponentConfiguration {
    /// # Errors
    ///
    /// `Unreadable` if `value` does not have the expected shape.
    pub fn from_json(value: JsonValue) -> Result<Self, ConfigurationError> {
        serde_json::from_value(value).map_err(|e| ConfigurationError::Unreadable {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    /// # Errors
    ///
    /// `Unreadable` if the file cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self, ConfigurationError> {
        let unreadable = |reason: String| ConfigurationError::Unreadable {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| unreadable(e.to_string()))
    }
}

/// Builds a component from its entry parameters.
pub type ComponentFactory = Arc<dyn Fn(&JsonValue) -> SimResult<Arc<dyn Component>> + Send + Sync>;

/// Registry of component factories by name.
#[derive(Clone, Default)]
pub struct ComponentCatalog {
    factories: BTreeMap<String, ComponentFactory>,
}

impl ComponentCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog knowing the built-in components.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().register("base_population", |_| {
            Ok(Arc::new(BasePopulation::new()) as Arc<dyn Component>)
        })
    }

    /// Adds or replaces the factory for `name`.
    #[must_use]
    pub fn register(
        mut self,
        name: impl Into<String>,
        factory: impl Fn(&JsonValue) -> SimResult<Arc<dyn Component>> + Send + Sync + 'static,
    ) -> Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiates every entry, in order.
    ///
    /// # Errors
    ///
    /// `UnknownComponent` for a name with no factory; factory errors as-is.
    pub fn resolve(&self, entries: &[ComponentEntry]) -> SimResult<Vec<Arc<dyn Component>>> {
        entries
            .iter()
            .map(|entry| {
                let factory = self.factories.get(entry.name()).ok_or_else(|| {
                    ConfigurationError::UnknownComponent {
                        name: entry.name().to_string(),
                    }
                })?;
                factory(entry.params())
            })
            .collect()
    }
}

impl fmt::Debug for ComponentCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCatalog")
            .field("components", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::from_fn;
    use serde_json::json;

    #[test]
    fn test_parses_bare_and_detailed_entries() {
        let config = ComponentConfiguration::from_json(json!({
            "components": ["base_population", {"name": "screening", "params": {"coverage": 0.4}}]
        }))
        .unwrap();
        assert_eq!(config.components.len(), 2);
        assert_eq!(config.components[0].name(), "base_population");
        assert_eq!(config.components[0].params(), &JsonValue::Null);
        assert_eq!(config.components[1].params()["coverage"], json!(0.4));
        assert_eq!(config.configuration, JsonValue::Null);
    }

    #[test]
    fn test_resolve_uses_registered_factories() {
        let catalog = ComponentCatalog::with_builtins().register("screening", |params| {
            let label = params["label"].as_str().unwrap_or("screening").to_string();
            Ok(from_fn(label, |_| Ok(Vec::new())))
        });
        let entries = vec![
            ComponentEntry::Name("base_population".to_string()),
            ComponentEntry::Detailed {
                name: "screening".to_string(),
                params: json!({"label": "breast_screening"}),
            },
        ];
        let components = catalog.resolve(&entries).unwrap();
        let names: Vec<&str> = components.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["base_population", "breast_screening"]);
    }

    #[test]
    fn test_unknown_component() {
        let err = ComponentCatalog::with_builtins()
            .resolve(&[ComponentEntry::Name("smoking".to_string())])
            .err().unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("smoking"));
    }

    #[test]
    fn test_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("components.json");
        std::fs::write(
            &path,
            r#"{"components": ["base_population"], "configuration": {"simulation_parameters": {"population_size": 5}}}"#,
        )
        .unwrap();
        let config = ComponentConfiguration::read(&path).unwrap();
        assert_eq!(
            config.configuration["simulation_parameters"]["population_size"],
            json!(5)
        );
        assert!(ComponentConfiguration::read(&dir.path().join("missing.json")).is_err());
    }
}
