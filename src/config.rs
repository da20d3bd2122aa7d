//! Layered configuration.
//!
//! Settings are stored by dotted path (`simulation_parameters.year_start`)
//! in up to three layers. Reads resolve the highest layer that holds a value:
//!
//! `Base` < `ComponentConfigs` < `Override`
//!
//! Every setting remembers its source (a component name, a file path,
//! `command_line_argument`, ...) so a surprising value can be traced back.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{lock_err, ConfigurationError, SimResult};
use crate::time::{checked_step, midyear, step_from_days};

/// Precedence layer of a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Built-in defaults.
    Base,
    /// Defaults declared by components during setup.
    ComponentConfigs,
    /// User supplied values (command line, configuration files).
    Override,
}

/// One layer's value for a path, with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub value: JsonValue,
    pub layer: Layer,
    pub source: String,
}

/// Layered key/value settings store.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    // Sorted by layer, at most one entry per layer.
    settings: BTreeMap<String, Vec<Setting>>,
}

impl ConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the kernel's base-layer defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        let defaults = json!({
            "simulation_parameters": {
                "year_start": 1990,
                "year_end": 2010,
                "time_step": 30.5,
                "population_size": 10_000,
                "initial_age": null,
            },
            "run_configuration": {
                "draw_number": 0,
                "configuration_name": "base",
            },
        });
        store.flatten_into(String::new(), &defaults, Layer::Base, "defaults");
        store
    }

    /// Sets one path in a layer, replacing any previous value in that layer.
    pub fn set(&mut self, path: &str, value: JsonValue, layer: Layer, source: &str) {
        let entries = self.settings.entry(path.to_string()).or_default();
        let setting = Setting {
            value,
            layer,
            source: source.to_string(),
        };
        match entries.binary_search_by(|s| s.layer.cmp(&layer)) {
            Ok(pos) => entries[pos] = setting,
            Err(pos) => entries.insert(pos, setting),
        }
    }

    /// Merges a nested JSON object into a layer.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Invalid` if `dict` is not a JSON object.
    pub fn read_dict(
        &mut self,
        dict: &JsonValue,
        layer: Layer,
        source: &str,
    ) -> Result<(), ConfigurationError> {
        if !dict.is_object() {
            return Err(ConfigurationError::Invalid {
                reason: format!("configuration from '{source}' must be an object"),
            });
        }
        self.flatten_into(String::new(), dict, layer, source);
        Ok(())
    }

    /// Reads a JSON file into a layer. The path is recorded as the source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Unreadable` if the file cannot be read or parsed.
    pub fn read(&mut self, path: &Path, layer: Layer) -> Result<(), ConfigurationError> {
        let source = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|e| ConfigurationError::Unreadable {
            path: source.clone(),
            reason: e.to_string(),
        })?;
        let dict: JsonValue =
            serde_json::from_str(&text).map_err(|e| ConfigurationError::Unreadable {
                path: source.clone(),
                reason: e.to_string(),
            })?;
        self.read_dict(&dict, layer, &source)
    }

    fn flatten_into(&mut self, prefix: String, value: &JsonValue, layer: Layer, source: &str) {
        match value {
            JsonValue::Object(map) if !map.is_empty() => {
                for (k, v) in map {
                    let path = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{prefix}.{k}")
                    };
                    self.flatten_into(path, v, layer, source);
                }
            }
            other => {
                if !prefix.is_empty() {
                    self.set(&prefix, other.clone(), layer, source);
                }
            }
        }
    }

    /// Resolves a path to its highest-precedence value.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        self.settings
            .get(path)
            .and_then(|entries| entries.last())
            .map(|s| &s.value)
    }

    /// Whether any layer holds a value for the path.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.settings.contains_key(path)
    }

    /// All settings recorded for a path, lowest layer first.
    #[must_use]
    pub fn provenance(&self, path: &str) -> &[Setting] {
        self.settings.get(path).map_or(&[], Vec::as_slice)
    }

    fn require(&self, path: &str) -> Result<&JsonValue, ConfigurationError> {
        self.get(path).ok_or_else(|| ConfigurationError::MissingKey {
            key: path.to_string(),
        })
    }

    /// Reads a float.
    ///
    /// # Errors
    ///
    /// `MissingKey` if unset, `WrongType` if not a number.
    pub fn get_f64(&self, path: &str) -> Result<f64, ConfigurationError> {
        self.require(path)?
            .as_f64()
            .ok_or_else(|| wrong_type(path, "number"))
    }

    /// Reads a signed integer.
    ///
    /// # Errors
    ///
    /// `MissingKey` if unset, `WrongType` if not an integer.
    pub fn get_i64(&self, path: &str) -> Result<i64, ConfigurationError> {
        self.require(path)?
            .as_i64()
            .ok_or_else(|| wrong_type(path, "integer"))
    }

    /// Reads an unsigned integer.
    ///
    /// # Errors
    ///
    /// `MissingKey` if unset, `WrongType` if not a non-negative integer.
    pub fn get_u64(&self, path: &str) -> Result<u64, ConfigurationError> {
        self.require(path)?
            .as_u64()
            .ok_or_else(|| wrong_type(path, "non-negative integer"))
    }

    /// Reads a string.
    ///
    /// # Errors
    ///
    /// `MissingKey` if unset, `WrongType` if not a string.
    pub fn get_str(&self, path: &str) -> Result<&str, ConfigurationError> {
        self.require(path)?
            .as_str()
            .ok_or_else(|| wrong_type(path, "string"))
    }

    /// Reads a boolean.
    ///
    /// # Errors
    ///
    /// `MissingKey` if unset, `WrongType` if not a boolean.
    pub fn get_bool(&self, path: &str) -> Result<bool, ConfigurationError> {
        self.require(path)?
            .as_bool()
            .ok_or_else(|| wrong_type(path, "boolean"))
    }

    /// Reads an optional float; `null` and unset both read as `None`.
    ///
    /// # Errors
    ///
    /// `WrongType` if set to something other than a number or null.
    pub fn get_opt_f64(&self, path: &str) -> Result<Option<f64>, ConfigurationError> {
        match self.get(path) {
            None | Some(JsonValue::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| wrong_type(path, "number")),
        }
    }

    /// Rebuilds the nested object below `prefix`.
    #[must_use]
    pub fn section(&self, prefix: &str) -> JsonValue {
        let mut root = Map::new();
        let dotted = format!("{prefix}.");
        for (path, entries) in &self.settings {
            let Some(rest) = path.strip_prefix(&dotted) else {
                continue;
            };
            let Some(setting) = entries.last() else {
                continue;
            };
            let mut node = &mut root;
            let mut parts = rest.split('.').peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_none() {
                    node.insert(part.to_string(), setting.value.clone());
                } else {
                    let child = node
                        .entry(part.to_string())
                        .or_insert_with(|| JsonValue::Object(Map::new()));
                    if !child.is_object() {
                        *child = JsonValue::Object(Map::new());
                    }
                    let JsonValue::Object(map) = child else {
                        break;
                    };
                    node = map;
                }
            }
        }
        JsonValue::Object(root)
    }
}

fn wrong_type(path: &str, expected: &'static str) -> ConfigurationError {
    ConfigurationError::WrongType {
        key: path.to_string(),
        expected,
    }
}

/// Shared handle to the run's configuration store.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    inner: Arc<RwLock<ConfigStore>>,
}

impl Configuration {
    /// Wraps an existing store.
    #[must_use]
    pub fn new(store: ConfigStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    /// A handle seeded with the kernel's base-layer defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ConfigStore::with_defaults())
    }

    /// Runs `f` against the store under a read lock.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn with_store<R>(&self, f: impl FnOnce(&ConfigStore) -> R) -> SimResult<R> {
        let guard = self.inner.read().map_err(|_| lock_err("configuration"))?;
        Ok(f(&guard))
    }

    fn with_store_mut<R>(&self, f: impl FnOnce(&mut ConfigStore) -> R) -> SimResult<R> {
        let mut guard = self.inner.write().map_err(|_| lock_err("configuration"))?;
        Ok(f(&mut guard))
    }

    /// See [`ConfigStore::set`].
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn set(&self, path: &str, value: JsonValue, layer: Layer, source: &str) -> SimResult<()> {
        self.with_store_mut(|s| s.set(path, value, layer, source))
    }

    /// See [`ConfigStore::read_dict`].
    ///
    /// # Errors
    ///
    /// Propagates configuration errors.
    pub fn read_dict(&self, dict: &JsonValue, layer: Layer, source: &str) -> SimResult<()> {
        self.with_store_mut(|s| s.read_dict(dict, layer, source))?
            .map_err(Into::into)
    }

    /// See [`ConfigStore::read`].
    ///
    /// # Errors
    ///
    /// Propagates configuration errors.
    pub fn read(&self, path: &Path, layer: Layer) -> SimResult<()> {
        self.with_store_mut(|s| s.read(path, layer))?
            .map_err(Into::into)
    }

    /// See [`ConfigStore::get`].
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn get(&self, path: &str) -> SimResult<Option<JsonValue>> {
        self.with_store(|s| s.get(path).cloned())
    }

    /// See [`ConfigStore::get_f64`].
    ///
    /// # Errors
    ///
    /// Propagates configuration errors.
    pub fn get_f64(&self, path: &str) -> SimResult<f64> {
        self.with_store(|s| s.get_f64(path))?.map_err(Into::into)
    }

    /// See [`ConfigStore::get_i64`].
    ///
    /// # Errors
    ///
    /// Propagates configuration errors.
    pub fn get_i64(&self, path: &str) -> SimResult<i64> {
        self.with_store(|s| s.get_i64(path))?.map_err(Into::into)
    }

    /// See [`ConfigStore::get_u64`].
    ///
    /// # Errors
    ///
    /// Propagates configuration errors.
    pub fn get_u64(&self, path: &str) -> SimResult<u64> {
        self.with_store(|s| s.get_u64(path))?.map_err(Into::into)
    }

    /// See [`ConfigStore::get_str`].
    ///
    /// # Errors
    ///
    /// Propagates configuration errors.
    pub fn get_str(&self, path: &str) -> SimResult<String> {
        self.with_store(|s| s.get_str(path).map(str::to_string))?
            .map_err(Into::into)
    }

    /// See [`ConfigStore::get_bool`].
    ///
    /// # Errors
    ///
    /// Propagates configuration errors.
    pub fn get_bool(&self, path: &str) -> SimResult<bool> {
        self.with_store(|s| s.get_bool(path))?.map_err(Into::into)
    }

    /// See [`ConfigStore::section`].
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn section(&self, prefix: &str) -> SimResult<JsonValue> {
        self.with_store(|s| s.section(prefix))
    }

    /// See [`ConfigStore::provenance`].
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn provenance(&self, path: &str) -> SimResult<Vec<Setting>> {
        self.with_store(|s| s.provenance(path).to_vec())
    }

    /// The configured draw number (`run_configuration.draw_number`, default 0).
    ///
    /// # Errors
    ///
    /// `WrongType` if the draw number is not a non-negative integer.
    pub fn draw_number(&self) -> SimResult<u64> {
        self.with_store(|s| {
            if s.contains("run_configuration.draw_number") {
                s.get_u64("run_configuration.draw_number")
            } else {
                Ok(0)
            }
        })?
        .map_err(Into::into)
    }
}

/// Time-loop parameters read from `simulation_parameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    pub year_start: i32,
    pub year_end: i32,
    /// Step size in days.
    pub time_step: f64,
    pub population_size: usize,
    /// Fixed age for the initial cohort, if any.
    pub initial_age: Option<f64>,
}

impl SimulationParameters {
    /// Reads and validates the parameters.
    ///
    /// # Errors
    ///
    /// Returns configuration errors for missing, mistyped or inconsistent values.
    pub fn from_store(store: &ConfigStore) -> Result<Self, ConfigurationError> {
        let year = |path: &str| -> Result<i32, ConfigurationError> {
            let raw = store.get_i64(path)?;
            i32::try_from(raw).map_err(|_| ConfigurationError::Invalid {
                reason: format!("{path} = {raw} is out of range"),
            })
        };
        let params = Self {
            year_start: year("simulation_parameters.year_start")?,
            year_end: year("simulation_parameters.year_end")?,
            time_step: store.get_f64("simulation_parameters.time_step")?,
            population_size: usize::try_from(
                store.get_u64("simulation_parameters.population_size")?,
            )
            .map_err(|_| ConfigurationError::Invalid {
                reason: "population_size does not fit in memory".to_string(),
            })?,
            initial_age: store.get_opt_f64("simulation_parameters.initial_age")?,
        };
        params.validate()?;
        Ok(params)
    }

    /// Validates the parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Invalid` on inconsistent values.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.year_end < self.year_start {
            return Err(ConfigurationError::Invalid {
                reason: format!(
                    "year_end ({}) must not precede year_start ({})",
                    self.year_end, self.year_start
                ),
            });
        }
        let step = step_from_days(self.time_step)?;
        midyear(self.year_start)?;
        // The last tick advances from before `year_end` to at most one step past it.
        checked_step(midyear(self.year_end)?, step)?;
        if let Some(age) = self.initial_age {
            if !age.is_finite() || age < 0.0 {
                return Err(ConfigurationError::Invalid {
                    reason: format!("initial_age must be a non-negative number, got {age}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid_parameters() {
        let store = ConfigStore::with_defaults();
        let params = SimulationParameters::from_store(&store).unwrap();
        assert_eq!(params.year_start, 1990);
        assert_eq!(params.year_end, 2010);
        assert!((params.time_step - 30.5).abs() < f64::EPSILON);
        assert_eq!(params.population_size, 10_000);
        assert_eq!(params.initial_age, None);
    }

    #[test]
    fn test_layer_precedence_is_independent_of_write_order() {
        let mut store = ConfigStore::new();
        store.set("a.b", json!(3), Layer::Override, "command_line_argument");
        store.set("a.b", json!(1), Layer::Base, "defaults");
        store.set("a.b", json!(2), Layer::ComponentConfigs, "screening");
        assert_eq!(store.get_i64("a.b").unwrap(), 3);

        let layers: Vec<Layer> = store.provenance("a.b").iter().map(|s| s.layer).collect();
        assert_eq!(
            layers,
            vec![Layer::Base, Layer::ComponentConfigs, Layer::Override]
        );
        assert_eq!(store.provenance("a.b")[1].source, "screening");
    }

    #[test]
    fn test_same_layer_write_replaces() {
        let mut store = ConfigStore::new();
        store.set("x", json!(1), Layer::ComponentConfigs, "first");
        store.set("x", json!(2), Layer::ComponentConfigs, "second");
        assert_eq!(store.provenance("x").len(), 1);
        assert_eq!(store.get_i64("x").unwrap(), 2);
    }

    #[test]
    fn test_read_dict_flattens_and_rebuilds_sections() {
        let mut store = ConfigStore::new();
        store
            .read_dict(
                &json!({"screening": {"test_cost": 3.5, "followup": {"months": 6}}}),
                Layer::ComponentConfigs,
                "screening",
            )
            .unwrap();
        assert!((store.get_f64("screening.test_cost").unwrap() - 3.5).abs() < f64::EPSILON);
        assert_eq!(store.get_i64("screening.followup.months").unwrap(), 6);
        assert_eq!(
            store.section("screening"),
            json!({"test_cost": 3.5, "followup": {"months": 6}})
        );
        assert!(store.read_dict(&json!(3), Layer::Base, "bad").is_err());
    }

    #[test]
    fn test_missing_and_wrong_type() {
        let mut store = ConfigStore::new();
        store.set("name", json!("x"), Layer::Base, "t");
        assert!(matches!(
            store.get_f64("nope"),
            Err(ConfigurationError::MissingKey { .. })
        ));
        assert!(matches!(
            store.get_f64("name"),
            Err(ConfigurationError::WrongType { .. })
        ));
        assert_eq!(store.get_opt_f64("nope").unwrap(), None);
    }

    #[test]
    fn test_read_file_into_override_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        fs::write(&path, r#"{"simulation_parameters": {"population_size": 25}}"#).unwrap();

        let config = Configuration::with_defaults();
        config.read(&path, Layer::Override).unwrap();
        assert_eq!(config.get_u64("simulation_parameters.population_size").unwrap(), 25);
        let prov = config.provenance("simulation_parameters.population_size").unwrap();
        assert_eq!(prov.last().unwrap().source, path.display().to_string());

        let missing = dir.path().join("missing.json");
        assert!(config.read(&missing, Layer::Override).unwrap_err().is_configuration());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut store = ConfigStore::with_defaults();
        store.set("simulation_parameters.year_end", json!(1980), Layer::Override, "t");
        assert!(SimulationParameters::from_store(&store).is_err());

        let mut store = ConfigStore::with_defaults();
        store.set("simulation_parameters.time_step", json!(0), Layer::Override, "t");
        assert!(SimulationParameters::from_store(&store).is_err());

        // A step that would carry the clock past the representable range.
        let mut store = ConfigStore::with_defaults();
        store.set("simulation_parameters.time_step", json!(1e9), Layer::Override, "t");
        assert!(SimulationParameters::from_store(&store).is_err());
    }

    #[test]
    fn test_draw_number() {
        let config = Configuration::default();
        assert_eq!(config.draw_number().unwrap(), 0);
        config
            .set("run_configuration.draw_number", json!(7), Layer::Override, "command_line_argument")
            .unwrap();
        assert_eq!(config.draw_number().unwrap(), 7);
    }
}
