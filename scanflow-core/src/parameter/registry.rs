//! Parameter resolution
//!
//! Resolves the effective value of every known key for one job:
//! job value, then product mandatory default, then product optional default,
//! then the key's static default. Generated keys only ever take the
//! computed value.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use super::{CATALOG, KeyKind, ParameterKey, env_name};
use crate::product::ProductSetup;

/// Registry over a set of key definitions
#[derive(Debug, Clone, Copy)]
pub struct ParameterRegistry {
    keys: &'static [ParameterKey],
}

impl Default for ParameterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ParameterRegistry {
    /// Registry over the standard catalog
    pub fn standard() -> Self {
        Self { keys: CATALOG }
    }

    pub fn with_keys(keys: &'static [ParameterKey]) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &'static [ParameterKey] {
        self.keys
    }

    pub fn find(&self, id: &str) -> Option<&'static ParameterKey> {
        self.keys.iter().find(|key| key.id == id)
    }

    /// Removes caller supplied values for generated keys
    pub fn sanitize(&self, supplied: &HashMap<String, String>) -> HashMap<String, String> {
        supplied
            .iter()
            .filter(|(id, _)| {
                let generated = self.find(id).is_some_and(|key| key.is_generated());
                if generated {
                    warn!("Ignoring supplied value for generated parameter {}", id);
                }
                !generated
            })
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    }

    /// Resolves all parameters for one job of `product`
    ///
    /// `supplied` holds the job-specific values, `generated` the values the
    /// system computed. Keys declared by the product are visible inside the
    /// launcher script. Supplied keys neither in the catalog nor declared by
    /// the product are dropped.
    pub fn resolve(
        &self,
        product: &ProductSetup,
        supplied: &HashMap<String, String>,
        generated: &HashMap<String, String>,
    ) -> ResolvedParameters {
        let mut resolved = ResolvedParameters::default();

        for key in self.keys {
            let value = if key.is_generated() {
                if supplied.contains_key(key.id) {
                    warn!("Ignoring supplied value for generated parameter {}", key.id);
                }
                generated.get(key.id).cloned()
            } else {
                supplied
                    .get(key.id)
                    .cloned()
                    .or_else(|| product.parameters.default_for(key.id).map(str::to_string))
                    .or_else(|| key.default.map(str::to_string))
            };

            match value {
                Some(value) => resolved.insert(key.id, value, key.available_inside_script),
                None if key.kind == KeyKind::Mandatory => resolved.missing.push(key.id.to_string()),
                None => {}
            }
        }

        let product_keys = product
            .parameters
            .mandatory
            .iter()
            .map(|p| (p, true))
            .chain(product.parameters.optional.iter().map(|p| (p, false)));

        for (definition, mandatory) in product_keys {
            if self.find(&definition.key).is_some() || resolved.values.contains_key(&definition.key) {
                continue;
            }
            let value = supplied
                .get(&definition.key)
                .cloned()
                .or_else(|| product.parameters.default_for(&definition.key).map(str::to_string));
            match value {
                Some(value) => resolved.insert(&definition.key, value, true),
                None if mandatory => resolved.missing.push(definition.key.clone()),
                None => {}
            }
        }

        for id in supplied.keys() {
            if self.find(id).is_none() && !resolved.values.contains_key(id) {
                debug!("Ignoring parameter {}, not declared by product {}", id, product.id);
            }
        }

        resolved
    }
}

/// Result of a parameter resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedParameters {
    values: BTreeMap<String, String>,
    script_visible: BTreeSet<String>,
    missing: Vec<String>,
}

impl ResolvedParameters {
    fn insert(&mut self, id: &str, value: String, script_visible: bool) {
        if script_visible {
            self.script_visible.insert(id.to_string());
        }
        self.values.insert(id.to_string(), value);
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.values.get(id).map(String::as_str)
    }

    /// Parses a numeric value, ignoring values that are not numbers
    pub fn get_u64(&self, id: &str) -> Option<u64> {
        let raw = self.get(id)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Parameter {} has no numeric value: {}", id, raw);
                None
            }
        }
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.get(id).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    /// Mandatory keys that ended up without any value
    pub fn missing_mandatory(&self) -> &[String] {
        &self.missing
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Environment variables for all script visible keys
    pub fn env_variables(&self) -> BTreeMap<String, String> {
        self.script_visible
            .iter()
            .filter_map(|id| self.values.get(id).map(|value| (env_name(id), value.clone())))
            .collect()
    }
}
