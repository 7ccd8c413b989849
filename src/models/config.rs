// Shared service configuration
// The single configuration object the shared service reads, and the fixed set
// of property names that tenants may override

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{Result, TenantMuxError};

/// Configuration object of the shared conversational-agent service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Reasoning model name
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Low-cost model used for cheap background calls
    #[serde(default)]
    pub low_cost_model: String,
    #[serde(default)]
    pub low_cost_endpoint: String,
    #[serde(default)]
    pub low_cost_api_keys: Vec<String>,

    /// Persona prompt text
    #[serde(default)]
    pub persona: String,

    #[serde(default)]
    pub affinity_thresholds: [f64; 4],
    #[serde(default)]
    pub affinity_texts: [String; 5],

    #[serde(default)]
    pub mood_thresholds: [f64; 2],
    #[serde(default)]
    pub mood_texts: [String; 3],

    /// Settings the multiplexer never overrides
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A property of [`ServiceConfig`] that tenants may override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigProperty {
    Model,
    Endpoint,
    ApiKeys,
    LowCostModel,
    LowCostEndpoint,
    LowCostApiKeys,
    Persona,
    AffinityThreshold(usize),
    AffinityText(usize),
    MoodThreshold(usize),
    MoodText(usize),
}

impl ConfigProperty {
    /// Every overridable property
    pub fn all() -> Vec<ConfigProperty> {
        let mut all = vec![
            ConfigProperty::Model,
            ConfigProperty::Endpoint,
            ConfigProperty::ApiKeys,
            ConfigProperty::LowCostModel,
            ConfigProperty::LowCostEndpoint,
            ConfigProperty::LowCostApiKeys,
            ConfigProperty::Persona,
        ];
        all.extend((0..4).map(ConfigProperty::AffinityThreshold));
        all.extend((0..5).map(ConfigProperty::AffinityText));
        all.extend((0..2).map(ConfigProperty::MoodThreshold));
        all.extend((0..3).map(ConfigProperty::MoodText));
        all
    }

    /// Parse a property name such as `persona` or `mood_text_2`
    pub fn parse(name: &str) -> Option<ConfigProperty> {
        let fixed = match name {
            "model" => Some(ConfigProperty::Model),
            "endpoint" => Some(ConfigProperty::Endpoint),
            "api_keys" => Some(ConfigProperty::ApiKeys),
            "low_cost_model" => Some(ConfigProperty::LowCostModel),
            "low_cost_endpoint" => Some(ConfigProperty::LowCostEndpoint),
            "low_cost_api_keys" => Some(ConfigProperty::LowCostApiKeys),
            "persona" => Some(ConfigProperty::Persona),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }

        let (prefix, index) = name.rsplit_once('_')?;
        let index: usize = index.parse().ok()?;
        let property = match prefix {
            "affinity_threshold" => ConfigProperty::AffinityThreshold(index),
            "affinity_text" => ConfigProperty::AffinityText(index),
            "mood_threshold" => ConfigProperty::MoodThreshold(index),
            "mood_text" => ConfigProperty::MoodText(index),
            _ => return None,
        };
        property.in_range().then_some(property)
    }

    fn in_range(&self) -> bool {
        match *self {
            ConfigProperty::AffinityThreshold(i) => i < 4,
            ConfigProperty::AffinityText(i) => i < 5,
            ConfigProperty::MoodThreshold(i) => i < 2,
            ConfigProperty::MoodText(i) => i < 3,
            _ => true,
        }
    }
}

impl fmt::Display for ConfigProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigProperty::Model => write!(f, "model"),
            ConfigProperty::Endpoint => write!(f, "endpoint"),
            ConfigProperty::ApiKeys => write!(f, "api_keys"),
            ConfigProperty::LowCostModel => write!(f, "low_cost_model"),
            ConfigProperty::LowCostEndpoint => write!(f, "low_cost_endpoint"),
            ConfigProperty::LowCostApiKeys => write!(f, "low_cost_api_keys"),
            ConfigProperty::Persona => write!(f, "persona"),
            ConfigProperty::AffinityThreshold(i) => write!(f, "affinity_threshold_{}", i),
            ConfigProperty::AffinityText(i) => write!(f, "affinity_text_{}", i),
            ConfigProperty::MoodThreshold(i) => write!(f, "mood_threshold_{}", i),
            ConfigProperty::MoodText(i) => write!(f, "mood_text_{}", i),
        }
    }
}

impl ServiceConfig {
    /// Read one overridable property
    pub fn property(&self, property: ConfigProperty) -> Value {
        match property {
            ConfigProperty::Model => Value::from(self.model.clone()),
            ConfigProperty::Endpoint => Value::from(self.endpoint.clone()),
            ConfigProperty::ApiKeys => Value::from(self.api_keys.clone()),
            ConfigProperty::LowCostModel => Value::from(self.low_cost_model.clone()),
            ConfigProperty::LowCostEndpoint => Value::from(self.low_cost_endpoint.clone()),
            ConfigProperty::LowCostApiKeys => Value::from(self.low_cost_api_keys.clone()),
            ConfigProperty::Persona => Value::from(self.persona.clone()),
            ConfigProperty::AffinityThreshold(i) => {
                self.affinity_thresholds.get(i).copied().map_or(Value::Null, Value::from)
            }
            ConfigProperty::AffinityText(i) => {
                self.affinity_texts.get(i).cloned().map_or(Value::Null, Value::from)
            }
            ConfigProperty::MoodThreshold(i) => {
                self.mood_thresholds.get(i).copied().map_or(Value::Null, Value::from)
            }
            ConfigProperty::MoodText(i) => {
                self.mood_texts.get(i).cloned().map_or(Value::Null, Value::from)
            }
        }
    }

    /// Read any field by name, overridable or not
    pub fn get(&self, name: &str) -> Option<Value> {
        match ConfigProperty::parse(name) {
            Some(property) => Some(self.property(property)),
            None => self.extra.get(name).cloned(),
        }
    }

    /// Assign one overridable property from a JSON value
    pub fn assign(&mut self, property: ConfigProperty, value: Value) -> Result<()> {
        fn text(property: ConfigProperty, value: Value) -> Result<String> {
            match value {
                Value::String(s) => Ok(s),
                other => Err(TenantMuxError::InvalidInput(format!(
                    "{} expects a string, got {}",
                    property, other
                ))),
            }
        }
        fn number(property: ConfigProperty, value: &Value) -> Result<f64> {
            value.as_f64().ok_or_else(|| {
                TenantMuxError::InvalidInput(format!("{} expects a number, got {}", property, value))
            })
        }

        if !property.in_range() {
            return Err(TenantMuxError::InvalidInput(format!("{} is out of range", property)));
        }
        match property {
            ConfigProperty::Model => self.model = text(property, value)?,
            ConfigProperty::Endpoint => self.endpoint = text(property, value)?,
            ConfigProperty::ApiKeys => self.api_keys = serde_json::from_value(value)?,
            ConfigProperty::LowCostModel => self.low_cost_model = text(property, value)?,
            ConfigProperty::LowCostEndpoint => self.low_cost_endpoint = text(property, value)?,
            ConfigProperty::LowCostApiKeys => self.low_cost_api_keys = serde_json::from_value(value)?,
            ConfigProperty::Persona => self.persona = text(property, value)?,
            ConfigProperty::AffinityThreshold(i) => {
                self.affinity_thresholds[i] = number(property, &value)?
            }
            ConfigProperty::AffinityText(i) => self.affinity_texts[i] = text(property, value)?,
            ConfigProperty::MoodThreshold(i) => self.mood_thresholds[i] = number(property, &value)?,
            ConfigProperty::MoodText(i) => self.mood_texts[i] = text(property, value)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_names_parse_back() {
        for property in ConfigProperty::all() {
            assert_eq!(ConfigProperty::parse(&property.to_string()), Some(property));
        }
        assert_eq!(ConfigProperty::all().len(), 21);
    }

    #[test]
    fn test_out_of_range_indices_are_not_properties() {
        assert_eq!(ConfigProperty::parse("mood_text_3"), None);
        assert_eq!(ConfigProperty::parse("affinity_threshold_4"), None);
        assert_eq!(ConfigProperty::parse("temperature"), None);
    }

    #[test]
    fn test_get_falls_through_to_extra_fields() {
        let config: ServiceConfig = serde_json::from_value(json!({
            "model": "base",
            "temperature": 0.4
        }))
        .unwrap();
        assert_eq!(config.get("model"), Some(json!("base")));
        assert_eq!(config.get("temperature"), Some(json!(0.4)));
        assert_eq!(config.get("missing"), None);
    }

    #[test]
    fn test_assign_rejects_wrong_shape() {
        let mut config = ServiceConfig::default();
        config.assign(ConfigProperty::MoodThreshold(1), json!(0.5)).unwrap();
        assert_eq!(config.mood_thresholds[1], 0.5);
        assert!(config.assign(ConfigProperty::Persona, json!(3)).is_err());
    }

    #[test]
    fn test_out_of_range_index_reads_null() {
        let mut config = ServiceConfig::default();
        assert_eq!(config.property(ConfigProperty::AffinityThreshold(7)), Value::Null);
        assert_eq!(config.property(ConfigProperty::MoodText(3)), Value::Null);
        assert!(config.assign(ConfigProperty::MoodThreshold(2), json!(0.5)).is_err());
    }
}
