//! Output formatting for CLI results.

use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Output format for printed configs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}

impl OutputFormat {
    pub fn render<T: Serialize + ?Sized>(self, value: &T) -> anyhow::Result<String> {
        Ok(match self {
            OutputFormat::Json => serde_json::to_string_pretty(value)?,
            OutputFormat::Yaml => serde_yaml::to_string(value)?,
        })
    }
}

/// Parse a command-line value: JSON5 when it parses, otherwise a string.
pub fn parse_value(raw: &str) -> Value {
    json5::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Set `value` at a dotted `key`, creating intermediate mappings.
pub fn set_dotted(target: &mut Value, key: &str, value: Value) {
    let mut node = target;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        node = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("8080").as_f64(), Some(8080.0));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("{a: 'x'}"), json!({"a": "x"}));
        assert_eq!(parse_value("example.com"), json!("example.com"));
    }

    #[test]
    fn test_set_dotted() {
        let mut config = json!({"server": {"host": "a"}, "flag": 1});
        set_dotted(&mut config, "server.port", json!(80));
        set_dotted(&mut config, "flag.nested", json!(true));
        assert_eq!(
            config,
            json!({"server": {"host": "a", "port": 80}, "flag": {"nested": true}})
        );
    }

    #[test]
    fn test_render_yaml() {
        let out = OutputFormat::Yaml.render(&json!({"a": 1})).unwrap();
        assert_eq!(out, "a: 1\n");
    }
}
