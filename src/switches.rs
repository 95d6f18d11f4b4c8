//! Process-level `-D key[=value]` switches
//!
//! Switches are the external lookup consulted for task skip properties.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::KilnError;

/// Name/value switches supplied for one invocation
#[derive(Debug, Clone, Default)]
pub struct Switches {
    values: HashMap<String, Option<String>>,
}

impl Switches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `key` or `key=value` definitions
    pub fn from_definitions<I, S>(definitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut switches = Self::new();
        for definition in definitions {
            let definition = definition.as_ref().trim();
            if definition.is_empty() {
                continue;
            }
            match definition.split_once('=') {
                Some((key, value)) => switches.set(key.trim(), Some(value.to_string())),
                None => switches.set(definition, None),
            }
        }
        switches
    }

    pub fn set(&mut self, key: impl Into<String>, value: Option<String>) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.values.get(key).map(|v| v.as_deref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// A key skips when present without a value or with any value but `false`
    pub fn skips(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Some(value)) => value != "false",
            Some(None) => true,
            None => false,
        }
    }

    /// First key of `keys` that is switched on
    pub fn first_skip<'a>(&self, keys: &'a [String]) -> Option<&'a str> {
        keys.iter().map(String::as_str).find(|k| self.skips(k))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromStr for Switches {
    type Err = KilnError;

    /// Parse a whitespace-separated list of definitions, e.g. `skip.test a=b`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_definitions(s.split_whitespace()))
    }
}

/// Parse a single `-D` argument for clap
pub fn parse_definition(s: &str) -> std::result::Result<String, String> {
    let key = s.split_once('=').map(|(k, _)| k).unwrap_or(s).trim();
    if key.is_empty() {
        return Err(format!("invalid switch '{}': missing key", s));
    }
    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_without_value_skips() {
        let switches = Switches::from_definitions(["skip.test"]);
        assert!(switches.skips("skip.test"));
        assert!(!switches.skips("skip.compile"));
    }

    #[test]
    fn test_explicit_false_does_not_skip() {
        let switches = Switches::from_definitions(["skip.test=false", "skip.jar=true", "skip.doc="]);
        assert!(!switches.skips("skip.test"));
        assert!(switches.skips("skip.jar"));
        assert!(switches.skips("skip.doc"));
        assert_eq!(switches.get("skip.jar"), Some(Some("true")));
    }

    #[test]
    fn test_first_skip() {
        let switches: Switches = "a=false b".parse().unwrap();
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(switches.first_skip(&keys), Some("b"));
    }

    #[test]
    fn test_parse_definition() {
        assert!(parse_definition("skip.test").is_ok());
        assert!(parse_definition("=x").is_err());
    }
}
