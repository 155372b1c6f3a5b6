use serde::{Deserialize, Serialize};

/// Default value cache budget: 512 MiB.
pub const DEFAULT_MEMORY_LIMIT: usize = 512 * 1024 * 1024;

/// Default number of memoised output hashes.
pub const DEFAULT_HASH_CACHE_ENTRIES: usize = 65_536;

/// Engine tuning. Every field is optional in serialized form.
///
/// ```
/// let config = plugwork::EngineConfig::from_json(r#"{ "memory_limit": 1048576 }"#).unwrap();
/// assert_eq!(config.memory_limit, 1 << 20);
/// assert_eq!(config.hash_cache_entries, plugwork::config::DEFAULT_HASH_CACHE_ENTRIES);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget of the value cache in bytes.
    pub memory_limit: usize,
    /// Capacity of the per-engine hash memo.
    pub hash_cache_entries: usize,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            hash_cache_entries: DEFAULT_HASH_CACHE_ENTRIES,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn hash_cache_entries(mut self, entries: usize) -> Self {
        self.hash_cache_entries = entries;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_json() {
        let config = EngineConfig::new().memory_limit(64).hash_cache_entries(8);
        assert_eq!(
            config.to_json().unwrap(),
            r#"{"memory_limit":64,"hash_cache_entries":8}"#
        );
        assert_eq!(EngineConfig::from_json(&config.to_json().unwrap()).unwrap(), config);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(EngineConfig::from_json(r#"{ "memory_limit": "lots" }"#).is_err());
    }
}
